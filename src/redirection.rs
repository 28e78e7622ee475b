use std::fs::File;
use std::os::unix::io::RawFd;
use std::path::PathBuf;

/// Instruction for what to do with one of the child's standard streams.
///
/// A `Redirection` value is resolved by the spawner into a `(child_end,
/// parent_end)` pair — see the FD Resolver in `src/spawn.rs`.
#[derive(Debug)]
pub enum Redirection {
    /// Inherit the stream from the parent. No pipe is created and no file
    /// is opened; the child sees whatever fd 0/1/2 already refers to.
    None,

    /// Redirect the stream to a freshly created pipe.
    ///
    /// For stdin, the child gets the read end and the parent keeps the
    /// write end. For stdout/stderr, the child gets the write end and the
    /// parent keeps the read end.
    Pipe,

    /// Valid only for stdout or stderr (never both, never stdin): make the
    /// child's stderr refer to the same file description as its stdout (or
    /// vice versa), equivalent to the shell's `2>&1` / `1>&2`.
    Merge,

    /// Redirect the stream to an already-open file. The library does not
    /// close this handle; the caller retains ownership until the `File` is
    /// dropped or moved into this variant.
    File(File),

    /// Redirect the stream to an existing, numeric file descriptor.
    ///
    /// The fd is borrowed: the library duplicates it onto the target
    /// standard stream slot but does not close the original.
    Fd(RawFd),

    /// Redirect the stream to a path, opened by the library with the
    /// direction implied by the stream (read for stdin, write — truncating
    /// — for stdout/stderr). The opened file is owned by the library and
    /// closed in the parent once the child has it.
    Path(PathBuf),
}

impl Redirection {
    /// Best-effort clone. Used by `Pipeline` / `Exec` when a builder value
    /// needs to be inspected without consuming it. Variants that wrap a
    /// live resource (`File`) are only clonable via `try_clone`; `Fd` and
    /// `Path` clone trivially.
    pub(crate) fn try_clone(&self) -> std::io::Result<Redirection> {
        Ok(match self {
            Redirection::None => Redirection::None,
            Redirection::Pipe => Redirection::Pipe,
            Redirection::Merge => Redirection::Merge,
            Redirection::File(f) => Redirection::File(f.try_clone()?),
            Redirection::Fd(fd) => Redirection::Fd(*fd),
            Redirection::Path(p) => Redirection::Path(p.clone()),
        })
    }
}

mod sealed {
    pub trait InputRedirectionSealed {}
    pub trait OutputRedirectionSealed {}
}

/// Data to feed a child's stdin, or a redirection that needs no data.
#[derive(Debug)]
pub enum InputRedirectionKind {
    /// Use the given `Redirection` as-is.
    AsRedirection(Redirection),
    /// Set up `Redirection::Pipe` and remember this data to be written once
    /// the process starts communicating.
    FeedData(Vec<u8>),
}

/// Types that can be passed to [`Exec::stdin`](crate::Exec::stdin).
///
/// Sealed: only `Redirection`, `File`, `Vec<u8>`, `&str`, and `&[u8]` (and
/// fixed-size byte array references) implement it.
#[allow(private_interfaces)]
pub trait InputRedirection: sealed::InputRedirectionSealed {
    #[doc(hidden)]
    fn into_input_redirection(self) -> InputRedirectionKind;
}

/// Types that can be passed to [`Exec::stdout`](crate::Exec::stdout) /
/// [`Exec::stderr`](crate::Exec::stderr).
pub trait OutputRedirection: sealed::OutputRedirectionSealed {
    #[doc(hidden)]
    fn into_output_redirection(self) -> Redirection;
}

impl sealed::InputRedirectionSealed for Redirection {}
impl InputRedirection for Redirection {
    fn into_input_redirection(self) -> InputRedirectionKind {
        assert!(
            !matches!(self, Redirection::Merge),
            "Redirection::Merge is only allowed for output streams"
        );
        InputRedirectionKind::AsRedirection(self)
    }
}

impl sealed::InputRedirectionSealed for File {}
impl InputRedirection for File {
    fn into_input_redirection(self) -> InputRedirectionKind {
        InputRedirectionKind::AsRedirection(Redirection::File(self))
    }
}

impl sealed::InputRedirectionSealed for Vec<u8> {}
impl InputRedirection for Vec<u8> {
    fn into_input_redirection(self) -> InputRedirectionKind {
        InputRedirectionKind::FeedData(self)
    }
}

impl sealed::InputRedirectionSealed for &str {}
impl InputRedirection for &str {
    fn into_input_redirection(self) -> InputRedirectionKind {
        InputRedirectionKind::FeedData(self.as_bytes().to_vec())
    }
}

impl sealed::InputRedirectionSealed for &[u8] {}
impl InputRedirection for &[u8] {
    fn into_input_redirection(self) -> InputRedirectionKind {
        InputRedirectionKind::FeedData(self.to_vec())
    }
}

impl<const N: usize> sealed::InputRedirectionSealed for &[u8; N] {}
impl<const N: usize> InputRedirection for &[u8; N] {
    fn into_input_redirection(self) -> InputRedirectionKind {
        InputRedirectionKind::FeedData(self.to_vec())
    }
}

impl sealed::OutputRedirectionSealed for Redirection {}
impl OutputRedirection for Redirection {
    fn into_output_redirection(self) -> Redirection {
        self
    }
}

impl sealed::OutputRedirectionSealed for File {}
impl OutputRedirection for File {
    fn into_output_redirection(self) -> Redirection {
        Redirection::File(self)
    }
}
