use std::error::Error;
use std::fmt;
use std::io;

use crate::popen::ExitStatus;

/// The error type returned by this crate's spawn and convenience functions.
///
/// `io::Error` alone cannot distinguish a malformed argument (e.g. an empty
/// argv, or an environment value that is not valid on this platform) from a
/// failure of the underlying OS call, so this crate introduces a small error
/// type that wraps both, plus the non-zero-exit outcome produced by
/// [`check_call`](crate::check_call) and [`check_output`](crate::check_output).
///
/// A communicate-timeout does *not* get its own variant: it is represented
/// as a plain `io::Error` of kind [`io::ErrorKind::TimedOut`], since by the
/// time it is raised the caller's output buffers already hold whatever was
/// read before the deadline (see [`Communicator`](crate::Communicator)).
#[derive(Debug)]
pub enum PopenError {
    /// The caller passed a malformed argument: an empty command, a
    /// non-string environment entry, an unrecognized redirection, or input
    /// data with no stdin pipe to carry it.
    Argument(String),

    /// An underlying OS call failed — no such file, permission denied,
    /// broken pipe, and so on.
    Io(io::Error),

    /// A [`check_call`](crate::check_call) or [`check_output`](crate::check_output)
    /// invocation whose child exited with a non-zero or abnormal status.
    NonZeroExit {
        /// The argv that was run.
        command: Vec<String>,
        /// The exit status of the child.
        status: ExitStatus,
    },
}

/// Convenience alias used throughout the crate's public surface.
pub type Result<T> = std::result::Result<T, PopenError>;

impl PopenError {
    pub(crate) fn argument(msg: impl Into<String>) -> PopenError {
        PopenError::Argument(msg.into())
    }

    /// Returns the underlying `io::Error`, if any.
    ///
    /// `Argument` and `NonZeroExit` have no associated OS error and return
    /// `None`.
    pub fn as_io_error(&self) -> Option<&io::Error> {
        match self {
            PopenError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for PopenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PopenError::Argument(msg) => write!(f, "invalid argument: {msg}"),
            PopenError::Io(e) => write!(f, "{e}"),
            PopenError::NonZeroExit { command, status } => {
                write!(f, "command {command:?} failed: {status}")
            }
        }
    }
}

impl Error for PopenError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            PopenError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for PopenError {
    fn from(err: io::Error) -> PopenError {
        PopenError::Io(err)
    }
}

impl From<PopenError> for io::Error {
    fn from(err: PopenError) -> io::Error {
        match err {
            PopenError::Io(e) => e,
            other => io::Error::other(other),
        }
    }
}
