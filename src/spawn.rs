//! The Spawner: turns a resolved set of streams and a command line into a
//! running child process.
//!
//! Spawning happens in three steps: resolve each `Redirection` into a
//! `(child_fd, parent_fd)` pair, `fork`, then in the child apply the
//! resolved fds to 0/1/2 and `exec`. A *control pipe* carries any failure
//! between the child's post-fork setup and the parent: the write end is
//! `FD_CLOEXEC`, so a successful `exec` closes it silently, while a failure
//! writes a tagged error and lets the parent reconstruct a `PopenError`
//! without ambiguity between "exec itself failed" and "the child ran and
//! exited non-zero".

use std::ffi::{OsStr, OsString};
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::unix::io::{AsRawFd, FromRawFd, RawFd};
use std::path::PathBuf;

use crate::error::{PopenError, Result};
use crate::posix;
use crate::redirection::Redirection;

/// Extra, rarely-used spawn options that sit outside the core stdin/stdout/
/// stderr/cwd/env set. Named `os_options` on `PopenConfig`.
#[derive(Default)]
pub struct OsOptions {
    /// Run the child under this uid after fork, before exec.
    pub uid: Option<u32>,
    /// Run the child under this gid after fork, before exec.
    pub gid: Option<u32>,
    /// Put the child in a new process group of its own.
    pub setpgid: bool,
    /// Run in the child, after stream setup but before `exec`. Must restrict
    /// itself to async-signal-safe operations, exactly like `libc::fork`'s
    /// own contract; see the safety note on `spawn`.
    pub preexec_fn: Option<Box<dyn Fn() -> io::Result<()> + Send + Sync>>,
}

impl std::fmt::Debug for OsOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OsOptions")
            .field("uid", &self.uid)
            .field("gid", &self.gid)
            .field("setpgid", &self.setpgid)
            .field("preexec_fn", &self.preexec_fn.as_ref().map(|_| ".."))
            .finish()
    }
}

pub(crate) struct ParentStreams {
    pub stdin: Option<File>,
    pub stdout: Option<File>,
    pub stderr: Option<File>,
}

pub(crate) struct Spawned {
    pub pid: u32,
    pub streams: ParentStreams,
}

/// One standard stream's resolved ends. `child` is `None` when the stream is
/// inherited. Whatever fd `child` holds was created fresh for this spawn
/// (by `dup`, `pipe`, or `open`) even when the `Redirection` variant itself
/// borrows a caller-owned resource (`File`, `Fd`) — so the parent always
/// closes its copy of `child` after fork, regardless of variant.
struct Resolved {
    child: Option<File>,
    parent: Option<File>,
}

fn resolve_input(redir: &Redirection) -> io::Result<Resolved> {
    match redir {
        Redirection::None => Ok(Resolved {
            child: None,
            parent: None,
        }),
        Redirection::Pipe => {
            let (read, write) = posix::pipe()?;
            posix::set_inheritable(&write, false)?;
            Ok(Resolved {
                child: Some(read),
                parent: Some(write),
            })
        }
        Redirection::File(f) => Ok(Resolved {
            child: Some(f.try_clone()?),
            parent: None,
        }),
        Redirection::Fd(fd) => {
            let dup = unsafe { libc::dup(*fd) };
            if dup < 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(Resolved {
                child: Some(unsafe { File::from_raw_fd(dup) }),
                parent: None,
            })
        }
        Redirection::Path(path) => {
            let f = OpenOptions::new().read(true).open(path)?;
            Ok(Resolved {
                child: Some(f),
                parent: None,
            })
        }
        Redirection::Merge => unreachable!("Merge is not valid for stdin"),
    }
}

fn resolve_output(redir: &Redirection, merge_target: Option<RawFd>) -> io::Result<Resolved> {
    match redir {
        Redirection::None => Ok(Resolved {
            child: None,
            parent: None,
        }),
        Redirection::Pipe => {
            let (read, write) = posix::pipe()?;
            posix::set_inheritable(&read, false)?;
            Ok(Resolved {
                child: Some(write),
                parent: Some(read),
            })
        }
        Redirection::File(f) => Ok(Resolved {
            child: Some(f.try_clone()?),
            parent: None,
        }),
        Redirection::Fd(fd) => {
            let dup = unsafe { libc::dup(*fd) };
            if dup < 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(Resolved {
                child: Some(unsafe { File::from_raw_fd(dup) }),
                parent: None,
            })
        }
        Redirection::Path(path) => {
            let f = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(path)?;
            Ok(Resolved {
                child: Some(f),
                parent: None,
            })
        }
        Redirection::Merge => {
            let target = merge_target.expect("Merge used with no sibling stream to merge into");
            let dup = unsafe { libc::dup(target) };
            if dup < 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(Resolved {
                child: Some(unsafe { File::from_raw_fd(dup) }),
                parent: None,
            })
        }
    }
}

/// Resolve stdin/stdout/stderr redirections into child-side and parent-side
/// fds. Handles the stderr-merges-into-stdout and stdout-merges-into-stderr
/// cases, which each need the *other* stream's child fd before they can be
/// resolved; to support this, stdout is resolved first unless stdout itself
/// merges into stderr, in which case stderr resolves first.
fn resolve_streams(
    stdin: &Redirection,
    stdout: &Redirection,
    stderr: &Redirection,
) -> io::Result<(Resolved, Resolved, Resolved)> {
    let in_r = resolve_input(stdin)?;

    let (out_r, err_r) = if matches!(stdout, Redirection::Merge) {
        let err_r = resolve_output(stderr, None)?;
        let stderr_child_fd = err_r
            .child
            .as_ref()
            .map(File::as_raw_fd)
            .unwrap_or(libc::STDERR_FILENO);
        let out_r = resolve_output(stdout, Some(stderr_child_fd))?;
        (out_r, err_r)
    } else {
        let out_r = resolve_output(stdout, None)?;
        let stdout_child_fd = out_r
            .child
            .as_ref()
            .map(File::as_raw_fd)
            .unwrap_or(libc::STDOUT_FILENO);
        let err_r = resolve_output(stderr, Some(stdout_child_fd))?;
        (out_r, err_r)
    };

    Ok((in_r, out_r, err_r))
}

/// Send a `PopenError` over the control pipe as a single tagged message,
/// then `_exit(127)`. Only called in the child after fork, so it must not
/// allocate in a way that could deadlock on a held parent lock — by this
/// point we are single-threaded in the child's address space, so ordinary
/// allocation is fine; it is `fork` itself, not this function, that
/// constrains us to async-signal-safety.
fn send_error_and_exit(mut control_write: File, err: &io::Error) -> ! {
    let mut msg = Vec::with_capacity(5);
    if let Some(errno) = err.raw_os_error() {
        msg.push(1u8);
        msg.extend_from_slice(&errno.to_le_bytes());
    } else {
        let text = err.to_string();
        msg.push(0u8);
        msg.extend_from_slice(&(text.len() as u32).to_le_bytes());
        msg.extend_from_slice(text.as_bytes());
    }
    let _ = control_write.write_all(&msg);
    posix::_exit(127)
}

fn read_control_pipe(mut control_read: File) -> Result<()> {
    let mut tag = [0u8; 1];
    let n = control_read.read(&mut tag)?;
    if n == 0 {
        return Ok(());
    }
    match tag[0] {
        1 => {
            let mut errno_bytes = [0u8; 4];
            control_read.read_exact(&mut errno_bytes)?;
            let errno = i32::from_le_bytes(errno_bytes);
            Err(PopenError::Io(io::Error::from_raw_os_error(errno)))
        }
        0 => {
            let mut len_bytes = [0u8; 4];
            control_read.read_exact(&mut len_bytes)?;
            let len = u32::from_le_bytes(len_bytes) as usize;
            let mut buf = vec![0u8; len];
            control_read.read_exact(&mut buf)?;
            let msg = String::from_utf8(buf)
                .unwrap_or_else(|e| String::from_utf8_lossy(e.as_bytes()).into_owned());
            Err(PopenError::Argument(msg))
        }
        other => Err(PopenError::Argument(format!(
            "malformed control pipe message (tag {other})"
        ))),
    }
}

/// Apply the resolved child fd to `target` (0, 1, or 2) via `dup2`, then
/// close the source if the library opened it.
fn install(resolved: &Resolved, target: RawFd) -> io::Result<()> {
    if let Some(f) = &resolved.child {
        posix::dup2(f.as_raw_fd(), target)?;
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
pub(crate) fn spawn(
    cmd: &OsStr,
    argv: &[OsString],
    env: Option<&[OsString]>,
    cwd: Option<&PathBuf>,
    stdin: &Redirection,
    stdout: &Redirection,
    stderr: &Redirection,
    retain_fds: &[RawFd],
    os_options: &OsOptions,
) -> Result<Spawned> {
    if argv.is_empty() {
        return Err(PopenError::argument("argv must not be empty"));
    }

    let (in_r, out_r, err_r) = resolve_streams(stdin, stdout, stderr)?;
    let exec_step = posix::prep_exec(cmd, argv, env)?;

    let (control_read, control_write) = posix::pipe()?;
    posix::set_inheritable(&control_write, false)?;
    let control_write_fd = control_write.as_raw_fd();

    // Safety: between `fork` and `exec`/`_exit` the child touches only
    // dup2/fcntl/chdir/setuid/setgid/setpgid/write(2)/close(2) and the
    // caller-supplied `preexec_fn`, which carries the same contract.
    match unsafe { posix::fork() }? {
        posix::ForkResult::Child => {
            drop(control_read);
            let result = (|| -> io::Result<()> {
                install(&in_r, libc::STDIN_FILENO)?;
                install(&out_r, libc::STDOUT_FILENO)?;
                install(&err_r, libc::STDERR_FILENO)?;
                // The fds `install` just duplicated onto 0/1/2 are no longer
                // needed under their original numbers.
                drop(in_r);
                drop(out_r);
                drop(err_r);

                posix::reset_sigpipe()?;

                if let Some(cwd) = cwd {
                    std::env::set_current_dir(cwd)?;
                }
                if os_options.setpgid {
                    posix::setpgid(0, 0)?;
                }
                if let Some(gid) = os_options.gid {
                    posix::setgid(gid)?;
                }
                if let Some(uid) = os_options.uid {
                    posix::setuid(uid)?;
                }
                if let Some(preexec) = &os_options.preexec_fn {
                    preexec()?;
                }

                // `fork` duplicated every fd the parent process had open,
                // not just the ones this spawn resolved — every other stage
                // of a pipeline's pipes included. Close everything the
                // caller did not ask to retain so the only descriptors that
                // survive into the new program are 0/1/2, `retain_fds`, and
                // (until `exec_step` closes it via `FD_CLOEXEC`) the control
                // pipe's write end.
                let mut keep = retain_fds.to_vec();
                keep.push(control_write_fd);
                posix::close_other_fds(&keep);

                exec_step()
            })();

            match result {
                Ok(()) => unreachable!("exec only returns on failure"),
                Err(e) => send_error_and_exit(control_write, &e),
            }
        }
        posix::ForkResult::Parent(pid) => {
            drop(control_write);
            // Drop our copies of the fds just handed to the child. Fork
            // duplicated them into its own fd table, so the child still has
            // them; keeping them open here too would leak a read/write end
            // and, for pipes, prevent EOF from ever being observed on the
            // sibling end.
            drop(in_r.child);
            drop(out_r.child);
            drop(err_r.child);

            if let Err(e) = read_control_pipe(control_read) {
                // The child is guaranteed to exit (it either hit `_exit`
                // itself or failed to exec); reap it now so the failure
                // never surfaces alongside an orphaned zombie.
                let _ = posix::waitpid(pid, 0);
                return Err(e);
            }

            Ok(Spawned {
                pid,
                streams: ParentStreams {
                    stdin: in_r.parent,
                    stdout: out_r.parent,
                    stderr: err_r.parent,
                },
            })
        }
    }
}
