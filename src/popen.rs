//! `Popen`: a spawned child process and its redirected standard streams.

use std::ffi::{OsStr, OsString};
use std::fmt;
use std::fs::File;
use std::io;
use std::os::unix::io::RawFd;
use std::path::PathBuf;
use std::time::Duration;

use crate::communicate::Communicator;
use crate::error::{PopenError, Result};
use crate::posix;
use crate::redirection::Redirection;
use crate::spawn::{self, OsOptions};

/// The outcome of a terminated process: a normal exit code, termination by
/// signal, or (rare, e.g. a ptrace stop observed through `waitpid`) a raw
/// status this crate does not otherwise interpret.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// Exited normally with the given code.
    Exited(u32),
    /// Killed by the given signal number.
    Signaled(u8),
    /// `waitpid`'s raw status did not decode as either of the above.
    Other(i32),
    /// No status is available (e.g. a detached, unreaped process).
    Undetermined,
}

impl ExitStatus {
    pub(crate) fn from_raw(status: i32) -> ExitStatus {
        if libc_wifexited(status) {
            ExitStatus::Exited(libc_wexitstatus(status) as u32)
        } else if libc_wifsignaled(status) {
            ExitStatus::Signaled(libc_wtermsig(status) as u8)
        } else {
            ExitStatus::Other(status)
        }
    }

    /// True for `Exited(0)`, the only status `check_call`/`check_output`
    /// and `Exec::checked()` treat as success.
    pub fn success(&self) -> bool {
        matches!(self, ExitStatus::Exited(0))
    }
}

fn libc_wifexited(status: i32) -> bool {
    status & 0x7f == 0
}
fn libc_wexitstatus(status: i32) -> i32 {
    (status >> 8) & 0xff
}
fn libc_wifsignaled(status: i32) -> bool {
    ((status & 0x7f) + 1) as i8 >> 1 > 0
}
fn libc_wtermsig(status: i32) -> i32 {
    status & 0x7f
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitStatus::Exited(code) => write!(f, "exit code {code}"),
            ExitStatus::Signaled(sig) => write!(f, "signal {sig}"),
            ExitStatus::Other(raw) => write!(f, "unrecognized wait status {raw}"),
            ExitStatus::Undetermined => write!(f, "undetermined"),
        }
    }
}

/// Render a status the way a shell's `$?` would: an exit code in `0..=255`,
/// or (when `convert_high_exit` is set, matching shell convention) `128 +
/// signal` for a signal-terminated process.
pub fn format_status(status: ExitStatus, convert_high_exit: bool) -> String {
    match status {
        ExitStatus::Exited(code) => code.to_string(),
        ExitStatus::Signaled(sig) if convert_high_exit => (128u32 + sig as u32).to_string(),
        ExitStatus::Signaled(sig) => format!("signal {sig}"),
        ExitStatus::Other(raw) => format!("status {raw}"),
        ExitStatus::Undetermined => "undetermined".to_string(),
    }
}

/// The full set of options accepted by [`Popen::create`].
///
/// `Default::default()` inherits all three standard streams, the ambient
/// environment and working directory, and applies no extra OS options.
pub struct PopenConfig {
    /// What the child's standard input refers to.
    pub stdin: Redirection,
    /// What the child's standard output refers to.
    pub stdout: Redirection,
    /// What the child's standard error refers to.
    pub stderr: Redirection,
    /// Working directory for the child (and for `preexec_fn`, if set).
    /// `None` inherits the parent's current directory.
    pub cwd: Option<PathBuf>,
    /// `None` means inherit the ambient environment (`execvp` semantics);
    /// `Some` replaces it entirely (`execve` semantics).
    pub env: Option<Vec<OsString>>,
    /// Fds (beyond 0/1/2) to leave open across the exec.
    pub retain_fds: Vec<RawFd>,
    /// Rarely-used extension options: uid/gid/process group/pre-exec hook.
    pub os_options: OsOptions,
}

impl Default for PopenConfig {
    fn default() -> PopenConfig {
        PopenConfig {
            stdin: Redirection::None,
            stdout: Redirection::None,
            stderr: Redirection::None,
            cwd: None,
            env: None,
            retain_fds: Vec::new(),
            os_options: OsOptions::default(),
        }
    }
}

impl PopenConfig {
    /// Clone this config's redirections and simple fields. `os_options`'
    /// `preexec_fn` cannot be cloned and is dropped; callers that need to
    /// reuse a config across several spawns and also set `preexec_fn`
    /// should reconstruct it per spawn.
    pub fn try_clone(&self) -> io::Result<PopenConfig> {
        Ok(PopenConfig {
            stdin: self.stdin.try_clone()?,
            stdout: self.stdout.try_clone()?,
            stderr: self.stderr.try_clone()?,
            cwd: self.cwd.clone(),
            env: self.env.clone(),
            retain_fds: self.retain_fds.clone(),
            os_options: OsOptions {
                uid: self.os_options.uid,
                gid: self.os_options.gid,
                setpgid: self.os_options.setpgid,
                preexec_fn: None,
            },
        })
    }
}

/// A spawned child process.
///
/// `stdin`/`stdout`/`stderr` hold the parent's end of whichever streams were
/// redirected to a pipe; they are `None` for streams left inherited or sent
/// elsewhere. Dropping a `Popen` that has not been `detach()`-ed and has not
/// yet been reaped waits for the child to avoid leaving a zombie.
#[derive(Debug)]
pub struct Popen {
    pid: Option<u32>,
    exit_status: Option<ExitStatus>,
    detached: bool,
    pub stdin: Option<File>,
    pub stdout: Option<File>,
    pub stderr: Option<File>,
}

impl Popen {
    /// Spawn `argv[0]` with the remaining elements of `argv` as arguments,
    /// applying `config`.
    pub fn create<S: AsRef<OsStr>>(argv: &[S], config: PopenConfig) -> Result<Popen> {
        if argv.is_empty() {
            return Err(PopenError::argument("argv must not be empty"));
        }
        let cmd = argv[0].as_ref().to_owned();
        let args: Vec<OsString> = argv.iter().map(|a| a.as_ref().to_owned()).collect();

        let spawned = spawn::spawn(
            &cmd,
            &args,
            config.env.as_deref(),
            config.cwd.as_ref(),
            &config.stdin,
            &config.stdout,
            &config.stderr,
            &config.retain_fds,
            &config.os_options,
        )?;

        Ok(Popen {
            pid: Some(spawned.pid),
            exit_status: None,
            detached: false,
            stdin: spawned.streams.stdin,
            stdout: spawned.streams.stdout,
            stderr: spawned.streams.stderr,
        })
    }

    /// The child's pid, if it has not yet been reaped.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// The exit status last observed by `poll`/`wait`/`wait_timeout`, if
    /// any.
    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.exit_status
    }

    fn wait_with(&mut self, flags: i32) -> io::Result<Option<ExitStatus>> {
        let Some(pid) = self.pid else {
            return Ok(self.exit_status);
        };
        match posix::waitpid(pid, flags) {
            Ok((got, raw_status)) if got == pid => {
                let status = ExitStatus::from_raw(raw_status);
                self.pid = None;
                self.exit_status = Some(status);
                Ok(Some(status))
            }
            Ok(_) => Ok(None),
            Err(e) if e.raw_os_error() == Some(posix::ECHILD) => {
                // Someone else reaped it (or it was never ours to reap);
                // there is no more specific status to report.
                self.pid = None;
                self.exit_status = Some(ExitStatus::Undetermined);
                Ok(self.exit_status)
            }
            Err(e) => Err(e),
        }
    }

    /// Block until the child exits.
    pub fn wait(&mut self) -> io::Result<ExitStatus> {
        loop {
            if let Some(status) = self.wait_with(0)? {
                return Ok(status);
            }
        }
    }

    /// Non-blocking check: `Some(status)` if the child has already exited,
    /// `None` if it is still running.
    pub fn poll(&mut self) -> Option<ExitStatus> {
        self.wait_with(posix::WNOHANG).unwrap_or(None)
    }

    /// Block until the child exits or `timeout` elapses, whichever is
    /// first.
    pub fn wait_timeout(&mut self, timeout: Duration) -> io::Result<Option<ExitStatus>> {
        let deadline = std::time::Instant::now() + timeout;
        loop {
            if let Some(status) = self.wait_with(posix::WNOHANG)? {
                return Ok(Some(status));
            }
            if std::time::Instant::now() >= deadline {
                return Ok(None);
            }
            std::thread::sleep(Duration::from_millis(5).min(
                deadline.saturating_duration_since(std::time::Instant::now()),
            ));
        }
    }

    /// Send `signal` (a raw signal number, e.g. `libc::SIGHUP`) to the
    /// child. A no-op if the child has already been reaped.
    pub fn send_signal(&self, signal: i32) -> io::Result<()> {
        match self.pid {
            Some(pid) => posix::kill(pid, signal),
            None => Ok(()),
        }
    }

    /// Send `signal` to the child's entire process group instead of just
    /// the child itself. Only meaningful for a child spawned with
    /// [`Exec::setpgid`](crate::Exec::setpgid), which puts it in a new
    /// group of its own (e.g. so that it and any further children *it*
    /// spawns can all be signaled together) — otherwise this reaches
    /// whatever process group the library's own process belongs to.
    pub fn send_signal_group(&self, signal: i32) -> io::Result<()> {
        match self.pid {
            Some(pid) => posix::killpg(pid, signal),
            None => Ok(()),
        }
    }

    /// `SIGTERM`.
    pub fn terminate(&self) -> io::Result<()> {
        self.send_signal(posix::SIGTERM)
    }

    /// `SIGKILL`.
    pub fn kill(&self) -> io::Result<()> {
        self.send_signal(posix::SIGKILL)
    }

    /// Stop `Drop` from waiting for (and reaping) this child. The process
    /// keeps running, or becomes a zombie until some other code reaps it,
    /// but this `Popen` no longer tries.
    pub fn detach(&mut self) {
        self.detached = true;
    }

    /// Begin a deadlock-free read/write session with the child's
    /// redirected streams. See [`Communicator`].
    pub fn communicate_start(&mut self, input: Option<Vec<u8>>) -> Communicator<'_> {
        Communicator::new(self, input)
    }

    /// Convenience wrapper around [`Popen::communicate_start`] that runs to
    /// completion with no timeout and returns the captured bytes.
    pub fn communicate(&mut self, input: Option<&[u8]>) -> io::Result<(Option<Vec<u8>>, Option<Vec<u8>>)> {
        self.communicate_start(input.map(|b| b.to_vec())).read()
    }
}

impl Drop for Popen {
    fn drop(&mut self) {
        if self.detached {
            return;
        }
        if let Some(pid) = self.pid {
            // Best-effort: reap without blocking so a dropped handle never
            // hangs the caller's thread. If the child is still alive this
            // leaves it running (and, later, a zombie) rather than killing
            // it — matching spec semantics that `Drop` is not `terminate`.
            let _ = posix::waitpid(pid, posix::WNOHANG);
        }
    }
}
