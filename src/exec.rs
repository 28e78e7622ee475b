//! `Exec`: a fluent builder over [`Popen`]/[`PopenConfig`].

use std::ffi::{OsStr, OsString};
use std::io;
use std::path::Path;

use crate::error::Result;
use crate::popen::{ExitStatus, Popen, PopenConfig};
use crate::redirection::{InputRedirection, InputRedirectionKind, OutputRedirection, Redirection};
use crate::spawn::OsOptions;

const SHELL: [&str; 2] = ["sh", "-c"];

/// The captured result of [`Exec::capture`].
#[derive(Debug)]
pub struct Capture {
    /// Everything read from the child's stdout.
    pub stdout: Vec<u8>,
    /// Everything read from the child's stderr.
    pub stderr: Vec<u8>,
    /// The child's exit status.
    pub exit_status: ExitStatus,
}

impl Capture {
    /// `stdout`, lossily converted to UTF-8.
    pub fn stdout_str(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    /// `stderr`, lossily converted to UTF-8.
    pub fn stderr_str(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }

    /// True if the child exited with status 0.
    pub fn success(&self) -> bool {
        self.exit_status.success()
    }
}

/// A builder for a single child process.
///
/// ```ignore
/// let capture = Exec::cmd("echo").arg("hello").capture()?;
/// assert_eq!(capture.stdout_str(), "hello\n");
/// ```
pub struct Exec {
    pub(crate) command: OsString,
    pub(crate) args: Vec<OsString>,
    pub(crate) config: PopenConfig,
    pub(crate) stdin_data: Option<Vec<u8>>,
    env_clear: bool,
    env_overrides: Vec<(OsString, OsString)>,
    env_removes: Vec<OsString>,
    detached: bool,
    checked: bool,
}

impl Exec {
    /// Run `command` directly (no shell involved — arguments are never
    /// subject to shell quoting or expansion).
    pub fn cmd<S: AsRef<OsStr>>(command: S) -> Exec {
        Exec {
            command: command.as_ref().to_owned(),
            args: Vec::new(),
            config: PopenConfig::default(),
            stdin_data: None,
            env_clear: false,
            env_overrides: Vec::new(),
            env_removes: Vec::new(),
            detached: false,
            checked: false,
        }
    }

    /// Run `cmdline` through `sh -c`.
    pub fn shell<S: AsRef<OsStr>>(cmdline: S) -> Exec {
        Exec::cmd(SHELL[0]).arg(SHELL[1]).arg(cmdline)
    }

    pub fn arg<S: AsRef<OsStr>>(mut self, arg: S) -> Exec {
        self.args.push(arg.as_ref().to_owned());
        self
    }

    pub fn args<S: AsRef<OsStr>>(mut self, args: &[S]) -> Exec {
        self.args.extend(args.iter().map(|a| a.as_ref().to_owned()));
        self
    }

    pub fn cwd<P: AsRef<Path>>(mut self, dir: P) -> Exec {
        self.config.cwd = Some(dir.as_ref().to_owned());
        self
    }

    /// Keep `fds` open (not closed, not `FD_CLOEXEC`'d) across the exec,
    /// beyond the standard 0/1/2. Every other fd the child inherits from
    /// this process at fork time is closed before the exec runs.
    pub fn retain_fds(mut self, fds: &[std::os::unix::io::RawFd]) -> Exec {
        self.config.retain_fds.extend_from_slice(fds);
        self
    }

    /// Start with no inherited environment variables at all (only
    /// subsequent `.env()` calls populate the child's environment).
    pub fn env_clear(mut self) -> Exec {
        self.env_clear = true;
        self.env_overrides.clear();
        self.env_removes.clear();
        self
    }

    pub fn env<K: AsRef<OsStr>, V: AsRef<OsStr>>(mut self, key: K, value: V) -> Exec {
        self.env_overrides
            .push((key.as_ref().to_owned(), value.as_ref().to_owned()));
        self
    }

    pub fn env_extend<K: AsRef<OsStr>, V: AsRef<OsStr>>(mut self, vars: &[(K, V)]) -> Exec {
        for (k, v) in vars {
            self.env_overrides.push((k.as_ref().to_owned(), v.as_ref().to_owned()));
        }
        self
    }

    pub fn env_remove<K: AsRef<OsStr>>(mut self, key: K) -> Exec {
        self.env_removes.push(key.as_ref().to_owned());
        self
    }

    pub fn stdin<T: InputRedirection>(mut self, stdin: T) -> Exec {
        match stdin.into_input_redirection() {
            InputRedirectionKind::AsRedirection(r) => {
                self.config.stdin = r;
                self.stdin_data = None;
            }
            InputRedirectionKind::FeedData(data) => {
                self.config.stdin = Redirection::Pipe;
                self.stdin_data = Some(data);
            }
        }
        self
    }

    pub fn stdout<T: OutputRedirection>(mut self, stdout: T) -> Exec {
        self.config.stdout = stdout.into_output_redirection();
        self
    }

    pub fn stderr<T: OutputRedirection>(mut self, stderr: T) -> Exec {
        self.config.stderr = stderr.into_output_redirection();
        self
    }

    /// Leave the child running when the returned [`Popen`] is dropped,
    /// instead of waiting for (and reaping) it.
    pub fn detached(mut self) -> Exec {
        self.detached = true;
        self
    }

    /// Make [`join`](Exec::join) and [`capture`](Exec::capture) fail with
    /// [`PopenError::NonZeroExit`](crate::PopenError::NonZeroExit) if the
    /// child does not exit successfully.
    pub fn checked(mut self) -> Exec {
        self.checked = true;
        self
    }

    /// Run the child under a different uid after fork, before exec.
    pub fn setuid(mut self, uid: u32) -> Exec {
        self.config.os_options.uid = Some(uid);
        self
    }

    /// Run the child under a different gid after fork, before exec.
    pub fn setgid(mut self, gid: u32) -> Exec {
        self.config.os_options.gid = Some(gid);
        self
    }

    /// Put the child in its own process group, with its pid as the group
    /// id. Combine with [`Popen::send_signal_group`] to signal the child
    /// and every descendant it spawns as a unit, rather than just itself.
    pub fn setpgid(mut self) -> Exec {
        self.config.os_options.setpgid = true;
        self
    }

    /// Run `f` in the child after fork and after stream setup, but before
    /// exec. Must be async-signal-safe: no allocation that can deadlock on
    /// a lock held by another thread at fork time, no panicking.
    pub fn preexec_fn<F>(mut self, f: F) -> Exec
    where
        F: Fn() -> io::Result<()> + Send + Sync + 'static,
    {
        self.config.os_options.preexec_fn = Some(Box::new(f));
        self
    }

    fn finish_env(&mut self) {
        if !self.env_clear && self.env_overrides.is_empty() && self.env_removes.is_empty() {
            self.config.env = None;
            return;
        }
        let mut vars: Vec<(OsString, OsString)> = if self.env_clear {
            Vec::new()
        } else {
            std::env::vars_os().collect()
        };
        for removed in &self.env_removes {
            vars.retain(|(k, _)| k != removed);
        }
        for (key, value) in &self.env_overrides {
            if let Some(slot) = vars.iter_mut().find(|(k, _)| k == key) {
                slot.1 = value.clone();
            } else {
                vars.push((key.clone(), value.clone()));
            }
        }
        let formatted = vars
            .into_iter()
            .map(|(k, v)| {
                let mut entry = k;
                entry.push("=");
                entry.push(v);
                entry
            })
            .collect();
        self.config.env = Some(formatted);
    }

    fn argv(&self) -> Vec<OsString> {
        let mut argv = Vec::with_capacity(1 + self.args.len());
        argv.push(self.command.clone());
        argv.extend(self.args.iter().cloned());
        argv
    }

    /// Spawn the child, returning the raw [`Popen`] handle.
    pub fn popen(mut self) -> Result<Popen> {
        self.finish_env();
        let argv = self.argv();
        let mut p = Popen::create(&argv, self.config)?;
        if self.detached {
            p.detach();
        }
        if let Some(data) = self.stdin_data {
            // Feed the stdin data immediately so a subsequent `communicate`
            // (or the caller writing to `p.stdin` directly) is not required
            // just to unblock a child that reads its stdin eagerly.
            p.communicate(Some(&data))?;
        }
        Ok(p)
    }

    /// Spawn and block until the child exits.
    pub fn join(self) -> Result<ExitStatus> {
        let checked = self.checked;
        let command = self.command.to_string_lossy().into_owned();
        let mut p = self.popen()?;
        let status = p.wait()?;
        if checked && !status.success() {
            return Err(crate::error::PopenError::NonZeroExit {
                command: vec![command],
                status,
            });
        }
        Ok(status)
    }

    /// Spawn with stdout and stderr piped, run `communicate` to completion
    /// feeding any data given via `.stdin(..)`, wait for exit, and return
    /// everything captured.
    pub fn capture(mut self) -> Result<Capture> {
        if matches!(self.config.stdout, Redirection::None) {
            self.config.stdout = Redirection::Pipe;
        }
        if matches!(self.config.stderr, Redirection::None) {
            self.config.stderr = Redirection::Pipe;
        }
        let checked = self.checked;
        let command = self.command.to_string_lossy().into_owned();
        let stdin_data = self.stdin_data.take();
        self.finish_env();
        let argv = self.argv();
        let mut p = Popen::create(&argv, self.config)?;
        let (stdout, stderr) = p.communicate(stdin_data.as_deref())?;
        let exit_status = p.wait()?;
        if checked && !exit_status.success() {
            return Err(crate::error::PopenError::NonZeroExit {
                command: vec![command],
                status: exit_status,
            });
        }
        Ok(Capture {
            stdout: stdout.unwrap_or_default(),
            stderr: stderr.unwrap_or_default(),
            exit_status,
        })
    }

    /// Spawn with stdout piped and return the parent end as a plain
    /// `impl Read`, e.g. to feed a line-oriented parser while the child
    /// keeps running.
    pub fn stream_stdout(mut self) -> Result<std::fs::File> {
        self.config.stdout = Redirection::Pipe;
        let p = self.popen()?;
        Ok(p.stdout.expect("stdout redirected to a pipe"))
    }

    pub fn stream_stderr(mut self) -> Result<std::fs::File> {
        self.config.stderr = Redirection::Pipe;
        let p = self.popen()?;
        Ok(p.stderr.expect("stderr redirected to a pipe"))
    }

    pub fn stream_stdin(mut self) -> Result<std::fs::File> {
        self.config.stdin = Redirection::Pipe;
        let p = self.popen()?;
        Ok(p.stdin.expect("stdin redirected to a pipe"))
    }

    /// Abandon this builder and chain it into an OS-level [`Pipeline`]:
    /// `Exec::cmd("a") | Exec::cmd("b")` behaves like the shell's `a | b`.
    pub fn pipe(self, other: Exec) -> crate::pipeline::Pipeline {
        crate::pipeline::Pipeline::new(self, other)
    }
}

impl std::ops::BitOr<Exec> for Exec {
    type Output = crate::pipeline::Pipeline;
    fn bitor(self, other: Exec) -> crate::pipeline::Pipeline {
        self.pipe(other)
    }
}
