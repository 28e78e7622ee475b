//! Thin, safe-ish wrappers around the POSIX calls the spawner, broker and
//! communicator need. Kept deliberately low-level (raw `libc`, no `nix`)
//! to match the rest of this crate's style.

use std::ffi::{CString, OsStr, OsString};
use std::fs::File;
use std::io::{Error, Result};
use std::mem;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::io::{AsRawFd, FromRawFd, RawFd};
use std::ptr;
use std::time::{Duration, Instant};

pub use libc::{ECHILD, EINTR, EWOULDBLOCK};

fn check_err<T: Ord + Default>(num: T) -> Result<T> {
    if num < T::default() {
        return Err(Error::last_os_error());
    }
    Ok(num)
}

/// Create a pipe. Both ends are inheritable by default; callers should call
/// [`set_inheritable`] on whichever end must not survive exec.
pub fn pipe() -> Result<(File, File)> {
    let mut fds = [0 as libc::c_int; 2];
    check_err(unsafe { libc::pipe(&mut fds[0]) })?;
    Ok(unsafe { (File::from_raw_fd(fds[0]), File::from_raw_fd(fds[1])) })
}

/// Result of a successful `fork()`.
pub enum ForkResult {
    /// Running in the parent; carries the child's pid.
    Parent(u32),
    /// Running in the child.
    Child,
}

/// `fork(2)`.
///
/// # Safety
///
/// The child branch runs with only the calling thread duplicated; the
/// caller must restrict it to async-signal-safe operations until `exec` or
/// `_exit`.
pub unsafe fn fork() -> Result<ForkResult> {
    let pid = check_err(unsafe { libc::fork() })?;
    if pid == 0 {
        Ok(ForkResult::Child)
    } else {
        Ok(ForkResult::Parent(pid as u32))
    }
}

fn os_to_cstring(s: &OsStr) -> Result<CString> {
    CString::new(s.as_bytes()).map_err(|_| Error::from_raw_os_error(libc::EINVAL))
}

/// Build the exec step to run after fork: if `env` is given, execs via
/// `execve` with that environment; otherwise lets `execvp` search `PATH`
/// and inherit the ambient environment. Either way this calls directly
/// into the C library's exec family with a real argv array — never through
/// a shell — so argument values can never be reinterpreted.
pub fn prep_exec(
    cmd: &OsStr,
    argv: &[OsString],
    env: Option<&[OsString]>,
) -> Result<impl FnOnce() -> Result<()> + use<>> {
    let cmd_cstring = os_to_cstring(cmd)?;
    let argv_cstring: Vec<CString> = argv
        .iter()
        .map(|a| os_to_cstring(a))
        .collect::<Result<_>>()?;
    let env_cstring: Option<Vec<CString>> = env
        .map(|e| e.iter().map(|v| os_to_cstring(v)).collect())
        .transpose()?;

    Ok(move || -> Result<()> {
        let mut argv_ptr: Vec<*const libc::c_char> =
            argv_cstring.iter().map(|a| a.as_ptr()).collect();
        argv_ptr.push(ptr::null());

        match &env_cstring {
            Some(env_cstring) => {
                let mut envp_ptr: Vec<*const libc::c_char> =
                    env_cstring.iter().map(|e| e.as_ptr()).collect();
                envp_ptr.push(ptr::null());
                check_err(unsafe {
                    libc::execve(cmd_cstring.as_ptr(), argv_ptr.as_ptr(), envp_ptr.as_ptr())
                })?;
            }
            None => {
                check_err(unsafe { libc::execvp(cmd_cstring.as_ptr(), argv_ptr.as_ptr()) })?;
            }
        }
        unreachable!("exec only returns on failure, which is handled above")
    })
}

pub fn _exit(status: u8) -> ! {
    unsafe { libc::_exit(status as libc::c_int) }
}

pub const WNOHANG: i32 = libc::WNOHANG;

/// `waitpid(2)`. The raw wait status is returned unparsed; see
/// `crate::popen::ExitStatus`.
pub fn waitpid(pid: u32, flags: i32) -> Result<(u32, i32)> {
    let mut status: libc::c_int = 0;
    let got = check_err(unsafe {
        libc::waitpid(pid as libc::pid_t, &mut status as *mut libc::c_int, flags)
    })?;
    Ok((got as u32, status))
}

pub const SIGHUP: i32 = libc::SIGHUP;
pub const SIGINT: i32 = libc::SIGINT;
pub const SIGTERM: i32 = libc::SIGTERM;
pub const SIGKILL: i32 = libc::SIGKILL;
pub const SIGCHLD: i32 = libc::SIGCHLD;

pub fn kill(pid: u32, signal: i32) -> Result<()> {
    check_err(unsafe { libc::kill(pid as libc::pid_t, signal) })?;
    Ok(())
}

pub fn killpg(pgid: u32, signal: i32) -> Result<()> {
    check_err(unsafe { libc::killpg(pgid as libc::pid_t, signal) })?;
    Ok(())
}

pub fn setuid(uid: u32) -> Result<()> {
    check_err(unsafe { libc::setuid(uid) })?;
    Ok(())
}

pub fn setgid(gid: u32) -> Result<()> {
    check_err(unsafe { libc::setgid(gid) })?;
    Ok(())
}

pub fn setpgid(pid: u32, pgid: u32) -> Result<()> {
    check_err(unsafe { libc::setpgid(pid as libc::pid_t, pgid as libc::pid_t) })?;
    Ok(())
}

pub fn getpid() -> u32 {
    unsafe { libc::getpid() as u32 }
}

pub const F_GETFD: i32 = libc::F_GETFD;
pub const F_SETFD: i32 = libc::F_SETFD;
pub const FD_CLOEXEC: i32 = libc::FD_CLOEXEC;
pub const F_GETFL: i32 = libc::F_GETFL;
pub const F_SETFL: i32 = libc::F_SETFL;

pub fn fcntl_get(fd: RawFd, cmd: i32) -> Result<i32> {
    check_err(unsafe { libc::fcntl(fd, cmd) })
}

pub fn fcntl_set(fd: RawFd, cmd: i32, arg: i32) -> Result<i32> {
    check_err(unsafe { libc::fcntl(fd, cmd, arg) })
}

pub fn dup2(oldfd: RawFd, newfd: RawFd) -> Result<()> {
    check_err(unsafe { libc::dup2(oldfd, newfd) })?;
    Ok(())
}

/// Toggle `FD_CLOEXEC` on `f`.
pub fn set_inheritable(f: &File, inheritable: bool) -> Result<()> {
    let fd = f.as_raw_fd();
    let old = fcntl_get(fd, F_GETFD)?;
    let new = if inheritable {
        old & !FD_CLOEXEC
    } else {
        old | FD_CLOEXEC
    };
    if new != old {
        fcntl_set(fd, F_SETFD, new)?;
    }
    Ok(())
}

/// Put `fd` in non-blocking mode. Used for every fd a communicate loop
/// reads or writes, so a `read`/`write` racing a readiness change never
/// blocks the single-threaded loop.
pub fn set_nonblocking(fd: RawFd) -> Result<()> {
    let old = fcntl_get(fd, F_GETFL)?;
    if old & libc::O_NONBLOCK == 0 {
        fcntl_set(fd, F_SETFL, old | libc::O_NONBLOCK)?;
    }
    Ok(())
}

/// Reset `SIGPIPE` to its default disposition and clear the signal mask.
///
/// Quoting `std::process::Command::do_exec`: libstd ignores `SIGPIPE`, and
/// signal-handling libraries often set a mask. Child processes inherit
/// ignored signals and the signal mask from their parent, but most Unix
/// programs do not reset these things on their own, so this must be done
/// right after fork to avoid confusing the program we are about to run.
pub fn reset_sigpipe() -> Result<()> {
    unsafe {
        let mut set: libc::sigset_t = mem::zeroed();
        check_err(libc::sigemptyset(&mut set))?;
        check_err(libc::pthread_sigmask(libc::SIG_SETMASK, &set, ptr::null_mut()))?;
        if libc::signal(libc::SIGPIPE, libc::SIG_DFL) == libc::SIG_ERR {
            return Err(Error::last_os_error());
        }
    }
    Ok(())
}

/// Close every open fd other than 0, 1, 2, and whatever is listed in `keep`.
///
/// Called in the child between fork and exec, after `preexec_fn` has run.
/// `fork` duplicates the *entire* fd table, so without this step every
/// sibling stage of a [`Pipeline`](crate::Pipeline) — and any fd the parent
/// process happened to have open — leaks into each child. A leaked pipe fd
/// is not cosmetic: a downstream reader waits for every write end of a pipe
/// to close before it sees EOF, so one leaked write end in an unrelated
/// process can hang a pipeline forever.
///
/// Prefers enumerating `/proc/self/fd` (exact, and cheap on Linux); falls
/// back to a linear scan up to the descriptor soft limit where `/proc` is
/// unavailable.
pub fn close_other_fds(keep: &[RawFd]) {
    let is_kept = |fd: RawFd| fd <= 2 || keep.contains(&fd);

    if let Ok(entries) = std::fs::read_dir("/proc/self/fd") {
        // Collect before closing anything: the directory listing is backed
        // by an fd of its own (which shows up in the listing), and closing
        // entries while still iterating over them is asking for trouble.
        let fds: Vec<RawFd> = entries
            .flatten()
            .filter_map(|e| e.file_name().to_str().and_then(|s| s.parse::<RawFd>().ok()))
            .collect();
        for fd in fds {
            if !is_kept(fd) {
                unsafe {
                    libc::close(fd);
                }
            }
        }
        return;
    }

    let max_fd = unsafe { libc::sysconf(libc::_SC_OPEN_MAX) };
    let max_fd = if max_fd > 0 { max_fd as RawFd } else { 4096 };
    for fd in 3..max_fd {
        if !is_kept(fd) {
            unsafe {
                libc::close(fd);
            }
        }
    }
}

pub const POLLIN: i16 = libc::POLLIN;
pub const POLLOUT: i16 = libc::POLLOUT;
pub const POLLHUP: i16 = libc::POLLHUP;
pub const POLLERR: i16 = libc::POLLERR;

#[derive(Clone, Copy)]
pub struct PollFd(libc::pollfd);

impl PollFd {
    pub fn new(fd: Option<RawFd>, events: i16) -> PollFd {
        PollFd(libc::pollfd {
            fd: fd.unwrap_or(-1),
            events,
            revents: 0,
        })
    }

    pub fn test(&self, mask: i16) -> bool {
        self.0.revents & mask != 0
    }
}

/// `poll(2)`. `timeout_ms` follows the C convention: negative blocks
/// forever, zero never blocks.
///
/// `poll` is never restarted by `SA_RESTART` (signal(7)): the broker's
/// `SIGCHLD` handler interrupts a blocked call the moment the watched
/// child exits, which is the normal, expected case rather than an error.
/// Retry internally on `EINTR`, shrinking the remaining timeout against a
/// deadline so a signal storm cannot turn a bounded wait into an unbounded
/// one; a retry that outlives the deadline reports zero fds ready, same as
/// an ordinary timeout.
pub fn poll(fds: &mut [PollFd], timeout_ms: i32) -> Result<usize> {
    let deadline = (timeout_ms >= 0).then(|| Instant::now() + Duration::from_millis(timeout_ms as u64));
    loop {
        let wait_ms = match deadline {
            Some(d) => match d.checked_duration_since(Instant::now()) {
                Some(remaining) => remaining.as_millis().min(i32::MAX as u128) as i32,
                None => return Ok(0),
            },
            None => -1,
        };
        let n = unsafe {
            libc::poll(
                fds.as_mut_ptr() as *mut libc::pollfd,
                fds.len() as libc::nfds_t,
                wait_ms,
            )
        };
        if n >= 0 {
            return Ok(n as usize);
        }
        let err = Error::last_os_error();
        if err.raw_os_error() == Some(libc::EINTR) {
            continue;
        }
        return Err(err);
    }
}

/// Write one byte to `fd`, non-blocking, swallowing `EWOULDBLOCK`/`EAGAIN`.
///
/// Used both by the SIGCHLD handler (async-signal-safe: a single `write(2)`
/// with no allocation or locking) and by the broker's ordinary-context
/// fan-out to per-call self-pipes.
pub fn notify_nonblocking(fd: RawFd) {
    let byte = 1u8;
    unsafe {
        let n = libc::write(fd, &byte as *const u8 as *const libc::c_void, 1);
        if n < 0 {
            let errno = *libc::__errno_location();
            debug_assert!(
                errno == libc::EAGAIN || errno == libc::EWOULDBLOCK || errno == libc::EINTR,
                "unexpected errno from self-pipe write: {errno}"
            );
        }
    }
}

/// Drain `fd` until it would block or hits EOF. Used for self-pipes, whose
/// contents are pure wakeup noise.
pub fn drain_nonblocking(fd: RawFd) {
    let mut buf = [0u8; 512];
    loop {
        let n = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
        if n <= 0 {
            break;
        }
    }
}

/// Signal handler function pointer type accepted by `sigaction`.
pub type SigHandler = extern "C" fn(i32);

/// Install `handler` for `signal`, returning the previous `sigaction` so it
/// can be restored later.
///
/// # Safety
///
/// `handler` must be async-signal-safe.
pub unsafe fn sigaction_install(signal: i32, handler: SigHandler) -> Result<libc::sigaction> {
    let mut new: libc::sigaction = unsafe { mem::zeroed() };
    new.sa_sigaction = handler as usize;
    unsafe {
        libc::sigemptyset(&mut new.sa_mask);
    }
    new.sa_flags = libc::SA_RESTART;

    let mut old: libc::sigaction = unsafe { mem::zeroed() };
    check_err(unsafe { libc::sigaction(signal, &new, &mut old) })?;
    Ok(old)
}

/// Restore a `sigaction` previously returned by [`sigaction_install`].
///
/// # Safety
///
/// `old` must have come from a matching `sigaction_install` call for the
/// same signal number.
pub unsafe fn sigaction_restore(signal: i32, old: &libc::sigaction) -> Result<()> {
    check_err(unsafe { libc::sigaction(signal, old, ptr::null_mut()) })?;
    Ok(())
}
