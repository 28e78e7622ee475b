//! Process-wide SIGCHLD broker.
//!
//! A [`Communicator`](crate::communicate::Communicator) needs to wake up
//! promptly when *any* child exits, not just the one it is waiting on
//! (spec: "enables any communicate loop to sleep in a multiplexed wait and
//! still wake promptly when some child exits"). A signal handler cannot
//! safely walk a registry of interested loops — it may run while a thread
//! holds the very mutex protecting that registry — so the wakeup happens in
//! two hops:
//!
//! 1. The SIGCHLD handler does the one thing that is always safe: write one
//!    byte, non-blocking, to a long-lived "global notify pipe".
//! 2. Whichever `Communicator` notices that pipe is readable drains it and
//!    calls [`wakeup_all`], which — back in ordinary thread context, with
//!    the mutex free to take — writes one byte to every registered per-call
//!    self-pipe.
//!
//! The broker installs the handler once, when the first caller registers,
//! and restores whatever was there before once the last caller
//! unregisters.

use std::collections::HashMap;
use std::fs::File;
use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::{Mutex, OnceLock};

use crate::posix;

struct BrokerState {
    /// subscription id -> write end of that call's self-pipe. Keyed by a
    /// monotonic counter rather than pid: two concurrent `communicate`
    /// calls against the same child (or, after a `fork`, two unrelated
    /// processes that happen to reuse a pid) must still get distinct
    /// entries, which a pid-keyed table could not guarantee.
    subscribers: HashMap<u64, RawFd>,
    next_id: u64,
    /// The global notify pipe and the pid that opened it. Re-created if a
    /// fork is detected (owner pid no longer matches `getpid()`).
    global: Option<(File, File, u32)>,
    previous_handler: Option<libc::sigaction>,
}

impl BrokerState {
    fn new() -> BrokerState {
        BrokerState {
            subscribers: HashMap::new(),
            next_id: 0,
            global: None,
            previous_handler: None,
        }
    }
}

fn state() -> &'static Mutex<BrokerState> {
    static STATE: OnceLock<Mutex<BrokerState>> = OnceLock::new();
    STATE.get_or_init(|| Mutex::new(BrokerState::new()))
}

extern "C" fn on_sigchld(_signum: i32) {
    // Async-signal context: touch nothing but the write end of the global
    // pipe, and do it with a raw non-blocking write. No locks, no
    // allocation, no table lookups.
    if let Some(fd) = GLOBAL_WRITE_FD.load() {
        posix::notify_nonblocking(fd);
    }
}

/// Raced-free storage for the global pipe's write-fd, read from the signal
/// handler. A plain `AtomicI32` initialized to -1 (no valid fd is
/// negative), so the handler never needs the mutex.
struct AtomicFd(std::sync::atomic::AtomicI32);

impl AtomicFd {
    const fn new() -> AtomicFd {
        AtomicFd(std::sync::atomic::AtomicI32::new(-1))
    }
    fn store(&self, fd: RawFd) {
        self.0.store(fd, std::sync::atomic::Ordering::SeqCst);
    }
    fn load(&self) -> Option<RawFd> {
        let fd = self.0.load(std::sync::atomic::Ordering::SeqCst);
        if fd >= 0 { Some(fd) } else { None }
    }
}

static GLOBAL_WRITE_FD: AtomicFd = AtomicFd::new();

/// A single call's subscription to the broker. Dropping it unregisters.
pub(crate) struct Subscription {
    id: u64,
    pub(crate) global_read: RawFd,
    pub(crate) self_read: File,
}

/// Subscribe the calling `Communicator` to the broker, installing the
/// SIGCHLD handler and creating the global pipe if this is the first
/// subscriber (or if a fork has been detected since the global pipe was
/// created).
pub(crate) fn register() -> io::Result<Subscription> {
    let mut guard = state().lock().unwrap();

    let current_pid = posix::getpid();
    let need_new_global = match &guard.global {
        Some((_, _, owner)) => *owner != current_pid,
        None => true,
    };
    if need_new_global {
        let (read, write) = posix::pipe()?;
        posix::set_inheritable(&read, false)?;
        posix::set_inheritable(&write, false)?;
        posix::set_nonblocking(write.as_raw_fd())?;
        posix::set_nonblocking(read.as_raw_fd())?;
        GLOBAL_WRITE_FD.store(write.as_raw_fd());
        guard.global = Some((read, write, current_pid));
    }

    if guard.subscribers.is_empty() {
        // Safety: `on_sigchld` only performs a non-blocking `write(2)`.
        let previous = unsafe { posix::sigaction_install(posix::SIGCHLD, on_sigchld)? };
        guard.previous_handler = Some(previous);
    }

    let (self_read, self_write) = posix::pipe()?;
    posix::set_inheritable(&self_read, false)?;
    posix::set_inheritable(&self_write, false)?;
    posix::set_nonblocking(self_read.as_raw_fd())?;
    posix::set_nonblocking(self_write.as_raw_fd())?;

    let id = guard.next_id;
    guard.next_id += 1;
    // Leak the write end's fd into the registry; `Subscription::drop`
    // reclaims it via unregister(), which closes it through the `File`
    // reconstructed there.
    let self_write_fd = self_write.into_raw_fd_keep();
    guard.subscribers.insert(id, self_write_fd);

    let global_read = guard.global.as_ref().unwrap().0.as_raw_fd();

    Ok(Subscription {
        id,
        global_read,
        self_read,
    })
}

fn unregister(id: u64) {
    let mut guard = state().lock().unwrap();
    if let Some(fd) = guard.subscribers.remove(&id) {
        unsafe {
            libc::close(fd);
        }
    }
    if guard.subscribers.is_empty()
        && let Some(previous) = guard.previous_handler.take()
    {
        // Best-effort: if restoring fails there is nothing more useful to
        // do than leave our handler in place.
        let _ = unsafe { posix::sigaction_restore(posix::SIGCHLD, &previous) };
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        unregister(self.id);
    }
}

/// Drain the global pipe and write one wakeup byte to every registered
/// per-call self-pipe. Called by whichever `Communicator` observed the
/// global pipe become readable.
pub(crate) fn wakeup_all() {
    let guard = state().lock().unwrap();
    for &fd in guard.subscribers.values() {
        posix::notify_nonblocking(fd);
    }
}

/// Drain the bytes the signal handler(s) wrote to the global pipe.
pub(crate) fn drain_global(global_read: RawFd) {
    posix::drain_nonblocking(global_read);
}

trait IntoRawFdKeep {
    /// Like `into_raw_fd`, but available without requiring the caller to
    /// import `std::os::unix::io::IntoRawFd` at every call site inside this
    /// module (kept local since it is only ever used to hand the broker a
    /// fd it alone is now responsible for closing).
    fn into_raw_fd_keep(self) -> RawFd;
}

impl IntoRawFdKeep for File {
    fn into_raw_fd_keep(self) -> RawFd {
        use std::os::unix::io::IntoRawFd;
        self.into_raw_fd()
    }
}
