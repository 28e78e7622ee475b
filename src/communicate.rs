//! The Communicator: deadlock-free simultaneous reading of a child's
//! stdout/stderr while feeding its stdin, all from a single thread.
//!
//! A naive `write_all(stdin)` then `read_to_end(stdout)` deadlocks as soon as
//! both the input and the expected output exceed the pipe buffer (typically
//! 64KiB): the child blocks writing to a full stdout pipe while the parent
//! is still blocked writing to stdin, and neither side is reading. This
//! module avoids that by multiplexing all redirected streams (plus a
//! wakeup fd from the [`broker`](crate::broker)) through a single
//! `poll(2)` loop, writing and draining in whatever order the fds are
//! actually ready.

use std::fs::File;
use std::io::{self, Read, Write};
use std::os::unix::io::AsRawFd;
use std::time::{Duration, Instant};

use crate::broker::{self, Subscription};
use crate::popen::Popen;
use crate::posix::{self, PollFd};

const CHUNK: usize = 64 * 1024;

/// A communicate session in progress against one [`Popen`].
///
/// Built via [`Popen::communicate_start`]; configure with
/// [`limit_time`](Communicator::limit_time) and
/// [`limit_size`](Communicator::limit_size), then drive it with
/// [`read`](Communicator::read), [`read_to`](Communicator::read_to), or
/// [`for_each`](Communicator::for_each) for incremental delivery.
pub struct Communicator<'a> {
    popen: &'a mut Popen,
    input: Option<Vec<u8>>,
    time_limit: Option<Duration>,
    size_limit: Option<usize>,
}

impl<'a> Communicator<'a> {
    pub(crate) fn new(popen: &'a mut Popen, input: Option<Vec<u8>>) -> Communicator<'a> {
        Communicator {
            popen,
            input,
            time_limit: None,
            size_limit: None,
        }
    }

    /// Give up and return `io::ErrorKind::TimedOut` if the session has not
    /// finished within `limit`. Whatever was already read is still
    /// returned to the caller (via `read_to`'s out-params, or discarded by
    /// `read`'s all-or-nothing `Result`).
    pub fn limit_time(mut self, limit: Duration) -> Communicator<'a> {
        self.time_limit = Some(limit);
        self
    }

    /// Cap how many bytes are read from each of stdout/stderr before the
    /// session stops (still reporting the underlying streams as live, not
    /// exhausted — repeated reads continue where this one left off).
    pub fn limit_size(mut self, limit: usize) -> Communicator<'a> {
        self.size_limit = Some(limit);
        self
    }

    /// Run to completion (or until a configured limit trips) and return
    /// whatever was captured from stdout/stderr, `None` for each stream
    /// that was not redirected.
    pub fn read(self) -> io::Result<(Option<Vec<u8>>, Option<Vec<u8>>)> {
        let has_out = self.popen.stdout.is_some();
        let has_err = self.popen.stderr.is_some();
        let mut out = Vec::new();
        let mut err = Vec::new();
        self.read_to(&mut out, &mut err)?;
        Ok((has_out.then_some(out), has_err.then_some(err)))
    }

    /// Like [`read`](Communicator::read), but appends into caller-supplied
    /// buffers instead of allocating fresh ones. On a timeout, whatever had
    /// been read so far is still appended before the error is returned.
    pub fn read_to(mut self, out: &mut Vec<u8>, err: &mut Vec<u8>) -> io::Result<()> {
        let deadline = self.time_limit.map(|d| Instant::now() + d);

        let mut stdin = self.popen.stdin.take();
        let mut stdout = self.popen.stdout.take();
        let mut stderr = self.popen.stderr.take();

        let mut input = self.input.take().unwrap_or_default();
        if stdin.is_none() {
            input.clear();
        }
        let mut written = 0usize;
        let size_limit = self.size_limit;

        let subscription = broker::register().ok();

        let result = run_loop(
            &mut *self.popen,
            &mut stdin,
            &mut stdout,
            &mut stderr,
            &input,
            &mut written,
            out,
            err,
            size_limit,
            deadline,
            subscription.as_ref(),
            &mut None,
        );

        // Give back whichever ends are still open (a size-limited read
        // leaves the stream live for a follow-up call); fully
        // drained/closed ends stay taken (`None`).
        self.popen.stdin = stdin;
        self.popen.stdout = stdout;
        self.popen.stderr = stderr;

        result
    }

    /// Run to completion, delivering stdout/stderr to `callback` as they
    /// arrive instead of buffering everything until the session ends.
    /// Each invocation receives only the bytes read since the previous
    /// one — the two slices are empty exactly when nothing new arrived on
    /// that stream since the last delivery, never both at once unless this
    /// is the final, post-exit call. Useful for a long-running child whose
    /// output should be processed as a stream rather than held in memory.
    ///
    /// Not meant to be combined with [`limit_size`](Communicator::limit_size):
    /// delivered bytes are dropped from the accumulator immediately, so a
    /// size limit would count only the latest undelivered chunk.
    pub fn for_each<F>(mut self, mut callback: F) -> io::Result<()>
    where
        F: FnMut(&[u8], &[u8]),
    {
        let deadline = self.time_limit.map(|d| Instant::now() + d);

        let mut stdin = self.popen.stdin.take();
        let mut stdout = self.popen.stdout.take();
        let mut stderr = self.popen.stderr.take();

        let mut input = self.input.take().unwrap_or_default();
        if stdin.is_none() {
            input.clear();
        }
        let mut written = 0usize;

        let subscription = broker::register().ok();

        let mut out = Vec::new();
        let mut err = Vec::new();
        let mut boxed_callback: Option<Box<dyn FnMut(&[u8], &[u8]) + '_>> =
            Some(Box::new(&mut callback));

        let result = run_loop(
            &mut *self.popen,
            &mut stdin,
            &mut stdout,
            &mut stderr,
            &input,
            &mut written,
            &mut out,
            &mut err,
            None,
            deadline,
            subscription.as_ref(),
            &mut boxed_callback,
        );

        self.popen.stdin = stdin;
        self.popen.stdout = stdout;
        self.popen.stderr = stderr;

        result
    }
}

/// Drives the poll loop until every redirected stream is closed, the
/// deadline expires, or the child exits. Each iteration reaps the child
/// non-blockingly first: once it has exited, the loop stops waiting on
/// `poll(2)` (which would otherwise block for output that may never
/// arrive, e.g. a grandchild still holding the write end open) and instead
/// drains whatever is already buffered in the pipes in one final pass.
#[allow(clippy::too_many_arguments)]
fn run_loop(
    popen: &mut Popen,
    stdin: &mut Option<File>,
    stdout: &mut Option<File>,
    stderr: &mut Option<File>,
    input: &[u8],
    written: &mut usize,
    out: &mut Vec<u8>,
    err: &mut Vec<u8>,
    size_limit: Option<usize>,
    deadline: Option<Instant>,
    subscription: Option<&Subscription>,
    callback: &mut Option<Box<dyn FnMut(&[u8], &[u8]) + '_>>,
) -> io::Result<()> {
    if let Some(f) = stdin.as_ref() {
        posix::set_nonblocking(f.as_raw_fd())?;
    }
    if let Some(f) = stdout.as_ref() {
        posix::set_nonblocking(f.as_raw_fd())?;
    }
    if let Some(f) = stderr.as_ref() {
        posix::set_nonblocking(f.as_raw_fd())?;
    }

    let out_start = out.len();
    let err_start = err.len();

    loop {
        if stdin.is_none() && stdout.is_none() && stderr.is_none() {
            return Ok(());
        }

        let out_done = match size_limit {
            Some(limit) => stdout.is_none() || out.len() - out_start >= limit,
            None => stdout.is_none(),
        };
        let err_done = match size_limit {
            Some(limit) => stderr.is_none() || err.len() - err_start >= limit,
            None => stderr.is_none(),
        };
        if size_limit.is_some() && out_done && err_done && stdin.is_none() {
            return Ok(());
        }

        if stdin.is_some() && *written >= input.len() {
            // Nothing left to write: close our end so the child observes
            // EOF on its stdin.
            stdin.take();
        }

        if popen.poll().is_some() {
            // The child is gone. Its stdout/stderr write ends may still be
            // held open elsewhere (a grandchild, a process it dup2'd them
            // into), so EOF on our read ends is not guaranteed, but nothing
            // more will ever arrive from the child itself: collect whatever
            // is already buffered in the pipes and stop, rather than
            // blocking in `poll(2)` for output that may never come.
            stdin.take();
            if let Some(f) = stdout.as_mut() {
                let remaining = size_limit.map(|limit| limit.saturating_sub(out.len() - out_start));
                drain_into(f, out, remaining)?;
            }
            if let Some(f) = stderr.as_mut() {
                let remaining = size_limit.map(|limit| limit.saturating_sub(err.len() - err_start));
                drain_into(f, err, remaining)?;
            }
            if let Some(cb) = callback
                && (out.len() > out_start || err.len() > err_start)
            {
                cb(&out[out_start..], &err[err_start..]);
                out.truncate(out_start);
                err.truncate(err_start);
            }
            return Ok(());
        }

        let mut fds = Vec::with_capacity(5);
        let stdin_idx = stdin.as_ref().filter(|_| *written < input.len()).map(|f| {
            fds.push(PollFd::new(Some(f.as_raw_fd()), posix::POLLOUT));
            fds.len() - 1
        });
        let stdout_idx = stdout.as_ref().filter(|_| !out_done).map(|f| {
            fds.push(PollFd::new(Some(f.as_raw_fd()), posix::POLLIN));
            fds.len() - 1
        });
        let stderr_idx = stderr.as_ref().filter(|_| !err_done).map(|f| {
            fds.push(PollFd::new(Some(f.as_raw_fd()), posix::POLLIN));
            fds.len() - 1
        });
        let global_idx = subscription.map(|s| {
            fds.push(PollFd::new(Some(s.global_read), posix::POLLIN));
            fds.len() - 1
        });
        let self_idx = subscription.map(|s| {
            fds.push(PollFd::new(Some(s.self_read.as_raw_fd()), posix::POLLIN));
            fds.len() - 1
        });

        if stdin_idx.is_none() && stdout_idx.is_none() && stderr_idx.is_none() {
            return Ok(());
        }

        let timeout_ms = match deadline {
            Some(d) => {
                let remaining = d.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    return Err(io::Error::from(io::ErrorKind::TimedOut));
                }
                remaining.as_millis().min(i32::MAX as u128) as i32
            }
            None => -1,
        };

        posix::poll(&mut fds, timeout_ms)?;

        if let (Some(i), Some(sub)) = (global_idx, subscription)
            && fds[i].test(posix::POLLIN)
        {
            broker::drain_global(sub.global_read);
            broker::wakeup_all();
        }
        if let (Some(i), Some(sub)) = (self_idx, subscription)
            && fds[i].test(posix::POLLIN)
        {
            posix::drain_nonblocking(sub.self_read.as_raw_fd());
        }

        if let Some(i) = stdin_idx
            && fds[i].test(posix::POLLOUT | posix::POLLERR)
        {
            let f = stdin.as_mut().unwrap();
            match f.write(&input[*written..]) {
                Ok(0) => {
                    stdin.take();
                }
                Ok(n) => {
                    *written += n;
                    if *written >= input.len() {
                        stdin.take();
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) if e.raw_os_error() == Some(libc::EPIPE) => {
                    // Child closed its stdin early; not an error for us.
                    stdin.take();
                }
                Err(e) => return Err(e),
            }
        }

        if let Some(i) = stdout_idx
            && fds[i].test(posix::POLLIN | posix::POLLHUP | posix::POLLERR)
        {
            let remaining = size_limit.map(|limit| limit.saturating_sub(out.len() - out_start));
            if !drain_into(stdout.as_mut().unwrap(), out, remaining)? {
                stdout.take();
            }
        }

        if let Some(i) = stderr_idx
            && fds[i].test(posix::POLLIN | posix::POLLHUP | posix::POLLERR)
        {
            let remaining = size_limit.map(|limit| limit.saturating_sub(err.len() - err_start));
            if !drain_into(stderr.as_mut().unwrap(), err, remaining)? {
                stderr.take();
            }
        }

        if let Some(cb) = callback
            && (out.len() > out_start || err.len() > err_start)
        {
            cb(&out[out_start..], &err[err_start..]);
            out.truncate(out_start);
            err.truncate(err_start);
        }
    }
}

/// Read whatever is currently available from `stream` into `buf`, stopping
/// early once `remaining` bytes (if given) have been appended even if more
/// is available — used to honor a `limit_size` without over-reading past
/// it. Returns `false` once the stream has hit EOF (the caller should then
/// drop the fd), or `true` if it is still live (including a spurious
/// wakeup with nothing to read, or the `remaining` cap being reached).
fn drain_into(f: &mut File, buf: &mut Vec<u8>, remaining: Option<usize>) -> io::Result<bool> {
    let mut left = remaining.unwrap_or(usize::MAX);
    let mut chunk = [0u8; CHUNK];
    loop {
        if left == 0 {
            return Ok(true);
        }
        let want = left.min(chunk.len());
        match f.read(&mut chunk[..want]) {
            Ok(0) => return Ok(false),
            Ok(n) => {
                buf.extend_from_slice(&chunk[..n]);
                left -= n;
                if n < want {
                    return Ok(true);
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(true),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
}
