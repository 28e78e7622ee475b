//! Execution and interaction with child processes.
//!
//! The entry point is the [`Popen`] struct and the [`Exec`] builder.
//! `Popen` is modeled after Python's `subprocess.Popen`, adapted to fit
//! Rust, while `Exec` gives a fluent builder API with convenient methods
//! for streaming and capturing output, plus combining `Popen` instances
//! into OS-level pipelines via [`Pipeline`].
//!
//! Compared to `std::process`, this crate adds:
//!
//! * [`Popen::communicate`]/[`Popen::communicate_start`] for deadlock-free
//!   reading of a child's stdout/stderr while simultaneously feeding its
//!   stdin.
//! * Redirection to arbitrary open files, numeric fds, or paths, plus
//!   merging stderr into stdout (`Redirection::Merge`), matching the
//!   shell's `2>&1`.
//! * Non-blocking and timeout waits: [`Popen::poll`], [`Popen::wait`],
//!   [`Popen::wait_timeout`].
//! * Chaining commands into OS-level pipelines with [`Pipeline`].
//!
//! # Examples
//!
//! ```no_run
//! use childproc::{Popen, PopenConfig, Redirection};
//!
//! let mut p = Popen::create(&["ps", "x"], PopenConfig {
//!     stdout: Redirection::Pipe,
//!     ..Default::default()
//! })?;
//!
//! let (out, _err) = p.communicate(None)?;
//!
//! if let Some(status) = p.poll() {
//!     println!("already exited: {status}");
//! } else {
//!     p.terminate()?;
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ```no_run
//! use childproc::Exec;
//!
//! let checksum = (Exec::cmd("find").arg(".").arg("-type").arg("f")
//!     | Exec::cmd("sort")
//!     | Exec::cmd("sha1sum"))
//!     .capture()?
//!     .stdout_str();
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![warn(missing_docs)]

extern crate libc;

mod broker;
mod communicate;
mod error;
mod exec;
mod pipeline;
mod popen;
mod posix;
mod redirection;
mod run;
mod spawn;

pub use crate::communicate::Communicator;
pub use crate::error::{PopenError, Result};
pub use crate::exec::{Capture, Exec};
pub use crate::pipeline::Pipeline;
pub use crate::popen::{format_status, ExitStatus, Popen, PopenConfig};
pub use crate::redirection::{InputRedirection, OutputRedirection, Redirection};
pub use crate::run::{call, check_call, check_output};
pub use crate::spawn::OsOptions;

#[cfg(test)]
mod tests {
    mod broker;
    mod communicate;
    mod exec;
    mod pipeline;
    mod popen;
    mod posix;
}
