//! Top-level convenience functions layered over [`Popen`], mirroring
//! Python's `subprocess.call`/`check_call`/`check_output`.

use std::ffi::OsStr;

use crate::error::{PopenError, Result};
use crate::popen::{ExitStatus, Popen, PopenConfig};
use crate::redirection::Redirection;

/// Spawn `argv` with `config` and block until it exits, inheriting all
/// three standard streams unless `config` says otherwise.
pub fn call<S: AsRef<OsStr>>(argv: &[S], config: PopenConfig) -> Result<ExitStatus> {
    let mut p = Popen::create(argv, config)?;
    Ok(p.wait()?)
}

/// Like [`call`], but returns `Err` unless the child exited successfully.
pub fn check_call<S: AsRef<OsStr>>(argv: &[S], config: PopenConfig) -> Result<()> {
    let status = call(argv, config)?;
    if status.success() {
        Ok(())
    } else {
        Err(PopenError::NonZeroExit {
            command: argv.iter().map(|s| s.as_ref().to_string_lossy().into_owned()).collect(),
            status,
        })
    }
}

/// Spawn `argv` with its stdout captured, wait for completion, and return
/// the captured bytes. `config.stdout` is overridden to `Redirection::Pipe`
/// regardless of what the caller passed in, since there would otherwise be
/// nothing to capture.
pub fn check_output<S: AsRef<OsStr>>(argv: &[S], mut config: PopenConfig) -> Result<Vec<u8>> {
    config.stdout = Redirection::Pipe;
    let mut p = Popen::create(argv, config)?;
    let (out, _) = p.communicate(None)?;
    let status = p.wait()?;
    if !status.success() {
        return Err(PopenError::NonZeroExit {
            command: argv.iter().map(|s| s.as_ref().to_string_lossy().into_owned()).collect(),
            status,
        });
    }
    Ok(out.unwrap_or_default())
}
