//! `Pipeline`: chain several [`Exec`] builders together with OS-level
//! pipes, the way a shell wires up `a | b | c`.
//!
//! Only the first command's stdin and the last command's stdout/stderr are
//! exposed to the caller; every stage in between is connected directly by a
//! kernel pipe, so data flowing through the middle of a long pipeline never
//! crosses back into this process.

use std::os::unix::io::AsRawFd;

use crate::error::Result;
use crate::exec::{Capture, Exec};
use crate::popen::{ExitStatus, Popen};
use crate::posix;
use crate::redirection::{InputRedirection, OutputRedirection, Redirection};

pub struct Pipeline {
    commands: Vec<Exec>,
}

impl Pipeline {
    pub(crate) fn new(first: Exec, second: Exec) -> Pipeline {
        Pipeline {
            commands: vec![first, second],
        }
    }

    /// Append another stage to the pipeline.
    pub fn add(mut self, next: Exec) -> Pipeline {
        self.commands.push(next);
        self
    }

    /// Set the first command's stdin.
    pub fn stdin<T: InputRedirection>(mut self, r: T) -> Pipeline {
        let first = self.commands.remove(0);
        self.commands.insert(0, first.stdin(r));
        self
    }

    /// Set the last command's stdout.
    pub fn stdout<T: OutputRedirection>(mut self, r: T) -> Pipeline {
        let i = self.commands.len() - 1;
        let last = self.commands.remove(i);
        self.commands.insert(i, last.stdout(r));
        self
    }

    /// Set the last command's stderr.
    pub fn stderr<T: OutputRedirection>(mut self, r: T) -> Pipeline {
        let i = self.commands.len() - 1;
        let last = self.commands.remove(i);
        self.commands.insert(i, last.stderr(r));
        self
    }

    /// Spawn every stage, connecting consecutive stages with a pipe, and
    /// return all of them in order.
    pub fn popen(mut self) -> Result<Vec<Popen>> {
        let n = self.commands.len();
        assert!(n >= 2, "a pipeline needs at least two commands");

        let mut stdin_data = None;
        std::mem::swap(&mut stdin_data, &mut self.commands[0].stdin_data);

        // Keep the original pipe fds alive in the parent until every stage
        // has forked and duplicated its own copy; `Redirection::Fd` dups
        // the number it is given rather than taking ownership, so these
        // must be closed explicitly afterward.
        let mut ends = Vec::with_capacity(n - 1);
        for i in 0..n - 1 {
            let (read, write) = posix::pipe()?;
            self.commands[i].config.stdout = Redirection::Fd(write.as_raw_fd());
            self.commands[i + 1].config.stdin = Redirection::Fd(read.as_raw_fd());
            ends.push((read, write));
        }

        self.commands[0].stdin_data = stdin_data;

        let mut processes = Vec::with_capacity(n);
        for command in self.commands.drain(..) {
            match command.popen() {
                Ok(p) => processes.push(p),
                Err(e) => {
                    drop(ends);
                    for p in &processes {
                        let _ = p.terminate();
                    }
                    return Err(e);
                }
            }
        }
        drop(ends);

        Ok(processes)
    }

    /// Spawn and wait for every stage, returning each one's exit status in
    /// order.
    pub fn join(self) -> Result<Vec<ExitStatus>> {
        let mut processes = self.popen()?;
        processes.iter_mut().map(|p| Ok(p.wait()?)).collect()
    }

    /// Spawn, feed the first command's stdin (if provided via
    /// [`Exec::stdin`]), and capture the last command's stdout/stderr.
    ///
    /// Note this does not give the same whole-pipeline deadlock freedom as
    /// [`Popen::communicate`]: the first stage's input and the last stage's
    /// output are drained by two independent, sequential communicate
    /// sessions. A pipeline whose middle stages buffer more than the kernel
    /// pipe capacity while carrying very large input can in principle back
    /// up before the last stage starts draining.
    pub fn capture(mut self) -> Result<Capture> {
        let last = self.commands.len() - 1;
        if matches!(self.commands[last].config.stdout, Redirection::None) {
            self.commands[last].config.stdout = Redirection::Pipe;
        }
        if matches!(self.commands[last].config.stderr, Redirection::None) {
            self.commands[last].config.stderr = Redirection::Pipe;
        }

        let mut processes = self.popen()?;
        let mut last_popen = processes.pop().expect("pipeline has at least two stages");
        let (stdout, stderr) = last_popen.communicate(None)?;
        let exit_status = last_popen.wait()?;
        for p in processes.iter_mut().rev() {
            p.wait()?;
        }
        Ok(Capture {
            stdout: stdout.unwrap_or_default(),
            stderr: stderr.unwrap_or_default(),
            exit_status,
        })
    }
}

impl std::ops::BitOr<Exec> for Pipeline {
    type Output = Pipeline;
    fn bitor(self, other: Exec) -> Pipeline {
        self.add(other)
    }
}
