//! External command execution.
//!
//! Every rclone and restic invocation goes through a [`CommandExecutor`], so
//! clients can be handed a scripted executor in tests instead of spawning
//! real processes.

pub mod mock;

use std::io::{self, Read};
use std::path::Path;
use std::process::{Command, Stdio};

/// Captured result of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Process exit code. `-1` when the process was terminated by a signal.
    pub returncode: i32,
    /// Captured stdout. Also contains stderr when streams were combined.
    pub stdout: Vec<u8>,
    /// Captured stderr, or `None` when it was combined into stdout.
    pub stderr: Option<Vec<u8>>,
}

/// Trait for running an external command to completion.
pub trait CommandExecutor: Send + Sync {
    /// Run `cmd` (binary followed by its arguments) in `cwd` and wait for it to exit.
    ///
    /// When `combine_stdout_stderr` is set, stderr is written into the same
    /// stream as stdout and [`CommandOutput::stderr`] is `None`.
    fn execute(&self, cmd: &[String], cwd: &Path, combine_stdout_stderr: bool)
        -> io::Result<CommandOutput>;
}

/// Executor that spawns real processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemExecutor;

impl CommandExecutor for SystemExecutor {
    fn execute(
        &self,
        cmd: &[String],
        cwd: &Path,
        combine_stdout_stderr: bool,
    ) -> io::Result<CommandOutput> {
        let (program, args) = cmd
            .split_first()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "empty command"))?;

        log::debug!("Running '{}' in {}", cmd.join(" "), cwd.display());

        if combine_stdout_stderr {
            run_combined(program, args, cwd)
        } else {
            let output = Command::new(program)
                .args(args)
                .current_dir(cwd)
                .stdin(Stdio::null())
                .output()?;

            Ok(CommandOutput {
                returncode: output.status.code().unwrap_or(-1),
                stdout: output.stdout,
                stderr: Some(output.stderr),
            })
        }
    }
}

/// Run a command with stderr redirected into the stdout pipe.
fn run_combined(program: &str, args: &[String], cwd: &Path) -> io::Result<CommandOutput> {
    let (mut reader, writer) = io::pipe()?;
    let writer_err = writer.try_clone()?;

    // The builder holds the only parent-side copies of the write end and is
    // dropped once spawn returns, so the read below ends when the child exits.
    let mut child = Command::new(program)
        .args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(writer)
        .stderr(writer_err)
        .spawn()?;

    let mut stdout = Vec::new();
    reader.read_to_end(&mut stdout)?;
    let status = child.wait()?;

    Ok(CommandOutput {
        returncode: status.code().unwrap_or(-1),
        stdout,
        stderr: None,
    })
}
