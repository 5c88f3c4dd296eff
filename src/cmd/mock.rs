//! Scripted command executor for tests.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde_json::Value;

use super::{CommandExecutor, CommandOutput};

type ResultFactory = Box<dyn Fn(&[String], &Path, bool) -> CommandOutput + Send + Sync>;

/// A command that was passed to a [`MockCommandExecutor`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvokedCommand {
    pub cmd: Vec<String>,
    pub cwd: PathBuf,
    pub combine_stdout_stderr: bool,
}

/// Executor that never spawns a process.
///
/// Results come from a factory closure, and every invocation is recorded so
/// tests can assert on the exact command line and working directory.
pub struct MockCommandExecutor {
    factory: Mutex<ResultFactory>,
    invoked: Mutex<Vec<InvokedCommand>>,
}

impl Default for MockCommandExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl MockCommandExecutor {
    /// Create an executor that returns exit code 0 with empty output.
    pub fn new() -> Self {
        Self {
            factory: Mutex::new(Box::new(|_, _, _| CommandOutput::default())),
            invoked: Mutex::new(Vec::new()),
        }
    }

    /// Return the same result for every command.
    pub fn set_result(&self, returncode: i32, stdout: impl Into<Vec<u8>>) {
        let stdout = stdout.into();
        self.set_factory(move |_, _, _| CommandOutput {
            returncode,
            stdout: stdout.clone(),
            stderr: None,
        });
    }

    /// Return the given messages as line-delimited JSON for every command.
    pub fn set_result_json_messages(&self, returncode: i32, messages: &[Value]) {
        self.set_result(returncode, json_lines(messages));
    }

    /// Compute the result from the invoked command.
    pub fn set_factory<F>(&self, factory: F)
    where
        F: Fn(&[String], &Path, bool) -> CommandOutput + Send + Sync + 'static,
    {
        if let Ok(mut slot) = self.factory.lock() {
            *slot = Box::new(factory);
        }
    }

    /// All commands invoked so far, oldest first.
    pub fn invoked_commands(&self) -> Vec<InvokedCommand> {
        self.invoked.lock().map(|v| v.clone()).unwrap_or_default()
    }

    /// The most recently invoked command.
    pub fn last_command(&self) -> Option<InvokedCommand> {
        self.invoked.lock().ok().and_then(|v| v.last().cloned())
    }
}

impl CommandExecutor for MockCommandExecutor {
    fn execute(
        &self,
        cmd: &[String],
        cwd: &Path,
        combine_stdout_stderr: bool,
    ) -> io::Result<CommandOutput> {
        let output = {
            let factory = self
                .factory
                .lock()
                .map_err(|_| io::Error::other("mock executor lock poisoned"))?;
            factory(cmd, cwd, combine_stdout_stderr)
        };

        if let Ok(mut invoked) = self.invoked.lock() {
            invoked.push(InvokedCommand {
                cmd: cmd.to_vec(),
                cwd: cwd.to_path_buf(),
                combine_stdout_stderr,
            });
        }

        Ok(output)
    }
}

/// Encode messages the way rclone and restic stream them: one JSON object per line.
pub fn json_lines(messages: &[Value]) -> Vec<u8> {
    messages
        .iter()
        .map(Value::to_string)
        .collect::<Vec<_>>()
        .join("\n")
        .into_bytes()
}

/// Build a successful [`CommandOutput`] from line-delimited JSON messages.
pub fn json_output(returncode: i32, messages: &[Value]) -> CommandOutput {
    CommandOutput {
        returncode,
        stdout: json_lines(messages),
        stderr: None,
    }
}
