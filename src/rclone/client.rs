use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::cmd::CommandExecutor;

use super::{RcloneError, RcloneMessage, RcloneResult, RcloneSyncResult};

/// Client to the rclone binary.
///
/// Only the subset of rclone needed to mirror data is exposed.
pub struct RcloneClient {
    executor: Arc<dyn CommandExecutor>,
    binary: String,
    /// Remote/provider flags placed before the subcommand, e.g. `--s3-provider AWS`.
    pub provider_args: Vec<String>,
    /// Flags placed after `sync`, e.g. `--checksum`.
    pub sync_args: Vec<String>,
}

impl RcloneClient {
    pub fn new(executor: Arc<dyn CommandExecutor>) -> Self {
        Self {
            executor,
            binary: "rclone".to_string(),
            provider_args: Vec::new(),
            sync_args: Vec::new(),
        }
    }

    /// Use a different rclone binary than the one on `PATH`.
    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    /// Prefix an rclone command with the binary and the flags every invocation needs.
    pub fn full_cmd(&self, cmd: &[String]) -> Vec<String> {
        let mut full = vec![
            self.binary.clone(),
            "--verbose".to_string(),
            "--use-json-log".to_string(),
        ];
        full.extend_from_slice(cmd);
        full
    }

    /// Run rclone and decode every line of its combined output as a JSON message.
    pub fn run(&self, cmd: Vec<String>, cwd: Option<&Path>) -> Result<RcloneResult, RcloneError> {
        let cwd = match cwd {
            Some(p) => p.to_path_buf(),
            None => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        };
        let full_cmd = self.full_cmd(&cmd);

        let output = self
            .executor
            .execute(&full_cmd, &cwd, true)
            .map_err(|source| RcloneError::Spawn {
                command: full_cmd.join(" "),
                source,
            })?;

        let messages = parse_json_lines(&output.stdout)?;

        Ok(RcloneResult {
            cmd,
            full_cmd,
            returncode: output.returncode,
            messages,
        })
    }

    /// Mirror `source` to `destination`.
    pub fn sync(&self, source: &str, destination: &str) -> Result<RcloneSyncResult, RcloneError> {
        let mut cmd = self.provider_args.clone();
        cmd.push("sync".to_string());
        cmd.extend(self.sync_args.iter().cloned());
        cmd.push(source.to_string());
        cmd.push(destination.to_string());

        let result = self.run(cmd, None)?;
        RcloneSyncResult::from_result(result)
    }
}

fn parse_json_lines(stdout: &[u8]) -> Result<Vec<RcloneMessage>, RcloneError> {
    stdout
        .split(|b| *b == b'\n')
        .filter(|line| !line.trim_ascii().is_empty())
        .map(|line| {
            serde_json::from_slice(line).map_err(|source| RcloneError::Parse {
                line: String::from_utf8_lossy(line).into_owned(),
                source,
            })
        })
        .collect()
}
