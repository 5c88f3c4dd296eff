use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;

use crate::cmd::CommandExecutor;

use super::{
    ResticBackupResult, ResticCheckResult, ResticError, ResticExitCode, ResticForgetResult,
    ResticMessage, ResticResult, ResticSnapshotsResult,
};

/// How restic's stdout is decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonMode {
    /// The whole output is one JSON value (an object or an array of objects).
    SingleDocument,
    /// One JSON object per line.
    Lines,
}

/// Retention and cleanup options for `restic forget`.
///
/// The `keep_within_*` windows take restic durations such as `"1y5m7d2h"`;
/// see `restic forget --help`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ForgetOptions {
    pub keep_last: Option<u32>,
    pub keep_within_hourly: Option<String>,
    pub keep_within_daily: Option<String>,
    pub keep_within_weekly: Option<String>,
    pub keep_within_monthly: Option<String>,
    pub keep_within_yearly: Option<String>,
    pub prune: bool,
    pub repack_small: bool,
}

impl ForgetOptions {
    fn to_args(&self) -> Vec<String> {
        let mut args = Vec::new();

        if let Some(n) = self.keep_last {
            args.extend(["--keep-last".to_string(), n.to_string()]);
        }

        let windows = [
            ("--keep-within-hourly", &self.keep_within_hourly),
            ("--keep-within-daily", &self.keep_within_daily),
            ("--keep-within-weekly", &self.keep_within_weekly),
            ("--keep-within-monthly", &self.keep_within_monthly),
            ("--keep-within-yearly", &self.keep_within_yearly),
        ];
        for (flag, value) in windows {
            if let Some(v) = value {
                args.extend([flag.to_string(), v.clone()]);
            }
        }

        if self.prune {
            args.push("--prune".to_string());
        }
        if self.repack_small {
            args.push("--repack-small".to_string());
        }

        args
    }
}

/// Client to the restic binary for a single repository.
///
/// Only the subset of restic needed to run and verify backups is exposed.
pub struct ResticClient {
    executor: Arc<dyn CommandExecutor>,
    binary: String,
    pub repository_path: String,
    pub password_file: Option<PathBuf>,
    pub cache_dir: Option<PathBuf>,
}

impl ResticClient {
    pub fn new(
        executor: Arc<dyn CommandExecutor>,
        repository_path: impl Into<String>,
        password_file: Option<PathBuf>,
        cache_dir: Option<PathBuf>,
    ) -> Self {
        Self {
            executor,
            binary: "restic".to_string(),
            repository_path: repository_path.into(),
            password_file,
            cache_dir,
        }
    }

    /// Use a different restic binary than the one on `PATH`.
    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    /// Prefix a subcommand with the repository, cache, password and `--json` arguments.
    pub fn full_cmd(&self, subcmd: &[String]) -> Vec<String> {
        let mut cmd = vec![
            self.binary.clone(),
            "--repo".to_string(),
            self.repository_path.clone(),
        ];

        if let Some(cache_dir) = &self.cache_dir {
            cmd.push("--cache-dir".to_string());
            cmd.push(cache_dir.display().to_string());
        }

        if let Some(password_file) = &self.password_file {
            cmd.push("--password-file".to_string());
            cmd.push(password_file.display().to_string());
        }

        cmd.push("--json".to_string());
        cmd.extend_from_slice(subcmd);
        cmd
    }

    /// Run restic and decode its output according to `mode`.
    pub fn run(
        &self,
        cmd: Vec<String>,
        mode: JsonMode,
        cwd: Option<&Path>,
    ) -> Result<ResticResult, ResticError> {
        let cwd = match cwd {
            Some(p) => p.to_path_buf(),
            None => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        };
        let full_cmd = self.full_cmd(&cmd);

        let output = self
            .executor
            .execute(&full_cmd, &cwd, true)
            .map_err(|source| ResticError::Spawn {
                command: full_cmd.join(" "),
                source,
            })?;

        let messages = match mode {
            JsonMode::SingleDocument => parse_single_document(&output.stdout),
            JsonMode::Lines => match parse_lines(&output.stdout) {
                Ok(messages) => messages,
                Err((line, source)) => {
                    let result = ResticResult::new(
                        self.repository_path.clone(),
                        cmd,
                        full_cmd,
                        output.returncode,
                        Vec::new(),
                    );
                    return Err(ResticError::Parse {
                        line,
                        source,
                        result: Box::new(result),
                    });
                }
            },
        };

        Ok(ResticResult::new(
            self.repository_path.clone(),
            cmd,
            full_cmd,
            output.returncode,
            messages,
        ))
    }

    /// Whether the repository exists, based on the exit code of `restic cat config`.
    pub fn repository_is_initialized(&self) -> Result<bool, ResticError> {
        let result = self.run(args(&["cat", "config"]), JsonMode::SingleDocument, None)?;

        match result.exit_code() {
            ResticExitCode::Ok => Ok(true),
            ResticExitCode::RepositoryNotInitialized => Ok(false),
            ResticExitCode::BadRepositoryPassword => Err(ResticError::InvalidPassword {
                result: Box::new(result),
            }),
            ResticExitCode::Other(code) => {
                for m in &result.messages {
                    log::error!("restic error: {}", Value::Object(m.clone()));
                }
                Err(ResticError::Tool {
                    message: format!("unhandled error from restic (exit code {code})"),
                    result: Box::new(result),
                })
            }
        }
    }

    /// Initialize the repository.
    pub fn init(&self) -> Result<ResticResult, ResticError> {
        log::info!("Initializing restic repository {}", self.repository_path);
        let result = self.run(args(&["init"]), JsonMode::Lines, None)?;

        if !result.succeeded() {
            return Err(ResticError::Tool {
                message: "failed initializing repository".to_string(),
                result: Box::new(result),
            });
        }

        Ok(result)
    }

    /// Back up `source`.
    ///
    /// restic is run from the parent of `source` with only its final path
    /// component as the target. With absolute targets restic would record the
    /// ancestor directories too, and any metadata change on them (common in
    /// rebuilt container images) would defeat `--skip-if-unchanged`.
    ///
    /// Relative exclude files are resolved against the caller's working
    /// directory before restic is started elsewhere.
    pub fn backup(
        &self,
        source: &Path,
        skip_if_unchanged: bool,
        exclude_files: &[PathBuf],
    ) -> Result<ResticBackupResult, ResticError> {
        let (cwd, target) = split_backup_source(source)?;

        let mut cmd = vec!["backup".to_string()];
        if skip_if_unchanged {
            cmd.push("--skip-if-unchanged".to_string());
        }
        for p in exclude_files {
            let p = std::path::absolute(p).unwrap_or_else(|_| p.clone());
            cmd.push("--exclude-file".to_string());
            cmd.push(p.display().to_string());
        }
        cmd.push(target);

        let result = self.run(cmd, JsonMode::Lines, Some(&cwd))?;
        ResticBackupResult::from_result(result)
    }

    /// Check the repository, optionally reading all pack data.
    pub fn check(&self, read_data: bool) -> Result<ResticCheckResult, ResticError> {
        let mut cmd = args(&["check"]);
        if read_data {
            cmd.push("--read-data".to_string());
        }

        let result = self.run(cmd, JsonMode::Lines, None)?;
        ResticCheckResult::from_result(result)
    }

    /// Remove snapshots according to `options`.
    pub fn forget(&self, options: &ForgetOptions) -> Result<ResticForgetResult, ResticError> {
        // Without --quiet restic mixes plain text into the JSON document.
        let mut cmd = args(&["forget", "--quiet"]);
        cmd.extend(options.to_args());

        let result = self.run(cmd, JsonMode::SingleDocument, None)?;
        ResticForgetResult::from_result(result)
    }

    /// List snapshots, oldest first. `latest` limits the list to the last N per group.
    pub fn snapshots(&self, latest: Option<u32>) -> Result<ResticSnapshotsResult, ResticError> {
        let mut cmd = args(&["snapshots"]);
        if let Some(n) = latest {
            cmd.push("--latest".to_string());
            cmd.push(n.to_string());
        }

        let result = self.run(cmd, JsonMode::SingleDocument, None)?;
        ResticSnapshotsResult::from_result(result)
    }
}

fn args(a: &[&str]) -> Vec<String> {
    a.iter().map(|s| s.to_string()).collect()
}

/// Split a backup source into (working directory, relative target).
fn split_backup_source(source: &Path) -> Result<(PathBuf, String), ResticError> {
    let resolved;
    let source = if source.file_name().is_some() {
        source
    } else {
        // ".", ".." and friends: resolve to a real directory name first.
        resolved = fs::canonicalize(source).map_err(|_| ResticError::InvalidSource {
            path: source.to_path_buf(),
        })?;
        resolved.as_path()
    };

    let name = source
        .file_name()
        .ok_or_else(|| ResticError::InvalidSource {
            path: source.to_path_buf(),
        })?
        .to_string_lossy()
        .into_owned();

    let cwd = match source.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };

    Ok((cwd, name))
}

/// Decode the whole output as one JSON value. Anything unparseable yields no messages.
fn parse_single_document(stdout: &[u8]) -> Vec<ResticMessage> {
    match serde_json::from_slice::<Value>(stdout) {
        Ok(Value::Object(m)) => vec![m],
        Ok(Value::Array(values)) => {
            let mut messages = Vec::with_capacity(values.len());
            for v in values {
                match v {
                    Value::Object(m) => messages.push(m),
                    _ => return Vec::new(),
                }
            }
            messages
        }
        Ok(_) | Err(_) => Vec::new(),
    }
}

fn parse_lines(stdout: &[u8]) -> Result<Vec<ResticMessage>, (String, serde_json::Error)> {
    stdout
        .split(|b| *b == b'\n')
        .filter(|line| !line.trim_ascii().is_empty())
        .map(|line| {
            serde_json::from_slice(line)
                .map_err(|e| (String::from_utf8_lossy(line).into_owned(), e))
        })
        .collect()
}
