use chrono::{DateTime, FixedOffset};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::path::PathBuf;

use super::ResticError;

/// One decoded JSON message (or document) from restic.
pub type ResticMessage = Map<String, Value>;

/// Exit codes restic documents for scripting.
///
/// See <https://restic.readthedocs.io/en/stable/075_scripting.html#exit-codes>.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResticExitCode {
    /// Success; for `cat config` this means the repository is initialized.
    Ok,
    RepositoryNotInitialized,
    BadRepositoryPassword,
    Other(i32),
}

impl ResticExitCode {
    pub const RC_OK: i32 = 0;
    pub const RC_REPOSITORY_NOT_INITIALIZED: i32 = 10;
    pub const RC_BAD_REPOSITORY_PASSWORD: i32 = 12;

    pub fn from_code(code: i32) -> Self {
        match code {
            Self::RC_OK => ResticExitCode::Ok,
            Self::RC_REPOSITORY_NOT_INITIALIZED => ResticExitCode::RepositoryNotInitialized,
            Self::RC_BAD_REPOSITORY_PASSWORD => ResticExitCode::BadRepositoryPassword,
            other => ResticExitCode::Other(other),
        }
    }
}

/// Result of a restic invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct ResticResult {
    /// Repository the command ran against.
    pub repository: String,
    /// The restic command without the binary or implied arguments.
    pub cmd: Vec<String>,
    /// The full command line that was executed.
    pub full_cmd: Vec<String>,
    pub returncode: i32,
    /// Every JSON message restic emitted. Empty when nothing parseable was printed.
    pub messages: Vec<ResticMessage>,
    summary_index: Option<usize>,
}

impl ResticResult {
    pub fn new(
        repository: impl Into<String>,
        cmd: Vec<String>,
        full_cmd: Vec<String>,
        returncode: i32,
        messages: Vec<ResticMessage>,
    ) -> Self {
        // Single-document commands have no message_type at all.
        let summary_index = messages
            .iter()
            .position(|m| m.get("message_type").and_then(Value::as_str) == Some("summary"));

        Self {
            repository: repository.into(),
            cmd,
            full_cmd,
            returncode,
            messages,
            summary_index,
        }
    }

    /// The `"message_type": "summary"` message, when restic emitted one.
    pub fn summary(&self) -> Option<&ResticMessage> {
        self.summary_index.map(|i| &self.messages[i])
    }

    pub fn exit_code(&self) -> ResticExitCode {
        ResticExitCode::from_code(self.returncode)
    }

    pub fn succeeded(&self) -> bool {
        self.returncode == ResticExitCode::RC_OK
    }

    fn decode_error(self, what: &str, err: impl std::fmt::Display) -> ResticError {
        ResticError::Decode {
            message: format!("failed to decode restic {what}: {err}"),
            result: Box::new(self),
        }
    }

    fn decode_summary<T: DeserializeOwned>(self, what: &str) -> Result<(Self, T), ResticError> {
        let decoded = self
            .summary()
            .map(|m| serde_json::from_value::<T>(Value::Object(m.clone())));

        match decoded {
            Some(Ok(summary)) => Ok((self, summary)),
            Some(Err(e)) => Err(self.decode_error(what, e)),
            None => Err(self.decode_error(what, "no summary message")),
        }
    }
}

/// Summary of a `restic backup` run, also embedded in each listed snapshot.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BackupSummary {
    /// Absent when `--skip-if-unchanged` found nothing to snapshot.
    #[serde(default)]
    pub snapshot_id: Option<String>,
    pub backup_start: DateTime<FixedOffset>,
    pub backup_end: DateTime<FixedOffset>,
    pub files_new: u64,
    pub files_changed: u64,
    pub files_unmodified: u64,
    pub dirs_new: u64,
    pub dirs_changed: u64,
    pub dirs_unmodified: u64,
    pub data_blobs: u64,
    pub tree_blobs: u64,
    pub data_added: u64,
    pub data_added_packed: u64,
    pub total_files_processed: u64,
    pub total_bytes_processed: u64,
}

/// Result of `restic backup`. `summary` is present iff restic exited with 0.
#[derive(Debug, Clone, PartialEq)]
pub struct ResticBackupResult {
    pub result: ResticResult,
    pub summary: Option<BackupSummary>,
}

impl ResticBackupResult {
    pub fn from_result(result: ResticResult) -> Result<Self, ResticError> {
        if !result.succeeded() {
            return Ok(Self { result, summary: None });
        }
        let (result, summary) = result.decode_summary("backup summary")?;
        Ok(Self {
            result,
            summary: Some(summary),
        })
    }
}

/// Summary of `restic check`, e.g.
/// `{"message_type":"summary","num_errors":0,"broken_packs":null,"suggest_repair_index":false,"suggest_prune":false}`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CheckSummary {
    pub num_errors: u64,
    #[serde(default)]
    pub broken_packs: Option<Vec<String>>,
    #[serde(default)]
    pub suggest_repair_index: bool,
    #[serde(default)]
    pub suggest_prune: bool,
}

/// Result of `restic check`. `summary` is present iff restic exited with 0.
#[derive(Debug, Clone, PartialEq)]
pub struct ResticCheckResult {
    pub result: ResticResult,
    pub summary: Option<CheckSummary>,
}

impl ResticCheckResult {
    pub fn from_result(result: ResticResult) -> Result<Self, ResticError> {
        if !result.succeeded() {
            return Ok(Self { result, summary: None });
        }
        let (result, summary) = result.decode_summary("check summary")?;
        Ok(Self {
            result,
            summary: Some(summary),
        })
    }
}

/// A snapshot as listed by `restic snapshots`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Snapshot {
    pub id: String,
    pub short_id: String,
    #[serde(default)]
    pub parent: Option<String>,
    pub tree: String,
    pub paths: Vec<PathBuf>,
    pub hostname: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub program_version: String,
    pub time: DateTime<FixedOffset>,
    /// Only recorded by restic 0.17 and later.
    #[serde(default)]
    pub summary: Option<BackupSummary>,
}

/// Result of `restic snapshots`, oldest snapshot first.
#[derive(Debug, Clone, PartialEq)]
pub struct ResticSnapshotsResult {
    pub result: ResticResult,
    pub snapshots: Vec<Snapshot>,
}

impl ResticSnapshotsResult {
    pub fn from_result(result: ResticResult) -> Result<Self, ResticError> {
        if !result.succeeded() {
            return Ok(Self {
                result,
                snapshots: Vec::new(),
            });
        }

        let decoded: Result<Vec<Snapshot>, _> = result
            .messages
            .iter()
            .map(|m| serde_json::from_value::<Snapshot>(Value::Object(m.clone())))
            .collect();

        match decoded {
            Ok(mut snapshots) => {
                for s in &mut snapshots {
                    if let Some(summary) = s.summary.as_mut() {
                        summary.snapshot_id.get_or_insert_with(|| s.id.clone());
                    }
                }
                Ok(Self { result, snapshots })
            }
            Err(e) => Err(result.decode_error("snapshot list", e)),
        }
    }

    /// The most recent snapshot.
    pub fn latest(&self) -> Option<&Snapshot> {
        self.snapshots.last()
    }
}

/// One policy group from `restic forget --json`.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct ForgetGroup {
    #[serde(default)]
    pub keep: Option<Vec<Value>>,
    #[serde(default)]
    pub remove: Option<Vec<Value>>,
}

/// Result of `restic forget`.
#[derive(Debug, Clone, PartialEq)]
pub struct ResticForgetResult {
    pub result: ResticResult,
    pub groups: Vec<ForgetGroup>,
}

impl ResticForgetResult {
    pub fn from_result(result: ResticResult) -> Result<Self, ResticError> {
        let decoded: Result<Vec<ForgetGroup>, _> = result
            .messages
            .iter()
            .map(|m| serde_json::from_value::<ForgetGroup>(Value::Object(m.clone())))
            .collect();

        match decoded {
            Ok(groups) => Ok(Self { result, groups }),
            Err(e) if result.succeeded() => Err(result.decode_error("forget output", e)),
            Err(_) => Ok(Self {
                result,
                groups: Vec::new(),
            }),
        }
    }

    pub fn kept(&self) -> usize {
        self.groups
            .iter()
            .map(|g| g.keep.as_ref().map_or(0, Vec::len))
            .sum()
    }

    pub fn removed(&self) -> usize {
        self.groups
            .iter()
            .map(|g| g.remove.as_ref().map_or(0, Vec::len))
            .sum()
    }
}
