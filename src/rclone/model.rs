use serde::Deserialize;
use serde_json::{Map, Value};

use super::RcloneError;

/// One decoded JSON log line.
pub type RcloneMessage = Map<String, Value>;

/// Result of an rclone invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct RcloneResult {
    /// The rclone command without the binary or implied flags.
    pub cmd: Vec<String>,
    /// The full command line that was executed.
    pub full_cmd: Vec<String>,
    pub returncode: i32,
    /// Every JSON message rclone emitted, in order.
    pub messages: Vec<RcloneMessage>,
}

/// Transfer statistics from the final message of a sync.
///
/// See <https://rclone.org/rc/#core-stats>.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct RcloneSyncStatistics {
    /// Bytes transferred.
    pub bytes: u64,
    /// Files deleted.
    pub deletes: u64,
    pub errors: u64,
    /// Files transferred.
    pub transfers: u64,
}

/// Result of an `rclone sync`.
#[derive(Debug, Clone, PartialEq)]
pub struct RcloneSyncResult {
    pub result: RcloneResult,
    pub stats: RcloneSyncStatistics,
}

impl RcloneSyncResult {
    /// Extract statistics from the last message, which rclone always emits
    /// with a `stats` object on a run that did not crash.
    pub fn from_result(result: RcloneResult) -> Result<Self, RcloneError> {
        let stats = result
            .messages
            .last()
            .and_then(|m| m.get("stats"))
            .ok_or(RcloneError::MissingStats)?;

        let stats = RcloneSyncStatistics::deserialize(stats).map_err(RcloneError::Stats)?;

        Ok(Self { result, stats })
    }
}
