//! rclone integration.
//!
//! [`RcloneClient`] builds and runs `rclone` commands and decodes the
//! line-delimited JSON log rclone emits with `--use-json-log`.
//! [`RcloneService`] turns a sync into a [`BackupReport`](crate::report::BackupReport).

mod client;
mod error;
mod model;
mod service;

pub use client::RcloneClient;
pub use error::RcloneError;
pub use model::{RcloneMessage, RcloneResult, RcloneSyncResult, RcloneSyncStatistics};
pub use service::RcloneService;
