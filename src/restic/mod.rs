//! restic integration.
//!
//! [`ResticClient`] runs restic against a single repository and decodes its
//! JSON output into typed results. [`ResticService`] orchestrates repository
//! initialization, backups, checks, snapshot comparison and retention into
//! [`BackupReport`](crate::report::BackupReport)s.

mod client;
mod error;
mod model;
mod service;

pub use client::{ForgetOptions, JsonMode, ResticClient};
pub use error::ResticError;
pub use model::{
    BackupSummary, CheckSummary, ForgetGroup, ResticBackupResult, ResticCheckResult,
    ResticExitCode, ResticForgetResult, ResticMessage, ResticResult, ResticSnapshotsResult,
    Snapshot,
};
pub use service::{ResticService, IMPLICIT_EXCLUDE_FILE_NAME};
