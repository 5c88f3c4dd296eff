//! Command handler modules
//!
//! Each handler builds the clients and services for one CLI command from the
//! parsed arguments and the loaded configuration, runs the operation and
//! returns its report. Delivery and exit codes are left to the caller.

pub mod rclone;
pub mod restic;

use anyhow::Result;

use crate::report::BackupReport;
use crate::reporter::BackupReporter;

pub use self::rclone::{handle_sync, SyncArgs};
pub use self::restic::{
    handle_backup, handle_check, handle_compare_snapshots, handle_prune_repack, BackupArgs,
    RepositoryArgs,
};

/// Exit code when the job ran but its top-level report is unsuccessful.
pub const EXIT_REPORT_UNSUCCESSFUL: i32 = 3;

/// Deliver `report` and map its outcome to a process exit code.
pub fn deliver(reporter: &mut dyn BackupReporter, report: &BackupReport) -> Result<i32> {
    reporter.report(report)?;

    if report.successful {
        log::info!("'{}' completed successfully", report.name);
        Ok(0)
    } else {
        log::warn!("'{}' was not successful", report.name);
        Ok(EXIT_REPORT_UNSUCCESSFUL)
    }
}
