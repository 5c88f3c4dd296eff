//! Report delivery.
//!
//! A [`BackupReporter`] takes a finished [`BackupReport`] tree and delivers
//! every report in it, skipping omittable descendants. The root report is
//! always delivered.

pub mod console;
pub mod googlechat;

use anyhow::Result;

use crate::report::BackupReport;

pub use console::ConsoleReporter;
pub use googlechat::{
    GoogleChatReportRenderer, GoogleChatReporter, ReqwestTransport, WebhookRequest,
    WebhookTransport,
};

/// Trait for delivering a report and all of its subreports.
pub trait BackupReporter {
    fn report(&mut self, report: &BackupReport) -> Result<()>;
}

/// Reports of `root` to deliver, in pre-order. Omittable descendants are skipped.
pub fn reports_to_deliver(root: &BackupReport) -> impl Iterator<Item = &BackupReport> {
    root.all_reports()
        .enumerate()
        .filter(|(i, r)| *i == 0 || !r.omittable)
        .map(|(_, r)| r)
}
