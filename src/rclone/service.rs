use chrono::Local;

use crate::report::{annotators, BackupReport};

use super::{RcloneClient, RcloneError};

/// High-level rclone operations that produce backup reports.
pub struct RcloneService {
    pub client: RcloneClient,
}

impl RcloneService {
    pub fn new(client: RcloneClient) -> Self {
        Self { client }
    }

    /// Sync `source` to `destination` and report the transfer statistics.
    ///
    /// The report is successful only when rclone counted zero errors. A run
    /// without final statistics yields an unsuccessful report with an "Error"
    /// field. Output that cannot be decoded at all is returned as an error.
    pub fn sync(
        &self,
        name: &str,
        source: &str,
        destination: &str,
    ) -> Result<BackupReport, RcloneError> {
        let mut report = BackupReport::new(format!("sync / {name}"));
        report.new_field("Source", source, annotators::none);
        report.new_field("Destination", destination, annotators::none);
        report.new_field("Backup Start", Local::now(), annotators::none);
        let backup_end = report.new_field("Backup End", Local::now(), annotators::none);

        log::info!("Syncing {source} to {destination}");
        let sync = match self.client.sync(source, destination) {
            Ok(sync) => sync,
            Err(e @ (RcloneError::MissingStats | RcloneError::Stats(_))) => {
                log::error!("rclone sync of {source} failed: {e}");
                report.new_field("Error", e.to_string(), annotators::multiline_text);
                report.set_field_data(backup_end, Local::now());
                return Ok(report);
            }
            Err(e) => return Err(e),
        };
        let stats = sync.stats;

        report.new_field("Errors", stats.errors, annotators::ok_if_zero_else_error);
        report.new_field("Bytes Transferred", stats.bytes, annotators::none);
        report.new_field("Files Transferred", stats.transfers, annotators::none);
        report.new_field("Deletes", stats.deletes, annotators::none);

        report.successful = stats.errors == 0;
        if !report.successful {
            log::warn!("rclone sync finished with {} errors", stats.errors);
        }

        report.set_field_data(backup_end, Local::now());
        report.set_result(sync.result);

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmd::mock::MockCommandExecutor;
    use crate::report::{Annotation, FieldData};
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn test_sync_with_errors_is_unsuccessful() {
        let mock = Arc::new(MockCommandExecutor::new());
        mock.set_result_json_messages(
            0,
            &[json!({"stats": {"bytes": 10, "deletes": 0, "errors": 2, "transfers": 1}})],
        );
        let service = RcloneService::new(RcloneClient::new(mock));

        let report = service.sync("photos", "/src", "remote:dst").unwrap();
        let errors = report.find_field("Errors").unwrap();

        assert!(!report.successful);
        assert_eq!(errors.data, FieldData::Int(2));
        assert_eq!(errors.annotation(), Some(Annotation::Error));
        assert_eq!(report.name, "sync / photos");
    }
}
