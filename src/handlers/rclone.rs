//! rclone command handlers

use anyhow::{Context, Result};
use std::sync::Arc;

use crate::cmd::CommandExecutor;
use crate::config::RcloneConfig;
use crate::rclone::{RcloneClient, RcloneService};
use crate::report::BackupReport;

/// Arguments of the `sync` command. `None` falls back to the configuration.
#[derive(Debug, Clone, Default)]
pub struct SyncArgs {
    pub bwlimit: Option<String>,
    pub s3_storage_class: Option<String>,
    pub source: String,
    pub destination: String,
}

/// Build an rclone service for S3 destinations using ambient AWS credentials.
pub fn rclone_service(
    executor: Arc<dyn CommandExecutor>,
    config: &RcloneConfig,
    args: &SyncArgs,
) -> RcloneService {
    let bwlimit = args.bwlimit.as_deref().unwrap_or(&config.bwlimit);
    let storage_class = args
        .s3_storage_class
        .as_deref()
        .unwrap_or(&config.s3_storage_class);

    let mut client = RcloneClient::new(executor).with_binary(config.binary.as_str());
    client.sync_args = vec![
        "--bwlimit".to_string(),
        bwlimit.to_string(),
        "--checksum".to_string(),
        "--delete-after".to_string(),
    ];
    client.provider_args = vec![
        "--s3-provider".to_string(),
        config.s3_provider.clone(),
        "--s3-env-auth".to_string(),
        "--s3-acl".to_string(),
        config.s3_acl.clone(),
        "--s3-storage-class".to_string(),
        storage_class.to_string(),
    ];

    RcloneService::new(client)
}

/// Handle sync command
pub fn handle_sync(
    executor: Arc<dyn CommandExecutor>,
    config: &RcloneConfig,
    name: &str,
    args: &SyncArgs,
) -> Result<BackupReport> {
    let service = rclone_service(executor, config, args);
    service
        .sync(name, &args.source, &args.destination)
        .with_context(|| format!("Failed to sync {} to {}", args.source, args.destination))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmd::mock::MockCommandExecutor;
    use serde_json::json;

    #[test]
    fn test_sync_command_line() {
        let mock = Arc::new(MockCommandExecutor::new());
        mock.set_result_json_messages(
            0,
            &[json!({"stats": {"bytes": 0, "deletes": 0, "errors": 0, "transfers": 0}})],
        );
        let args = SyncArgs {
            bwlimit: Some("8M".to_string()),
            s3_storage_class: None,
            source: "/data".to_string(),
            destination: "s3:bucket/data".to_string(),
        };

        let report = handle_sync(mock.clone(), &RcloneConfig::default(), "nightly", &args).unwrap();

        assert!(report.successful);
        assert_eq!(
            mock.last_command().unwrap().cmd,
            vec![
                "rclone",
                "--verbose",
                "--use-json-log",
                "--s3-provider",
                "AWS",
                "--s3-env-auth",
                "--s3-acl",
                "private",
                "--s3-storage-class",
                "STANDARD",
                "sync",
                "--bwlimit",
                "8M",
                "--checksum",
                "--delete-after",
                "/data",
                "s3:bucket/data",
            ]
        );
    }

    #[test]
    fn test_sync_parse_failure_is_an_error() {
        let mock = Arc::new(MockCommandExecutor::new());
        mock.set_result(1, "Failed to create file system\n");
        let args = SyncArgs {
            source: "/data".to_string(),
            destination: "s3:bucket".to_string(),
            ..Default::default()
        };

        assert!(handle_sync(mock, &RcloneConfig::default(), "nightly", &args).is_err());
    }
}
