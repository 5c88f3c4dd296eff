use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use chrono::Local;

use crate::report::{annotators, Annotation, BackupReport, FieldData, FieldId};

use super::{ForgetOptions, ResticClient, ResticError};

/// Name of the per-directory exclude file picked up automatically by backups.
pub const IMPLICIT_EXCLUDE_FILE_NAME: &str = "backupignore";

/// Shown in place of a snapshot id when a repository has no snapshots.
const NO_SNAPSHOT: &str = "(none)";

fn error_if_no_snapshot(data: &FieldData) -> Option<Annotation> {
    match data.as_str() {
        Some(NO_SNAPSHOT) | None => Some(Annotation::Error),
        Some(_) => None,
    }
}

/// High-level operations over one restic repository, each producing a [`BackupReport`].
///
/// Tool failures never escape as errors: they are recorded in the returned
/// report, which then stays unsuccessful.
pub struct ResticService {
    pub client: ResticClient,
    pub implicit_exclude_file_name: String,
}

impl ResticService {
    pub fn new(client: ResticClient) -> Self {
        Self {
            client,
            implicit_exclude_file_name: IMPLICIT_EXCLUDE_FILE_NAME.to_string(),
        }
    }

    pub fn with_implicit_exclude_file_name(mut self, name: impl Into<String>) -> Self {
        self.implicit_exclude_file_name = name.into();
        self
    }

    /// Back up `source`, initializing the repository first if needed.
    ///
    /// With `for_each`, every direct child of `source` that is a regular file
    /// or directory is backed up separately into its own subreport.
    pub fn backup(
        &self,
        name: &str,
        source: &Path,
        for_each: bool,
        skip_if_unchanged: bool,
        exclude_files: &[PathBuf],
    ) -> BackupReport {
        let mut report = BackupReport::new(name);
        report.new_field(
            "Repository",
            self.client.repository_path.as_str(),
            annotators::none,
        );
        let new_repo = report.new_field("New Repo", false, annotators::ok_if_false_else_warning);
        let init_ok = report.new_field("Init OK", false, annotators::ok_if_true_else_error);
        report.new_field("Backup Start", Local::now(), annotators::none);
        let backup_end = report.new_field("Backup End", Local::now(), annotators::none);

        if self.ensure_initialized(&mut report, new_repo, init_ok) {
            if for_each {
                self.backup_for_each(source, skip_if_unchanged, exclude_files, &mut report);
            } else {
                self.backup_single(source, skip_if_unchanged, exclude_files, &mut report);
            }
        }

        report.set_field_data(backup_end, Local::now());
        report
    }

    /// Verify the repository structure and all pack data.
    pub fn check(&self) -> BackupReport {
        let mut report = BackupReport::new("Repository Check");
        report.new_field(
            "Repository",
            self.client.repository_path.as_str(),
            annotators::none,
        );
        report.new_field("Start", Local::now(), annotators::none);
        let end = report.new_field("End", Local::now(), annotators::none);

        self.check_into(&mut report);

        report.set_field_data(end, Local::now());
        report
    }

    fn check_into(&self, report: &mut BackupReport) {
        let check = match self.client.check(true) {
            Ok(check) => check,
            Err(e) => {
                record_error(report, &e);
                return;
            }
        };

        let returncode = check.result.returncode;
        let summary = check.summary.clone();
        report.set_result(check.result);

        let summary = match summary {
            Some(summary) if returncode == 0 => summary,
            _ => {
                report.new_field("Error Code", returncode, annotators::ok_if_zero_else_error);
                return;
            }
        };

        report.new_field("Errors", summary.num_errors, annotators::ok_if_zero_else_error);
        report.new_field(
            "Repair Suggested",
            summary.suggest_repair_index,
            annotators::ok_if_false_else_error,
        );
        report.new_field(
            "Prune Suggested",
            summary.suggest_prune,
            annotators::ok_if_false_else_error,
        );

        if let Some(packs) = summary.broken_packs.filter(|p| !p.is_empty()) {
            report.new_field("Broken Packs", packs.join("\n"), annotators::multiline_text);
        }

        report.successful = summary.num_errors == 0;
    }

    /// Compare the latest snapshot of this repository with that of `remote`.
    ///
    /// Successful only when both repositories have a snapshot and the ids match.
    pub fn compare_latest_snapshots(&self, remote: &ResticClient) -> BackupReport {
        let mut report = BackupReport::new("Snapshot Comparison");
        report.new_field(
            "Local Repository",
            self.client.repository_path.as_str(),
            annotators::none,
        );
        report.new_field(
            "Remote Repository",
            remote.repository_path.as_str(),
            annotators::none,
        );
        report.new_field("Start", Local::now(), annotators::none);
        let end = report.new_field("End", Local::now(), annotators::none);

        self.compare_into(&mut report, remote);

        report.set_field_data(end, Local::now());
        report
    }

    fn compare_into(&self, report: &mut BackupReport, remote: &ResticClient) {
        let ids = latest_snapshot_id(&self.client)
            .and_then(|local| latest_snapshot_id(remote).map(|remote| (local, remote)));
        let (local_id, remote_id) = match ids {
            Ok(ids) => ids,
            Err(e) => {
                record_error(report, &e);
                return;
            }
        };

        report.new_field("Local Snapshot ID", local_id.as_str(), error_if_no_snapshot);
        report.new_field("Remote Snapshot ID", remote_id.as_str(), error_if_no_snapshot);

        report.successful = local_id == remote_id && local_id != NO_SNAPSHOT;
        if !report.successful {
            log::warn!("Latest snapshots differ: local {local_id}, remote {remote_id}");
        }
    }

    /// Forget snapshots outside the retention windows, optionally pruning and repacking.
    pub fn prune_repack(&self, options: &ForgetOptions) -> BackupReport {
        let mut report = BackupReport::new("Prune / Repack");
        report.new_field(
            "Repository",
            self.client.repository_path.as_str(),
            annotators::none,
        );
        report.new_field("Start", Local::now(), annotators::none);
        let end = report.new_field("End", Local::now(), annotators::none);

        match self.client.forget(options) {
            Ok(forget) => {
                let returncode = forget.result.returncode;
                report.new_field("Error Code", returncode, annotators::ok_if_zero_else_error);

                if returncode == 0 {
                    report.new_field("Snapshots Kept", forget.kept(), annotators::none);
                    report.new_field("Snapshots Removed", forget.removed(), annotators::none);
                    report.successful = true;
                }

                report.set_result(forget.result);
            }
            Err(e) => record_error(&mut report, &e),
        }

        report.set_field_data(end, Local::now());
        report
    }

    /// Make sure the repository exists. Returns false if the backup must not proceed.
    fn ensure_initialized(
        &self,
        report: &mut BackupReport,
        new_repo: FieldId,
        init_ok: FieldId,
    ) -> bool {
        report.set_field_data(init_ok, false);

        let initialized = match self.client.repository_is_initialized() {
            Ok(initialized) => initialized,
            Err(e) => {
                record_error(report, &e);
                return false;
            }
        };

        if !initialized {
            report.set_field_data(new_repo, true);

            if let Err(e) = self.client.init() {
                record_error(report, &e);
                return false;
            }
        }

        report.set_field_data(init_ok, true);
        true
    }

    fn backup_for_each(
        &self,
        source: &Path,
        skip_if_unchanged: bool,
        exclude_files: &[PathBuf],
        report: &mut BackupReport,
    ) {
        let children = match list_children(source) {
            Ok(children) => children,
            Err(e) => {
                log::error!("Failed to list {}: {e}", source.display());
                report.new_field(
                    "Error",
                    format!("failed to list {}: {e}", source.display()),
                    annotators::multiline_text,
                );
                return;
            }
        };

        for child in children {
            let child_name = child
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| child.display().to_string());

            let subreport = report.new_subreport(&child_name);
            subreport.new_field("Backup Start", Local::now(), annotators::none);
            let end = subreport.new_field("Backup End", Local::now(), annotators::none);

            self.backup_single(&child, skip_if_unchanged, exclude_files, subreport);

            subreport.set_field_data(end, Local::now());
        }

        report.successful =
            !report.subreports.is_empty() && report.subreports.iter().all(|r| r.successful);
    }

    fn backup_single(
        &self,
        source: &Path,
        skip_if_unchanged: bool,
        exclude_files: &[PathBuf],
        report: &mut BackupReport,
    ) {
        report.new_field("Directory", source.display().to_string(), annotators::none);

        let mut excludes = exclude_files.to_vec();
        if let Some(implicit) = self.implicit_exclude_file(source) {
            log::debug!("Using exclude file {}", implicit.display());
            excludes.push(implicit);
        }

        let backup = match self.client.backup(source, skip_if_unchanged, &excludes) {
            Ok(backup) => backup,
            Err(e) => {
                record_error(report, &e);
                return;
            }
        };

        let summary = match (&backup.summary, backup.result.succeeded()) {
            (Some(summary), true) => summary.clone(),
            _ => {
                report.new_field("Error", "backup failed", annotators::none);
                report.set_result(backup.result);
                return;
            }
        };

        report.new_field("New Files", summary.files_new, annotators::none);
        report.new_field("Files Changed", summary.files_changed, annotators::none);
        report.new_field("Data Added", summary.data_added, annotators::none);
        report.new_field(
            "Total Bytes Processed",
            summary.total_bytes_processed,
            annotators::none,
        );
        report.new_field(
            "Snapshot ID",
            summary.snapshot_id.clone(),
            annotators::error_if_missing,
        );

        if skip_if_unchanged && summary.snapshot_id.is_none() {
            log::info!("{} unchanged, no snapshot created", source.display());
            report.omittable = true;
        }

        report.successful = true;
        report.set_result(backup.result);
    }

    /// The implicit exclude file at the root of `dir`, if it exists and can be opened.
    fn implicit_exclude_file(&self, dir: &Path) -> Option<PathBuf> {
        let candidate = dir.join(&self.implicit_exclude_file_name);

        let found = fs::canonicalize(&candidate).and_then(|path| {
            let metadata = File::open(&path)?.metadata()?;
            Ok((path, metadata.is_file()))
        });

        match found {
            Ok((path, true)) => Some(path),
            Ok((_, false)) => None,
            Err(e) => {
                if e.kind() != io::ErrorKind::NotFound {
                    log::debug!("Ignoring {}: {e}", candidate.display());
                }
                None
            }
        }
    }
}

/// Direct children of `dir` that are regular files or directories, in listing order.
fn list_children(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut children = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() || path.is_dir() {
            children.push(path);
        }
    }
    Ok(children)
}

fn latest_snapshot_id(client: &ResticClient) -> Result<String, ResticError> {
    let result = client.snapshots(Some(1))?;
    Ok(result
        .latest()
        .map(|s| s.id.clone())
        .unwrap_or_else(|| NO_SNAPSHOT.to_string()))
}

/// Record a failed restic invocation on `report`.
fn record_error(report: &mut BackupReport, err: &ResticError) {
    log::error!("{err}");
    report.new_field("Error", err.to_string(), annotators::multiline_text);
    if let Some(result) = err.result() {
        report.set_result(result.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmd::mock::MockCommandExecutor;
    use crate::cmd::CommandOutput;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn service(mock: &Arc<MockCommandExecutor>) -> ResticService {
        ResticService::new(ResticClient::new(mock.clone(), "/repo", None, None))
    }

    #[test]
    fn test_implicit_exclude_file_detected() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("backupignore"), "*.tmp\n").unwrap();

        let mock = Arc::new(MockCommandExecutor::new());
        let found = service(&mock).implicit_exclude_file(temp.path()).unwrap();

        assert_eq!(found, temp.path().join("backupignore").canonicalize().unwrap());
    }

    #[test]
    fn test_implicit_exclude_directory_ignored() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir(temp.path().join("backupignore")).unwrap();

        let mock = Arc::new(MockCommandExecutor::new());
        assert!(service(&mock).implicit_exclude_file(temp.path()).is_none());
    }

    #[test]
    fn test_implicit_exclude_custom_name() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join(".resticignore"), "").unwrap();

        let mock = Arc::new(MockCommandExecutor::new());
        let service = service(&mock).with_implicit_exclude_file_name(".resticignore");
        assert!(service.implicit_exclude_file(temp.path()).is_some());
    }

    #[test]
    fn test_init_failure_aborts_backup() {
        let mock = Arc::new(MockCommandExecutor::new());
        mock.set_factory(|cmd, _, _| {
            let rc = if cmd.iter().any(|a| a == "cat") { 10 } else { 1 };
            CommandOutput {
                returncode: rc,
                ..Default::default()
            }
        });

        let report = service(&mock).backup("b", Path::new("/data"), false, true, &[]);

        assert!(!report.successful);
        assert_eq!(report.find_field("New Repo").unwrap().data, FieldData::Bool(true));
        assert_eq!(report.find_field("Init OK").unwrap().data, FieldData::Bool(false));
        assert_eq!(
            report.find_field("Error").unwrap().annotation(),
            Some(Annotation::MultilineText)
        );
        assert_eq!(report.result.as_ref().unwrap().returncode(), 1);
        assert!(mock.invoked_commands().iter().all(|c| !c.cmd.contains(&"backup".to_string())));
    }

    #[test]
    fn test_bad_password_aborts_backup() {
        let mock = Arc::new(MockCommandExecutor::new());
        mock.set_result(12, "");

        let report = service(&mock).backup("b", Path::new("/data"), false, true, &[]);

        assert!(!report.successful);
        assert_eq!(report.find_field("New Repo").unwrap().data, FieldData::Bool(false));
        assert_eq!(mock.invoked_commands().len(), 1);
    }

    #[test]
    fn test_for_each_unreadable_source() {
        let temp = TempDir::new().unwrap();
        let missing = temp.path().join("missing");

        let mock = Arc::new(MockCommandExecutor::new());
        mock.set_result(0, "{}");

        let report = service(&mock).backup("b", &missing, true, true, &[]);

        assert!(!report.successful);
        assert!(report.subreports.is_empty());
        assert!(report.find_field("Error").is_some());
        assert_eq!(report.find_field("Init OK").unwrap().data, FieldData::Bool(true));
    }

    #[test]
    fn test_for_each_empty_source_is_unsuccessful() {
        let temp = TempDir::new().unwrap();

        let mock = Arc::new(MockCommandExecutor::new());
        mock.set_result(0, "{}");

        let report = service(&mock).backup("b", temp.path(), true, true, &[]);

        assert!(!report.successful);
        assert!(report.subreports.is_empty());
    }

    #[test]
    fn test_no_snapshot_annotation() {
        assert_eq!(
            error_if_no_snapshot(&FieldData::from(NO_SNAPSHOT)),
            Some(Annotation::Error)
        );
        assert_eq!(error_if_no_snapshot(&FieldData::from("abc")), None);
    }
}
