use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use backupjob::cmd::mock::{json_output, MockCommandExecutor};
use backupjob::cmd::CommandOutput;
use backupjob::report::{Annotation, BackupReport, FieldData};
use backupjob::restic::{ForgetOptions, ResticClient, ResticService};
use serde_json::{json, Value};
use tempfile::TempDir;

fn backup_summary(snapshot_id: Option<&str>) -> Value {
    let mut summary = json!({
        "message_type": "summary",
        "files_new": 3,
        "files_changed": 1,
        "files_unmodified": 10,
        "dirs_new": 0,
        "dirs_changed": 1,
        "dirs_unmodified": 4,
        "data_blobs": 4,
        "tree_blobs": 2,
        "data_added": 4096,
        "data_added_packed": 2048,
        "total_files_processed": 14,
        "total_bytes_processed": 65536,
        "backup_start": "2024-06-01T02:00:00.123456789+02:00",
        "backup_end": "2024-06-01T02:00:05+02:00"
    });
    if let Some(id) = snapshot_id {
        summary["snapshot_id"] = json!(id);
    }
    summary
}

fn has(cmd: &[String], arg: &str) -> bool {
    cmd.iter().any(|a| a == arg)
}

/// A restic that knows an initialized repository and reports `snapshot_id` for every backup.
fn scripted_restic(snapshot_id: Option<&'static str>) -> Arc<MockCommandExecutor> {
    let mock = Arc::new(MockCommandExecutor::new());
    mock.set_factory(move |cmd, _, _| {
        if has(cmd, "cat") {
            CommandOutput {
                returncode: 0,
                stdout: b"{\"version\":2}".to_vec(),
                stderr: None,
            }
        } else if has(cmd, "backup") {
            json_output(0, &[json!({"message_type": "status", "percent_done": 1}), backup_summary(snapshot_id)])
        } else {
            CommandOutput::default()
        }
    });
    mock
}

fn source_tree() -> TempDir {
    let temp = TempDir::new().unwrap();
    fs::create_dir(temp.path().join("photos")).unwrap();
    fs::write(temp.path().join("photos").join("backupignore"), "*.tmp\n").unwrap();
    fs::create_dir(temp.path().join("documents")).unwrap();
    fs::write(temp.path().join("notes.txt"), "hello").unwrap();
    temp
}

fn service(mock: &Arc<MockCommandExecutor>) -> ResticService {
    ResticService::new(ResticClient::new(
        mock.clone(),
        "/srv/restic",
        Some(PathBuf::from("/etc/restic/password")),
        None,
    ))
}

fn subreport_names(report: &BackupReport) -> Vec<String> {
    let mut names: Vec<_> = report.subreports.iter().map(|r| r.name.clone()).collect();
    names.sort();
    names
}

#[test]
fn test_backup_for_each_child() {
    let source = source_tree();
    let mock = scripted_restic(Some("abc123"));

    let report = service(&mock).backup("nightly", source.path(), true, true, &[]);

    assert!(report.successful);
    assert!(!report.omittable);
    assert_eq!(report.find_field("Init OK").unwrap().data, FieldData::Bool(true));
    assert_eq!(report.find_field("New Repo").unwrap().data, FieldData::Bool(false));
    assert_eq!(
        subreport_names(&report),
        vec![
            "nightly / documents",
            "nightly / notes.txt",
            "nightly / photos"
        ]
    );

    for sub in &report.subreports {
        assert!(sub.successful);
        assert!(sub.find_field("Backup Start").is_some());
        assert!(sub.find_field("Backup End").is_some());
        assert_eq!(
            sub.find_field("Snapshot ID").unwrap().data,
            FieldData::Text("abc123".to_string())
        );
        assert!(sub.result.is_some());
    }
}

#[test]
fn test_backup_target_is_relative_to_parent() {
    let source = source_tree();
    let mock = scripted_restic(Some("abc123"));

    service(&mock).backup("nightly", &source.path().join("photos"), false, true, &[]);

    let backup = mock
        .invoked_commands()
        .into_iter()
        .find(|c| has(&c.cmd, "backup"))
        .unwrap();

    assert_eq!(backup.cmd.last().map(String::as_str), Some("photos"));
    assert_eq!(backup.cwd, source.path());
    assert!(backup.combine_stdout_stderr);
    assert!(!backup.cmd.iter().any(|a| a == &source.path().join("photos").display().to_string()));
}

#[test]
fn test_implicit_exclude_file_only_where_present() {
    let source = source_tree();
    let mock = scripted_restic(Some("abc123"));
    let extra = PathBuf::from("/etc/backup/global-excludes");

    service(&mock).backup("nightly", source.path(), true, true, &[extra.clone()]);

    let backups: Vec<_> = mock
        .invoked_commands()
        .into_iter()
        .filter(|c| has(&c.cmd, "backup"))
        .collect();
    assert_eq!(backups.len(), 3);

    let implicit = source
        .path()
        .join("photos")
        .join("backupignore")
        .canonicalize()
        .unwrap()
        .display()
        .to_string();

    for b in backups {
        let target = b.cmd.last().unwrap().clone();
        assert!(has(&b.cmd, &extra.display().to_string()));
        assert_eq!(has(&b.cmd, &implicit), target == "photos", "target {target}");
    }
}

#[test]
fn test_unchanged_rerun_marks_subreports_omittable() {
    let source = source_tree();

    let first = service(&scripted_restic(Some("abc123"))).backup("nightly", source.path(), true, true, &[]);
    assert!(first.subreports.iter().all(|r| !r.omittable));

    let second = service(&scripted_restic(None)).backup("nightly", source.path(), true, true, &[]);

    assert!(second.successful);
    assert!(!second.omittable);
    assert_eq!(second.subreports.len(), 3);
    for sub in &second.subreports {
        assert!(sub.omittable);
        assert!(sub.successful);
        let id = sub.find_field("Snapshot ID").unwrap();
        assert!(id.data.is_missing());
        assert_eq!(id.annotation(), Some(Annotation::Error));
    }
}

#[test]
fn test_unchanged_without_skip_flag_is_not_omittable() {
    let source = source_tree();
    let report = service(&scripted_restic(None)).backup("nightly", source.path(), false, false, &[]);

    assert!(report.successful);
    assert!(!report.omittable);
}

#[test]
fn test_backup_initializes_new_repository() {
    let source = source_tree();
    let mock = Arc::new(MockCommandExecutor::new());
    mock.set_factory(|cmd, _, _| {
        if has(cmd, "cat") {
            CommandOutput {
                returncode: 10,
                ..Default::default()
            }
        } else if has(cmd, "backup") {
            json_output(0, &[backup_summary(Some("fresh"))])
        } else {
            json_output(0, &[json!({"message_type": "initialized", "id": "r1", "repository": "/srv/restic"})])
        }
    });

    let report = service(&mock).backup("nightly", &source.path().join("documents"), false, true, &[]);

    assert!(report.successful);
    let new_repo = report.find_field("New Repo").unwrap();
    assert_eq!(new_repo.data, FieldData::Bool(true));
    assert_eq!(new_repo.annotation(), Some(Annotation::Warning));
    assert_eq!(report.find_field("Init OK").unwrap().annotation(), Some(Annotation::Ok));
    assert!(mock.invoked_commands().iter().any(|c| has(&c.cmd, "init")));
}

#[test]
fn test_backup_failure_exit_code() {
    let source = source_tree();
    let mock = Arc::new(MockCommandExecutor::new());
    mock.set_factory(|cmd, _, _| {
        if has(cmd, "backup") {
            json_output(3, &[json!({"message_type": "error", "error": {"message": "read error"}})])
        } else {
            CommandOutput::default()
        }
    });

    let report = service(&mock).backup("nightly", &source.path().join("photos"), false, true, &[]);

    assert!(!report.successful);
    assert!(!report.omittable);
    let error = report.find_field("Error").unwrap();
    assert_eq!(error.data, FieldData::Text("backup failed".to_string()));
    assert_eq!(error.annotation(), None);
    assert_eq!(report.result.as_ref().unwrap().returncode(), 3);
}

#[test]
fn test_check_success() {
    let mock = Arc::new(MockCommandExecutor::new());
    mock.set_result_json_messages(
        0,
        &[json!({"message_type": "summary", "num_errors": 0, "broken_packs": null,
                 "suggest_repair_index": false, "suggest_prune": false})],
    );

    let report = service(&mock).check();

    assert!(report.successful);
    assert_eq!(report.name, "Repository Check");
    assert_eq!(report.find_field("Errors").unwrap().annotation(), Some(Annotation::Ok));
    assert_eq!(
        report.find_field("Prune Suggested").unwrap().annotation(),
        Some(Annotation::Ok)
    );
    assert!(report.find_field("Broken Packs").is_none());
    assert!(has(&mock.last_command().unwrap().cmd, "--read-data"));
}

#[test]
fn test_check_reports_broken_packs() {
    let mock = Arc::new(MockCommandExecutor::new());
    mock.set_result_json_messages(
        0,
        &[json!({"message_type": "summary", "num_errors": 2, "broken_packs": ["p1", "p2"],
                 "suggest_repair_index": true, "suggest_prune": false})],
    );

    let report = service(&mock).check();

    assert!(!report.successful);
    assert_eq!(
        report.find_field("Repair Suggested").unwrap().annotation(),
        Some(Annotation::Error)
    );
    let packs = report.find_field("Broken Packs").unwrap();
    assert_eq!(packs.data, FieldData::Text("p1\np2".to_string()));
    assert_eq!(packs.annotation(), Some(Annotation::MultilineText));
}

#[test]
fn test_check_nonzero_exit_records_error_code() {
    let mock = Arc::new(MockCommandExecutor::new());
    mock.set_result_json_messages(1, &[]);

    let report = service(&mock).check();

    assert!(!report.successful);
    let code = report.find_field("Error Code").unwrap();
    assert_eq!(code.data, FieldData::Int(1));
    assert_eq!(code.annotation(), Some(Annotation::Error));
    assert!(report.find_field("Errors").is_none());
}

fn snapshot(id: &str) -> Value {
    json!({
        "time": "2024-06-01T02:00:05+02:00",
        "tree": "t",
        "paths": ["photos"],
        "hostname": "nas",
        "username": "root",
        "id": id,
        "short_id": &id[..2]
    })
}

/// Snapshot listings keyed by repository.
fn snapshot_lists(local: Option<&'static str>, remote: Option<&'static str>) -> Arc<MockCommandExecutor> {
    let mock = Arc::new(MockCommandExecutor::new());
    mock.set_factory(move |cmd, _, _| {
        let id = if has(cmd, "/srv/restic") { local } else { remote };
        let list: Vec<Value> = id.map(snapshot).into_iter().collect();
        CommandOutput {
            returncode: 0,
            stdout: Value::Array(list).to_string().into_bytes(),
            stderr: None,
        }
    });
    mock
}

fn remote_client(mock: &Arc<MockCommandExecutor>) -> ResticClient {
    ResticClient::new(mock.clone(), "s3:bucket/restic", None, None)
}

#[test]
fn test_compare_matching_snapshots() {
    let mock = snapshot_lists(Some("abcdef"), Some("abcdef"));
    let report = service(&mock).compare_latest_snapshots(&remote_client(&mock));

    assert!(report.successful);
    assert_eq!(
        report.find_field("Remote Repository").unwrap().data,
        FieldData::Text("s3:bucket/restic".to_string())
    );
    assert_eq!(report.find_field("Local Snapshot ID").unwrap().annotation(), None);
    assert!(matches!(report.find_field("Start").unwrap().data, FieldData::Time(_)));
    assert!(matches!(report.find_field("End").unwrap().data, FieldData::Time(_)));
    assert!(mock
        .invoked_commands()
        .iter()
        .all(|c| c.cmd.ends_with(&["snapshots".to_string(), "--latest".to_string(), "1".to_string()])));
}

#[test]
fn test_compare_differing_snapshots() {
    let mock = snapshot_lists(Some("abcdef"), Some("123456"));
    let report = service(&mock).compare_latest_snapshots(&remote_client(&mock));
    assert!(!report.successful);
}

#[test]
fn test_compare_without_snapshots() {
    let mock = snapshot_lists(None, None);
    let report = service(&mock).compare_latest_snapshots(&remote_client(&mock));

    assert!(!report.successful);
    for label in ["Local Snapshot ID", "Remote Snapshot ID"] {
        let field = report.find_field(label).unwrap();
        assert_eq!(field.data, FieldData::Text("(none)".to_string()));
        assert_eq!(field.annotation(), Some(Annotation::Error));
    }
}

#[test]
fn test_compare_listing_failure_still_records_end() {
    let mock = Arc::new(MockCommandExecutor::new());
    mock.set_result(0, "[{\"id\": 1}]");

    let report = service(&mock).compare_latest_snapshots(&remote_client(&mock));

    assert!(!report.successful);
    assert_eq!(
        report.find_field("Error").unwrap().annotation(),
        Some(Annotation::MultilineText)
    );
    assert!(report.find_field("Local Snapshot ID").is_none());
    let start = report.find_field("Start").unwrap();
    let end = report.find_field("End").unwrap();
    match (&start.data, &end.data) {
        (FieldData::Time(s), FieldData::Time(e)) => assert!(e >= s),
        other => panic!("unexpected start/end data: {other:?}"),
    }
    assert_eq!(mock.invoked_commands().len(), 1);
}

#[test]
fn test_compare_same_client() {
    let mock = snapshot_lists(Some("abcdef"), None);
    let service = service(&mock);
    let report = service.compare_latest_snapshots(&service.client);
    assert!(report.successful);
}

#[test]
fn test_prune_repack_counts() {
    let mock = Arc::new(MockCommandExecutor::new());
    let groups = json!([
        {"tags": null, "host": "nas", "paths": ["photos"], "keep": [snapshot("aa11"), snapshot("bb22")], "remove": [snapshot("cc33")]},
        {"tags": null, "host": "nas", "paths": ["documents"], "keep": [snapshot("dd44")], "remove": null}
    ]);
    mock.set_result(0, groups.to_string());

    let options = ForgetOptions {
        keep_within_daily: Some("7d".to_string()),
        prune: true,
        ..Default::default()
    };
    let report = service(&mock).prune_repack(&options);

    assert!(report.successful);
    assert_eq!(report.find_field("Error Code").unwrap().annotation(), Some(Annotation::Ok));
    assert_eq!(report.find_field("Snapshots Kept").unwrap().data, FieldData::Int(3));
    assert_eq!(report.find_field("Snapshots Removed").unwrap().data, FieldData::Int(1));
}

#[test]
fn test_prune_repack_failure() {
    let mock = Arc::new(MockCommandExecutor::new());
    mock.set_result(1, "Fatal: unable to create lock in backend\n");

    let report = service(&mock).prune_repack(&ForgetOptions::default());

    assert!(!report.successful);
    assert_eq!(report.find_field("Error Code").unwrap().data, FieldData::Int(1));
    assert!(report.find_field("Snapshots Kept").is_none());
}

#[test]
fn test_missing_source_directory_is_recorded() {
    let mock = scripted_restic(Some("abc"));
    let report = service(&mock).backup("nightly", Path::new("/nonexistent/backupjob-source"), true, true, &[]);

    assert!(!report.successful);
    assert!(report.find_field("Error").is_some());
}
