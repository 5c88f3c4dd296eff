//! restic command handlers

use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;

use crate::cmd::CommandExecutor;
use crate::config::ResticConfig;
use crate::report::BackupReport;
use crate::restic::{ForgetOptions, ResticClient, ResticService};

/// Repository selection shared by every restic command.
#[derive(Debug, Clone, Default)]
pub struct RepositoryArgs {
    pub repository: String,
    pub cache_dir: Option<PathBuf>,
    pub password_file: Option<PathBuf>,
}

/// Arguments of the `backup` command.
#[derive(Debug, Clone)]
pub struct BackupArgs {
    pub source: PathBuf,
    pub for_each: bool,
    pub skip_if_unchanged: bool,
    pub exclude_files: Vec<PathBuf>,
}

/// Build a client for `repo` using the configured restic binary.
pub fn restic_client(
    executor: Arc<dyn CommandExecutor>,
    config: &ResticConfig,
    repo: &RepositoryArgs,
) -> ResticClient {
    ResticClient::new(
        executor,
        repo.repository.as_str(),
        repo.password_file.clone(),
        repo.cache_dir.clone(),
    )
    .with_binary(config.binary.as_str())
}

fn restic_service(
    executor: Arc<dyn CommandExecutor>,
    config: &ResticConfig,
    repo: &RepositoryArgs,
) -> ResticService {
    ResticService::new(restic_client(executor, config, repo))
        .with_implicit_exclude_file_name(config.implicit_exclude_file_name.as_str())
}

/// Handle backup command
pub fn handle_backup(
    executor: Arc<dyn CommandExecutor>,
    config: &ResticConfig,
    name: &str,
    repo: &RepositoryArgs,
    args: &BackupArgs,
) -> Result<BackupReport> {
    log::info!(
        "Backing up {} to {}",
        args.source.display(),
        repo.repository
    );

    let service = restic_service(executor, config, repo);
    Ok(service.backup(
        name,
        &args.source,
        args.for_each,
        args.skip_if_unchanged,
        &args.exclude_files,
    ))
}

/// Handle check command
pub fn handle_check(
    executor: Arc<dyn CommandExecutor>,
    config: &ResticConfig,
    repo: &RepositoryArgs,
) -> Result<BackupReport> {
    log::info!("Checking {}", repo.repository);
    Ok(restic_service(executor, config, repo).check())
}

/// Handle compare-snapshots command
pub fn handle_compare_snapshots(
    executor: Arc<dyn CommandExecutor>,
    config: &ResticConfig,
    local: &RepositoryArgs,
    remote: &RepositoryArgs,
) -> Result<BackupReport> {
    log::info!(
        "Comparing latest snapshots of {} and {}",
        local.repository,
        remote.repository
    );

    let remote_client = restic_client(executor.clone(), config, remote);
    Ok(restic_service(executor, config, local).compare_latest_snapshots(&remote_client))
}

/// Handle prune-repack command
pub fn handle_prune_repack(
    executor: Arc<dyn CommandExecutor>,
    config: &ResticConfig,
    repo: &RepositoryArgs,
    options: &ForgetOptions,
) -> Result<BackupReport> {
    log::info!("Applying retention policy to {}", repo.repository);
    Ok(restic_service(executor, config, repo).prune_repack(options))
}
