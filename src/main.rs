use anyhow::Result;
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use backupjob::cmd::{CommandExecutor, SystemExecutor};
use backupjob::config::BackupJobConfig;
use backupjob::handlers::{self, BackupArgs, RepositoryArgs, SyncArgs};
use backupjob::logger;
use backupjob::reporter::{
    BackupReporter, ConsoleReporter, GoogleChatReportRenderer, GoogleChatReporter,
    ReqwestTransport,
};
use backupjob::restic::ForgetOptions;

#[derive(Parser)]
#[command(name = "backupjob")]
#[command(about = "Run rclone and restic backups and report the outcome", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to the configuration file (default: <config dir>/backupjob/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Name of the backup, used in reports
    #[arg(long)]
    name: String,

    /// Where to deliver the report
    #[arg(long, value_enum)]
    reporter: ReporterKind,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ReporterKind {
    Googlechat,
    Console,
}

#[derive(Args, Debug)]
struct RepoArgs {
    /// restic repository to operate on
    #[arg(long)]
    repository: String,

    /// Path to the restic cache directory
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    /// Path to the repository's password file
    #[arg(long)]
    password_file: Option<PathBuf>,
}

impl From<RepoArgs> for RepositoryArgs {
    fn from(a: RepoArgs) -> Self {
        RepositoryArgs {
            repository: a.repository,
            cache_dir: a.cache_dir,
            password_file: a.password_file,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Mirror a directory with rclone sync
    Sync {
        /// Bandwidth limit passed to rclone
        #[arg(long)]
        bwlimit: Option<String>,

        /// S3 storage class for created objects
        #[arg(long)]
        s3_storage_class: Option<String>,

        /// Source directory
        source: String,

        /// Destination remote path
        destination: String,
    },

    /// Back up a directory into a restic repository
    Backup {
        #[command(flatten)]
        repo: RepoArgs,

        /// Back up the source as a whole instead of one snapshot per child
        #[arg(long)]
        no_for_each: bool,

        /// Always create a snapshot, even when nothing changed
        #[arg(long)]
        no_skip_if_unchanged: bool,

        /// Additional exclude file (repeatable)
        #[arg(long = "exclude-file")]
        exclude_files: Vec<PathBuf>,

        /// Source directory
        source: PathBuf,
    },

    /// Check a restic repository, reading all data
    Check {
        #[command(flatten)]
        repo: RepoArgs,
    },

    /// Compare the latest snapshot of two restic repositories
    CompareSnapshots {
        #[command(flatten)]
        repo: RepoArgs,

        /// Repository to compare against
        #[arg(long)]
        remote_repository: String,

        /// Cache directory for the remote repository
        #[arg(long)]
        remote_cache_dir: Option<PathBuf>,

        /// Password file for the remote repository (default: the local one)
        #[arg(long)]
        remote_password_file: Option<PathBuf>,
    },

    /// Forget old snapshots and prune/repack the repository
    PruneRepack {
        #[command(flatten)]
        repo: RepoArgs,

        #[arg(long)]
        keep_last: Option<u32>,

        #[arg(long)]
        keep_within_hourly: Option<String>,

        #[arg(long)]
        keep_within_daily: Option<String>,

        #[arg(long)]
        keep_within_weekly: Option<String>,

        #[arg(long)]
        keep_within_monthly: Option<String>,

        #[arg(long)]
        keep_within_yearly: Option<String>,

        /// Only forget snapshots, do not prune
        #[arg(long)]
        no_prune: bool,

        /// Also repack small packs
        #[arg(long)]
        repack_small: bool,
    },
}

fn build_reporter(kind: ReporterKind, config: &BackupJobConfig) -> Result<Box<dyn BackupReporter>> {
    match kind {
        ReporterKind::Console => Ok(Box::new(ConsoleReporter::new())),
        ReporterKind::Googlechat => {
            let url = config.webhook_url()?;
            let transport = ReqwestTransport::new(Duration::from_secs(30))?;
            let mut reporter =
                GoogleChatReporter::new(url, GoogleChatReportRenderer::new(), transport);
            reporter.seconds_between_messages =
                Duration::from_secs(config.googlechat.seconds_between_messages);
            reporter.max_retries = config.googlechat.max_retries;
            Ok(Box::new(reporter))
        }
    }
}

fn run(cli: Cli) -> Result<i32> {
    let config = BackupJobConfig::load(cli.config.as_deref())?;

    // Fail on a missing webhook before spending hours on a backup.
    let mut reporter = build_reporter(cli.reporter, &config)?;
    let executor: Arc<dyn CommandExecutor> = Arc::new(SystemExecutor);

    let report = match cli.command {
        Commands::Sync {
            bwlimit,
            s3_storage_class,
            source,
            destination,
        } => handlers::handle_sync(
            executor,
            &config.rclone,
            &cli.name,
            &SyncArgs {
                bwlimit,
                s3_storage_class,
                source,
                destination,
            },
        )?,
        Commands::Backup {
            repo,
            no_for_each,
            no_skip_if_unchanged,
            exclude_files,
            source,
        } => handlers::handle_backup(
            executor,
            &config.restic,
            &cli.name,
            &repo.into(),
            &BackupArgs {
                source,
                for_each: !no_for_each,
                skip_if_unchanged: !no_skip_if_unchanged,
                exclude_files,
            },
        )?,
        Commands::Check { repo } => handlers::handle_check(executor, &config.restic, &repo.into())?,
        Commands::CompareSnapshots {
            repo,
            remote_repository,
            remote_cache_dir,
            remote_password_file,
        } => {
            let local: RepositoryArgs = repo.into();
            let remote = RepositoryArgs {
                repository: remote_repository,
                cache_dir: remote_cache_dir,
                password_file: remote_password_file.or_else(|| local.password_file.clone()),
            };
            handlers::handle_compare_snapshots(executor, &config.restic, &local, &remote)?
        }
        Commands::PruneRepack {
            repo,
            keep_last,
            keep_within_hourly,
            keep_within_daily,
            keep_within_weekly,
            keep_within_monthly,
            keep_within_yearly,
            no_prune,
            repack_small,
        } => {
            let options = ForgetOptions {
                keep_last,
                keep_within_hourly,
                keep_within_daily,
                keep_within_weekly,
                keep_within_monthly,
                keep_within_yearly,
                prune: !no_prune,
                repack_small,
            };
            handlers::handle_prune_repack(executor, &config.restic, &repo.into(), &options)?
        }
    };

    handlers::deliver(reporter.as_mut(), &report)
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    logger::init_logger(cli.verbose);

    match run(cli) {
        Ok(0) => ExitCode::SUCCESS,
        Ok(code) => ExitCode::from(u8::try_from(code).unwrap_or(1)),
        Err(e) => {
            log::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}
