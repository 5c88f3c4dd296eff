use log::LevelFilter;
use std::io::Write;

/// Initialize the logging system
///
/// Logs go to stderr so stdout stays free for the console reporter.
///
/// The level can be controlled via the `RUST_LOG` environment variable:
/// - `RUST_LOG=error` - Only errors
/// - `RUST_LOG=warn` - Warnings and errors
/// - `RUST_LOG=info` - Info, warnings, and errors (default)
/// - `RUST_LOG=debug` - Debug and above, including every restic/rclone command line
///
/// `verbose` forces `debug` regardless of `RUST_LOG`.
///
/// ## Examples
///
/// ```bash
/// # Show the commands being run
/// RUST_LOG=debug backupjob --name nightly --reporter console check --repository /srv/restic
/// ```
pub fn init_logger(verbose: bool) {
    let level = if verbose {
        LevelFilter::Debug
    } else {
        default_level(std::env::var("RUST_LOG").ok().as_deref())
    };

    env_logger::Builder::new()
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{:5}] {}",
                chrono::Local::now().format("%H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .filter_level(level)
        .target(env_logger::Target::Stderr)
        .try_init()
        .ok(); // Ignore error if logger is already initialized
}

fn default_level(rust_log: Option<&str>) -> LevelFilter {
    rust_log
        .and_then(|s| s.parse::<LevelFilter>().ok())
        .unwrap_or(LevelFilter::Info)
}
