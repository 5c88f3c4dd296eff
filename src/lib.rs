//! # backupjob
//!
//! A command-line tool that drives `rclone` and `restic` backups and delivers
//! a hierarchical report of the outcome to Google Chat (or the terminal).
//!
//! ## Overview
//!
//! The backup tools run as subprocesses. Their JSON output is decoded into
//! typed results, services turn those results into a [`report::BackupReport`]
//! tree, and a [`reporter::BackupReporter`] renders and delivers the tree.
//!
//! ## Architecture
//!
//! - Process execution ([`cmd`])
//! - Tool clients and services ([`rclone`], [`restic`])
//! - The report model ([`report`]) and its delivery ([`reporter`])
//! - Configuration, logging and CLI command handlers ([`config`], [`logger`], [`handlers`])

/// External command execution behind a replaceable [`cmd::CommandExecutor`].
///
/// Includes a scripted executor ([`cmd::mock::MockCommandExecutor`]) used by
/// tests to assert on exact command lines without spawning processes.
pub mod cmd;

/// Configuration file loading and platform configuration directories.
///
/// The configuration is a TOML file with `[rclone]`, `[restic]` and
/// `[googlechat]` sections, every key of which has a default.
pub mod config;

/// Command handlers wiring parsed CLI arguments to services.
pub mod handlers;

/// Logging setup (stderr, `RUST_LOG`-controlled).
pub mod logger;

/// rclone client and sync service.
pub mod rclone;

/// Hierarchical backup reports.
///
/// A report holds labeled fields, each with an annotator that classifies its
/// data (OK, warning, error), plus child reports for sub-operations. Reports
/// start unsuccessful until the producing operation marks them otherwise.
pub mod report;

/// Report rendering and delivery to Google Chat or the console.
pub mod reporter;

/// restic client and repository service.
pub mod restic;
