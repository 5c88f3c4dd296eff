use std::path::PathBuf;
use thiserror::Error;

use super::ResticResult;

/// Errors raised by [`ResticClient`](super::ResticClient).
///
/// Variants produced after restic ran carry the partial [`ResticResult`]
/// so callers can attach it to a report for diagnostics.
#[derive(Debug, Error)]
pub enum ResticError {
    #[error("{message}")]
    Tool {
        message: String,
        result: Box<ResticResult>,
    },

    /// The repository password was rejected (restic exit code 12).
    #[error("invalid repository password")]
    InvalidPassword { result: Box<ResticResult> },

    /// restic reported success but its output lacked the expected shape.
    #[error("{message}")]
    Decode {
        message: String,
        result: Box<ResticResult>,
    },

    /// A line of line-delimited output was not valid JSON.
    #[error("failed to parse restic output line '{line}': {source}")]
    Parse {
        line: String,
        #[source]
        source: serde_json::Error,
        result: Box<ResticResult>,
    },

    #[error("backup source '{}' has no final path component", path.display())]
    InvalidSource { path: PathBuf },

    #[error("failed to run '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

impl ResticError {
    /// The restic invocation behind this error, if restic ran at all.
    pub fn result(&self) -> Option<&ResticResult> {
        match self {
            ResticError::Tool { result, .. }
            | ResticError::InvalidPassword { result }
            | ResticError::Decode { result, .. }
            | ResticError::Parse { result, .. } => Some(result),
            ResticError::InvalidSource { .. } | ResticError::Spawn { .. } => None,
        }
    }

    pub fn is_password_error(&self) -> bool {
        matches!(self, ResticError::InvalidPassword { .. })
    }
}
