use thiserror::Error;

/// Errors raised while running rclone or decoding its output.
#[derive(Debug, Error)]
pub enum RcloneError {
    #[error("failed to run '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse rclone output line '{line}': {source}")]
    Parse {
        line: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("rclone output did not end with a stats message")]
    MissingStats,

    #[error("failed to decode rclone stats: {0}")]
    Stats(#[source] serde_json::Error),
}
