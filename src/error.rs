//! Error type shared by configuration resolution, handler construction and the retention sweep

use std::path::PathBuf;

/// Errors surfaced by logkeeper. None of them are retried internally.
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    /// The external logging config exists but is not valid TOML for [`crate::LoggingConfig`]
    #[error("Failed to parse logging config {}: {source}", path.display())]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// The config parsed but cannot be turned into handlers
    #[error("Invalid logging config: {0}")]
    InvalidConfig(String),

    /// A file-system operation on the log directory, `.gitignore` or a sink failed
    #[error("{context} {}: {source}", path.display())]
    Filesystem {
        context: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A `*.log` file does not follow the `app_<YYYYMMDD>.log` convention
    #[error("Log file name does not embed a YYYYMMDD date: {}", path.display())]
    FilenameParse { path: PathBuf },

    /// Deleting a log file failed part way through a sweep
    #[error("Failed to delete log file {}: {source}", path.display())]
    Deletion {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl LogError {
    pub(crate) fn filesystem(
        context: &'static str,
        path: impl Into<PathBuf>,
        source: std::io::Error,
    ) -> Self {
        LogError::Filesystem {
            context,
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, LogError>;
