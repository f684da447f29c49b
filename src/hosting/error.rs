use std::path::PathBuf;

use thiserror::Error;
use tokio::task::JoinError;

use crate::api::error::ApiError;

#[derive(Debug, Error)]
pub enum HostingError {
    /// A single asset operation failed.
    #[error("{path}: {source}")]
    Asset {
        path: String,
        #[source]
        source: ApiError,
    },

    #[error("{count} error(s) occurred while {action} hosting assets: {first}")]
    Batch {
        action: &'static str,
        count: usize,
        first: String,
    },

    #[error("failed to invalidate hosting cache: {0}")]
    Invalidate(#[source] ApiError),

    #[error("hosting worker stopped unexpectedly: {0}")]
    Worker(#[from] JoinError),

    #[error("failed to walk {}: {source}", path.display())]
    Walk {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    #[error("failed to access {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("file '{0}' has an entry in metadata file, but does not appear in files directory")]
    MissingFile(String),

    #[error("asset path '{0}' does not name a file inside the app directory")]
    UnsafePath(String),

    #[error("asset '{path}' has unsupported attribute '{name}'")]
    InvalidAttribute { path: String, name: String },
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> HostingError {
    HostingError::Io {
        path: path.into(),
        source,
    }
}
