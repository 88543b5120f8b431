//! Error types for the feed crate.

use std::path::PathBuf;

/// Errors that can occur while loading a feed.
#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    /// The feed path does not exist.
    #[error("feed not found: {0}")]
    NotFound(PathBuf),

    /// A line did not decode as a block.
    #[error("{path}:{line}: invalid block: {message}")]
    Parse {
        path: PathBuf,
        line: usize,
        message: String,
    },

    /// Directory traversal failed.
    #[error("walking feed directory: {0}")]
    Walk(#[from] walkdir::Error),

    /// I/O error reading a feed file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience alias for feed results.
pub type FeedResult<T> = Result<T, FeedError>;
