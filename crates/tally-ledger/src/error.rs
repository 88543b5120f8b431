use chrono::{DateTime, Utc};
use tally_store::StoreError;

/// Errors produced by replay. Every variant terminates the run.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// The store failed while applying a transaction. A flush of the writes
    /// already applied was attempted before this was returned.
    #[error("fatal store failure: {source}")]
    Fatal {
        #[source]
        source: StoreError,
        /// Set when the follow-up flush failed too.
        flush_error: Option<String>,
    },

    /// A block is older than the block applied before it.
    #[error("block at {found} precedes previously applied block at {previous}")]
    OutOfOrder {
        previous: DateTime<Utc>,
        found: DateTime<Utc>,
    },

    /// Flushing failed outside of transaction application.
    #[error("flush failed: {0}")]
    Flush(#[source] StoreError),

    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Convenience alias used throughout the ledger crate.
pub type LedgerResult<T> = std::result::Result<T, LedgerError>;
