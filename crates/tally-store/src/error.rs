use std::path::PathBuf;

use tally_types::UtxoKey;

/// Errors from ledger store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// An unspent-output entry with this key already exists.
    #[error("duplicate unspent-output key {0}")]
    DuplicateKey(UtxoKey),

    /// Serialization or deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// I/O error from the underlying storage backend.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A snapshot or log frame failed its integrity check.
    #[error("corrupt data in {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    /// The store was closed and no longer accepts operations.
    #[error("store is closed")]
    Closed,

    /// The operation needs every transaction committed or rolled back.
    #[error("a transaction is still open")]
    TransactionOpen,

    /// A lock guarding the tables was poisoned by a panicking writer.
    #[error("store lock poisoned")]
    LockPoisoned,
}

impl StoreError {
    /// Returns `true` for the one rejection replay treats as recoverable.
    pub fn is_duplicate_key(&self) -> bool {
        matches!(self, Self::DuplicateKey(_))
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
