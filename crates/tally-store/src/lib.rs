//! Ledger storage for Tally.
//!
//! The replay engine writes two tables through the [`LedgerStore`] trait:
//! the unspent-output index keyed by [`UtxoKey`](tally_types::UtxoKey) and
//! the balance index keyed by address.
//!
//! # Storage Backends
//!
//! - [`InMemoryLedgerStore`] -- map-based store for tests and embedding
//! - [`FileLedgerStore`] -- durable store; each `flush()` appends one
//!   CRC-framed batch to a write-ahead log, `close()` compacts the log into
//!   a snapshot
//!
//! # Design Rules
//!
//! 1. Unspent-output keys are unique. Inserting an existing key fails with
//!    [`StoreError::DuplicateKey`] and leaves the stored entry untouched.
//! 2. Deleting an absent output is a no-op.
//! 3. Writes become durable only at `flush()`. A crash exposes the state as
//!    of the last completed flush, never a partial batch.
//! 4. Writes between `begin_transaction` and `commit_transaction` can be
//!    rolled back and are never flushed until committed.
//! 5. All I/O errors are propagated, never silently ignored.

pub mod error;
pub mod file;
pub mod memory;
pub mod tables;
pub mod traits;
pub mod wal;

pub use error::{StoreError, StoreResult};
pub use file::{FileLedgerStore, FileStoreConfig};
pub use memory::InMemoryLedgerStore;
pub use tables::{LedgerOp, LedgerTables};
pub use traits::LedgerStore;
pub use wal::{SyncMode, WriteAheadLog};
