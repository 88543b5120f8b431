use tally_types::{Amount, BalanceRecord, OutPoint, UtxoEntry, UtxoKey};

use crate::error::StoreResult;

/// Keyed storage for the unspent-output and balance indexes.
///
/// All implementations must satisfy these invariants:
/// - `insert_utxo` never overwrites. An existing key yields
///   [`StoreError::DuplicateKey`](crate::StoreError::DuplicateKey).
/// - `delete_utxo` on an absent outpoint succeeds and removes nothing.
/// - Writes are visible to reads immediately; they are durable only after
///   `flush()` returns.
/// - Writes made inside an open transaction are never persisted until it
///   is committed. `rollback_transaction` undoes them.
/// - Callers issue one request at a time. Implementations may be shared
///   across threads but present serialized semantics.
pub trait LedgerStore: Send + Sync {
    /// Insert an unspent-output entry under [`UtxoEntry::key`].
    fn insert_utxo(&self, entry: &UtxoEntry) -> StoreResult<()>;

    /// Point lookup of a single entry.
    fn get_utxo(&self, key: &UtxoKey) -> StoreResult<Option<UtxoEntry>>;

    /// Remove every entry of `outpoint` and return what was removed.
    ///
    /// Returns an empty vector if the outpoint was never stored or was
    /// already spent.
    fn delete_utxo(&self, outpoint: &OutPoint) -> StoreResult<Vec<UtxoEntry>>;

    /// Whether any entry of `outpoint` is stored, in any slot.
    fn contains_output(&self, outpoint: &OutPoint) -> StoreResult<bool>;

    fn get_balance(&self, address: &str) -> StoreResult<Option<Amount>>;

    /// Set the balance of `address`, creating the record if needed.
    fn upsert_balance(&self, address: &str, amount: Amount) -> StoreResult<()>;

    /// Number of unspent-output entries.
    fn count_utxos(&self) -> StoreResult<u64>;

    /// Number of addresses with a balance record.
    fn count_balances(&self) -> StoreResult<u64>;

    /// All balance records, largest first; ties ordered by address.
    fn balances(&self) -> StoreResult<Vec<BalanceRecord>>;

    /// Unspent-output entries credited to `address`, in key order.
    fn utxos_for(&self, address: &str) -> StoreResult<Vec<UtxoEntry>>;

    /// Mark the start of a transaction. Opening one while another is open
    /// commits the earlier one.
    fn begin_transaction(&self) -> StoreResult<()>;

    /// Keep every write since `begin_transaction`.
    fn commit_transaction(&self) -> StoreResult<()>;

    /// Undo every write since `begin_transaction`. A no-op when no
    /// transaction is open.
    fn rollback_transaction(&self) -> StoreResult<()>;

    /// Durably persist all committed writes, and any writes made outside a
    /// transaction.
    fn flush(&self) -> StoreResult<()>;

    /// Roll back an open transaction, flush, then release the store. Later calls fail with
    /// [`StoreError::Closed`](crate::StoreError::Closed).
    fn close(&self) -> StoreResult<()>;
}
