use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use tally_types::{Amount, BalanceRecord, OutPoint, UtxoEntry, UtxoKey};

use crate::error::{StoreError, StoreResult};
use crate::tables::LedgerTables;
use crate::traits::LedgerStore;

/// In-memory ledger store.
///
/// Intended for tests and embedding. `flush()` has nothing to persist; it
/// only counts calls so batching policy can be observed.
pub struct InMemoryLedgerStore {
    tables: RwLock<LedgerTables>,
    flushes: AtomicU64,
    closed: AtomicBool,
}

impl InMemoryLedgerStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self::from_tables(LedgerTables::new())
    }

    pub fn from_tables(tables: LedgerTables) -> Self {
        Self {
            tables: RwLock::new(tables),
            flushes: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Number of `flush()` calls so far (including the one inside `close()`).
    pub fn flush_count(&self) -> u64 {
        self.flushes.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Copy of the current tables.
    pub fn snapshot(&self) -> StoreResult<LedgerTables> {
        Ok(self.read()?.clone())
    }

    fn read(&self) -> StoreResult<RwLockReadGuard<'_, LedgerTables>> {
        if self.is_closed() {
            return Err(StoreError::Closed);
        }
        self.tables.read().map_err(|_| StoreError::LockPoisoned)
    }

    fn write(&self) -> StoreResult<RwLockWriteGuard<'_, LedgerTables>> {
        if self.is_closed() {
            return Err(StoreError::Closed);
        }
        self.tables.write().map_err(|_| StoreError::LockPoisoned)
    }
}

impl Default for InMemoryLedgerStore {
    fn default() -> Self {
        Self::new()
    }
}

impl LedgerStore for InMemoryLedgerStore {
    fn insert_utxo(&self, entry: &UtxoEntry) -> StoreResult<()> {
        self.write()?.insert_utxo(entry.clone())
    }

    fn get_utxo(&self, key: &UtxoKey) -> StoreResult<Option<UtxoEntry>> {
        Ok(self.read()?.get_utxo(key).cloned())
    }

    fn delete_utxo(&self, outpoint: &OutPoint) -> StoreResult<Vec<UtxoEntry>> {
        Ok(self.write()?.delete_output(outpoint))
    }

    fn contains_output(&self, outpoint: &OutPoint) -> StoreResult<bool> {
        Ok(self.read()?.contains_output(outpoint))
    }

    fn get_balance(&self, address: &str) -> StoreResult<Option<Amount>> {
        Ok(self.read()?.get_balance(address))
    }

    fn upsert_balance(&self, address: &str, amount: Amount) -> StoreResult<()> {
        self.write()?.set_balance(address, amount);
        Ok(())
    }

    fn count_utxos(&self) -> StoreResult<u64> {
        Ok(self.read()?.utxo_count())
    }

    fn count_balances(&self) -> StoreResult<u64> {
        Ok(self.read()?.balance_count())
    }

    fn balances(&self) -> StoreResult<Vec<BalanceRecord>> {
        Ok(self.read()?.balance_rows())
    }

    fn utxos_for(&self, address: &str) -> StoreResult<Vec<UtxoEntry>> {
        Ok(self.read()?.utxos_for(address))
    }

    fn begin_transaction(&self) -> StoreResult<()> {
        self.write()?.begin();
        Ok(())
    }

    fn commit_transaction(&self) -> StoreResult<()> {
        self.write()?.commit();
        Ok(())
    }

    fn rollback_transaction(&self) -> StoreResult<()> {
        self.write()?.rollback();
        Ok(())
    }

    fn flush(&self) -> StoreResult<()> {
        if self.is_closed() {
            return Err(StoreError::Closed);
        }
        self.flushes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn close(&self) -> StoreResult<()> {
        self.rollback_transaction()?;
        self.flush()?;
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

impl std::fmt::Debug for InMemoryLedgerStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryLedgerStore")
            .field("flushes", &self.flush_count())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tally_types::TxHash;

    fn outpoint(seed: u8, index: u32) -> OutPoint {
        OutPoint::new(TxHash::from_bytes([seed; 32]), index)
    }

    #[test]
    fn insert_and_get() {
        let store = InMemoryLedgerStore::new();
        let entry = UtxoEntry::single(outpoint(1, 0), "A1", 500);
        store.insert_utxo(&entry).unwrap();

        assert_eq!(store.get_utxo(&entry.key()).unwrap(), Some(entry));
        assert_eq!(store.count_utxos().unwrap(), 1);
    }

    #[test]
    fn duplicate_insert_does_not_overwrite() {
        let store = InMemoryLedgerStore::new();
        let original = UtxoEntry::single(outpoint(1, 0), "A1", 500);
        store.insert_utxo(&original).unwrap();

        let clash = UtxoEntry::single(outpoint(1, 0), "B2", 1);
        let err = store.insert_utxo(&clash).unwrap_err();
        assert!(err.is_duplicate_key());
        assert_eq!(store.get_utxo(&original.key()).unwrap(), Some(original));
    }

    #[test]
    fn delete_absent_is_noop() {
        let store = InMemoryLedgerStore::new();
        store
            .insert_utxo(&UtxoEntry::single(outpoint(1, 0), "A", 1))
            .unwrap();

        assert!(store.delete_utxo(&outpoint(9, 9)).unwrap().is_empty());
        assert_eq!(store.count_utxos().unwrap(), 1);
    }

    #[test]
    fn upsert_balance_creates_then_replaces() {
        let store = InMemoryLedgerStore::new();
        assert_eq!(store.get_balance("A").unwrap(), None);

        store.upsert_balance("A", 10).unwrap();
        store.upsert_balance("A", 25).unwrap();
        assert_eq!(store.get_balance("A").unwrap(), Some(25));
        assert_eq!(store.count_balances().unwrap(), 1);
    }

    #[test]
    fn utxos_for_filters_by_address() {
        let store = InMemoryLedgerStore::new();
        store.insert_utxo(&UtxoEntry::single(outpoint(1, 0), "A", 1)).unwrap();
        store.insert_utxo(&UtxoEntry::single(outpoint(1, 1), "B", 2)).unwrap();
        store.insert_utxo(&UtxoEntry::single(outpoint(2, 0), "A", 3)).unwrap();

        let amounts: Vec<u64> = store.utxos_for("A").unwrap().iter().map(|e| e.amount).collect();
        assert_eq!(amounts, vec![1, 3]);
    }

    #[test]
    fn rollback_undoes_transaction_writes() {
        let store = InMemoryLedgerStore::new();
        store.insert_utxo(&UtxoEntry::single(outpoint(1, 0), "A", 5)).unwrap();
        store.upsert_balance("A", 5).unwrap();

        store.begin_transaction().unwrap();
        store.delete_utxo(&outpoint(1, 0)).unwrap();
        store.insert_utxo(&UtxoEntry::single(outpoint(2, 0), "B", 5)).unwrap();
        store.rollback_transaction().unwrap();

        assert!(store.contains_output(&outpoint(1, 0)).unwrap());
        assert!(!store.contains_output(&outpoint(2, 0)).unwrap());
        assert_eq!(store.get_balance("A").unwrap(), Some(5));
    }

    #[test]
    fn close_flushes_and_rejects_later_calls() {
        let store = InMemoryLedgerStore::new();
        store.close().unwrap();

        assert_eq!(store.flush_count(), 1);
        assert!(matches!(store.count_utxos(), Err(StoreError::Closed)));
        assert!(matches!(store.flush(), Err(StoreError::Closed)));
    }
}
