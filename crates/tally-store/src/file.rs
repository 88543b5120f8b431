use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};
use tally_types::{Amount, BalanceRecord, OutPoint, UtxoEntry, UtxoKey};
use tracing::{debug, info, warn};

use crate::error::{StoreError, StoreResult};
use crate::tables::{LedgerOp, LedgerTables};
use crate::traits::LedgerStore;
use crate::wal::{encode_frame, read_frame, Frame, SyncMode, WalBatch, WriteAheadLog};

const SNAPSHOT_FILE: &str = "snapshot.bin";
const SNAPSHOT_TMP_FILE: &str = "snapshot.bin.tmp";
const WAL_FILE: &str = "ledger.wal";

/// Configuration for [`FileLedgerStore`].
#[derive(Clone, Debug)]
pub struct FileStoreConfig {
    pub sync_mode: SyncMode,
    /// Rewrite the snapshot and empty the log on `close()`.
    pub compact_on_close: bool,
}

impl Default for FileStoreConfig {
    fn default() -> Self {
        Self {
            sync_mode: SyncMode::EveryBatch,
            compact_on_close: true,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct Snapshot {
    /// Sequence number of the last batch folded into this snapshot.
    last_seq: u64,
    utxos: Vec<UtxoEntry>,
    balances: Vec<BalanceRecord>,
}

struct FileState {
    tables: LedgerTables,
    pending: Vec<LedgerOp>,
    /// Length of `pending` when the open transaction began.
    mark: Option<usize>,
    next_seq: u64,
}

/// Durable ledger store backed by a snapshot plus a write-ahead log.
///
/// Reads and writes hit in-memory tables. Every write is also queued as a
/// [`LedgerOp`]; `flush()` appends the queue as one CRC-framed batch. On
/// open, the snapshot is loaded and intact batches are replayed over it, so
/// the recovered state is always the state at some completed flush.
///
/// Ops queued inside an open transaction stay behind the transaction mark:
/// `flush()` writes only what precedes it, and a rollback drops them along
/// with their effect on the tables.
///
/// Directory layout:
/// ```text
/// <dir>/snapshot.bin   compacted tables (optional)
/// <dir>/ledger.wal     batches flushed since the snapshot
/// ```
pub struct FileLedgerStore {
    dir: PathBuf,
    wal: WriteAheadLog,
    state: RwLock<FileState>,
    config: FileStoreConfig,
    closed: AtomicBool,
}

impl FileLedgerStore {
    /// Open (or create) a store in `dir`, recovering any flushed state.
    pub fn open(dir: &Path, config: FileStoreConfig) -> StoreResult<Self> {
        fs::create_dir_all(dir)?;

        let (mut tables, last_seq) = match load_snapshot(&dir.join(SNAPSHOT_FILE))? {
            Some(snapshot) => {
                let tables = LedgerTables::from_rows(snapshot.utxos, snapshot.balances)
                    .map_err(|e| corrupt(&dir.join(SNAPSHOT_FILE), e.to_string()))?;
                (tables, snapshot.last_seq)
            }
            None => (LedgerTables::new(), 0),
        };

        let wal = WriteAheadLog::open(&dir.join(WAL_FILE), config.sync_mode)?;
        let recovery = wal.recover()?;

        let mut next_seq = last_seq + 1;
        let mut replayed = 0usize;
        for batch in &recovery.batches {
            // Left behind when a crash hit between snapshot rename and log truncation.
            if batch.seq <= last_seq {
                continue;
            }
            for op in &batch.ops {
                tables
                    .apply(op)
                    .map_err(|e| corrupt(wal.path(), format!("batch {}: {e}", batch.seq)))?;
            }
            next_seq = batch.seq + 1;
            replayed += 1;
        }

        let wal_len = wal.offset()?;
        if recovery.valid_len < wal_len {
            warn!(
                discarded = wal_len - recovery.valid_len,
                "discarding unflushed tail of ledger log"
            );
            wal.truncate_to(recovery.valid_len)?;
        }

        info!(
            dir = %dir.display(),
            utxos = tables.utxo_count(),
            balances = tables.balance_count(),
            replayed_batches = replayed,
            "ledger store opened"
        );

        Ok(Self {
            dir: dir.to_path_buf(),
            wal,
            state: RwLock::new(FileState {
                tables,
                pending: Vec::new(),
                mark: None,
                next_seq,
            }),
            config,
            closed: AtomicBool::new(false),
        })
    }

    /// Number of writes not yet flushed.
    pub fn pending_ops(&self) -> StoreResult<usize> {
        Ok(self.read()?.pending.len())
    }

    /// Flush, write a fresh snapshot, then empty the log. Fails while a
    /// transaction is open.
    pub fn compact(&self) -> StoreResult<()> {
        if self.read()?.mark.is_some() {
            return Err(StoreError::TransactionOpen);
        }
        self.flush()?;
        let state = self.read()?;
        let snapshot = Snapshot {
            last_seq: state.next_seq - 1,
            utxos: state.tables.utxo_rows(),
            balances: state.tables.balance_rows(),
        };
        write_snapshot(&self.dir, &snapshot)?;
        self.wal.truncate()?;
        debug!(last_seq = snapshot.last_seq, "ledger store compacted");
        Ok(())
    }

    fn read(&self) -> StoreResult<RwLockReadGuard<'_, FileState>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StoreError::Closed);
        }
        self.state.read().map_err(|_| StoreError::LockPoisoned)
    }

    fn write(&self) -> StoreResult<RwLockWriteGuard<'_, FileState>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StoreError::Closed);
        }
        self.state.write().map_err(|_| StoreError::LockPoisoned)
    }
}

impl LedgerStore for FileLedgerStore {
    fn insert_utxo(&self, entry: &UtxoEntry) -> StoreResult<()> {
        let mut state = self.write()?;
        state.tables.insert_utxo(entry.clone())?;
        state.pending.push(LedgerOp::InsertUtxo(entry.clone()));
        Ok(())
    }

    fn get_utxo(&self, key: &UtxoKey) -> StoreResult<Option<UtxoEntry>> {
        Ok(self.read()?.tables.get_utxo(key).cloned())
    }

    fn delete_utxo(&self, outpoint: &OutPoint) -> StoreResult<Vec<UtxoEntry>> {
        let mut state = self.write()?;
        let removed = state.tables.delete_output(outpoint);
        if !removed.is_empty() {
            state.pending.push(LedgerOp::DeleteOutput(*outpoint));
        }
        Ok(removed)
    }

    fn contains_output(&self, outpoint: &OutPoint) -> StoreResult<bool> {
        Ok(self.read()?.tables.contains_output(outpoint))
    }

    fn get_balance(&self, address: &str) -> StoreResult<Option<Amount>> {
        Ok(self.read()?.tables.get_balance(address))
    }

    fn upsert_balance(&self, address: &str, amount: Amount) -> StoreResult<()> {
        let mut state = self.write()?;
        state.tables.set_balance(address, amount);
        state.pending.push(LedgerOp::SetBalance {
            address: address.to_owned(),
            amount,
        });
        Ok(())
    }

    fn count_utxos(&self) -> StoreResult<u64> {
        Ok(self.read()?.tables.utxo_count())
    }

    fn count_balances(&self) -> StoreResult<u64> {
        Ok(self.read()?.tables.balance_count())
    }

    fn balances(&self) -> StoreResult<Vec<BalanceRecord>> {
        Ok(self.read()?.tables.balance_rows())
    }

    fn utxos_for(&self, address: &str) -> StoreResult<Vec<UtxoEntry>> {
        Ok(self.read()?.tables.utxos_for(address))
    }

    fn begin_transaction(&self) -> StoreResult<()> {
        let mut state = self.write()?;
        state.tables.begin();
        let len = state.pending.len();
        state.mark = Some(len);
        Ok(())
    }

    fn commit_transaction(&self) -> StoreResult<()> {
        let mut state = self.write()?;
        state.tables.commit();
        state.mark = None;
        Ok(())
    }

    fn rollback_transaction(&self) -> StoreResult<()> {
        let mut state = self.write()?;
        let undone = state.tables.rollback();
        if let Some(mark) = state.mark.take() {
            state.pending.truncate(mark);
            debug!(undone, "ledger transaction rolled back");
        }
        Ok(())
    }

    fn flush(&self) -> StoreResult<()> {
        let mut guard = self.write()?;
        let state = &mut *guard;
        let committed = state.mark.unwrap_or(state.pending.len());
        if committed == 0 {
            return Ok(());
        }

        let batch = WalBatch {
            seq: state.next_seq,
            ops: state.pending.drain(..committed).collect(),
        };
        if let Some(mark) = state.mark.as_mut() {
            *mark = 0;
        }
        if let Err(e) = self.wal.append(&batch) {
            // Keep the ops queued so a later flush can retry them.
            let uncommitted = std::mem::take(&mut state.pending);
            state.pending = batch.ops;
            if let Some(mark) = state.mark.as_mut() {
                *mark = state.pending.len();
            }
            state.pending.extend(uncommitted);
            return Err(e);
        }
        state.next_seq += 1;
        debug!(seq = batch.seq, ops = batch.ops.len(), "ledger batch flushed");
        Ok(())
    }

    fn close(&self) -> StoreResult<()> {
        self.rollback_transaction()?;
        if self.config.compact_on_close {
            self.compact()?;
        } else {
            self.flush()?;
        }
        self.closed.store(true, Ordering::SeqCst);
        info!(dir = %self.dir.display(), "ledger store closed");
        Ok(())
    }
}

impl std::fmt::Debug for FileLedgerStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileLedgerStore")
            .field("dir", &self.dir)
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish()
    }
}

fn corrupt(path: &Path, reason: String) -> StoreError {
    StoreError::Corrupt {
        path: path.to_path_buf(),
        reason,
    }
}

fn load_snapshot(path: &Path) -> StoreResult<Option<Snapshot>> {
    if !path.exists() {
        return Ok(None);
    }
    let mut reader = BufReader::new(File::open(path)?);
    match read_frame(&mut reader)? {
        Frame::Payload(payload) => bincode::deserialize(&payload)
            .map(Some)
            .map_err(|e| corrupt(path, e.to_string())),
        Frame::End => Err(corrupt(path, "empty snapshot".into())),
        Frame::Torn(reason) => Err(corrupt(path, reason.into())),
    }
}

/// Write-then-rename so a crash leaves either the old or the new snapshot.
fn write_snapshot(dir: &Path, snapshot: &Snapshot) -> StoreResult<()> {
    let payload =
        bincode::serialize(snapshot).map_err(|e| StoreError::Serialization(e.to_string()))?;
    let frame = encode_frame(&payload)?;

    let tmp = dir.join(SNAPSHOT_TMP_FILE);
    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&tmp)?;
    file.write_all(&frame)?;
    file.sync_all()?;
    drop(file);

    fs::rename(&tmp, dir.join(SNAPSHOT_FILE))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tally_types::TxHash;

    fn outpoint(seed: u8, index: u32) -> OutPoint {
        OutPoint::new(TxHash::from_bytes([seed; 32]), index)
    }

    fn no_compact() -> FileStoreConfig {
        FileStoreConfig {
            compact_on_close: false,
            ..FileStoreConfig::default()
        }
    }

    fn credit(store: &FileLedgerStore, seed: u8, address: &str, amount: u64) {
        store
            .insert_utxo(&UtxoEntry::single(outpoint(seed, 0), address, amount))
            .unwrap();
        let current = store.get_balance(address).unwrap().unwrap_or(0);
        store.upsert_balance(address, current + amount).unwrap();
    }

    #[test]
    fn flushed_state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = FileLedgerStore::open(dir.path(), no_compact()).unwrap();
            credit(&store, 1, "A1", 100);
            credit(&store, 2, "A1", 50);
            store.flush().unwrap();
        }

        let store = FileLedgerStore::open(dir.path(), no_compact()).unwrap();
        assert_eq!(store.count_utxos().unwrap(), 2);
        assert_eq!(store.get_balance("A1").unwrap(), Some(150));
    }

    #[test]
    fn unflushed_writes_are_lost_as_a_whole() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = FileLedgerStore::open(dir.path(), no_compact()).unwrap();
            credit(&store, 1, "A1", 100);
            store.flush().unwrap();

            // Simulated crash: written but never flushed.
            credit(&store, 2, "A2", 7);
            store.delete_utxo(&outpoint(1, 0)).unwrap();
            assert_eq!(store.pending_ops().unwrap(), 3);
        }

        let store = FileLedgerStore::open(dir.path(), no_compact()).unwrap();
        assert_eq!(store.count_utxos().unwrap(), 1);
        assert!(store
            .get_utxo(&UtxoKey::new(outpoint(1, 0), 0))
            .unwrap()
            .is_some());
        assert_eq!(store.get_balance("A2").unwrap(), None);
    }

    #[test]
    fn torn_tail_is_discarded_on_open() {
        let dir = tempfile::tempdir().unwrap();
        let intact_len;
        {
            let store = FileLedgerStore::open(dir.path(), no_compact()).unwrap();
            credit(&store, 1, "A1", 100);
            store.flush().unwrap();
            intact_len = store.wal.offset().unwrap();
            credit(&store, 2, "A2", 5);
            store.flush().unwrap();
        }

        let wal_path = dir.path().join(WAL_FILE);
        let full_len = fs::metadata(&wal_path).unwrap().len();
        OpenOptions::new()
            .write(true)
            .open(&wal_path)
            .unwrap()
            .set_len(full_len - 2)
            .unwrap();

        let store = FileLedgerStore::open(dir.path(), no_compact()).unwrap();
        assert_eq!(store.get_balance("A1").unwrap(), Some(100));
        assert_eq!(store.get_balance("A2").unwrap(), None);
        assert_eq!(fs::metadata(&wal_path).unwrap().len(), intact_len);

        // New batches append cleanly after the cut.
        credit(&store, 3, "A3", 9);
        store.flush().unwrap();
        drop(store);
        let store = FileLedgerStore::open(dir.path(), no_compact()).unwrap();
        assert_eq!(store.get_balance("A3").unwrap(), Some(9));
    }

    #[test]
    fn close_compacts_into_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = FileLedgerStore::open(dir.path(), FileStoreConfig::default()).unwrap();
            credit(&store, 1, "A1", 100);
            credit(&store, 2, "A2", 20);
            store.close().unwrap();
            assert!(matches!(store.count_utxos(), Err(StoreError::Closed)));
        }

        assert!(dir.path().join(SNAPSHOT_FILE).exists());
        assert_eq!(fs::metadata(dir.path().join(WAL_FILE)).unwrap().len(), 0);

        let store = FileLedgerStore::open(dir.path(), FileStoreConfig::default()).unwrap();
        assert_eq!(store.count_utxos().unwrap(), 2);
        assert_eq!(store.get_balance("A2").unwrap(), Some(20));
    }

    #[test]
    fn batches_already_in_snapshot_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let stale_log;
        {
            let store = FileLedgerStore::open(dir.path(), no_compact()).unwrap();
            credit(&store, 1, "A1", 100);
            store.flush().unwrap();
            stale_log = fs::read(dir.path().join(WAL_FILE)).unwrap();
            store.compact().unwrap();
        }

        // Crash between snapshot rename and log truncation.
        fs::write(dir.path().join(WAL_FILE), stale_log).unwrap();

        let store = FileLedgerStore::open(dir.path(), no_compact()).unwrap();
        assert_eq!(store.count_utxos().unwrap(), 1);
        assert_eq!(store.get_balance("A1").unwrap(), Some(100));
    }

    #[test]
    fn duplicate_insert_is_not_logged() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileLedgerStore::open(dir.path(), no_compact()).unwrap();
        let entry = UtxoEntry::single(outpoint(1, 0), "A", 1);

        store.insert_utxo(&entry).unwrap();
        assert!(store.insert_utxo(&entry).unwrap_err().is_duplicate_key());
        assert_eq!(store.pending_ops().unwrap(), 1);
    }

    #[test]
    fn flush_inside_transaction_keeps_uncommitted_ops_back() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = FileLedgerStore::open(dir.path(), no_compact()).unwrap();
            credit(&store, 1, "A", 10);

            store.begin_transaction().unwrap();
            store.delete_utxo(&outpoint(1, 0)).unwrap();
            store
                .insert_utxo(&UtxoEntry::single(outpoint(2, 0), "B", 10))
                .unwrap();
            store.flush().unwrap();
            assert_eq!(store.pending_ops().unwrap(), 2);

            store.rollback_transaction().unwrap();
            assert_eq!(store.pending_ops().unwrap(), 0);
            assert_eq!(store.count_utxos().unwrap(), 1);
            store.flush().unwrap();
        }

        let store = FileLedgerStore::open(dir.path(), no_compact()).unwrap();
        assert!(store.contains_output(&outpoint(1, 0)).unwrap());
        assert!(!store.contains_output(&outpoint(2, 0)).unwrap());
        assert_eq!(store.get_balance("A").unwrap(), Some(10));
    }

    #[test]
    fn committed_transaction_is_flushed() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = FileLedgerStore::open(dir.path(), no_compact()).unwrap();
            store.begin_transaction().unwrap();
            credit(&store, 1, "A", 10);
            store.commit_transaction().unwrap();
            store.flush().unwrap();
        }

        let store = FileLedgerStore::open(dir.path(), no_compact()).unwrap();
        assert_eq!(store.get_balance("A").unwrap(), Some(10));
    }

    #[test]
    fn compact_refuses_open_transaction() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileLedgerStore::open(dir.path(), FileStoreConfig::default()).unwrap();
        store.begin_transaction().unwrap();
        credit(&store, 1, "A", 10);

        assert!(matches!(store.compact(), Err(StoreError::TransactionOpen)));

        // close() discards the open transaction before compacting.
        store.close().unwrap();
        drop(store);
        let store = FileLedgerStore::open(dir.path(), FileStoreConfig::default()).unwrap();
        assert_eq!(store.count_utxos().unwrap(), 0);
    }

    #[test]
    fn corrupt_snapshot_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(SNAPSHOT_FILE), [4, 0, 0, 0, 0, 0, 0, 0, 1, 2, 3, 4]).unwrap();

        let err = FileLedgerStore::open(dir.path(), FileStoreConfig::default()).unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { .. }));
    }
}
