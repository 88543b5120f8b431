use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{StoreError, StoreResult};
use crate::tables::LedgerOp;

/// Frame header size: 4 bytes length + 4 bytes CRC.
pub const HEADER_SIZE: usize = 8;

/// One flushed batch of ledger ops.
///
/// On-disk frame:
/// ```text
/// [4 bytes: payload length (little-endian u32)]
/// [4 bytes: CRC32 of payload (little-endian u32)]
/// [N bytes: payload (bincode-serialized WalBatch)]
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalBatch {
    /// Monotonic batch number, continuing across restarts.
    pub seq: u64,
    pub ops: Vec<LedgerOp>,
}

/// When appended batches reach stable storage.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SyncMode {
    /// `fsync` after every batch. A returned flush survives power loss.
    #[default]
    EveryBatch,
    /// Rely on OS page-cache buffering. Survives process crashes only.
    OsDefault,
}

/// Result of reading a log front to back.
#[derive(Debug, Default)]
pub struct Recovery {
    pub batches: Vec<WalBatch>,
    /// Byte length of the intact prefix of the log.
    pub valid_len: u64,
}

struct WalWriter {
    writer: BufWriter<File>,
    offset: u64,
}

/// Append-only log of flushed batches.
///
/// Recovery stops at the first frame that is truncated, fails its CRC, or
/// does not decode: batches must be applied in order, so nothing after a
/// damaged frame can be trusted.
pub struct WriteAheadLog {
    path: PathBuf,
    writer: Mutex<WalWriter>,
    sync_mode: SyncMode,
}

impl WriteAheadLog {
    /// Open (or create) the log file at the given path.
    pub fn open(path: &Path, sync_mode: SyncMode) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)?;
        let offset = file.metadata()?.len();

        Ok(Self {
            path: path.to_path_buf(),
            writer: Mutex::new(WalWriter {
                writer: BufWriter::new(file),
                offset,
            }),
            sync_mode,
        })
    }

    /// Append one batch. Returns the byte offset of its frame.
    pub fn append(&self, batch: &WalBatch) -> StoreResult<u64> {
        let payload =
            bincode::serialize(batch).map_err(|e| StoreError::Serialization(e.to_string()))?;
        let frame = encode_frame(&payload)?;

        let mut w = self.lock()?;
        let entry_offset = w.offset;

        w.writer.write_all(&frame)?;
        w.writer.flush()?;
        if self.sync_mode == SyncMode::EveryBatch {
            w.writer.get_ref().sync_data()?;
        }
        w.offset += frame.len() as u64;

        debug!(offset = entry_offset, seq = batch.seq, ops = batch.ops.len(), "WAL append");
        Ok(entry_offset)
    }

    /// Read every intact batch from the start of the log.
    pub fn recover(&self) -> StoreResult<Recovery> {
        let mut reader = BufReader::new(File::open(&self.path)?);
        let mut recovery = Recovery::default();

        loop {
            match read_frame(&mut reader)? {
                Frame::Payload(payload) => {
                    let len = (HEADER_SIZE + payload.len()) as u64;
                    match bincode::deserialize::<WalBatch>(&payload) {
                        Ok(batch) => {
                            recovery.batches.push(batch);
                            recovery.valid_len += len;
                        }
                        Err(e) => {
                            warn!(offset = recovery.valid_len, error = %e, "undecodable WAL batch; stopping recovery");
                            break;
                        }
                    }
                }
                Frame::End => break,
                Frame::Torn(reason) => {
                    warn!(offset = recovery.valid_len, reason, "damaged WAL tail; stopping recovery");
                    break;
                }
            }
        }

        debug!(recovered = recovery.batches.len(), "WAL recovery complete");
        Ok(recovery)
    }

    /// Cut the log back to `len` bytes, discarding a damaged tail.
    pub fn truncate_to(&self, len: u64) -> StoreResult<()> {
        let mut w = self.lock()?;
        w.writer.flush()?;
        let file = OpenOptions::new().write(true).open(&self.path)?;
        file.set_len(len)?;
        file.sync_all()?;

        let file = OpenOptions::new().read(true).append(true).open(&self.path)?;
        w.writer = BufWriter::new(file);
        w.offset = len;

        debug!(len, "WAL truncated");
        Ok(())
    }

    /// Remove all data from the log.
    pub fn truncate(&self) -> StoreResult<()> {
        self.truncate_to(0)
    }

    /// Current write offset.
    pub fn offset(&self) -> StoreResult<u64> {
        Ok(self.lock()?.offset)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, WalWriter>> {
        self.writer.lock().map_err(|_| StoreError::LockPoisoned)
    }
}

pub(crate) enum Frame {
    Payload(Vec<u8>),
    /// Clean end of input at a frame boundary.
    End,
    /// Partial header, short payload, zero length, or CRC mismatch.
    Torn(&'static str),
}

/// Frame a payload with its length and CRC32.
pub(crate) fn encode_frame(payload: &[u8]) -> StoreResult<Vec<u8>> {
    let length = u32::try_from(payload.len())
        .map_err(|_| StoreError::Serialization(format!("frame of {} bytes too large", payload.len())))?;
    let mut frame = Vec::with_capacity(HEADER_SIZE + payload.len());
    frame.extend_from_slice(&length.to_le_bytes());
    frame.extend_from_slice(&crc32fast::hash(payload).to_le_bytes());
    frame.extend_from_slice(payload);
    Ok(frame)
}

pub(crate) fn read_frame<R: Read>(reader: &mut R) -> StoreResult<Frame> {
    let mut header = [0u8; HEADER_SIZE];
    let mut filled = 0;
    while filled < HEADER_SIZE {
        match reader.read(&mut header[filled..]) {
            Ok(0) if filled == 0 => return Ok(Frame::End),
            Ok(0) => return Ok(Frame::Torn("truncated header")),
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }

    let length = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
    let expected_crc = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
    if length == 0 {
        return Ok(Frame::Torn("zero-length frame"));
    }

    // Read through `take` so a garbage length cannot force a huge allocation.
    let mut payload = Vec::new();
    reader
        .by_ref()
        .take(u64::from(length))
        .read_to_end(&mut payload)?;
    if payload.len() != length as usize {
        return Ok(Frame::Torn("truncated payload"));
    }

    if crc32fast::hash(&payload) != expected_crc {
        return Ok(Frame::Torn("CRC mismatch"));
    }
    Ok(Frame::Payload(payload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Seek, SeekFrom};
    use tally_types::{OutPoint, TxHash, UtxoEntry};

    fn make_batch(seq: u64) -> WalBatch {
        let outpoint = OutPoint::new(TxHash::from_bytes([seq as u8; 32]), 0);
        WalBatch {
            seq,
            ops: vec![
                LedgerOp::InsertUtxo(UtxoEntry::single(outpoint, "A", seq * 10)),
                LedgerOp::SetBalance {
                    address: "A".into(),
                    amount: seq * 10,
                },
            ],
        }
    }

    #[test]
    fn append_and_recover() {
        let dir = tempfile::tempdir().unwrap();
        let wal = WriteAheadLog::open(&dir.path().join("ledger.wal"), SyncMode::default()).unwrap();

        wal.append(&make_batch(1)).unwrap();
        wal.append(&make_batch(2)).unwrap();

        let recovery = wal.recover().unwrap();
        assert_eq!(recovery.batches, vec![make_batch(1), make_batch(2)]);
        assert_eq!(recovery.valid_len, wal.offset().unwrap());
    }

    #[test]
    fn recover_empty_log() {
        let dir = tempfile::tempdir().unwrap();
        let wal = WriteAheadLog::open(&dir.path().join("empty.wal"), SyncMode::OsDefault).unwrap();

        let recovery = wal.recover().unwrap();
        assert!(recovery.batches.is_empty());
        assert_eq!(recovery.valid_len, 0);
    }

    #[test]
    fn corruption_stops_recovery_at_damaged_batch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corrupt.wal");
        let wal = WriteAheadLog::open(&path, SyncMode::default()).unwrap();

        wal.append(&make_batch(1)).unwrap();
        let second = wal.append(&make_batch(2)).unwrap();
        wal.append(&make_batch(3)).unwrap();
        drop(wal);

        // Flip the first payload byte of batch 2.
        {
            let mut file = OpenOptions::new().read(true).write(true).open(&path).unwrap();
            let at = second + HEADER_SIZE as u64;
            file.seek(SeekFrom::Start(at)).unwrap();
            let mut buf = [0u8; 1];
            file.read_exact(&mut buf).unwrap();
            buf[0] ^= 0xFF;
            file.seek(SeekFrom::Start(at)).unwrap();
            file.write_all(&buf).unwrap();
        }

        let wal = WriteAheadLog::open(&path, SyncMode::default()).unwrap();
        let recovery = wal.recover().unwrap();

        // Batch 3 is intact but follows a damaged batch, so it is not applied.
        assert_eq!(recovery.batches, vec![make_batch(1)]);
        assert_eq!(recovery.valid_len, second);
    }

    #[test]
    fn truncated_tail_is_dropped_and_can_be_cut() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tail.wal");
        let wal = WriteAheadLog::open(&path, SyncMode::default()).unwrap();

        wal.append(&make_batch(1)).unwrap();
        wal.append(&make_batch(2)).unwrap();
        let total = wal.offset().unwrap();
        drop(wal);

        OpenOptions::new()
            .write(true)
            .open(&path)
            .unwrap()
            .set_len(total - 3)
            .unwrap();

        let wal = WriteAheadLog::open(&path, SyncMode::default()).unwrap();
        let recovery = wal.recover().unwrap();
        assert_eq!(recovery.batches, vec![make_batch(1)]);

        wal.truncate_to(recovery.valid_len).unwrap();
        wal.append(&make_batch(2)).unwrap();
        let recovery = wal.recover().unwrap();
        assert_eq!(recovery.batches, vec![make_batch(1), make_batch(2)]);
    }

    #[test]
    fn truncate_clears_log() {
        let dir = tempfile::tempdir().unwrap();
        let wal = WriteAheadLog::open(&dir.path().join("t.wal"), SyncMode::default()).unwrap();

        wal.append(&make_batch(1)).unwrap();
        wal.truncate().unwrap();

        assert_eq!(wal.offset().unwrap(), 0);
        assert!(wal.recover().unwrap().batches.is_empty());
    }

    #[test]
    fn append_returns_increasing_offsets() {
        let dir = tempfile::tempdir().unwrap();
        let wal = WriteAheadLog::open(&dir.path().join("o.wal"), SyncMode::OsDefault).unwrap();

        let off1 = wal.append(&make_batch(1)).unwrap();
        let off2 = wal.append(&make_batch(2)).unwrap();
        assert_eq!(off1, 0);
        assert!(off2 > off1);
    }
}
