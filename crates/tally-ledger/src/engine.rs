use chrono::{DateTime, Utc};
use tally_store::{LedgerStore, StoreError};
use tally_types::{
    Address, Amount, BalanceRecord, Block, OutPoint, Transaction, TxHash, TxOutput, UtxoEntry,
    UtxoKey,
};
use tracing::{debug, error, info, warn};

use crate::cancel::CancellationToken;
use crate::config::EngineConfig;
use crate::error::{LedgerError, LedgerResult};
use crate::placeholder::PlaceholderAllocator;
use crate::stats::ReplayStats;

/// How a replay run ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReplayOutcome {
    /// Every block was applied and flushed.
    Completed(ReplayStats),
    /// The token was cancelled; everything applied so far was flushed.
    Cancelled(ReplayStats),
}

impl ReplayOutcome {
    pub fn stats(&self) -> &ReplayStats {
        match self {
            Self::Completed(stats) | Self::Cancelled(stats) => stats,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }
}

/// What happened to one address credit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CreditResult {
    /// Entry inserted and balance raised to `balance`.
    Credited {
        address: Address,
        amount: Amount,
        balance: Amount,
    },
    /// The outpoint was already present. Nothing was written.
    Duplicate { address: Address, key: UtxoKey },
}

/// Per-output summary returned by [`ReplayEngine::credit_output`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CreditReport {
    pub outpoint: OutPoint,
    /// Empty for a zero-value output with no address.
    pub results: Vec<CreditResult>,
}

impl CreditReport {
    pub fn credited(&self) -> usize {
        self.results
            .iter()
            .filter(|r| matches!(r, CreditResult::Credited { .. }))
            .count()
    }

    pub fn duplicates(&self) -> usize {
        self.results.len() - self.credited()
    }
}

/// Applies decoded transactions, strictly in feed order, to the
/// unspent-output and balance indexes of a [`LedgerStore`].
///
/// The engine is the only writer. All mutable replay state (placeholder
/// counter, insertions since the last flush, counters) lives on the
/// instance, so independent engines never interfere.
///
/// Crediting policy per output, by number of resolved addresses:
///
/// | addresses | amount | effect                                              |
/// |-----------|--------|-----------------------------------------------------|
/// | 1         | any    | one entry, balance += amount                        |
/// | 0         | 0      | nothing                                             |
/// | 0         | > 0    | one entry to a fresh placeholder, balance += amount |
/// | n ≥ 2     | any    | n entries (slots `0..n`), each balance += amount    |
///
/// The last row credits `amount × n` in total. Balances are never reduced
/// when outputs are spent, so they hold total value received. An output
/// whose outpoint is already stored, in any slot, is skipped whole.
///
/// Each transaction runs inside a store transaction. When a store call
/// fails, the engine rolls the current transaction back before flushing,
/// so durable state always ends on a transaction boundary.
pub struct ReplayEngine<S: LedgerStore> {
    store: S,
    config: EngineConfig,
    placeholders: PlaceholderAllocator,
    insertions_since_flush: u64,
    last_block_time: Option<DateTime<Utc>>,
    stats: ReplayStats,
}

impl<S: LedgerStore> ReplayEngine<S> {
    pub fn new(store: S, config: EngineConfig) -> LedgerResult<Self> {
        config.validate()?;
        Ok(Self::build(store, config))
    }

    /// Engine with [`EngineConfig::default`], which always validates.
    pub fn with_defaults(store: S) -> Self {
        Self::build(store, EngineConfig::default())
    }

    fn build(store: S, config: EngineConfig) -> Self {
        Self {
            placeholders: config.placeholder_allocator(),
            store,
            config,
            insertions_since_flush: 0,
            last_block_time: None,
            stats: ReplayStats::default(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn stats(&self) -> &ReplayStats {
        &self.stats
    }

    pub fn placeholders(&self) -> &PlaceholderAllocator {
        &self.placeholders
    }

    /// Entries inserted since the last flush.
    pub fn pending_insertions(&self) -> u64 {
        self.insertions_since_flush
    }

    /// Record the feed length so progress lines can show a percentage.
    pub fn set_blocks_total(&mut self, total: u64) {
        self.stats.blocks_total = Some(total);
    }

    /// Replay a whole feed.
    ///
    /// `cancel` is checked before every transaction. On cancellation the
    /// engine flushes and returns [`ReplayOutcome::Cancelled`]; the
    /// interrupted block is left partially applied, at a transaction
    /// boundary.
    pub fn run<I>(&mut self, blocks: I, cancel: &CancellationToken) -> LedgerResult<ReplayOutcome>
    where
        I: IntoIterator<Item = Block>,
    {
        for block in blocks {
            self.begin_block(block.timestamp)?;
            for tx in &block.transactions {
                if cancel.is_cancelled() {
                    return self.stop_cancelled();
                }
                self.apply_transaction(block.timestamp, tx)?;
            }
            self.stats.blocks_processed += 1;
        }

        self.flush()?;
        self.refresh_utxo_count();
        info!(
            transactions = self.stats.transactions_processed,
            outputs = self.stats.outputs_processed,
            "replay complete"
        );
        Ok(ReplayOutcome::Completed(self.stats.clone()))
    }

    /// Apply every transaction of one block.
    pub fn apply_block(&mut self, block: &Block) -> LedgerResult<()> {
        self.begin_block(block.timestamp)?;
        for tx in &block.transactions {
            self.apply_transaction(block.timestamp, tx)?;
        }
        self.stats.blocks_processed += 1;
        Ok(())
    }

    /// Apply one transaction: consume every input, then credit every output.
    ///
    /// A batch flush, when due, happens after the transaction, so flushed
    /// state always ends on a transaction boundary.
    pub fn apply_transaction(
        &mut self,
        timestamp: DateTime<Utc>,
        tx: &Transaction,
    ) -> LedgerResult<()> {
        if let Err(e) = self.store.begin_transaction() {
            return Err(self.fatal(e));
        }
        for input in &tx.inputs {
            if input.is_coinbase() {
                self.stats.coinbase_inputs += 1;
                continue;
            }
            self.consume(input.outpoint())?;
        }
        for (output, index) in tx.outputs.iter().zip(0u32..) {
            self.credit_output(timestamp, tx.hash, index, output)?;
        }
        if let Err(e) = self.store.commit_transaction() {
            return Err(self.fatal(e));
        }

        self.stats.transactions_processed += 1;
        if self.insertions_since_flush > self.config.commit_threshold {
            self.flush()?;
        }
        self.report_progress();
        Ok(())
    }

    /// Spend an output. Returns the number of entries removed: 0 when the
    /// outpoint is unknown, which is not an error.
    pub fn consume_output(&mut self, tx_hash: TxHash, output_index: u32) -> LedgerResult<usize> {
        self.consume(OutPoint::new(tx_hash, output_index))
    }

    fn consume(&mut self, outpoint: OutPoint) -> LedgerResult<usize> {
        let removed = match self.store.delete_utxo(&outpoint) {
            Ok(removed) => removed,
            Err(e) => return Err(self.fatal(e)),
        };

        if removed.is_empty() {
            self.stats.inputs_missed += 1;
            debug!(%outpoint, "input references no unspent output");
        } else {
            self.stats.inputs_consumed += 1;
        }
        Ok(removed.len())
    }

    /// Credit one output according to its address count.
    pub fn credit_output(
        &mut self,
        timestamp: DateTime<Utc>,
        tx_hash: TxHash,
        output_index: u32,
        output: &TxOutput,
    ) -> LedgerResult<CreditReport> {
        let outpoint = OutPoint::new(tx_hash, output_index);
        self.stats.outputs_processed += 1;

        let entries = match output.addresses.as_slice() {
            [] if output.amount == 0 => Vec::new(),
            [] => {
                let address = self.placeholders.next();
                self.stats.placeholders_allocated += 1;
                info!(
                    %outpoint,
                    amount = output.amount,
                    %address,
                    "output has no address; crediting placeholder"
                );
                vec![UtxoEntry::single(outpoint, address, output.amount)]
            }
            [address] => vec![UtxoEntry::single(outpoint, address.clone(), output.amount)],
            addresses => {
                self.stats.multi_address_outputs += 1;
                info!(
                    %outpoint,
                    amount = output.amount,
                    addresses = addresses.len(),
                    "multi-address output; crediting every address"
                );
                addresses
                    .iter()
                    .zip(0u32..)
                    .map(|(address, slot)| {
                        UtxoEntry::multi(outpoint, slot, address.clone(), output.amount)
                    })
                    .collect()
            }
        };

        let occupied = match self.store.contains_output(&outpoint) {
            Ok(occupied) => occupied,
            Err(e) => return Err(self.fatal(e)),
        };
        if occupied {
            self.stats.duplicates_skipped += entries.len() as u64;
            if !entries.is_empty() {
                warn!(
                    %outpoint,
                    addresses = entries.len(),
                    amount = output.amount,
                    "outpoint already present; skipping output"
                );
            }
            let results = entries
                .into_iter()
                .map(|entry| CreditResult::Duplicate {
                    key: entry.key(),
                    address: entry.address,
                })
                .collect();
            return Ok(CreditReport { outpoint, results });
        }

        let mut results = Vec::with_capacity(entries.len());
        for entry in entries {
            results.push(self.credit(timestamp, entry)?);
        }
        Ok(CreditReport { outpoint, results })
    }

    /// Flush pending writes and reset the batch window.
    pub fn flush(&mut self) -> LedgerResult<()> {
        self.store.flush().map_err(LedgerError::Flush)?;
        self.insertions_since_flush = 0;
        self.stats.flushes += 1;
        debug!(flushes = self.stats.flushes, "ledger flushed");
        Ok(())
    }

    /// Close the store (which flushes it) and return the final counters.
    pub fn finish(mut self) -> LedgerResult<(S, ReplayStats)> {
        self.refresh_utxo_count();
        self.store.close().map_err(LedgerError::Flush)?;
        self.insertions_since_flush = 0;
        Ok((self.store, self.stats))
    }

    fn credit(&mut self, timestamp: DateTime<Utc>, entry: UtxoEntry) -> LedgerResult<CreditResult> {
        match self.store.insert_utxo(&entry) {
            Ok(()) => {}
            Err(StoreError::DuplicateKey(key)) => {
                self.stats.duplicates_skipped += 1;
                warn!(
                    %key,
                    address = %entry.address,
                    amount = entry.amount,
                    "duplicate unspent-output key; skipping credit"
                );
                return Ok(CreditResult::Duplicate {
                    address: entry.address,
                    key,
                });
            }
            Err(e) => return Err(self.fatal(e)),
        }
        self.stats.outputs_inserted += 1;
        self.insertions_since_flush += 1;

        let previous = match self.store.get_balance(&entry.address) {
            Ok(previous) => previous.unwrap_or(0),
            Err(e) => return Err(self.fatal(e)),
        };
        let mut record = BalanceRecord::new(entry.address.clone(), previous);
        record.credit(entry.amount);
        let balance = record.amount;
        if let Err(e) = self.store.upsert_balance(&record.address, balance) {
            return Err(self.fatal(e));
        }
        self.stats.value_credited += u128::from(entry.amount);

        debug!(
            key = %entry.key(),
            address = %entry.address,
            amount = entry.amount,
            balance,
            block_time = %timestamp,
            "credited"
        );
        Ok(CreditResult::Credited {
            address: entry.address,
            amount: entry.amount,
            balance,
        })
    }

    fn begin_block(&mut self, timestamp: DateTime<Utc>) -> LedgerResult<()> {
        if let Some(previous) = self.last_block_time {
            if timestamp < previous {
                return Err(LedgerError::OutOfOrder {
                    previous,
                    found: timestamp,
                });
            }
        }
        self.last_block_time = Some(timestamp);
        debug!(block_time = %timestamp, "applying block");
        Ok(())
    }

    fn stop_cancelled(&mut self) -> LedgerResult<ReplayOutcome> {
        info!(
            transactions = self.stats.transactions_processed,
            "replay cancelled; flushing"
        );
        self.flush()?;
        self.refresh_utxo_count();
        Ok(ReplayOutcome::Cancelled(self.stats.clone()))
    }

    /// Roll back the current transaction, flush what was committed before
    /// it, then wrap the store failure. Nothing is flushed when the rollback
    /// itself fails.
    fn fatal(&mut self, source: StoreError) -> LedgerError {
        error!(error = %source, "store failure during replay; rolling back and flushing");
        if let Err(e) = self.store.rollback_transaction() {
            error!(error = %e, "rollback after store failure failed; not flushing");
            return LedgerError::Fatal {
                source,
                flush_error: Some(format!("rollback failed: {e}")),
            };
        }
        let flush_error = match self.store.flush() {
            Ok(()) => {
                self.insertions_since_flush = 0;
                self.stats.flushes += 1;
                None
            }
            Err(e) => {
                error!(error = %e, "flush after store failure also failed");
                Some(e.to_string())
            }
        };
        LedgerError::Fatal {
            source,
            flush_error,
        }
    }

    fn report_progress(&mut self) {
        let interval = self.config.progress_interval;
        if interval == 0 || self.stats.transactions_processed % interval != 0 {
            return;
        }
        self.refresh_utxo_count();
        info!(
            percent = self.stats.percent_done(),
            blocks = self.stats.blocks_processed,
            transactions = self.stats.transactions_processed,
            unspent = self.stats.utxo_count,
            inserted = self.stats.outputs_inserted,
            "replay progress"
        );
    }

    fn refresh_utxo_count(&mut self) {
        match self.store.count_utxos() {
            Ok(count) => self.stats.utxo_count = count,
            Err(e) => warn!(error = %e, "could not count unspent outputs"),
        }
    }
}
