use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use tally_types::{Address, Amount, BalanceRecord, OutPoint, UtxoEntry, UtxoKey};

use crate::error::{StoreError, StoreResult};

/// A single logged mutation. Replaying a sequence of ops over empty tables
/// reproduces the tables that issued them.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerOp {
    InsertUtxo(UtxoEntry),
    DeleteOutput(OutPoint),
    SetBalance { address: Address, amount: Amount },
}

/// Inverse of one applied mutation.
#[derive(Clone, Debug)]
enum Undo {
    RemoveUtxo(UtxoKey),
    RestoreUtxos(Vec<UtxoEntry>),
    RestoreBalance {
        address: Address,
        previous: Option<Amount>,
    },
}

/// The two ledger indexes held in memory.
///
/// Shared by [`InMemoryLedgerStore`](crate::InMemoryLedgerStore) and
/// [`FileLedgerStore`](crate::FileLedgerStore); the latter logs every op it
/// applies here.
///
/// Between [`begin`](Self::begin) and [`commit`](Self::commit) every
/// mutation also records its inverse, so [`rollback`](Self::rollback) can
/// put the tables back as they were at `begin`.
#[derive(Clone, Debug, Default)]
pub struct LedgerTables {
    utxos: BTreeMap<UtxoKey, UtxoEntry>,
    balances: HashMap<Address, Amount>,
    journal: Option<Vec<Undo>>,
}

impl PartialEq for LedgerTables {
    fn eq(&self, other: &Self) -> bool {
        self.utxos == other.utxos && self.balances == other.balances
    }
}

impl Eq for LedgerTables {}

impl LedgerTables {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build tables from snapshot rows.
    pub fn from_rows(utxos: Vec<UtxoEntry>, balances: Vec<BalanceRecord>) -> StoreResult<Self> {
        let mut tables = Self::new();
        for entry in utxos {
            tables.insert_utxo(entry)?;
        }
        for record in balances {
            tables.balances.insert(record.address, record.amount);
        }
        Ok(tables)
    }

    pub fn insert_utxo(&mut self, entry: UtxoEntry) -> StoreResult<()> {
        let key = entry.key();
        if self.utxos.contains_key(&key) {
            return Err(StoreError::DuplicateKey(key));
        }
        self.utxos.insert(key, entry);
        self.record(Undo::RemoveUtxo(key));
        Ok(())
    }

    pub fn get_utxo(&self, key: &UtxoKey) -> Option<&UtxoEntry> {
        self.utxos.get(key)
    }

    pub fn delete_output(&mut self, outpoint: &OutPoint) -> Vec<UtxoEntry> {
        let keys: Vec<UtxoKey> = self
            .utxos
            .range(outpoint.key_range())
            .map(|(key, _)| *key)
            .collect();
        let removed: Vec<UtxoEntry> = keys
            .iter()
            .filter_map(|key| self.utxos.remove(key))
            .collect();
        if !removed.is_empty() {
            self.record(Undo::RestoreUtxos(removed.clone()));
        }
        removed
    }

    /// Whether any slot of `outpoint` is occupied.
    pub fn contains_output(&self, outpoint: &OutPoint) -> bool {
        self.utxos.range(outpoint.key_range()).next().is_some()
    }

    pub fn get_balance(&self, address: &str) -> Option<Amount> {
        self.balances.get(address).copied()
    }

    pub fn set_balance(&mut self, address: &str, amount: Amount) {
        let previous = match self.balances.get_mut(address) {
            Some(existing) => Some(std::mem::replace(existing, amount)),
            None => {
                self.balances.insert(address.to_owned(), amount);
                None
            }
        };
        self.record(Undo::RestoreBalance {
            address: address.to_owned(),
            previous,
        });
    }

    /// Start journaling mutations. An open journal is discarded.
    pub fn begin(&mut self) {
        self.journal = Some(Vec::new());
    }

    /// Keep every mutation since [`begin`](Self::begin).
    pub fn commit(&mut self) {
        self.journal = None;
    }

    /// Undo every mutation since [`begin`](Self::begin), newest first.
    /// Returns how many were undone; 0 when no journal is open.
    pub fn rollback(&mut self) -> usize {
        let Some(undo) = self.journal.take() else {
            return 0;
        };
        let undone = undo.len();
        for step in undo.into_iter().rev() {
            match step {
                Undo::RemoveUtxo(key) => {
                    self.utxos.remove(&key);
                }
                Undo::RestoreUtxos(entries) => {
                    for entry in entries {
                        self.utxos.insert(entry.key(), entry);
                    }
                }
                Undo::RestoreBalance { address, previous } => match previous {
                    Some(amount) => {
                        self.balances.insert(address, amount);
                    }
                    None => {
                        self.balances.remove(&address);
                    }
                },
            }
        }
        undone
    }

    pub fn in_transaction(&self) -> bool {
        self.journal.is_some()
    }

    fn record(&mut self, undo: Undo) {
        if let Some(journal) = self.journal.as_mut() {
            journal.push(undo);
        }
    }

    /// Apply a logged op. Only `InsertUtxo` can fail.
    pub fn apply(&mut self, op: &LedgerOp) -> StoreResult<()> {
        match op {
            LedgerOp::InsertUtxo(entry) => self.insert_utxo(entry.clone()),
            LedgerOp::DeleteOutput(outpoint) => {
                self.delete_output(outpoint);
                Ok(())
            }
            LedgerOp::SetBalance { address, amount } => {
                self.set_balance(address, *amount);
                Ok(())
            }
        }
    }

    pub fn utxo_count(&self) -> u64 {
        self.utxos.len() as u64
    }

    pub fn balance_count(&self) -> u64 {
        self.balances.len() as u64
    }

    pub fn utxo_rows(&self) -> Vec<UtxoEntry> {
        self.utxos.values().cloned().collect()
    }

    /// Balance records sorted by amount descending, then address.
    pub fn balance_rows(&self) -> Vec<BalanceRecord> {
        let mut rows: Vec<BalanceRecord> = self
            .balances
            .iter()
            .map(|(address, amount)| BalanceRecord::new(address.clone(), *amount))
            .collect();
        rows.sort_by(|a, b| b.amount.cmp(&a.amount).then_with(|| a.address.cmp(&b.address)));
        rows
    }

    pub fn utxos_for(&self, address: &str) -> Vec<UtxoEntry> {
        self.utxos
            .values()
            .filter(|entry| entry.address == address)
            .cloned()
            .collect()
    }
}
