use std::fmt;
use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};

use crate::hash::TxHash;

/// A resolved address, or a synthetic placeholder for value sent nowhere.
pub type Address = String;

/// Value in the chain's smallest unit.
pub type Amount = u64;

/// Identifies one output of one transaction.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OutPoint {
    pub tx_hash: TxHash,
    pub output_index: u32,
}

impl OutPoint {
    pub fn new(tx_hash: TxHash, output_index: u32) -> Self {
        Self {
            tx_hash,
            output_index,
        }
    }

    /// Every key an output can occupy, in index order.
    pub fn key_range(&self) -> RangeInclusive<UtxoKey> {
        UtxoKey::new(*self, 0)..=UtxoKey::new(*self, u32::MAX)
    }
}

impl fmt::Debug for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OutPoint({}:{})", self.tx_hash.short_hex(), self.output_index)
    }
}

impl fmt::Display for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.tx_hash, self.output_index)
    }
}

/// Unique key of the unspent-output index.
///
/// `slot` is the position of the credited address within the output's
/// address list. It is always 0 except for multi-address outputs, whose
/// entries occupy slots `0..n`. Ordering groups all slots of an outpoint
/// together so an output can be removed with a single range delete.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UtxoKey {
    pub outpoint: OutPoint,
    pub slot: u32,
}

impl UtxoKey {
    pub fn new(outpoint: OutPoint, slot: u32) -> Self {
        Self { outpoint, slot }
    }
}

impl fmt::Display for UtxoKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.slot == 0 {
            write!(f, "{}", self.outpoint)
        } else {
            write!(f, "{}#{}", self.outpoint, self.slot)
        }
    }
}

/// One row of the unspent-output index. Created once, deleted once, never
/// updated in place.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UtxoEntry {
    pub tx_hash: TxHash,
    pub output_index: u32,
    pub slot: u32,
    pub address: Address,
    pub amount: Amount,
    pub multi_address: bool,
}

impl UtxoEntry {
    /// Entry for a single-address or placeholder-credited output.
    pub fn single(outpoint: OutPoint, address: impl Into<Address>, amount: Amount) -> Self {
        Self {
            tx_hash: outpoint.tx_hash,
            output_index: outpoint.output_index,
            slot: 0,
            address: address.into(),
            amount,
            multi_address: false,
        }
    }

    /// Entry for one address of a multi-address output.
    pub fn multi(outpoint: OutPoint, slot: u32, address: impl Into<Address>, amount: Amount) -> Self {
        Self {
            tx_hash: outpoint.tx_hash,
            output_index: outpoint.output_index,
            slot,
            address: address.into(),
            amount,
            multi_address: true,
        }
    }

    pub fn outpoint(&self) -> OutPoint {
        OutPoint::new(self.tx_hash, self.output_index)
    }

    pub fn key(&self) -> UtxoKey {
        UtxoKey::new(self.outpoint(), self.slot)
    }
}

/// Cumulative value ever credited to an address.
///
/// Spending an output never reduces the balance it contributed to, so this
/// is "total received", not "currently spendable".
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceRecord {
    pub address: Address,
    pub amount: Amount,
}

impl BalanceRecord {
    pub fn new(address: impl Into<Address>, amount: Amount) -> Self {
        Self {
            address: address.into(),
            amount,
        }
    }

    /// Add `value`, saturating at `u64::MAX`.
    pub fn credit(&mut self, value: Amount) {
        self.amount = self.amount.saturating_add(value);
    }
}
