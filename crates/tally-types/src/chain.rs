//! Decoded chain data as supplied by a feed.
//!
//! These types carry only what replay needs: block time, transaction
//! identity, the outpoints each input spends, and each output's value and
//! resolved addresses. Scripts, witnesses, and fees are not represented.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::hash::TxHash;
use crate::record::{Address, Amount, OutPoint};

/// A decoded block: a timestamp and its transactions in block order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub transactions: Vec<Transaction>,
}

impl Block {
    pub fn new(timestamp: DateTime<Utc>, transactions: Vec<Transaction>) -> Self {
        Self {
            timestamp,
            transactions,
        }
    }
}

/// A decoded transaction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub hash: TxHash,
    #[serde(default)]
    pub inputs: Vec<TxInput>,
    #[serde(default)]
    pub outputs: Vec<TxOutput>,
}

/// Reference from an input to the output it spends.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TxInput {
    pub tx_hash: TxHash,
    pub output_index: u32,
}

impl TxInput {
    /// Coinbase inputs reference the null hash at index `u32::MAX`.
    pub fn is_coinbase(&self) -> bool {
        self.tx_hash.is_null() && self.output_index == u32::MAX
    }

    pub fn outpoint(&self) -> OutPoint {
        OutPoint::new(self.tx_hash, self.output_index)
    }
}

/// A decoded output: value plus zero or more resolved addresses.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    pub amount: Amount,
    #[serde(default)]
    pub addresses: Vec<Address>,
}

impl TxOutput {
    pub fn new(amount: Amount, addresses: Vec<Address>) -> Self {
        Self { amount, addresses }
    }
}
