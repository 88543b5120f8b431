//! Foundation types for Tally.
//!
//! Tally replays decoded blockchain transactions into two derived indexes:
//! an unspent-output set and a per-address cumulative balance table. Every
//! other Tally crate depends on `tally-types`.
//!
//! # Key Types
//!
//! - [`TxHash`] -- 32-byte transaction identifier, hex on the wire
//! - [`Block`], [`Transaction`], [`TxInput`], [`TxOutput`] -- decoded feed data
//! - [`OutPoint`] / [`UtxoKey`] -- keys of the unspent-output index
//! - [`UtxoEntry`] -- one row of the unspent-output index
//! - [`BalanceRecord`] -- one row of the balance index

pub mod chain;
pub mod error;
pub mod hash;
pub mod record;

pub use chain::{Block, Transaction, TxInput, TxOutput};
pub use error::TypeError;
pub use hash::TxHash;
pub use record::{Address, Amount, BalanceRecord, OutPoint, UtxoEntry, UtxoKey};
