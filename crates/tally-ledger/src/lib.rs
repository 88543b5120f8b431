//! Replay engine for Tally.
//!
//! This crate is the heart of Tally. It provides:
//! - [`ReplayEngine`], which applies decoded transactions in feed order to a
//!   [`LedgerStore`](tally_store::LedgerStore)
//! - [`PlaceholderAllocator`] for value-bearing outputs with no address
//! - Commit batching driven by [`EngineConfig::commit_threshold`]
//! - [`CancellationToken`], checked between transactions
//! - [`ReplayStats`] progress counters

pub mod cancel;
pub mod config;
pub mod engine;
pub mod error;
pub mod placeholder;
pub mod stats;

pub use cancel::CancellationToken;
pub use config::EngineConfig;
pub use engine::{CreditReport, CreditResult, ReplayEngine, ReplayOutcome};
pub use error::{LedgerError, LedgerResult};
pub use placeholder::PlaceholderAllocator;
pub use stats::ReplayStats;
