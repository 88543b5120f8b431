use serde::{Deserialize, Serialize};

/// Running counters for a replay. Informational only: nothing in the engine
/// branches on them.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayStats {
    pub blocks_processed: u64,
    /// Blocks in the feed, when the caller knows it up front.
    pub blocks_total: Option<u64>,
    pub transactions_processed: u64,
    pub inputs_consumed: u64,
    /// Inputs whose outpoint was not in the index (skipped duplicates, or
    /// outputs credited to nobody).
    pub inputs_missed: u64,
    /// Coinbase inputs; these spend nothing and are not looked up.
    pub coinbase_inputs: u64,
    pub outputs_processed: u64,
    pub outputs_inserted: u64,
    /// Address credits skipped because their outpoint was already stored.
    pub duplicates_skipped: u64,
    pub placeholders_allocated: u64,
    pub multi_address_outputs: u64,
    /// Sum of all balance credits, counting a multi-address output once per
    /// address.
    pub value_credited: u128,
    pub flushes: u64,
    /// Index size at the last progress point or at the end of the run.
    pub utxo_count: u64,
}

impl ReplayStats {
    /// Percentage of blocks done, if the total is known.
    pub fn percent_done(&self) -> Option<u64> {
        match self.blocks_total {
            Some(0) => Some(100),
            Some(total) => Some(self.blocks_processed * 100 / total),
            None => None,
        }
    }
}
