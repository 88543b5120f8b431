use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{LedgerError, LedgerResult};
use crate::placeholder::{PlaceholderAllocator, DEFAULT_PREFIX, DEFAULT_WIDTH};

/// Configuration for the replay engine.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Flush once more than this many entries were inserted since the last
    /// flush.
    pub commit_threshold: u64,
    /// Log a progress line every this many transactions. 0 disables it.
    pub progress_interval: u64,
    /// Prefix of synthetic addresses for value sent to no address.
    pub placeholder_prefix: String,
    /// Zero-padded digits after the placeholder prefix.
    pub placeholder_width: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            commit_threshold: 10_000,
            progress_interval: 1_000,
            placeholder_prefix: DEFAULT_PREFIX.into(),
            placeholder_width: DEFAULT_WIDTH,
        }
    }
}

impl EngineConfig {
    /// Parse a TOML document. Missing keys take their default values.
    pub fn from_toml_str(source: &str) -> LedgerResult<Self> {
        let config: Self =
            toml::from_str(source).map_err(|e| LedgerError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML file.
    pub fn load(path: &Path) -> LedgerResult<Self> {
        let source = std::fs::read_to_string(path)
            .map_err(|e| LedgerError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&source)
    }

    pub fn validate(&self) -> LedgerResult<()> {
        if self.placeholder_prefix.is_empty() {
            return Err(LedgerError::Config(
                "placeholder_prefix must not be empty".into(),
            ));
        }
        if self.placeholder_width > 20 {
            return Err(LedgerError::Config(format!(
                "placeholder_width {} exceeds the 20 digits of a u64",
                self.placeholder_width
            )));
        }
        Ok(())
    }

    pub fn placeholder_allocator(&self) -> PlaceholderAllocator {
        PlaceholderAllocator::new(self.placeholder_prefix.clone(), self.placeholder_width)
    }
}
