//! Block feed for Tally.
//!
//! A feed is one JSON-lines file, or a directory of them, with one decoded
//! [`Block`](tally_types::Block) per line. Files on disk need not be in
//! chain order; [`load_blocks`] returns blocks stably sorted by timestamp,
//! ready for replay.

pub mod error;
pub mod loader;

pub use error::{FeedError, FeedResult};
pub use loader::{discover_files, load_blocks, order_blocks, read_file};
