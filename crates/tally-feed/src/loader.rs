use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use tally_types::Block;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::error::{FeedError, FeedResult};

/// Extension of feed files picked up from a directory.
pub const FEED_EXTENSION: &str = "jsonl";

/// Feed files under `path`: the path itself when it is a file, otherwise
/// every `*.jsonl` file below it in lexicographic path order.
pub fn discover_files(path: &Path) -> FeedResult<Vec<PathBuf>> {
    if !path.exists() {
        return Err(FeedError::NotFound(path.to_path_buf()));
    }
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(path).sort_by_file_name() {
        let entry = entry?;
        let is_feed = entry.file_type().is_file()
            && entry.path().extension().is_some_and(|ext| ext == FEED_EXTENSION);
        if is_feed {
            files.push(entry.into_path());
        }
    }
    files.sort();
    Ok(files)
}

/// Decode every block in one JSON-lines file, in file order. Blank lines are
/// skipped.
pub fn read_file(path: &Path) -> FeedResult<Vec<Block>> {
    let reader = BufReader::new(File::open(path)?);
    let mut blocks = Vec::new();

    for (number, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let block: Block = serde_json::from_str(&line).map_err(|e| FeedError::Parse {
            path: path.to_path_buf(),
            line: number + 1,
            message: e.to_string(),
        })?;
        blocks.push(block);
    }

    debug!(path = %path.display(), blocks = blocks.len(), "feed file read");
    Ok(blocks)
}

/// Stable sort by block time. Blocks sharing a timestamp keep the order in
/// which they were read.
pub fn order_blocks(blocks: &mut [Block]) {
    blocks.sort_by_key(|block| block.timestamp);
}

/// Load and order a whole feed.
pub fn load_blocks(path: &Path) -> FeedResult<Vec<Block>> {
    let files = discover_files(path)?;
    let mut blocks = Vec::new();
    for file in &files {
        blocks.extend(read_file(file)?);
    }
    order_blocks(&mut blocks);

    let transactions: usize = blocks.iter().map(|b| b.transactions.len()).sum();
    info!(
        path = %path.display(),
        files = files.len(),
        blocks = blocks.len(),
        transactions,
        "feed loaded"
    );
    Ok(blocks)
}
