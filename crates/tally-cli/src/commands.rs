use std::path::Path;

use anyhow::{bail, Context};
use colored::Colorize;
use serde_json::json;
use tally_ledger::{CancellationToken, EngineConfig, ReplayEngine, ReplayOutcome, ReplayStats};
use tally_store::{FileLedgerStore, FileStoreConfig, LedgerStore, SyncMode};
use tally_types::{OutPoint, TxHash, UtxoEntry, UtxoKey};
use tracing::warn;

use crate::cli::*;

pub async fn run_command(cli: Cli) -> anyhow::Result<()> {
    let format = cli.format;
    match cli.command {
        Command::Replay(args) => cmd_replay(args, format).await,
        Command::Balance(args) => cmd_balance(args, format),
        Command::Utxo(args) => cmd_utxo(args, format),
        Command::Top(args) => cmd_top(args, format),
        Command::Stats(args) => cmd_stats(args, format),
    }
}

async fn cmd_replay(args: ReplayArgs, format: OutputFormat) -> anyhow::Result<()> {
    let mut config = match &args.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => EngineConfig::default(),
    };
    if let Some(threshold) = args.commit_every {
        config.commit_threshold = threshold;
    }

    let blocks = tally_feed::load_blocks(&args.blocks)
        .with_context(|| format!("loading blocks from {}", args.blocks.display()))?;
    let store_config = FileStoreConfig {
        sync_mode: if args.no_sync { SyncMode::OsDefault } else { SyncMode::EveryBatch },
        ..FileStoreConfig::default()
    };
    let store = FileLedgerStore::open(&args.db.db, store_config)
        .with_context(|| format!("opening ledger {}", args.db.db.display()))?;

    let cancel = CancellationToken::new();
    let worker_cancel = cancel.clone();
    let mut worker = tokio::task::spawn_blocking(move || -> anyhow::Result<ReplayOutcome> {
        let mut engine = ReplayEngine::new(store, config)?;
        engine.set_blocks_total(blocks.len() as u64);
        let outcome = engine.run(blocks, &worker_cancel)?;
        engine.finish().context("closing ledger")?;
        Ok(outcome)
    });

    let outcome = tokio::select! {
        joined = &mut worker => joined??,
        signal = tokio::signal::ctrl_c() => {
            match signal {
                Ok(()) => {
                    warn!("interrupt received; stopping after the current transaction");
                    cancel.cancel();
                }
                Err(e) => warn!(error = %e, "cannot listen for interrupts"),
            }
            worker.await??
        }
    };

    print_outcome(&outcome, format)
}

fn print_outcome(outcome: &ReplayOutcome, format: OutputFormat) -> anyhow::Result<()> {
    let stats = outcome.stats();
    let status = if outcome.is_cancelled() { "cancelled" } else { "completed" };
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&json!({ "status": status, "stats": stats }))?);
        }
        OutputFormat::Text => {
            if outcome.is_cancelled() {
                println!("{} Replay cancelled; progress flushed.", "!".yellow().bold());
            } else {
                println!("{} Replay complete.", "✓".green().bold());
            }
            print_stats(stats);
        }
    }
    Ok(())
}

fn print_stats(stats: &ReplayStats) {
    println!("  Blocks: {}", stats.blocks_processed.to_string().bold());
    println!("  Transactions: {}", stats.transactions_processed.to_string().bold());
    println!(
        "  Inputs: {} consumed, {} unmatched",
        stats.inputs_consumed,
        stats.inputs_missed.to_string().dimmed()
    );
    if stats.coinbase_inputs > 0 {
        println!("  Coinbase inputs: {}", stats.coinbase_inputs);
    }
    println!(
        "  Outputs: {} processed, {} entries inserted",
        stats.outputs_processed, stats.outputs_inserted
    );
    if stats.duplicates_skipped > 0 {
        println!("  Duplicates skipped: {}", stats.duplicates_skipped.to_string().yellow());
    }
    if stats.placeholders_allocated > 0 {
        println!("  Placeholder addresses: {}", stats.placeholders_allocated.to_string().cyan());
    }
    if stats.multi_address_outputs > 0 {
        println!("  Multi-address outputs: {}", stats.multi_address_outputs.to_string().cyan());
    }
    println!("  Unspent entries: {}", stats.utxo_count.to_string().bold());
    println!("  Flushes: {}", stats.flushes);
}

fn cmd_balance(args: BalanceArgs, format: OutputFormat) -> anyhow::Result<()> {
    let store = open_existing(&args.db.db)?;
    let balance = store.get_balance(&args.address)?;
    let unspent = store.utxos_for(&args.address)?;

    match format {
        OutputFormat::Json => {
            let value = json!({ "address": args.address, "balance": balance, "unspent": unspent });
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        OutputFormat::Text => match balance {
            Some(amount) => {
                println!("{}  {}", args.address.bold(), amount.to_string().green());
                for entry in &unspent {
                    print_entry(entry);
                }
            }
            None => println!("{} {}", args.address.bold(), "has never received value".dimmed()),
        },
    }
    Ok(())
}

fn cmd_utxo(args: UtxoArgs, format: OutputFormat) -> anyhow::Result<()> {
    let tx_hash: TxHash = args
        .tx_hash
        .parse()
        .with_context(|| format!("invalid transaction hash {:?}", args.tx_hash))?;
    let outpoint = OutPoint::new(tx_hash, args.index);
    let store = open_existing(&args.db.db)?;

    // Multi-address outputs occupy consecutive slots starting at 0.
    let entries = (0u32..)
        .map_while(|slot| store.get_utxo(&UtxoKey::new(outpoint, slot)).transpose())
        .collect::<Result<Vec<_>, _>>()?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&entries)?),
        OutputFormat::Text if entries.is_empty() => {
            println!("{} {}", outpoint.to_string().yellow(), "is spent or unknown".dimmed());
        }
        OutputFormat::Text => {
            for entry in &entries {
                print_entry(entry);
            }
        }
    }
    Ok(())
}

fn cmd_top(args: TopArgs, format: OutputFormat) -> anyhow::Result<()> {
    let store = open_existing(&args.db.db)?;
    let top: Vec<_> = store.balances()?.into_iter().take(args.limit).collect();

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&top)?),
        OutputFormat::Text => {
            for (rank, record) in top.iter().enumerate() {
                println!(
                    "{:>4}. {}  {}",
                    rank + 1,
                    record.address.bold(),
                    record.amount.to_string().green()
                );
            }
        }
    }
    Ok(())
}

fn cmd_stats(args: StatsArgs, format: OutputFormat) -> anyhow::Result<()> {
    let store = open_existing(&args.db.db)?;
    let utxos = store.count_utxos()?;
    let addresses = store.count_balances()?;
    let received: u128 = store.balances()?.iter().map(|r| u128::from(r.amount)).sum();

    match format {
        OutputFormat::Json => {
            let value = json!({ "utxos": utxos, "addresses": addresses, "total_received": received });
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        OutputFormat::Text => {
            println!("Ledger {}", args.db.db.display().to_string().bold());
            println!("  Unspent entries: {}", utxos.to_string().bold());
            println!("  Addresses: {}", addresses.to_string().bold());
            println!("  Total received: {}", received.to_string().green());
        }
    }
    Ok(())
}

fn print_entry(entry: &UtxoEntry) {
    let marker = if entry.multi_address { " (multi)".cyan().to_string() } else { String::new() };
    println!(
        "  {}  {}  {}{}",
        entry.key().to_string().yellow(),
        entry.address,
        entry.amount.to_string().green(),
        marker
    );
}

fn open_existing(dir: &Path) -> anyhow::Result<FileLedgerStore> {
    if !dir.is_dir() {
        bail!("no ledger at {}; run `tally replay` first", dir.display());
    }
    FileLedgerStore::open(dir, FileStoreConfig::default())
        .with_context(|| format!("opening ledger {}", dir.display()))
}
