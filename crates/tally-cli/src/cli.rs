use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "tally",
    about = "Tally: replay decoded blocks into an unspent-output set and address balances",
    version,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Replay a block feed into the ledger
    Replay(ReplayArgs),
    /// Show the cumulative balance of an address
    Balance(BalanceArgs),
    /// Look up the unspent entries of an output
    Utxo(UtxoArgs),
    /// List the largest balances
    Top(TopArgs),
    /// Show ledger totals
    Stats(StatsArgs),
}

#[derive(Args, Debug)]
pub struct DbArgs {
    /// Ledger directory
    #[arg(long, default_value = "tally-db")]
    pub db: PathBuf,
}

#[derive(Args)]
pub struct ReplayArgs {
    /// JSON-lines block file, or a directory of them
    pub blocks: PathBuf,
    #[command(flatten)]
    pub db: DbArgs,
    /// TOML engine configuration
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Flush after this many inserted entries (overrides the config file)
    #[arg(long)]
    pub commit_every: Option<u64>,
    /// Skip fsync after each flush
    #[arg(long)]
    pub no_sync: bool,
}

#[derive(Args)]
pub struct BalanceArgs {
    pub address: String,
    #[command(flatten)]
    pub db: DbArgs,
}

#[derive(Args)]
pub struct UtxoArgs {
    /// Transaction hash, 64 hex characters
    pub tx_hash: String,
    pub index: u32,
    #[command(flatten)]
    pub db: DbArgs,
}

#[derive(Args)]
pub struct TopArgs {
    #[arg(short = 'n', long, default_value = "10")]
    pub limit: usize,
    #[command(flatten)]
    pub db: DbArgs,
}

#[derive(Args)]
pub struct StatsArgs {
    #[command(flatten)]
    pub db: DbArgs,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_replay() {
        let cli = Cli::try_parse_from(["tally", "replay", "blocks/"]).unwrap();
        if let Command::Replay(args) = cli.command {
            assert_eq!(args.blocks, PathBuf::from("blocks/"));
            assert_eq!(args.db.db, PathBuf::from("tally-db"));
            assert_eq!(args.commit_every, None);
            assert!(!args.no_sync);
        } else { panic!("wrong command"); }
    }

    #[test]
    fn parse_replay_with_overrides() {
        let cli = Cli::try_parse_from([
            "tally", "replay", "feed.jsonl", "--db", "/tmp/ledger",
            "--config", "tally.toml", "--commit-every", "500", "--no-sync",
        ]).unwrap();
        if let Command::Replay(args) = cli.command {
            assert_eq!(args.db.db, PathBuf::from("/tmp/ledger"));
            assert_eq!(args.config, Some(PathBuf::from("tally.toml")));
            assert_eq!(args.commit_every, Some(500));
            assert!(args.no_sync);
        } else { panic!("wrong command"); }
    }

    #[test]
    fn replay_requires_blocks() {
        assert!(Cli::try_parse_from(["tally", "replay"]).is_err());
    }

    #[test]
    fn parse_balance() {
        let cli = Cli::try_parse_from(["tally", "balance", "1A1z", "--db", "d"]).unwrap();
        if let Command::Balance(args) = cli.command {
            assert_eq!(args.address, "1A1z");
            assert_eq!(args.db.db, PathBuf::from("d"));
        } else { panic!("wrong command"); }
    }

    #[test]
    fn parse_utxo() {
        let cli = Cli::try_parse_from(["tally", "utxo", "ab12", "3"]).unwrap();
        if let Command::Utxo(args) = cli.command {
            assert_eq!(args.tx_hash, "ab12");
            assert_eq!(args.index, 3);
        } else { panic!("wrong command"); }
    }

    #[test]
    fn utxo_index_must_be_unsigned() {
        assert!(Cli::try_parse_from(["tally", "utxo", "ab12", "-1"]).is_err());
    }

    #[test]
    fn parse_top_limit() {
        let cli = Cli::try_parse_from(["tally", "top", "-n", "5"]).unwrap();
        if let Command::Top(args) = cli.command {
            assert_eq!(args.limit, 5);
        } else { panic!("wrong command"); }
    }

    #[test]
    fn parse_stats() {
        let cli = Cli::try_parse_from(["tally", "stats"]).unwrap();
        assert!(matches!(cli.command, Command::Stats(_)));
    }

    #[test]
    fn parse_verbose() {
        let cli = Cli::try_parse_from(["tally", "--verbose", "stats"]).unwrap();
        assert!(cli.verbose);
    }

    #[test]
    fn parse_json_format() {
        let cli = Cli::try_parse_from(["tally", "top", "--format", "json"]).unwrap();
        assert_eq!(cli.format, OutputFormat::Json);
    }
}
