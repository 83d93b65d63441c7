//! CLI entry point for the sector rebalancer.

use std::path::PathBuf;
use std::process;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};

use sectorbook::Market;
use sectorbook_rebalancer::config::Config;
use sectorbook_rebalancer::error::{Error, Result};
use sectorbook_rebalancer::execution::{self, RunOptions};
use sectorbook_rebalancer::signals::{JsonPrices, JsonScores};

#[derive(Parser)]
#[command(name = "rebalancer")]
#[command(about = "Daily sector ETF rebalancer for US, HK and CN markets")]
#[command(version)]
struct Cli {
    /// Path to config.toml
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Build targets, plan trades, confirm, and save the new book
    Run {
        /// Path to the day's sector scores (JSON)
        scores: PathBuf,

        /// Path to the day's prices (JSON)
        prices: PathBuf,

        /// Trading date (YYYY-MM-DD); defaults to today
        #[arg(long)]
        date: Option<NaiveDate>,

        /// Show the plan without saving anything
        #[arg(long)]
        dry_run: bool,

        /// Skip confirmation prompt (for automation/cron)
        #[arg(long)]
        force: bool,
    },

    /// Create the initial position snapshot from configured cash
    Init {
        /// Replace an existing snapshot
        #[arg(long)]
        overwrite: bool,
    },

    /// Show the saved positions
    Positions,

    /// Show recorded ledger entries
    Ledger {
        /// Only this market (US, HK, CN)
        #[arg(long)]
        market: Option<String>,

        /// Only this date (YYYY-MM-DD)
        #[arg(long)]
        date: Option<NaiveDate>,
    },

    /// Compare current holdings vs the target today's scores produce
    Reconcile {
        /// Path to the day's sector scores (JSON)
        scores: PathBuf,

        /// Path to the day's prices (JSON)
        prices: PathBuf,
    },
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_secs()
        .init();

    let cli = Cli::parse();

    let config = match Config::load(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading config: {e}");
            process::exit(1);
        }
    };

    if let Err(e) = dispatch(&config, cli.command) {
        match &e {
            Error::MarketsFailed { .. } => {
                eprintln!("\nError: {e}");
                process::exit(2);
            }
            Error::Aborted(msg) => {
                eprintln!("{msg}");
                process::exit(0);
            }
            _ => {
                eprintln!("Error: {e}");
                process::exit(1);
            }
        }
    }
}

fn dispatch(config: &Config, command: Command) -> Result<()> {
    match command {
        Command::Run {
            scores,
            prices,
            date,
            dry_run,
            force,
        } => {
            let scores = JsonScores::load(&scores)?;
            let prices = JsonPrices::load(&prices)?;
            let opts = RunOptions {
                dry_run,
                force,
                date,
            };
            execution::run(config, &scores, &prices, &opts).map(|_| ())
        }
        Command::Init { overwrite } => execution::init(config, overwrite),
        Command::Positions => execution::show_positions(config),
        Command::Ledger { market, date } => {
            let market = market.map(|m| m.parse::<Market>()).transpose()?;
            execution::show_ledger(config, market, date)
        }
        Command::Reconcile { scores, prices } => {
            let scores = JsonScores::load(&scores)?;
            let prices = JsonPrices::load(&prices)?;
            execution::run_reconcile(config, &scores, &prices)
        }
    }
}
