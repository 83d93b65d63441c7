//! Run orchestrator: scores → targets → trades → confirm → persist.
//!
//! This is the main workflow that ties together all components. Every
//! market is planned against its own copy of its slice of the book (on the
//! rayon pool with the `parallel` feature). A market that fails is logged
//! and left as it was; the others are recorded and merged back.

use std::path::Path;

use chrono::{Local, NaiveDate};
use log::{error, info, warn};

use sectorbook::{
    DailyLedger, Execution, Market, MarketInputs, MarketRun, PositionBook, Reference,
    TargetAllocation, append_entries, format_cents,
};

use crate::audit::{self, AuditLog};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::reconcile;
use crate::reference::ReferenceData;
use crate::signals::{PriceSource, SignalProvider};

/// Options for a rebalance run.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub dry_run: bool,
    pub force: bool,
    /// Trading date; today (local time) when absent.
    pub date: Option<NaiveDate>,
}

/// What a run did, per market.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub date: Option<NaiveDate>,
    pub succeeded: Vec<Market>,
    pub failed: Vec<(Market, String)>,
    /// Whether the snapshot and ledger were written.
    pub saved: bool,
}

/// Execute a full rebalance run over every enabled market.
///
/// Returns `MarketsFailed` (after persisting the markets that succeeded)
/// when at least one market failed.
pub fn run(
    config: &Config,
    signals: &dyn SignalProvider,
    prices: &dyn PriceSource,
    opts: &RunOptions,
) -> Result<RunSummary> {
    let reference = ReferenceData::load(&config.data.weights, &config.data.etf_map)?;
    let mut book = load_book(&config.data.positions)?;
    let ledger_path = config.ledger_path();
    let mut ledger = DailyLedger::load_jsonl(&ledger_path)?;

    let date = opts.date.unwrap_or_else(|| Local::now().date_naive());
    if date < book.date() {
        return Err(Error::Input(format!(
            "run date {date} is before the snapshot date {}",
            book.date()
        )));
    }
    book.set_date(date);

    let markets = config.enabled_markets();
    let mut audit = AuditLog::open(&config.audit_path(), date)?;
    audit::log_run_started(&mut audit, &markets, opts.dry_run)?;

    let builder = config.allocation_builder();
    let reference = Reference {
        builder: &builder,
        weights: &reference.weights,
        etf_map: &reference.etf_map,
    };

    let mark = ledger.len();
    let mut summary = RunSummary {
        date: Some(date),
        ..RunSummary::default()
    };

    println!("Rebalance for {date}");
    let mut inputs = Vec::with_capacity(markets.len());
    for &market in &markets {
        info!("{market}: starting");
        match market_inputs(config, signals, prices, &ledger, date, market) {
            Ok(i) => inputs.push(i),
            Err(e) => report_failure(&mut audit, &mut summary, market, &e)?,
        }
    }

    let planned = plan(reference, &book, &inputs);
    for (market_inputs, (market, result)) in inputs.iter().zip(planned) {
        let run = match result {
            Ok(run) => run,
            Err(e) => {
                report_failure(&mut audit, &mut summary, market, &Error::from(e))?;
                continue;
            }
        };
        let recorded =
            ledger.record(market, &run.target, &run.execution.attempts, &run.execution.book);
        if let Err(e) = recorded {
            report_failure(&mut audit, &mut summary, market, &Error::from(e))?;
            continue;
        }
        display_run(&run);
        match reconcile::reconcile(&run.execution.book, &run.target, &market_inputs.prices) {
            Ok(report) => print!("\n{report}"),
            Err(e) => warn!("{market}: reconciliation unavailable: {e}"),
        }
        audit::log_market_done(&mut audit, &run)?;
        info!(
            "{market}: {} trades, {} skipped, cash {} -> {}",
            run.execution.trades().count(),
            run.execution.skipped().count(),
            format_cents(run.execution.cash_before),
            format_cents(run.execution.cash_after()),
        );
        book.merge(run.execution.book);
        summary.succeeded.push(market);
    }

    let total = markets.len();
    let failed = summary.failed.len();
    println!("\n{} of {total} markets planned, {failed} failed.", summary.succeeded.len());

    if summary.succeeded.is_empty() {
        audit::log_run_completed(&mut audit, 0, failed, false)?;
        return finish(summary, total);
    }

    if opts.dry_run {
        println!("\n[DRY RUN] Nothing saved.");
        audit::log_run_completed(&mut audit, summary.succeeded.len(), failed, false)?;
        return finish(summary, total);
    }

    if !opts.force {
        let confirmed = dialoguer::Confirm::new()
            .with_prompt("Save positions and ledger?")
            .default(false)
            .interact()
            .map_err(|e| Error::Aborted(format!("confirmation prompt failed: {e}")))?;

        audit.log("user_confirmed", serde_json::json!({ "approved": confirmed }))?;
        if !confirmed {
            println!("Aborted.");
            audit::log_run_completed(&mut audit, summary.succeeded.len(), failed, false)?;
            return Ok(summary);
        }
    }

    // Snapshot before ledger: a retry after a failed append starts from the
    // rebalanced book.
    book.save_json(&config.data.positions)?;
    append_entries(ledger.since(mark), &ledger_path)?;
    summary.saved = true;

    audit::log_run_completed(&mut audit, summary.succeeded.len(), failed, true)?;
    println!(
        "Saved {} and {}. Audit logged to {}",
        config.data.positions.display(),
        ledger_path.display(),
        config.audit_path().display()
    );

    finish(summary, total)
}

/// Gather one market's inputs. A `(market, date)` already in the ledger
/// fails here, before anything is planned.
fn market_inputs(
    config: &Config,
    signals: &dyn SignalProvider,
    prices: &dyn PriceSource,
    ledger: &DailyLedger,
    date: NaiveDate,
    market: Market,
) -> Result<MarketInputs> {
    if ledger.contains(market, date) {
        return Err(sectorbook::Error::DuplicateLedgerEntry { market, date }.into());
    }
    Ok(MarketInputs {
        market,
        scores: signals.scores(market)?,
        prices: prices.prices(market)?,
        limits: config.limits_for(market),
    })
}

/// Plan every market against its own partition of `book`.
#[cfg(feature = "parallel")]
fn plan(
    reference: Reference<'_>,
    book: &PositionBook,
    inputs: &[MarketInputs],
) -> Vec<(Market, sectorbook::Result<MarketRun>)> {
    sectorbook::par_rebalance_markets(reference, book, inputs)
}

/// Plan every market against its own partition of `book`.
#[cfg(not(feature = "parallel"))]
fn plan(
    reference: Reference<'_>,
    book: &PositionBook,
    inputs: &[MarketInputs],
) -> Vec<(Market, sectorbook::Result<MarketRun>)> {
    sectorbook::rebalance_markets(reference, book, inputs)
}

fn report_failure(
    audit: &mut AuditLog,
    summary: &mut RunSummary,
    market: Market,
    e: &Error,
) -> Result<()> {
    error!("{market}: {e}");
    println!("\n{market}: FAILED: {e}");
    audit::log_market_failed(audit, market, &e.to_string())?;
    summary.failed.push((market, e.to_string()));
    Ok(())
}

fn finish(summary: RunSummary, total: usize) -> Result<RunSummary> {
    if summary.failed.is_empty() {
        Ok(summary)
    } else {
        Err(Error::MarketsFailed {
            failed: summary.failed.len(),
            total,
        })
    }
}

/// Create the initial snapshot: each enabled market's starting cash and no
/// positions.
pub fn init(config: &Config, overwrite: bool) -> Result<()> {
    let path = &config.data.positions;
    if path.exists() && !overwrite {
        return Err(Error::Input(format!(
            "{} already exists (pass --overwrite to replace it)",
            path.display()
        )));
    }

    let mut book = PositionBook::new(Local::now().date_naive());
    for market in config.enabled_markets() {
        book = book.with_cash(market, config.initial_cash(market));
    }
    book.save_json(path)?;

    println!("Initialized {}", path.display());
    display_book(&book);
    Ok(())
}

/// Show the saved snapshot.
pub fn show_positions(config: &Config) -> Result<()> {
    let book = load_book(&config.data.positions)?;
    println!("Snapshot as of {}", book.date());
    display_book(&book);
    Ok(())
}

/// Show recorded ledger entries, optionally filtered.
pub fn show_ledger(
    config: &Config,
    market: Option<Market>,
    date: Option<NaiveDate>,
) -> Result<()> {
    let ledger = DailyLedger::load_jsonl(&config.ledger_path())?;
    let mut shown = 0;
    for entry in ledger.entries() {
        if market.is_some_and(|m| m != entry.market) || date.is_some_and(|d| d != entry.date) {
            continue;
        }
        shown += 1;
        println!(
            "\n{} {}: cash {}, bought {}, sold {}",
            entry.date,
            entry.market,
            format_cents(entry.cash_cents),
            format_cents(entry.buy_notional_cents()),
            format_cents(entry.sell_notional_cents()),
        );
        for trade in &entry.trades {
            println!("  {trade}");
        }
        for attempt in &entry.skipped {
            println!("  {}  {}", attempt.trade, attempt.outcome);
        }
    }
    if shown == 0 {
        println!("No ledger entries.");
    }
    Ok(())
}

/// Compare current holdings to the target today's scores would produce.
pub fn run_reconcile(
    config: &Config,
    signals: &dyn SignalProvider,
    prices: &dyn PriceSource,
) -> Result<()> {
    let reference = ReferenceData::load(&config.data.weights, &config.data.etf_map)?;
    let book = load_book(&config.data.positions)?;
    let builder = config.allocation_builder();

    let markets = config.enabled_markets();
    let mut failed = 0;
    for &market in &markets {
        let report = signals.scores(market).and_then(|scores| {
            let target = builder.build(market, &scores, &reference.weights, &reference.etf_map)?;
            reconcile::reconcile(&book, &target, &prices.prices(market)?)
        });
        match report {
            Ok(report) => print!("\n{report}"),
            Err(e) => {
                error!("{market}: {e}");
                failed += 1;
            }
        }
    }

    if failed > 0 {
        return Err(Error::MarketsFailed {
            failed,
            total: markets.len(),
        });
    }
    Ok(())
}

// === Helpers ===

fn load_book(path: &Path) -> Result<PositionBook> {
    if !path.exists() {
        return Err(Error::Input(format!(
            "no position snapshot at {} (run `rebalancer init` first)",
            path.display()
        )));
    }
    Ok(PositionBook::load_json(path)?)
}

fn display_book(book: &PositionBook) {
    let markets = book.markets();
    if markets.is_empty() {
        println!("No markets.");
        return;
    }
    for market in markets {
        println!("\n{market}: cash {}", format_cents(book.cash(market)));
        let mut any = false;
        for p in book.positions(market) {
            any = true;
            match p.avg_cost {
                Some(cost) => {
                    println!("  {:10} {:>14.4} @ {:>10.4} avg", p.ticker, p.quantity, cost)
                }
                None => println!("  {:10} {:>14.4}", p.ticker, p.quantity),
            }
        }
        if !any {
            println!("  No positions.");
        }
    }
}

fn display_target(target: &TargetAllocation) {
    println!("\n{} TARGET:", target.market());
    for (ticker, weight) in target.iter() {
        println!("  {:10} {:>7.2}%", ticker, weight * 100.0);
    }
    println!("  {:10} {:>7.2}%", "cash", target.cash_weight() * 100.0);
    for ex in target.excluded() {
        println!("  excluded {}: {:?}", ex.sector, ex.reason);
    }
    if target.scale() < 1.0 {
        println!("  (weights scaled by {:.4})", target.scale());
    }
}

fn display_trades(execution: &Execution) {
    if execution.is_empty() {
        println!("\nNo rebalancing needed.");
        return;
    }
    if execution.turnover_scale < 1.0 || execution.budget_scale < 1.0 {
        println!(
            "\nScaled: turnover x{:.4}, budget x{:.4}",
            execution.turnover_scale, execution.budget_scale
        );
    }
    println!("\nTRADES:");
    for (i, attempt) in execution.attempts.iter().enumerate() {
        if attempt.outcome.is_executed() {
            println!("  {:>3}  {}", i + 1, attempt.trade);
        } else {
            println!("  {:>3}  {}  {}", i + 1, attempt.trade, attempt.outcome);
        }
    }
    println!(
        "\n  Bought {}, sold {}, cash {} -> {}",
        format_cents(execution.buy_notional_cents()),
        format_cents(execution.sell_notional_cents()),
        format_cents(execution.cash_before),
        format_cents(execution.cash_after()),
    );
}

fn display_run(run: &MarketRun) {
    display_target(&run.target);
    display_trades(&run.execution);
}
