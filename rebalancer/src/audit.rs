//! JSONL audit trail.
//!
//! Each `run` appends events to the audit file, one JSON object per line,
//! so an operator can see what was attempted even when nothing was saved.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use sectorbook::{Market, MarketRun, from_cents};

use crate::error::Result;

/// One line of the trail. Every event carries the trading date it belongs
/// to, next to the wall-clock time it was written.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent<'a> {
    pub event: &'a str,
    pub ts: DateTime<Utc>,
    pub date: NaiveDate,
    #[serde(flatten)]
    pub data: serde_json::Value,
}

/// Append-only audit trail for one run.
pub struct AuditLog {
    out: BufWriter<File>,
    date: NaiveDate,
}

impl AuditLog {
    /// Open (or create) the trail for appending; events are stamped `date`.
    pub fn open(path: &Path, date: NaiveDate) -> Result<Self> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            out: BufWriter::new(file),
            date,
        })
    }

    /// Write one event and flush, so a crash loses at most the event in flight.
    pub fn log(&mut self, event: &str, data: serde_json::Value) -> Result<()> {
        let line = AuditEvent {
            event,
            ts: Utc::now(),
            date: self.date,
            data,
        };
        serde_json::to_writer(&mut self.out, &line).map_err(std::io::Error::from)?;
        self.out.write_all(b"\n")?;
        self.out.flush()?;
        Ok(())
    }

    pub fn log_simple(&mut self, event: &str) -> Result<()> {
        self.log(event, serde_json::json!({}))
    }
}

pub fn log_run_started(audit: &mut AuditLog, markets: &[Market], dry_run: bool) -> Result<()> {
    let markets: Vec<&str> = markets.iter().map(|m| m.as_str()).collect();
    audit.log(
        "run_started",
        serde_json::json!({ "markets": markets, "dry_run": dry_run }),
    )
}

/// One market planned successfully: its target and every attempt.
pub fn log_market_done(audit: &mut AuditLog, run: &MarketRun) -> Result<()> {
    let exec = &run.execution;
    let target: serde_json::Map<String, serde_json::Value> = run
        .target
        .iter()
        .map(|(t, w)| (t.to_string(), serde_json::json!(w)))
        .collect();
    let attempts: Vec<_> = exec
        .attempts
        .iter()
        .map(|a| {
            serde_json::json!({
                "ticker": a.trade.ticker,
                "side": a.trade.side.to_string(),
                "qty": a.trade.quantity,
                "price": a.trade.price,
                "notional": from_cents(a.trade.notional_cents),
                "outcome": a.outcome.to_string(),
            })
        })
        .collect();

    audit.log(
        "market_done",
        serde_json::json!({
            "market": exec.market.as_str(),
            "target": target,
            "attempts": attempts,
            "turnover_scale": exec.turnover_scale,
            "budget_scale": exec.budget_scale,
            "cash_before": from_cents(exec.cash_before),
            "cash_after": from_cents(exec.cash_after()),
        }),
    )
}

pub fn log_market_failed(audit: &mut AuditLog, market: Market, error: &str) -> Result<()> {
    audit.log(
        "market_failed",
        serde_json::json!({
            "market": market.as_str(),
            "error": error,
        }),
    )
}

pub fn log_run_completed(
    audit: &mut AuditLog,
    succeeded: usize,
    failed: usize,
    saved: bool,
) -> Result<()> {
    audit.log(
        "run_completed",
        serde_json::json!({
            "succeeded": succeeded,
            "failed": failed,
            "saved": saved,
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audit_log_writes_jsonl() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");

        {
            let date = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
            let mut log = AuditLog::open(&path, date).unwrap();
            log_run_started(&mut log, &[Market::US, Market::HK], true).unwrap();
            log_market_failed(&mut log, Market::HK, "no usable price for 2800.HK in HK").unwrap();
        }

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<serde_json::Value> = contents
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["event"], "run_started");
        assert_eq!(lines[0]["date"], "2026-03-02");
        assert_eq!(lines[0]["markets"], serde_json::json!(["US", "HK"]));
        assert_eq!(lines[1]["event"], "market_failed");
        assert_eq!(lines[1]["market"], "HK");
        assert!(lines[1]["ts"].is_string());
    }

    #[test]
    fn audit_log_appends_across_opens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("audit.jsonl");

        let date = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
        AuditLog::open(&path, date).unwrap().log_simple("first").unwrap();
        AuditLog::open(&path, date).unwrap().log_simple("second").unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 2);
        assert!(contents.contains("\"event\":\"second\""));
    }
}
