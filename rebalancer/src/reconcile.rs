//! Reconciliation: compare a market's holdings against its target.

use std::collections::BTreeSet;

use serde::Serialize;

use sectorbook::{Market, PositionBook, PriceMap, TargetAllocation};

use crate::error::Result;

/// Reconciliation report for one market.
#[derive(Debug, Clone, Serialize)]
pub struct ReconcileReport {
    pub market: Market,
    pub account_value: f64,
    pub entries: Vec<ReconcileEntry>,
    pub target_cash_weight: f64,
    pub actual_cash_weight: f64,
    pub tracking_error_pct: f64,
}

/// One ticker's reconciliation entry.
#[derive(Debug, Clone, Serialize)]
pub struct ReconcileEntry {
    pub ticker: String,
    pub target_weight: f64,
    pub actual_weight: f64,
    pub diff_weight: f64,
    pub target_qty: f64,
    pub actual_qty: f64,
}

/// Compare `book`'s holdings in the target's market against `target`.
///
/// Every ticker that is either targeted or held gets an entry. Tracking
/// error is the root of the summed squared weight differences, in percent.
pub fn reconcile(
    book: &PositionBook,
    target: &TargetAllocation,
    prices: &PriceMap,
) -> Result<ReconcileReport> {
    let market = target.market();
    let account = book.account_value_cents(market, prices)?;
    let actual: Vec<(String, f64)> = book.weights(market, prices)?;

    let tickers: BTreeSet<&str> = target
        .iter()
        .map(|(t, _)| t)
        .chain(actual.iter().map(|(t, _)| t.as_str()))
        .collect();

    let mut entries = Vec::with_capacity(tickers.len());
    let mut sum_sq_diff = 0.0_f64;
    for ticker in tickers {
        let target_weight = target.weight(ticker);
        let actual_weight = actual
            .iter()
            .find(|(t, _)| t == ticker)
            .map_or(0.0, |(_, w)| *w);
        let target_qty = match prices.get(ticker) {
            Some(&px) if px > 0.0 => account * target_weight / (px * 100.0),
            _ => 0.0,
        };
        let diff_weight = actual_weight - target_weight;
        sum_sq_diff += diff_weight * diff_weight;

        entries.push(ReconcileEntry {
            ticker: ticker.to_string(),
            target_weight,
            actual_weight,
            diff_weight,
            target_qty,
            actual_qty: book.position(market, ticker).quantity,
        });
    }

    let actual_cash_weight = if account > 0.0 {
        book.cash(market) as f64 / account
    } else {
        0.0
    };

    Ok(ReconcileReport {
        market,
        account_value: account / 100.0,
        entries,
        target_cash_weight: target.cash_weight(),
        actual_cash_weight,
        tracking_error_pct: sum_sq_diff.sqrt() * 100.0,
    })
}

impl ReconcileReport {
    /// Largest absolute weight difference across tickers.
    pub fn max_abs_diff(&self) -> f64 {
        self.entries
            .iter()
            .map(|e| e.diff_weight.abs())
            .fold(0.0, f64::max)
    }
}

impl std::fmt::Display for ReconcileReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "RECONCILIATION {} (account {:.2}):",
            self.market, self.account_value
        )?;
        writeln!(
            f,
            "  {:10} {:>10} {:>10} {:>10} {:>12} {:>12}",
            "Ticker", "Target%", "Actual%", "Diff%", "TargetQty", "ActualQty"
        )?;
        for e in &self.entries {
            writeln!(
                f,
                "  {:10} {:>9.2}% {:>9.2}% {:>+9.2}% {:>12.4} {:>12.4}",
                e.ticker,
                e.target_weight * 100.0,
                e.actual_weight * 100.0,
                e.diff_weight * 100.0,
                e.target_qty,
                e.actual_qty,
            )?;
        }
        writeln!(
            f,
            "  {:10} {:>9.2}% {:>9.2}%",
            "cash",
            self.target_cash_weight * 100.0,
            self.actual_cash_weight * 100.0,
        )?;
        writeln!(f, "\n  Tracking error: {:.3}%", self.tracking_error_pct)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use sectorbook::Position;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 2).unwrap()
    }

    fn prices(pairs: &[(&str, f64)]) -> PriceMap {
        pairs.iter().map(|(t, p)| (t.to_string(), *p)).collect()
    }

    fn holding(ticker: &str, qty: f64) -> Position {
        let mut p = Position::new(Market::US, ticker);
        p.quantity = qty;
        p
    }

    #[test]
    fn perfect_match() {
        // 60 * 100.00 = 6_000 of a 10_000 account.
        let book = PositionBook::new(day())
            .with_cash(Market::US, 4_000_00)
            .with_position(holding("XLK", 60.0));
        let target = TargetAllocation::from_weights(Market::US, [("XLK", 0.6)]);
        let report = reconcile(&book, &target, &prices(&[("XLK", 100.0)])).unwrap();

        assert_eq!(report.entries.len(), 1);
        assert!(report.tracking_error_pct < 1e-9);
        assert!((report.entries[0].target_qty - 60.0).abs() < 1e-9);
        assert!((report.actual_cash_weight - 0.4).abs() < 1e-12);
        assert!((report.account_value - 10_000.0).abs() < 1e-9);
    }

    #[test]
    fn missing_position() {
        let book = PositionBook::new(day()).with_cash(Market::US, 10_000_00);
        let target = TargetAllocation::from_weights(Market::US, [("XLK", 0.3), ("XLE", 0.4)]);
        let report =
            reconcile(&book, &target, &prices(&[("XLK", 100.0), ("XLE", 50.0)])).unwrap();

        // sqrt(0.3^2 + 0.4^2) = 0.5
        assert!((report.tracking_error_pct - 50.0).abs() < 1e-9);
        assert!(report.entries.iter().all(|e| e.actual_qty == 0.0));
        assert!((report.max_abs_diff() - 0.4).abs() < 1e-12);
    }

    #[test]
    fn extra_position() {
        let book = PositionBook::new(day())
            .with_cash(Market::US, 5_000_00)
            .with_position(holding("XLK", 30.0))
            .with_position(holding("XLE", 40.0));
        let target = TargetAllocation::from_weights(Market::US, [("XLK", 0.3)]);
        let report =
            reconcile(&book, &target, &prices(&[("XLK", 100.0), ("XLE", 50.0)])).unwrap();

        let xle = report.entries.iter().find(|e| e.ticker == "XLE").unwrap();
        assert_eq!(xle.target_weight, 0.0);
        assert!((xle.actual_weight - 0.2).abs() < 1e-12);
        assert_eq!(xle.actual_qty, 40.0);
    }

    #[test]
    fn missing_price_is_an_error() {
        let book = PositionBook::new(day())
            .with_cash(Market::US, 1_000_00)
            .with_position(holding("XLK", 1.0));
        let target = TargetAllocation::cash_only(Market::US);
        assert!(reconcile(&book, &target, &PriceMap::default()).is_err());
    }

    #[test]
    fn display_format() {
        let book = PositionBook::new(day()).with_cash(Market::US, 1_000_00);
        let target = TargetAllocation::from_weights(Market::US, [("XLK", 0.5)]);
        let report = reconcile(&book, &target, &prices(&[("XLK", 10.0)])).unwrap();
        let s = report.to_string();
        assert!(s.contains("RECONCILIATION US"));
        assert!(s.contains("XLK"));
        assert!(s.contains("Tracking error: 50.000%"));
    }
}
