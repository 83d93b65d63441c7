//! Append-only record of each market-day's rebalance.
//!
//! One entry per `(market, date)`: the target that was executed, the trades
//! that went through, the ones that were skipped, and the resulting cash and
//! positions. Recording the same market-day twice is an error, which is what
//! makes a rerun of the same day refuse rather than double-trade.

use chrono::NaiveDate;
use rustc_hash::FxHashSet;

use crate::allocation::TargetAllocation;
use crate::error::{Error, Result};
use crate::portfolio::{Position, PositionBook};
use crate::trade::{Side, Trade, TradeAttempt};
use crate::types::{Cents, Market};

/// Everything that happened to one market on one day.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LedgerEntry {
    pub date: NaiveDate,
    pub market: Market,
    pub target: TargetAllocation,
    pub trades: Vec<Trade>,
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Vec::is_empty"))]
    pub skipped: Vec<TradeAttempt>,
    pub cash_cents: Cents,
    pub positions: Vec<Position>,
}

impl LedgerEntry {
    pub fn buy_notional_cents(&self) -> Cents {
        self.trades
            .iter()
            .filter(|t| t.side == Side::Buy)
            .map(|t| t.notional_cents)
            .sum()
    }

    pub fn sell_notional_cents(&self) -> Cents {
        self.trades
            .iter()
            .filter(|t| t.side == Side::Sell)
            .map(|t| t.notional_cents)
            .sum()
    }
}

/// In-memory ledger, in recording order.
#[derive(Clone, Debug, Default)]
pub struct DailyLedger {
    entries: Vec<LedgerEntry>,
    index: FxHashSet<(Market, NaiveDate)>,
}

impl DailyLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a ledger from previously recorded entries.
    pub fn from_entries(entries: Vec<LedgerEntry>) -> Result<Self> {
        let mut ledger = Self::new();
        for entry in entries {
            ledger.push(entry)?;
        }
        Ok(ledger)
    }

    /// Record one market-day.
    ///
    /// The date is taken from `book`. Executed trades go to `trades`,
    /// everything else to `skipped`; cash and positions are copied from
    /// `book` for `market` only.
    pub fn record(
        &mut self,
        market: Market,
        target: &TargetAllocation,
        attempts: &[TradeAttempt],
        book: &PositionBook,
    ) -> Result<&LedgerEntry> {
        let (executed, skipped): (Vec<&TradeAttempt>, Vec<&TradeAttempt>) =
            attempts.iter().partition(|a| a.outcome.is_executed());

        let entry = LedgerEntry {
            date: book.date(),
            market,
            target: target.clone(),
            trades: executed.into_iter().map(|a| a.trade.clone()).collect(),
            skipped: skipped.into_iter().cloned().collect(),
            cash_cents: book.cash(market),
            positions: book.positions(market).cloned().collect(),
        };
        self.push(entry)?;
        Ok(&self.entries[self.entries.len() - 1])
    }

    /// Whether `(market, date)` has already been recorded.
    pub fn contains(&self, market: Market, date: NaiveDate) -> bool {
        self.index.contains(&(market, date))
    }

    pub fn get(&self, market: Market, date: NaiveDate) -> Option<&LedgerEntry> {
        if !self.contains(market, date) {
            return None;
        }
        self.entries
            .iter()
            .find(|e| e.market == market && e.date == date)
    }

    #[inline]
    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    /// Entries recorded after the first `n`.
    pub fn since(&self, n: usize) -> &[LedgerEntry] {
        &self.entries[n.min(self.entries.len())..]
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn push(&mut self, entry: LedgerEntry) -> Result<()> {
        if !self.index.insert((entry.market, entry.date)) {
            return Err(Error::DuplicateLedgerEntry {
                market: entry.market,
                date: entry.date,
            });
        }
        self.entries.push(entry);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trade::Outcome;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, d).unwrap()
    }

    fn attempt(ticker: &str, outcome: Outcome) -> TradeAttempt {
        TradeAttempt {
            trade: Trade {
                market: Market::US,
                ticker: ticker.into(),
                side: Side::Buy,
                quantity: 1.0,
                price: 100.0,
                notional_cents: 100_00,
                reason: "open".into(),
            },
            delta_weight: 0.1,
            outcome,
        }
    }

    fn book(d: u32) -> PositionBook {
        PositionBook::new(day(d))
            .with_cash(Market::US, 900_00)
            .with_cash(Market::HK, 5_000_00)
            .with_position(Position {
                market: Market::US,
                ticker: "XLK".into(),
                quantity: 1.0,
                avg_cost: Some(100.0),
            })
    }

    #[test]
    fn record_splits_executed_and_skipped() {
        let mut ledger = DailyLedger::new();
        let target = TargetAllocation::from_weights(Market::US, [("XLK", 0.2), ("XLE", 0.2)]);
        let attempts = vec![
            attempt("XLK", Outcome::Executed),
            attempt("XLE", Outcome::SkippedInsufficientFunds { available_cents: 50_00 }),
        ];

        let entry = ledger.record(Market::US, &target, &attempts, &book(2)).unwrap();
        assert_eq!(entry.date, day(2));
        assert_eq!(entry.trades.len(), 1);
        assert_eq!(entry.trades[0].ticker, "XLK");
        assert_eq!(entry.skipped.len(), 1);
        assert_eq!(entry.cash_cents, 900_00);
        assert_eq!(entry.positions.len(), 1);
        assert_eq!(entry.buy_notional_cents(), 100_00);
        assert_eq!(entry.sell_notional_cents(), 0);
    }

    #[test]
    fn duplicate_market_day_is_rejected() {
        let mut ledger = DailyLedger::new();
        let target = TargetAllocation::cash_only(Market::US);
        let first = ledger.record(Market::US, &target, &[], &book(2)).unwrap().clone();

        // A different plan for the same market-day must not replace the first.
        let retry = TargetAllocation::from_weights(Market::US, [("XLK", 0.5)]);
        let retry_book = book(2).with_cash(Market::US, 1_00);
        let err = ledger
            .record(Market::US, &retry, &[attempt("XLK", Outcome::Executed)], &retry_book)
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateLedgerEntry { market: Market::US, .. }));
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.get(Market::US, day(2)), Some(&first));
        assert_eq!(ledger.entries(), std::slice::from_ref(&first));

        // other market, same day, and same market, next day, are fine
        let hk = TargetAllocation::cash_only(Market::HK);
        ledger.record(Market::HK, &hk, &[], &book(2)).unwrap();
        ledger.record(Market::US, &target, &[], &book(3)).unwrap();
        assert_eq!(ledger.len(), 3);
        assert!(ledger.contains(Market::HK, day(2)));
        assert_eq!(ledger.get(Market::HK, day(2)).unwrap().cash_cents, 5_000_00);
        assert!(ledger.get(Market::CN, day(2)).is_none());
    }

    #[test]
    fn from_entries_checks_duplicates() {
        let mut ledger = DailyLedger::new();
        let target = TargetAllocation::cash_only(Market::US);
        let entry = ledger.record(Market::US, &target, &[], &book(2)).unwrap().clone();

        assert!(DailyLedger::from_entries(vec![entry.clone()]).is_ok());
        assert!(DailyLedger::from_entries(vec![entry.clone(), entry]).is_err());
    }

    #[test]
    fn since_returns_new_entries() {
        let mut ledger = DailyLedger::new();
        let target = TargetAllocation::cash_only(Market::US);
        ledger.record(Market::US, &target, &[], &book(2)).unwrap();
        let mark = ledger.len();
        ledger.record(Market::US, &target, &[], &book(3)).unwrap();

        assert_eq!(ledger.since(mark).len(), 1);
        assert_eq!(ledger.since(mark)[0].date, day(3));
        assert!(ledger.since(10).is_empty());
    }
}
