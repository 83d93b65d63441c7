//! TARGET→BOOK reconciliation under turnover and budget limits.
//!
//! For every ticker that is either targeted or held, the executor compares
//! the target weight to the current weight (`quantity × price / account
//! value`, where account value is cash plus positions) and turns the
//! difference into a trade:
//!
//! 1. If the summed absolute weight change exceeds `turnover_limit`, every
//!    delta is scaled down by the same factor so turnover equals the limit.
//! 2. If the BUY notional still exceeds `budget_cents`, BUY deltas alone are
//!    scaled down by a second factor.
//! 3. SELLs go first (largest change first) to free cash, then BUYs (largest
//!    change first). Each trade is applied to the book before the next one
//!    is sized against remaining cash.
//!
//! A BUY the remaining cash cannot cover is skipped and recorded, never
//! fatal: the batch always completes.

use std::collections::BTreeSet;

use chrono::NaiveDate;
use log::{debug, warn};

use crate::allocation::TargetAllocation;
use crate::error::{Error, Result};
use crate::portfolio::{PositionBook, quote};
use crate::trade::{Outcome, Side, Trade, TradeAttempt, classify};
use crate::types::{Cents, Market, PriceMap, QTY_EPSILON, Quantity, Ticker};

/// Constraints on one market-day's batch.
#[derive(Clone, Debug, PartialEq)]
pub struct ExecutionLimits {
    /// Max Σ|Δweight| per batch, as a fraction of account value.
    /// `f64::INFINITY` means unlimited.
    pub turnover_limit: f64,
    /// Soft ceiling on total BUY notional for the day.
    pub budget_cents: Option<Cents>,
    /// Round quantities toward zero to a multiple of this. `None` = fractional.
    pub lot_size: Option<Quantity>,
    /// Trades with a smaller notional are not emitted.
    pub min_trade_cents: Cents,
}

impl Default for ExecutionLimits {
    fn default() -> Self {
        Self {
            turnover_limit: f64::INFINITY,
            budget_cents: None,
            lot_size: None,
            min_trade_cents: 1_00,
        }
    }
}

impl ExecutionLimits {
    pub fn with_turnover_limit(mut self, limit: f64) -> Self {
        self.turnover_limit = limit;
        self
    }

    pub fn with_budget(mut self, cents: Cents) -> Self {
        self.budget_cents = Some(cents);
        self
    }

    pub fn with_lot_size(mut self, lot: Quantity) -> Self {
        self.lot_size = Some(lot);
        self
    }

    pub fn with_min_trade(mut self, cents: Cents) -> Self {
        self.min_trade_cents = cents;
        self
    }
}

/// Outcome of one market-day batch.
#[derive(Clone, Debug)]
pub struct Execution {
    pub market: Market,
    pub date: NaiveDate,
    /// Cash plus position value before trading, in cents.
    pub account_value_cents: f64,
    /// Σ|Δweight| before any scaling.
    pub requested_turnover: f64,
    /// Factor applied to all deltas to honor the turnover limit.
    pub turnover_scale: f64,
    /// Factor applied to BUY deltas to honor the budget.
    pub budget_scale: f64,
    pub cash_before: Cents,
    /// Every trade tried, in execution order.
    pub attempts: Vec<TradeAttempt>,
    /// The book after all executed trades.
    pub book: PositionBook,
}

impl Execution {
    /// Executed trades, in execution order.
    pub fn trades(&self) -> impl Iterator<Item = &Trade> {
        self.attempts
            .iter()
            .filter(|a| a.outcome.is_executed())
            .map(|a| &a.trade)
    }

    pub fn skipped(&self) -> impl Iterator<Item = &TradeAttempt> {
        self.attempts.iter().filter(|a| !a.outcome.is_executed())
    }

    pub fn cash_after(&self) -> Cents {
        self.book.cash(self.market)
    }

    pub fn buy_notional_cents(&self) -> Cents {
        self.side_notional(Side::Buy)
    }

    pub fn sell_notional_cents(&self) -> Cents {
        self.side_notional(Side::Sell)
    }

    /// Executed BUY plus SELL notional.
    pub fn turnover_cents(&self) -> Cents {
        self.buy_notional_cents() + self.sell_notional_cents()
    }

    pub fn is_empty(&self) -> bool {
        self.attempts.is_empty()
    }

    fn side_notional(&self, side: Side) -> Cents {
        self.trades()
            .filter(|t| t.side == side)
            .map(|t| t.notional_cents)
            .sum()
    }
}

struct Leg {
    ticker: Ticker,
    price: f64,
    held: Quantity,
    delta: f64,
}

/// Compute and apply the trades moving `book` toward `target` for `market`.
///
/// `book` is not modified; the resulting book is returned in the
/// [`Execution`]. Fails with `MissingPrice` if any targeted or held ticker
/// lacks a usable quote, and with `Execution` if applying a planned trade
/// violates a book invariant.
pub fn execute(
    market: Market,
    target: &TargetAllocation,
    book: &PositionBook,
    prices: &PriceMap,
    limits: &ExecutionLimits,
) -> Result<Execution> {
    debug_assert_eq!(target.market(), market, "target built for another market");

    let date = book.date();
    let cash_before = book.cash(market);

    let tickers: BTreeSet<&str> = target
        .iter()
        .map(|(t, _)| t)
        .chain(book.positions(market).map(|p| p.ticker.as_str()))
        .collect();

    let mut legs = Vec::with_capacity(tickers.len());
    for ticker in tickers {
        let price = quote(prices, market, ticker)?;
        let held = book.holding(market, ticker).map_or(0.0, |p| p.quantity);
        legs.push(Leg {
            ticker: ticker.to_string(),
            price,
            held,
            delta: 0.0,
        });
    }

    let account: f64 =
        cash_before as f64 + legs.iter().map(|l| l.held * l.price * 100.0).sum::<f64>();

    let mut out = Execution {
        market,
        date,
        account_value_cents: account,
        requested_turnover: 0.0,
        turnover_scale: 1.0,
        budget_scale: 1.0,
        cash_before,
        attempts: Vec::new(),
        book: book.clone(),
    };
    if account <= 0.0 {
        debug!("{market}: account value is zero, nothing to rebalance");
        return Ok(out);
    }

    for leg in &mut legs {
        let current = leg.held * leg.price * 100.0 / account;
        leg.delta = target.weight(&leg.ticker) - current;
    }

    // === Turnover ===

    out.requested_turnover = legs.iter().map(|l| l.delta.abs()).sum();
    let limit = limits.turnover_limit.max(0.0);
    if out.requested_turnover > limit {
        out.turnover_scale = limit / out.requested_turnover;
        for leg in &mut legs {
            leg.delta *= out.turnover_scale;
        }
        debug!(
            "{market}: turnover {:.4} exceeds limit {limit:.4}, scaling deltas by {:.6}",
            out.requested_turnover, out.turnover_scale
        );
    }

    // === Sells ===

    let mut sells: Vec<&Leg> = legs.iter().filter(|l| l.delta < 0.0).collect();
    sells.sort_by(|a, b| {
        b.delta
            .abs()
            .total_cmp(&a.delta.abs())
            .then_with(|| a.ticker.cmp(&b.ticker))
    });

    for leg in sells {
        let wanted = -leg.delta * account / (leg.price * 100.0);
        let qty = if wanted >= leg.held * (1.0 - 1e-9) - QTY_EPSILON {
            leg.held
        } else {
            round_to_lot(wanted, limits.lot_size).min(leg.held)
        };
        if qty <= QTY_EPSILON {
            continue;
        }
        let notional = (qty * leg.price * 100.0).round() as Cents;
        if notional < limits.min_trade_cents {
            continue;
        }

        let trade = new_trade(market, leg, Side::Sell, qty, notional);
        out.book
            .apply(&trade)
            .map_err(|e| invariant(market, date, leg, leg.delta, e))?;
        debug!("{market}: {trade}");
        out.attempts.push(TradeAttempt {
            trade,
            delta_weight: leg.delta,
            outcome: Outcome::Executed,
        });
    }

    // === Budget ===

    let mut buys: Vec<&Leg> = legs.iter().filter(|l| l.delta > 0.0).collect();
    buys.sort_by(|a, b| b.delta.total_cmp(&a.delta).then_with(|| a.ticker.cmp(&b.ticker)));

    let planned: f64 = buys.iter().map(|l| l.delta * account).sum();
    if let Some(budget) = limits.budget_cents {
        let budget = budget.max(0) as f64;
        if planned > budget {
            out.budget_scale = budget / planned;
            debug!(
                "{market}: buys of {planned:.0} cents exceed budget {budget:.0}, scaling by {:.6}",
                out.budget_scale
            );
        }
    }

    // === Buys ===

    let mut spent: Cents = 0;
    for leg in buys {
        let delta = leg.delta * out.budget_scale;
        let qty = round_to_lot(delta * account / (leg.price * 100.0), limits.lot_size);
        if qty <= QTY_EPSILON {
            continue;
        }
        let notional = buy_notional(qty, leg.price);
        if notional < limits.min_trade_cents {
            continue;
        }

        let mut trade = new_trade(market, leg, Side::Buy, qty, notional);

        if let Some(budget) = limits.budget_cents {
            if spent + notional > budget {
                let remaining_cents = (budget - spent).max(0);
                warn!("{market}: skipping {trade}: over budget ({remaining_cents} cents left)");
                out.attempts.push(TradeAttempt {
                    trade,
                    delta_weight: delta,
                    outcome: Outcome::SkippedOverBudget { remaining_cents },
                });
                continue;
            }
        }

        let available_cents = out.book.cash(market);
        if notional > available_cents
            && notional - available_cents < limits.min_trade_cents.max(1)
        {
            // Rounding residue from earlier trades: take what the cash covers.
            let qty = round_to_lot(available_cents as f64 / (leg.price * 100.0), limits.lot_size);
            trade.quantity = qty;
            trade.notional_cents = buy_notional(qty, leg.price);
        }
        if trade.notional_cents > available_cents
            || trade.quantity <= QTY_EPSILON
            || trade.notional_cents < limits.min_trade_cents
        {
            warn!("{market}: skipping {trade}: insufficient funds ({available_cents} cents left)");
            out.attempts.push(TradeAttempt {
                trade,
                delta_weight: delta,
                outcome: Outcome::SkippedInsufficientFunds { available_cents },
            });
            continue;
        }

        out.book
            .apply(&trade)
            .map_err(|e| invariant(market, date, leg, delta, e))?;
        spent += trade.notional_cents;
        debug!("{market}: {trade}");
        out.attempts.push(TradeAttempt {
            trade,
            delta_weight: delta,
            outcome: Outcome::Executed,
        });
    }

    Ok(out)
}

fn new_trade(market: Market, leg: &Leg, side: Side, qty: Quantity, notional: Cents) -> Trade {
    Trade {
        market,
        ticker: leg.ticker.clone(),
        side,
        quantity: qty,
        price: leg.price,
        notional_cents: notional,
        reason: classify(side, leg.held, qty).to_string(),
    }
}

fn invariant(market: Market, date: NaiveDate, leg: &Leg, delta: f64, source: Error) -> Error {
    Error::Execution {
        market,
        date,
        ticker: leg.ticker.clone(),
        delta_weight: delta,
        source: Box::new(source),
    }
}

/// BUY notional, floored to the cent.
fn buy_notional(qty: Quantity, price: f64) -> Cents {
    (qty * price * 100.0 + 1e-6).floor() as Cents
}

/// Round toward zero to a multiple of `lot`.
fn round_to_lot(qty: Quantity, lot: Option<Quantity>) -> Quantity {
    match lot {
        Some(lot) if lot > 0.0 => (qty / lot + 1e-9).floor() * lot,
        _ => qty,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::portfolio::Position;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 2).unwrap()
    }

    fn prices(v: &[(&str, f64)]) -> PriceMap {
        v.iter().map(|(t, p)| (t.to_string(), *p)).collect()
    }

    fn held(ticker: &str, qty: f64) -> Position {
        Position {
            market: Market::US,
            ticker: ticker.into(),
            quantity: qty,
            avg_cost: None,
        }
    }

    fn cash_book(cents: Cents) -> PositionBook {
        PositionBook::new(day()).with_cash(Market::US, cents)
    }

    #[test]
    fn buys_from_cash() {
        let target = TargetAllocation::from_weights(Market::US, [("XLK", 0.5), ("SRS", 0.5)]);
        let px = prices(&[("XLK", 200.0), ("SRS", 25.0)]);
        let book = cash_book(10_000_00);
        let exec = execute(Market::US, &target, &book, &px, &ExecutionLimits::default()).unwrap();

        let trades: Vec<_> = exec.trades().collect();
        assert_eq!(trades.len(), 2);
        assert!(trades.iter().all(|t| t.side == Side::Buy && t.reason == "open"));
        assert_eq!(exec.buy_notional_cents(), 10_000_00);
        assert_eq!(exec.cash_after(), 0);
        assert!((exec.book.position(Market::US, "XLK").quantity - 25.0).abs() < 1e-9);
        assert!((exec.book.position(Market::US, "SRS").quantity - 200.0).abs() < 1e-9);
    }

    #[test]
    fn turnover_limit_scales_proportionally() {
        // $1000 all cash, target needs $1000 of buys, limit 20%
        let target = TargetAllocation::from_weights(Market::US, [("AAA", 0.6), ("BBB", 0.4)]);
        let px = prices(&[("AAA", 10.0), ("BBB", 20.0)]);
        let limits = ExecutionLimits::default().with_turnover_limit(0.2);
        let exec = execute(Market::US, &target, &cash_book(1_000_00), &px, &limits).unwrap();

        assert_eq!(exec.turnover_cents(), 200_00);
        assert!((exec.turnover_scale - 0.2).abs() < 1e-12);
        let aaa = exec.trades().find(|t| t.ticker == "AAA").unwrap();
        let bbb = exec.trades().find(|t| t.ticker == "BBB").unwrap();
        assert_eq!(aaa.notional_cents, 120_00);
        assert_eq!(bbb.notional_cents, 80_00);
    }

    #[test]
    fn sells_come_before_buys() {
        let book = cash_book(0).with_position(held("XLE", 10.0));
        let target = TargetAllocation::from_weights(Market::US, [("XLK", 1.0)]);
        let px = prices(&[("XLE", 100.0), ("XLK", 50.0)]);
        let exec = execute(Market::US, &target, &book, &px, &ExecutionLimits::default()).unwrap();

        let sides: Vec<_> = exec.attempts.iter().map(|a| a.trade.side).collect();
        assert_eq!(sides, vec![Side::Sell, Side::Buy]);
        assert_eq!(exec.attempts[0].trade.reason, "close");
        assert_eq!(exec.attempts[0].trade.quantity, 10.0);
        assert!(exec.book.holding(Market::US, "XLE").is_none());
        assert!((exec.book.position(Market::US, "XLK").quantity - 20.0).abs() < 1e-9);
    }

    #[test]
    fn ordering_by_delta_magnitude() {
        let book = cash_book(0)
            .with_position(held("A", 10.0))
            .with_position(held("B", 10.0));
        let target =
            TargetAllocation::from_weights(Market::US, [("A", 0.3), ("C", 0.3), ("D", 0.4)]);
        let px = prices(&[("A", 50.0), ("B", 50.0), ("C", 10.0), ("D", 10.0)]);
        let exec = execute(Market::US, &target, &book, &px, &ExecutionLimits::default()).unwrap();

        let order: Vec<_> = exec
            .attempts
            .iter()
            .map(|a| (a.trade.side, a.trade.ticker.as_str()))
            .collect();
        assert_eq!(
            order,
            vec![(Side::Sell, "B"), (Side::Sell, "A"), (Side::Buy, "D"), (Side::Buy, "C")]
        );
    }

    #[test]
    fn budget_scales_buys_only() {
        let book = cash_book(500_00).with_position(held("OLD", 5.0));
        let target = TargetAllocation::from_weights(Market::US, [("AAA", 0.5), ("BBB", 0.5)]);
        let px = prices(&[("OLD", 100.0), ("AAA", 10.0), ("BBB", 10.0)]);
        let limits = ExecutionLimits::default().with_budget(400_00);
        let exec = execute(Market::US, &target, &book, &px, &limits).unwrap();

        // full sell of OLD is not affected by the budget
        assert_eq!(exec.sell_notional_cents(), 500_00);
        assert_eq!(exec.buy_notional_cents(), 400_00);
        assert!((exec.budget_scale - 0.4).abs() < 1e-12);
        assert_eq!(exec.cash_after(), 600_00);
    }

    #[test]
    fn lot_size_rounds_down() {
        let target = TargetAllocation::from_weights(Market::US, [("XLK", 1.0)]);
        let px = prices(&[("XLK", 300.0)]);
        let limits = ExecutionLimits::default().with_lot_size(1.0);
        let exec = execute(Market::US, &target, &cash_book(1_000_00), &px, &limits).unwrap();

        let t = exec.trades().next().unwrap();
        assert_eq!(t.quantity, 3.0);
        assert_eq!(t.notional_cents, 900_00);
        assert_eq!(exec.cash_after(), 100_00);
    }

    #[test]
    fn skips_buy_when_cash_runs_out() {
        // Lot rounding on the sell leaves less cash than the buy needs.
        let book = cash_book(0).with_position(held("AAA", 3.0));
        let target = TargetAllocation::from_weights(Market::US, [("AAA", 0.5), ("BBB", 0.5)]);
        let px = prices(&[("AAA", 100.0), ("BBB", 1.0)]);
        let limits = ExecutionLimits::default().with_lot_size(1.0);
        let exec = execute(Market::US, &target, &book, &px, &limits).unwrap();

        // sell 1 AAA (1.5 rounded down) = $100, buy wants 150 BBB = $150
        assert_eq!(exec.sell_notional_cents(), 100_00);
        let skipped: Vec<_> = exec.skipped().collect();
        assert_eq!(skipped.len(), 1);
        assert_eq!(
            skipped[0].outcome,
            Outcome::SkippedInsufficientFunds { available_cents: 100_00 }
        );
        assert_eq!(exec.cash_after(), 100_00);
    }

    #[test]
    fn rounding_residue_shrinks_last_buy() {
        // three closes each round down 0.4 cents; the full buy is 1 cent short
        let book = cash_book(0)
            .with_position(held("AAA", 2.00004))
            .with_position(held("BBB", 2.00004))
            .with_position(held("CCC", 2.00004));
        let target = TargetAllocation::from_weights(Market::US, [("DDD", 1.0)]);
        let px = prices(&[("AAA", 100.0), ("BBB", 100.0), ("CCC", 100.0), ("DDD", 1.0)]);
        let exec = execute(Market::US, &target, &book, &px, &ExecutionLimits::default()).unwrap();

        assert_eq!(exec.sell_notional_cents(), 600_00);
        assert_eq!(exec.skipped().count(), 0);
        assert_eq!(exec.buy_notional_cents(), 600_00);
        assert_eq!(exec.cash_after(), 0);
    }

    #[test]
    fn small_trades_are_dropped() {
        let target = TargetAllocation::from_weights(Market::US, [("XLK", 0.0004)]);
        let px = prices(&[("XLK", 200.0)]);
        let book = cash_book(1_000_00);
        let exec = execute(Market::US, &target, &book, &px, &ExecutionLimits::default()).unwrap();
        assert!(exec.is_empty());

        // 0.40 clears a 0.10 floor.
        let limits = ExecutionLimits::default().with_min_trade(10);
        let exec = execute(Market::US, &target, &book, &px, &limits).unwrap();
        let trades: Vec<_> = exec.trades().collect();
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].notional_cents, 40);
        assert_eq!(exec.cash_after(), 1_000_00 - 40);
    }

    #[test]
    fn converged_book_trades_nothing() {
        let target = TargetAllocation::from_weights(Market::US, [("XLK", 0.7), ("XLE", 0.2)]);
        let px = prices(&[("XLK", 213.37), ("XLE", 91.05)]);
        let limits = ExecutionLimits::default();
        let first = execute(Market::US, &target, &cash_book(12_345_67), &px, &limits).unwrap();
        assert_eq!(first.trades().count(), 2);

        let second = execute(Market::US, &target, &first.book, &px, &limits).unwrap();
        assert!(second.is_empty());
    }

    #[test]
    fn missing_price_aborts() {
        let book = cash_book(100_00).with_position(held("XLE", 1.0));
        let target = TargetAllocation::from_weights(Market::US, [("XLK", 0.5)]);
        let px = prices(&[("XLK", 10.0)]);
        let limits = ExecutionLimits::default();
        let err = execute(Market::US, &target, &book, &px, &limits).unwrap_err();
        assert!(matches!(err, Error::MissingPrice { ref ticker, .. } if ticker == "XLE"));
    }

    #[test]
    fn empty_account_is_a_no_op() {
        let target = TargetAllocation::from_weights(Market::US, [("XLK", 0.5)]);
        let px = prices(&[("XLK", 10.0)]);
        let exec = execute(Market::US, &target, &cash_book(0), &px, &ExecutionLimits::default())
            .unwrap();
        assert!(exec.is_empty());
        assert_eq!(exec.account_value_cents, 0.0);
    }

    #[test]
    fn input_book_is_untouched() {
        let book = cash_book(1_000_00);
        let target = TargetAllocation::from_weights(Market::US, [("XLK", 1.0)]);
        let px = prices(&[("XLK", 10.0)]);
        let exec = execute(Market::US, &target, &book, &px, &ExecutionLimits::default()).unwrap();
        assert_eq!(book.cash(Market::US), 1_000_00);
        assert_eq!(exec.cash_after(), 0);
    }

    #[test]
    fn round_to_lot_cases() {
        assert_eq!(round_to_lot(12.7, None), 12.7);
        assert_eq!(round_to_lot(12.7, Some(1.0)), 12.0);
        assert_eq!(round_to_lot(250.0, Some(100.0)), 200.0);
        // float noise just under a lot boundary still counts the lot
        assert_eq!(round_to_lot(2.9999999999999996, Some(1.0)), 3.0);
    }
}
