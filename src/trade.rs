//! Rebalancing trades and per-attempt outcomes.

use std::fmt;

use crate::types::{Cents, Market, Quantity, Ticker, format_cents};

/// Direction of a trade.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "UPPERCASE"))]
pub enum Side {
    Buy,
    Sell,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

/// A single rebalancing trade.
///
/// `notional_cents` is what moves between cash and the position: BUY
/// notionals are floored to the cent, SELL notionals rounded to nearest.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Trade {
    pub market: Market,
    pub ticker: Ticker,
    pub side: Side,
    pub quantity: Quantity,
    /// Execution price in major units.
    pub price: f64,
    pub notional_cents: Cents,
    /// `open`, `increase`, `decrease` or `close`.
    pub reason: String,
}

impl Trade {
    /// Signed effect on cash: negative for buys.
    #[inline]
    pub fn cash_delta(&self) -> Cents {
        match self.side {
            Side::Buy => -self.notional_cents,
            Side::Sell => self.notional_cents,
        }
    }
}

impl fmt::Display for Trade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {:.4} @ {:.4} = {} ({})",
            self.side,
            self.ticker,
            self.quantity,
            self.price,
            format_cents(self.notional_cents),
            self.reason,
        )
    }
}

/// Result of trying to execute one planned trade.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "status", rename_all = "snake_case"))]
pub enum Outcome {
    Executed,
    /// Cash left after earlier trades in the batch could not cover the BUY.
    SkippedInsufficientFunds { available_cents: Cents },
    /// The BUY would have pushed the day's BUY notional past the budget.
    SkippedOverBudget { remaining_cents: Cents },
}

impl Outcome {
    #[inline]
    pub fn is_executed(&self) -> bool {
        matches!(self, Outcome::Executed)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Executed => write!(f, "EXECUTED"),
            Outcome::SkippedInsufficientFunds { available_cents } => {
                write!(
                    f,
                    "SKIPPED (insufficient funds, {} available)",
                    format_cents(*available_cents)
                )
            }
            Outcome::SkippedOverBudget { remaining_cents } => {
                write!(f, "SKIPPED (over budget, {} remaining)", format_cents(*remaining_cents))
            }
        }
    }
}

/// A planned trade together with how its execution went.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TradeAttempt {
    pub trade: Trade,
    /// Scaled weight change that produced this trade.
    pub delta_weight: f64,
    pub outcome: Outcome,
}

/// Classify a trade by what it does to the existing holding.
pub(crate) fn classify(side: Side, held: Quantity, qty: Quantity) -> &'static str {
    match side {
        Side::Buy if held <= 0.0 => "open",
        Side::Buy => "increase",
        Side::Sell if qty >= held => "close",
        Side::Sell => "decrease",
    }
}
