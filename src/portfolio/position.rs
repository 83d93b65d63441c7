//! Holding of a single ticker in a single market.

use crate::types::{Market, QTY_EPSILON, Quantity, Ticker};

/// A long holding in one ticker.
///
/// `avg_cost` is the volume-weighted entry price in major units; it is
/// unknown (`None`) for holdings imported without cost information.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Position {
    pub market: Market,
    pub ticker: Ticker,
    pub quantity: Quantity,
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub avg_cost: Option<f64>,
}

impl Position {
    /// A flat position, returned for tickers the book does not hold.
    pub fn new(market: Market, ticker: impl Into<Ticker>) -> Self {
        Self {
            market,
            ticker: ticker.into(),
            quantity: 0.0,
            avg_cost: None,
        }
    }

    #[inline]
    pub fn is_flat(&self) -> bool {
        self.quantity.abs() <= QTY_EPSILON
    }

    /// Market value in cents (unrounded) at `price` (major units).
    #[inline]
    pub fn value_cents(&self, price: f64) -> f64 {
        self.quantity * price * 100.0
    }

    /// Add `qty` bought at `price`, updating the average cost.
    pub(crate) fn apply_buy(&mut self, qty: Quantity, price: f64) {
        if self.is_flat() {
            self.quantity = qty;
            self.avg_cost = Some(price);
            return;
        }
        let total = self.quantity + qty;
        self.avg_cost = self
            .avg_cost
            .map(|avg| (avg * self.quantity + price * qty) / total);
        self.quantity = total;
    }

    /// Remove `qty`. Residues below `QTY_EPSILON` close the position.
    pub(crate) fn apply_sell(&mut self, qty: Quantity) {
        self.quantity -= qty;
        if self.is_flat() {
            self.quantity = 0.0;
            self.avg_cost = None;
        }
    }
}
