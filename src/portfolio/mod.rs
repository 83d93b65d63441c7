//! Holdings and cash per market.
//!
//! A [`PositionBook`] is loaded from a persisted [`Snapshot`] at the start
//! of a run, mutated only through [`PositionBook::apply`], and written back
//! at the end. Each market's cash and positions are independent; a book can
//! be split into per-market partitions that are processed separately and
//! merged back.
//!
//! # Example
//!
//! ```
//! use chrono::NaiveDate;
//! use sectorbook::portfolio::PositionBook;
//! use sectorbook::{Market, Side, Trade};
//!
//! let date = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
//! let mut book = PositionBook::new(date).with_cash(Market::US, 1_000_00);
//!
//! book.apply(&Trade {
//!     market: Market::US,
//!     ticker: "XLK".into(),
//!     side: Side::Buy,
//!     quantity: 2.0,
//!     price: 200.0,
//!     notional_cents: 400_00,
//!     reason: "open".into(),
//! })
//! .unwrap();
//!
//! assert_eq!(book.cash(Market::US), 600_00);
//! assert_eq!(book.position(Market::US, "XLK").quantity, 2.0);
//! ```

pub mod position;

pub use position::Position;

use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;

use crate::error::{Error, Result};
use crate::trade::{Side, Trade};
use crate::types::{Cents, Market, PriceMap, QTY_EPSILON, Ticker, from_cents, to_cents};

/// One position as it appears in a persisted snapshot.
///
/// `market` may be omitted, in which case it is inferred from the ticker
/// suffix. `shares` is accepted as an alias of `quantity`.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PositionRecord {
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub market: Option<String>,
    pub ticker: Ticker,
    #[cfg_attr(feature = "serde", serde(alias = "shares"))]
    pub quantity: f64,
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub avg_cost: Option<f64>,
}

/// Persisted form of a [`PositionBook`]. Cash is in major units.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Snapshot {
    pub date: NaiveDate,
    #[cfg_attr(feature = "serde", serde(default))]
    pub cash_by_market: BTreeMap<String, f64>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub positions: Vec<PositionRecord>,
}

/// Cash and holdings for every market, as of `date`.
#[derive(Clone, Debug, PartialEq)]
pub struct PositionBook {
    date: NaiveDate,
    cash: BTreeMap<Market, Cents>,
    positions: BTreeMap<Market, BTreeMap<Ticker, Position>>,
}

impl PositionBook {
    /// Empty book: no cash, no positions.
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date,
            cash: BTreeMap::new(),
            positions: BTreeMap::new(),
        }
    }

    /// Builder-style cash setter, used to seed a book.
    pub fn with_cash(mut self, market: Market, cents: Cents) -> Self {
        debug_assert!(cents >= 0, "cash must be non-negative, got {cents}");
        self.cash.insert(market, cents);
        self
    }

    /// Builder-style position setter, used to seed a book.
    pub fn with_position(mut self, position: Position) -> Self {
        if !position.is_flat() {
            self.positions
                .entry(position.market)
                .or_default()
                .insert(position.ticker.clone(), position);
        }
        self
    }

    /// Validate and load a persisted snapshot.
    pub fn load(snapshot: Snapshot) -> Result<Self> {
        let mut book = Self::new(snapshot.date);

        for (key, amount) in &snapshot.cash_by_market {
            let market: Market = key.parse()?;
            if !amount.is_finite() || *amount < 0.0 {
                return Err(Error::InvalidSnapshot(format!(
                    "cash for {market} must be a non-negative number, got {amount}"
                )));
            }
            if book.cash.insert(market, to_cents(*amount)).is_some() {
                return Err(Error::InvalidSnapshot(format!("cash for {market} listed twice")));
            }
        }

        for rec in snapshot.positions {
            let ticker = rec.ticker.trim().to_string();
            if ticker.is_empty() {
                return Err(Error::InvalidSnapshot("position with empty ticker".into()));
            }
            let market = match &rec.market {
                Some(m) => m.parse()?,
                None => Market::from_ticker(&ticker),
            };
            if !rec.quantity.is_finite() || rec.quantity < 0.0 {
                return Err(Error::InvalidSnapshot(format!(
                    "quantity for {market}/{ticker} must be a non-negative number, got {}",
                    rec.quantity
                )));
            }
            if rec.quantity <= QTY_EPSILON {
                continue;
            }
            let held = book.positions.entry(market).or_default();
            if held.contains_key(&ticker) {
                return Err(Error::InvalidSnapshot(format!("duplicate position {market}/{ticker}")));
            }
            held.insert(
                ticker.clone(),
                Position {
                    market,
                    ticker,
                    quantity: rec.quantity,
                    avg_cost: rec.avg_cost.filter(|c| c.is_finite() && *c >= 0.0),
                },
            );
        }

        Ok(book)
    }

    /// Persisted form, in market then ticker order.
    pub fn to_snapshot(&self) -> Snapshot {
        Snapshot {
            date: self.date,
            cash_by_market: self
                .cash
                .iter()
                .map(|(m, c)| (m.to_string(), from_cents(*c)))
                .collect(),
            positions: self
                .positions
                .values()
                .flat_map(|m| m.values())
                .map(|p| PositionRecord {
                    market: Some(p.market.to_string()),
                    ticker: p.ticker.clone(),
                    quantity: p.quantity,
                    avg_cost: p.avg_cost,
                })
                .collect(),
        }
    }

    // === Queries ===

    #[inline]
    pub fn date(&self) -> NaiveDate {
        self.date
    }

    /// Move the book to a new trading day.
    pub fn set_date(&mut self, date: NaiveDate) {
        self.date = date;
    }

    /// Cash for a market (zero when none is recorded).
    #[inline]
    pub fn cash(&self, market: Market) -> Cents {
        self.cash.get(&market).copied().unwrap_or(0)
    }

    /// The position in a ticker, or a flat one when not held.
    pub fn position(&self, market: Market, ticker: &str) -> Position {
        self.holding(market, ticker)
            .cloned()
            .unwrap_or_else(|| Position::new(market, ticker))
    }

    pub fn holding(&self, market: Market, ticker: &str) -> Option<&Position> {
        self.positions.get(&market).and_then(|m| m.get(ticker))
    }

    /// Non-flat positions of a market, in ticker order.
    pub fn positions(&self, market: Market) -> impl Iterator<Item = &Position> {
        self.positions.get(&market).into_iter().flat_map(|m| m.values())
    }

    /// Markets that have cash or positions recorded.
    pub fn markets(&self) -> BTreeSet<Market> {
        self.cash.keys().chain(self.positions.keys()).copied().collect()
    }

    /// Market value of all positions in a market, in (unrounded) cents.
    pub fn position_value_cents(&self, market: Market, prices: &PriceMap) -> Result<f64> {
        self.positions(market)
            .map(|p| quote(prices, market, &p.ticker).map(|px| p.value_cents(px)))
            .sum()
    }

    /// Cash plus position value for a market, in (unrounded) cents.
    pub fn account_value_cents(&self, market: Market, prices: &PriceMap) -> Result<f64> {
        Ok(self.cash(market) as f64 + self.position_value_cents(market, prices)?)
    }

    /// Current weight of each held ticker as a fraction of account value.
    pub fn weights(&self, market: Market, prices: &PriceMap) -> Result<Vec<(Ticker, f64)>> {
        let account = self.account_value_cents(market, prices)?;
        if account <= 0.0 {
            return Ok(Vec::new());
        }
        self.positions(market)
            .map(|p| {
                let px = quote(prices, market, &p.ticker)?;
                Ok((p.ticker.clone(), p.value_cents(px) / account))
            })
            .collect()
    }

    // === Mutation ===

    /// Apply one trade to cash and positions.
    ///
    /// Fails without mutating when a BUY exceeds the market's cash
    /// (`InsufficientCash`) or a SELL exceeds the held quantity (`OverSell`).
    pub fn apply(&mut self, trade: &Trade) -> Result<()> {
        let market = trade.market;
        if !trade.quantity.is_finite() || trade.quantity <= 0.0 {
            return Err(Error::InvalidTrade {
                ticker: trade.ticker.clone(),
                reason: "quantity must be positive",
            });
        }
        if trade.notional_cents < 0 || !trade.price.is_finite() || trade.price <= 0.0 {
            return Err(Error::InvalidTrade {
                ticker: trade.ticker.clone(),
                reason: "price and notional must be positive",
            });
        }

        match trade.side {
            Side::Buy => {
                let available = self.cash(market);
                if trade.notional_cents > available {
                    return Err(Error::InsufficientCash {
                        market,
                        ticker: trade.ticker.clone(),
                        needed: trade.notional_cents,
                        available,
                    });
                }
                self.cash.insert(market, available + trade.cash_delta());
                self.positions
                    .entry(market)
                    .or_default()
                    .entry(trade.ticker.clone())
                    .or_insert_with(|| Position::new(market, trade.ticker.clone()))
                    .apply_buy(trade.quantity, trade.price);
            }
            Side::Sell => {
                let held = self.holding(market, &trade.ticker).map_or(0.0, |p| p.quantity);
                if trade.quantity > held + QTY_EPSILON {
                    return Err(Error::OverSell {
                        market,
                        ticker: trade.ticker.clone(),
                        requested: trade.quantity,
                        held,
                    });
                }
                *self.cash.entry(market).or_insert(0) += trade.cash_delta();
                if let Some(book) = self.positions.get_mut(&market) {
                    let flat = book.get_mut(&trade.ticker).is_some_and(|p| {
                        p.apply_sell(trade.quantity);
                        p.is_flat()
                    });
                    if flat {
                        book.remove(&trade.ticker);
                    }
                }
            }
        }
        Ok(())
    }

    // === Partitions ===

    /// Copy of one market's cash and positions.
    pub fn partition(&self, market: Market) -> PositionBook {
        let mut part = PositionBook::new(self.date);
        if let Some(&cash) = self.cash.get(&market) {
            part.cash.insert(market, cash);
        }
        if let Some(held) = self.positions.get(&market) {
            part.positions.insert(market, held.clone());
        }
        part
    }

    /// Put a partition back. Every market present in `part` replaces this
    /// book's cash and positions for that market wholesale.
    pub fn merge(&mut self, mut part: PositionBook) {
        for market in part.markets() {
            self.cash.insert(market, part.cash.remove(&market).unwrap_or(0));
            match part.positions.remove(&market) {
                Some(held) => self.positions.insert(market, held),
                None => self.positions.remove(&market),
            };
        }
    }
}

/// Validated quote for a ticker.
pub(crate) fn quote(prices: &PriceMap, market: Market, ticker: &str) -> Result<f64> {
    match prices.get(ticker) {
        Some(&px) if px.is_finite() && px > 0.0 => Ok(px),
        _ => Err(Error::MissingPrice {
            market,
            ticker: ticker.to_string(),
        }),
    }
}
