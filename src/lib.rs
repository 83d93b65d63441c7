// Allow our dollar.cents digit grouping convention (e.g., 100_00 = $100.00)
#![allow(clippy::inconsistent_digit_grouping)]

//! # sectorbook
//!
//! A deterministic allocation and rebalancing engine for sector ETF
//! portfolios across independent markets (US, HK, CN).
//!
//! ## Pipeline
//!
//! For each market, once per day:
//!
//! 1. [`AllocationBuilder`] turns sector scores, configured sector weights and
//!    a sector→ETF map into a [`TargetAllocation`] over tickers.
//! 2. [`executor::execute`] reconciles the target with the market's
//!    [`PositionBook`] under turnover, budget and lot-size limits, producing
//!    trades (sells first, then buys) and the resulting book.
//! 3. [`DailyLedger`] records the day: target, trades, skipped attempts and
//!    resulting holdings. Each `(market, date)` may be recorded once.
//!
//! ## Quick Start
//!
//! ```
//! use chrono::NaiveDate;
//! use sectorbook::allocation::{AllocationBuilder, BiasClass, EtfMap, MarketWeightConfig};
//! use sectorbook::executor::{ExecutionLimits, execute};
//! use sectorbook::{Bias, DailyLedger, Market, PositionBook, PriceMap, SectorScore};
//!
//! let mut weights = MarketWeightConfig::new();
//! weights.set(Market::US, "Tech", 0.6).unwrap();
//!
//! let mut etfs = EtfMap::new();
//! etfs.insert(Market::US, "Tech", BiasClass::Long, ["XLK"]);
//!
//! let scores = [SectorScore::new("Tech", 0.8, Bias::Long)];
//! let target = AllocationBuilder::new()
//!     .build(Market::US, &scores, &weights, &etfs)
//!     .unwrap();
//!
//! let date = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
//! let book = PositionBook::new(date).with_cash(Market::US, 10_000_00);
//! let prices: PriceMap = [("XLK".to_string(), 200.0)].into_iter().collect();
//!
//! let exec = execute(Market::US, &target, &book, &prices, &ExecutionLimits::default()).unwrap();
//! assert_eq!(exec.buy_notional_cents(), 6_000_00);
//! assert_eq!(exec.cash_after(), 4_000_00);
//!
//! let mut ledger = DailyLedger::new();
//! ledger.record(Market::US, &target, &exec.attempts, &exec.book).unwrap();
//! assert!(ledger.record(Market::US, &target, &exec.attempts, &exec.book).is_err());
//! ```
//!
//! ## Money Representation
//!
//! Cash and trade notionals are [`Cents`] (`i64` in the market's minor
//! unit), so cash conservation across a batch is exact:
//!
//! ```text
//! cash_before - Σ buy notional + Σ sell notional == cash_after
//! ```
//!
//! Prices are `f64` quotes and quantities are fractional unless a lot size
//! is configured.
//!
//! ## Features
//!
//! | Feature | Adds |
//! |---------|------|
//! | `serde` | Serialize/Deserialize on public records |
//! | `persistence` | JSON snapshot load and atomic save, JSONL ledger |
//! | `parallel` | `par_rebalance_markets` on the rayon pool |

pub mod allocation;
pub mod error;
pub mod executor;
pub mod ledger;
#[cfg(feature = "persistence")]
pub mod persistence;
pub mod pipeline;
pub mod portfolio;
pub mod signal;
pub mod trade;
pub mod types;

pub use allocation::{
    AllocationBuilder, BiasClass, EtfMap, ExcludedSector, Exclusion, MarketWeightConfig,
    SectorEtfs, TargetAllocation, UncoveredShort,
};
pub use error::{Error, Result};
pub use executor::{Execution, ExecutionLimits, execute};
pub use ledger::{DailyLedger, LedgerEntry};
#[cfg(feature = "persistence")]
pub use persistence::{append_entries, load_entries};
#[cfg(feature = "parallel")]
pub use pipeline::par_rebalance_markets;
pub use pipeline::{MarketInputs, MarketRun, Reference, rebalance_market, rebalance_markets};
pub use portfolio::{Position, PositionBook, PositionRecord, Snapshot};
pub use signal::{Bias, SectorScore, bias_by_median, normalize_sector};
pub use trade::{Outcome, Side, Trade, TradeAttempt};
pub use types::{Cents, Market, PriceMap, Quantity, Ticker, format_cents, from_cents, to_cents};
