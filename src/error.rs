//! Error types for allocation, book-keeping and execution.

use chrono::NaiveDate;

use crate::types::{Cents, Market, Quantity, Ticker};

/// All errors the engine can return.
///
/// Configuration-level errors (`UnknownMarket`, `InvalidWeight`,
/// `MissingEtfMapping`, ...) abort a single market's run. `InsufficientCash`
/// and `OverSell` are invariant violations: the executor never plans a trade
/// that triggers them, so when one surfaces it is wrapped in `Execution`
/// with the full context of the trade that caused it.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("unknown market: {0:?}")]
    UnknownMarket(String),

    #[error("invalid weight {weight} for sector '{sector}' in {market}: must be finite and within [0, 1]")]
    InvalidWeight {
        market: Market,
        sector: String,
        weight: f64,
    },

    #[error("invalid score {score} for sector '{sector}' in {market}")]
    InvalidScore {
        market: Market,
        sector: String,
        score: f64,
    },

    #[error("duplicate score for sector '{sector}' in {market}")]
    DuplicateSectorScore { market: Market, sector: String },

    #[error("sector '{sector}' in {market} is configured more than once")]
    DuplicateSectorWeight { market: Market, sector: String },

    #[error("unknown bias class {class:?} for sector '{sector}' in {market}")]
    UnknownBiasClass {
        market: Market,
        sector: String,
        class: String,
    },

    #[error("no {class} tickers mapped for sector '{sector}' in {market}")]
    MissingEtfMapping {
        market: Market,
        sector: String,
        class: &'static str,
    },

    #[error("short-biased sector '{sector}' in {market} has no inverse ETF coverage")]
    UnsupportedShortSector { market: Market, sector: String },

    #[error("no usable price for {ticker} in {market}")]
    MissingPrice { market: Market, ticker: Ticker },

    #[error("insufficient cash in {market} to buy {ticker}: need {needed}, have {available} (cents)")]
    InsufficientCash {
        market: Market,
        ticker: Ticker,
        needed: Cents,
        available: Cents,
    },

    #[error("cannot sell {requested} of {ticker} in {market}: only {held} held")]
    OverSell {
        market: Market,
        ticker: Ticker,
        requested: Quantity,
        held: Quantity,
    },

    #[error("invalid trade for {ticker}: {reason}")]
    InvalidTrade { ticker: Ticker, reason: &'static str },

    #[error("execution invariant violated in {market} on {date} for {ticker} (delta weight {delta_weight:.6}): {source}")]
    Execution {
        market: Market,
        date: NaiveDate,
        ticker: Ticker,
        delta_weight: f64,
        source: Box<Error>,
    },

    #[error("ledger already has an entry for {market} on {date}")]
    DuplicateLedgerEntry { market: Market, date: NaiveDate },

    #[error("invalid position snapshot: {0}")]
    InvalidSnapshot(String),

    #[cfg(feature = "persistence")]
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[cfg(feature = "persistence")]
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
