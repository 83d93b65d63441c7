//! Core types: Market, Cents, Quantity, Ticker

use std::fmt;
use std::str::FromStr;

use rustc_hash::FxHashMap;

use crate::error::Error;

/// Amount of money in the market's smallest currency unit (cents, fen, ...).
///
/// `40_000_000` represents 400,000.00 in the market currency. Cash and trade
/// notionals are kept fixed-point so that cash conservation is exact.
pub type Cents = i64;

/// Number of units held or traded. Fractional by default; see `lot_size`.
pub type Quantity = f64;

/// Exchange ticker symbol (e.g. `XLK`, `2800.HK`, `510300.SS`).
pub type Ticker = String;

/// Latest quote per ticker, in major units.
pub type PriceMap = FxHashMap<Ticker, f64>;

/// Quantities closer to zero than this are treated as flat.
pub const QTY_EPSILON: f64 = 1e-9;

/// An independent trading/allocation domain with its own cash, positions
/// and ETF universe.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Market {
    US,
    HK,
    CN,
}

impl Market {
    pub const ALL: [Market; 3] = [Market::US, Market::HK, Market::CN];

    pub fn as_str(self) -> &'static str {
        match self {
            Market::US => "US",
            Market::HK => "HK",
            Market::CN => "CN",
        }
    }

    /// Infer the listing market from a ticker suffix.
    ///
    /// `.HK` is Hong Kong; `.SS`, `.SZ` and `.SH` are mainland China;
    /// everything else is treated as a US listing.
    pub fn from_ticker(ticker: &str) -> Market {
        let upper = ticker.trim().to_ascii_uppercase();
        if upper.ends_with(".HK") {
            Market::HK
        } else if upper.ends_with(".SS") || upper.ends_with(".SZ") || upper.ends_with(".SH") {
            Market::CN
        } else {
            Market::US
        }
    }
}

impl fmt::Display for Market {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Market {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "US" => Ok(Market::US),
            "HK" => Ok(Market::HK),
            "CN" => Ok(Market::CN),
            _ => Err(Error::UnknownMarket(s.to_string())),
        }
    }
}

/// Convert a major-unit amount (e.g. `1234.56`) to cents.
#[inline]
pub fn to_cents(amount: f64) -> Cents {
    (amount * 100.0).round() as Cents
}

/// Convert cents back to a major-unit amount.
#[inline]
pub fn from_cents(cents: Cents) -> f64 {
    cents as f64 / 100.0
}

/// Format cents as `1,234.56` (no currency sign; markets differ).
pub fn format_cents(cents: Cents) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs = cents.unsigned_abs();
    let units = (abs / 100).to_string();
    let mut grouped = String::with_capacity(units.len() + units.len() / 3);
    for (i, ch) in units.chars().enumerate() {
        if i > 0 && (units.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    format!("{sign}{grouped}.{:02}", abs % 100)
}
