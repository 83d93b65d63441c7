//! Sector scores → target ETF weights for one market.
//!
//! Each configured sector that also has a score today contributes its
//! configured market weight, split evenly across the ETF tickers mapped for
//! the sector's bias. The score only gates inclusion (via an optional
//! absolute-score threshold); it never ranks tickers within a sector.
//!
//! # Example
//!
//! ```
//! use sectorbook::allocation::{AllocationBuilder, BiasClass, EtfMap, MarketWeightConfig};
//! use sectorbook::{Bias, Market, SectorScore};
//!
//! let mut weights = MarketWeightConfig::new();
//! weights.set(Market::US, "Tech", 0.5).unwrap();
//! weights.set(Market::US, "Energy", 0.5).unwrap();
//!
//! let mut etfs = EtfMap::new();
//! etfs.insert(Market::US, "Tech", BiasClass::Long, ["XLK"]);
//! etfs.insert(Market::US, "Energy", BiasClass::InverseUs, ["SRS"]);
//!
//! let scores = [
//!     SectorScore::new("Tech", 0.8, Bias::Long),
//!     SectorScore::new("Energy", -0.6, Bias::Short),
//! ];
//!
//! let target = AllocationBuilder::new()
//!     .build(Market::US, &scores, &weights, &etfs)
//!     .unwrap();
//! assert_eq!(target.weight("XLK"), 0.5);
//! assert_eq!(target.weight("SRS"), 0.5);
//! ```

use std::collections::BTreeMap;
use std::fmt;

use log::{debug, warn};

use crate::error::{Error, Result};
use crate::signal::{Bias, SectorScore, normalize_sector};
use crate::types::{Market, Ticker};

// ============================================================================
// Reference data
// ============================================================================

/// Ticker class within a sector's ETF mapping.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BiasClass {
    /// Standard (long) sector ETFs.
    Long,
    /// The market's own inverse ETFs.
    Short,
    /// US-listed inverse ETFs, used for short-biased US sectors.
    InverseUs,
}

impl BiasClass {
    /// Parse a class key from the ETF map file.
    pub fn parse(key: &str) -> Option<Self> {
        match key.trim() {
            "long" | "LONG" | "Long" => Some(BiasClass::Long),
            "short" | "SHORT" | "Short" | "inverse" => Some(BiasClass::Short),
            "inverseUS" | "inverseus" | "inverse_us" | "INVERSEUS" => Some(BiasClass::InverseUs),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BiasClass::Long => "long",
            BiasClass::Short => "short",
            BiasClass::InverseUs => "inverseUS",
        }
    }
}

impl fmt::Display for BiasClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-market sector weights (fractions of the market's account value).
///
/// Weights for a market should sum to at most 1.0; a larger total is
/// accepted with a warning and renormalized at allocation time.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MarketWeightConfig {
    markets: BTreeMap<Market, BTreeMap<String, f64>>,
}

impl MarketWeightConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set one sector's weight, validating it lies in `[0, 1]`.
    pub fn set(&mut self, market: Market, sector: &str, weight: f64) -> Result<()> {
        let sector = normalize_sector(sector);
        if !weight.is_finite() || !(0.0..=1.0).contains(&weight) {
            return Err(Error::InvalidWeight {
                market,
                sector,
                weight,
            });
        }
        self.markets.entry(market).or_default().insert(sector, weight);
        Ok(())
    }

    /// Build from the loosely-typed `market → sector → weight` mapping.
    pub fn from_raw(raw: BTreeMap<String, BTreeMap<String, f64>>) -> Result<Self> {
        let mut config = Self::new();
        for (market_key, sectors) in raw {
            let market: Market = market_key.parse()?;
            for (sector, weight) in sectors {
                let key = normalize_sector(&sector);
                if config.weight(market, &key).is_some() {
                    return Err(Error::DuplicateSectorWeight { market, sector: key });
                }
                config.set(market, &sector, weight)?;
            }
            let total = config.total(market);
            if total > 1.0 + 1e-9 {
                warn!("{market} sector weights sum to {total:.4} (> 1.0); renormalizing targets");
            }
        }
        Ok(config)
    }

    /// Configured (sector, weight) pairs for a market, in sector order.
    pub fn sectors(&self, market: Market) -> impl Iterator<Item = (&str, f64)> {
        self.markets
            .get(&market)
            .into_iter()
            .flat_map(|m| m.iter().map(|(s, w)| (s.as_str(), *w)))
    }

    pub fn weight(&self, market: Market, sector: &str) -> Option<f64> {
        self.markets
            .get(&market)
            .and_then(|m| m.get(&normalize_sector(sector)).copied())
    }

    pub fn total(&self, market: Market) -> f64 {
        self.sectors(market).map(|(_, w)| w).sum()
    }

    pub fn markets(&self) -> impl Iterator<Item = Market> + '_ {
        self.markets.keys().copied()
    }
}

/// Ticker lists for one sector, by bias class.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SectorEtfs {
    pub long: Vec<Ticker>,
    pub short: Vec<Ticker>,
    pub inverse_us: Vec<Ticker>,
}

impl SectorEtfs {
    fn class(&self, class: BiasClass) -> &[Ticker] {
        match class {
            BiasClass::Long => &self.long,
            BiasClass::Short => &self.short,
            BiasClass::InverseUs => &self.inverse_us,
        }
    }

    fn class_mut(&mut self, class: BiasClass) -> &mut Vec<Ticker> {
        match class {
            BiasClass::Long => &mut self.long,
            BiasClass::Short => &mut self.short,
            BiasClass::InverseUs => &mut self.inverse_us,
        }
    }
}

/// Static `(market, sector, bias class) → tickers` reference data.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EtfMap {
    markets: BTreeMap<Market, BTreeMap<String, SectorEtfs>>,
}

impl EtfMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add tickers to a sector's class. Blank and repeated tickers are ignored.
    pub fn insert<I, T>(&mut self, market: Market, sector: &str, class: BiasClass, tickers: I)
    where
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        let list = self
            .markets
            .entry(market)
            .or_default()
            .entry(normalize_sector(sector))
            .or_default()
            .class_mut(class);
        for t in tickers {
            let t = t.as_ref().trim();
            if !t.is_empty() && !list.iter().any(|x| x == t) {
                list.push(t.to_string());
            }
        }
    }

    /// Build from the loosely-typed `market → sector → class → [ticker]` mapping.
    pub fn from_raw(
        raw: BTreeMap<String, BTreeMap<String, BTreeMap<String, Vec<String>>>>,
    ) -> Result<Self> {
        let mut map = Self::new();
        for (market_key, sectors) in raw {
            let market: Market = market_key.parse()?;
            for (sector, classes) in sectors {
                for (class_key, tickers) in classes {
                    let class = BiasClass::parse(&class_key).ok_or_else(|| Error::UnknownBiasClass {
                        market,
                        sector: sector.clone(),
                        class: class_key.clone(),
                    })?;
                    let listing = if class == BiasClass::InverseUs {
                        Market::US
                    } else {
                        market
                    };
                    for t in &tickers {
                        let found = Market::from_ticker(t);
                        if found != listing {
                            warn!("{market}/{sector}/{class}: {t} looks like a {found} listing");
                        }
                    }
                    map.insert(market, &sector, class, tickers);
                }
            }
        }
        Ok(map)
    }

    /// Tickers for one class; empty when nothing is mapped.
    pub fn tickers(&self, market: Market, sector: &str, class: BiasClass) -> &[Ticker] {
        self.markets
            .get(&market)
            .and_then(|m| m.get(&normalize_sector(sector)))
            .map(|etfs| etfs.class(class))
            .unwrap_or(&[])
    }

    /// Resolve the tickers to hold for a sector with the given bias.
    ///
    /// SHORT sectors use `inverseUS` tickers in the US (then the US `short`
    /// class), and the market's own `short` class elsewhere.
    pub fn resolve(&self, market: Market, sector: &str, bias: Bias) -> Result<&[Ticker]> {
        match bias {
            Bias::Long => {
                let long = self.tickers(market, sector, BiasClass::Long);
                if long.is_empty() {
                    return Err(Error::MissingEtfMapping {
                        market,
                        sector: normalize_sector(sector),
                        class: BiasClass::Long.as_str(),
                    });
                }
                Ok(long)
            }
            Bias::Short => {
                let order: &[BiasClass] = if market == Market::US {
                    &[BiasClass::InverseUs, BiasClass::Short]
                } else {
                    &[BiasClass::Short]
                };
                order
                    .iter()
                    .map(|&c| self.tickers(market, sector, c))
                    .find(|t| !t.is_empty())
                    .ok_or_else(|| Error::UnsupportedShortSector {
                        market,
                        sector: normalize_sector(sector),
                    })
            }
        }
    }
}

// ============================================================================
// Target allocation
// ============================================================================

/// Why a configured, scored sector got no allocation.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "kind", rename_all = "snake_case"))]
pub enum Exclusion {
    BelowThreshold { score: f64, threshold: f64 },
    UncoveredShort,
}

#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ExcludedSector {
    pub sector: String,
    pub reason: Exclusion,
}

/// Desired post-trade weights over tickers for one market.
///
/// Weights sum to at most 1.0; the remainder is held as cash.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TargetAllocation {
    market: Market,
    weights: BTreeMap<Ticker, f64>,
    #[cfg_attr(feature = "serde", serde(default))]
    excluded: Vec<ExcludedSector>,
    /// Factor applied to bring an over-allocated total back to 1.0.
    scale: f64,
}

impl TargetAllocation {
    /// Empty allocation: everything in cash.
    pub fn cash_only(market: Market) -> Self {
        Self {
            market,
            weights: BTreeMap::new(),
            excluded: Vec::new(),
            scale: 1.0,
        }
    }

    /// Target from explicit (ticker, weight) pairs. Repeated tickers accumulate.
    pub fn from_weights<I, T>(market: Market, weights: I) -> Self
    where
        I: IntoIterator<Item = (T, f64)>,
        T: Into<Ticker>,
    {
        let mut target = Self::cash_only(market);
        for (t, w) in weights {
            *target.weights.entry(t.into()).or_insert(0.0) += w;
        }
        target
    }

    pub fn market(&self) -> Market {
        self.market
    }

    /// Target weight of a ticker (0.0 when absent).
    pub fn weight(&self, ticker: &str) -> f64 {
        self.weights.get(ticker).copied().unwrap_or(0.0)
    }

    /// (ticker, weight) pairs in ticker order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.weights.iter().map(|(t, w)| (t.as_str(), *w))
    }

    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    pub fn total(&self) -> f64 {
        self.weights.values().sum()
    }

    /// Implicit cash weight.
    pub fn cash_weight(&self) -> f64 {
        (1.0 - self.total()).max(0.0)
    }

    pub fn excluded(&self) -> &[ExcludedSector] {
        &self.excluded
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }
}

// ============================================================================
// Builder
// ============================================================================

/// What to do with a SHORT sector that has no inverse coverage.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum UncoveredShort {
    /// Fail the build with `UnsupportedShortSector`.
    #[default]
    Abort,
    /// Leave the sector out and record it in `excluded`.
    Skip,
}

/// Turns sector scores into a [`TargetAllocation`].
#[derive(Clone, Debug, Default)]
pub struct AllocationBuilder {
    /// Sectors whose |score| is below this get no allocation.
    pub min_abs_score: Option<f64>,
    pub uncovered_short: UncoveredShort,
}

impl AllocationBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_min_abs_score(mut self, threshold: f64) -> Self {
        self.min_abs_score = Some(threshold);
        self
    }

    pub fn with_uncovered_short(mut self, policy: UncoveredShort) -> Self {
        self.uncovered_short = policy;
        self
    }

    /// Build the target allocation for one market.
    ///
    /// Deterministic: sectors are visited in sorted order regardless of the
    /// order of `scores`.
    pub fn build(
        &self,
        market: Market,
        scores: &[SectorScore],
        weight_config: &MarketWeightConfig,
        etf_map: &EtfMap,
    ) -> Result<TargetAllocation> {
        let mut by_sector: BTreeMap<String, &SectorScore> = BTreeMap::new();
        for s in scores {
            let sector = normalize_sector(&s.sector);
            if !s.score.is_finite() {
                return Err(Error::InvalidScore {
                    market,
                    sector,
                    score: s.score,
                });
            }
            if by_sector.insert(sector.clone(), s).is_some() {
                return Err(Error::DuplicateSectorScore { market, sector });
            }
        }

        let mut target = TargetAllocation::cash_only(market);

        for (sector, weight) in weight_config.sectors(market) {
            let Some(score) = by_sector.remove(sector) else {
                debug!("{market}/{sector}: configured but no score today");
                continue;
            };
            if weight <= 0.0 {
                continue;
            }
            if let Some(threshold) = self.min_abs_score {
                if score.score.abs() < threshold {
                    debug!("{market}/{sector}: |{}| below threshold {threshold}", score.score);
                    target.excluded.push(ExcludedSector {
                        sector: sector.to_string(),
                        reason: Exclusion::BelowThreshold {
                            score: score.score,
                            threshold,
                        },
                    });
                    continue;
                }
            }

            let tickers = match etf_map.resolve(market, sector, score.bias) {
                Ok(t) => t,
                Err(Error::UnsupportedShortSector { .. })
                    if self.uncovered_short == UncoveredShort::Skip =>
                {
                    debug!("{market}/{sector}: short bias without inverse coverage, skipped");
                    target.excluded.push(ExcludedSector {
                        sector: sector.to_string(),
                        reason: Exclusion::UncoveredShort,
                    });
                    continue;
                }
                Err(e) => return Err(e),
            };

            let per_ticker = weight / tickers.len() as f64;
            for t in tickers {
                *target.weights.entry(t.clone()).or_insert(0.0) += per_ticker;
            }
        }

        for sector in by_sector.keys() {
            debug!("{market}/{sector}: scored but has no configured weight");
        }

        let total = target.total();
        if total > 1.0 {
            warn!("{market} target weights total {total:.4}; scaling down to 1.0");
            for w in target.weights.values_mut() {
                *w /= total;
            }
            target.scale = 1.0 / total;
        }

        Ok(target)
    }
}
