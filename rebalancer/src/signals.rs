//! Daily inputs: sector scores and prices, behind small collaborator traits.
//!
//! The scoring pipeline and the quote source live outside this crate; all
//! the run needs from them is "scores for market M today" and "prices for
//! market M today". File-backed implementations read the JSON documents
//! those collaborators publish.

use std::collections::BTreeMap;
use std::path::Path;

use log::warn;
use rustc_hash::FxHashSet;
use serde::Deserialize;

use sectorbook::{Bias, Market, PriceMap, SectorScore, bias_by_median, normalize_sector};

use crate::error::{Error, Result};
use crate::reference::read_json;

/// Supplies one market's sector scores for the day.
pub trait SignalProvider {
    fn scores(&self, market: Market) -> Result<Vec<SectorScore>>;
}

/// Supplies one market's latest prices, in major units.
pub trait PriceSource {
    fn prices(&self, market: Market) -> Result<PriceMap>;
}

/// One record of the scores file. `bias` may be omitted.
#[derive(Debug, Clone, Deserialize)]
struct ScoreRecord {
    sector: String,
    score: f64,
    #[serde(default)]
    bias: Option<Bias>,
}

/// Scores from a `{ "US": [ {"sector", "score", "bias"?}, ... ], ... }` file.
#[derive(Debug, Clone, Default)]
pub struct JsonScores {
    markets: BTreeMap<Market, Vec<SectorScore>>,
}

impl JsonScores {
    pub fn load(path: &Path) -> Result<Self> {
        let raw: BTreeMap<String, Vec<ScoreRecord>> = read_json(path)?;
        Self::from_raw(raw)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let raw = serde_json::from_str(json).map_err(|e| Error::Input(format!("scores: {e}")))?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: BTreeMap<String, Vec<ScoreRecord>>) -> Result<Self> {
        let mut markets = BTreeMap::new();
        for (key, records) in raw {
            let market: Market = key.parse()?;
            let mut seen = FxHashSet::default();
            for r in &records {
                if !r.score.is_finite() {
                    return Err(Error::Input(format!(
                        "{market}: score for '{}' is not a finite number",
                        r.sector
                    )));
                }
                if !seen.insert(normalize_sector(&r.sector)) {
                    return Err(Error::Input(format!(
                        "{market}: duplicate score for '{}'",
                        r.sector
                    )));
                }
            }
            markets.insert(market, with_bias(records));
        }
        Ok(Self { markets })
    }
}

/// Records that carry a bias keep it; the rest get one from the median rule,
/// computed over the market's scores.
fn with_bias(records: Vec<ScoreRecord>) -> Vec<SectorScore> {
    let all: Vec<(String, f64)> = records.iter().map(|r| (r.sector.clone(), r.score)).collect();
    let derived = bias_by_median(&all);
    records
        .into_iter()
        .zip(derived)
        .map(|(r, d)| SectorScore::new(r.sector, r.score, r.bias.unwrap_or(d.bias)))
        .collect()
}

impl SignalProvider for JsonScores {
    fn scores(&self, market: Market) -> Result<Vec<SectorScore>> {
        match self.markets.get(&market) {
            Some(s) => Ok(s.clone()),
            None => {
                warn!("no scores for {market} today; target is all cash");
                Ok(Vec::new())
            }
        }
    }
}

/// Prices from a flat `{ ticker: price }` file, shared by all markets.
#[derive(Debug, Clone, Default)]
pub struct JsonPrices {
    prices: PriceMap,
}

impl JsonPrices {
    pub fn load(path: &Path) -> Result<Self> {
        let raw: BTreeMap<String, f64> = read_json(path)?;
        Self::from_raw(raw)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let raw = serde_json::from_str(json).map_err(|e| Error::Input(format!("prices: {e}")))?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: BTreeMap<String, f64>) -> Result<Self> {
        let mut prices = PriceMap::default();
        for (ticker, px) in raw {
            if !px.is_finite() || px <= 0.0 {
                return Err(Error::Input(format!("price for {ticker} must be positive, got {px}")));
            }
            prices.insert(ticker.trim().to_string(), px);
        }
        Ok(Self { prices })
    }
}

impl PriceSource for JsonPrices {
    fn prices(&self, _market: Market) -> Result<PriceMap> {
        Ok(self.prices.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_and_median_bias() {
        let scores = JsonScores::from_json(
            r#"{
                "US": [
                    {"sector": "Tech", "score": 0.8, "bias": "LONG"},
                    {"sector": "Energy", "score": -0.6, "bias": "short"}
                ],
                "hk": [
                    {"sector": "tech", "score": 0.9},
                    {"sector": "financials", "score": 0.1},
                    {"sector": "energy", "score": -0.4}
                ]
            }"#,
        )
        .unwrap();

        let us = scores.scores(Market::US).unwrap();
        assert_eq!(us[0].bias, Bias::Long);
        assert_eq!(us[1].bias, Bias::Short);

        let hk = scores.scores(Market::HK).unwrap();
        let bias: Vec<_> = hk.iter().map(|s| (s.sector.as_str(), s.bias)).collect();
        assert_eq!(
            bias,
            vec![("tech", Bias::Long), ("financials", Bias::Long), ("energy", Bias::Short)]
        );

        assert!(scores.scores(Market::CN).unwrap().is_empty());
    }

    #[test]
    fn rejects_duplicate_sector() {
        let err = JsonScores::from_json(
            r#"{"US": [{"sector": "Tech", "score": 0.1}, {"sector": "tech", "score": 0.2}]}"#,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Input(_)));
    }

    #[test]
    fn rejects_unknown_market() {
        let err = JsonScores::from_json(r#"{"JP": []}"#).unwrap_err();
        assert!(matches!(err, Error::Engine(sectorbook::Error::UnknownMarket(_))));
    }

    #[test]
    fn prices_are_trimmed_and_shared() {
        let prices = JsonPrices::from_json(r#"{"XLK": 213.5, " 2800.HK ": 18.2}"#).unwrap();
        let hk = prices.prices(Market::HK).unwrap();
        assert_eq!(hk.len(), 2);
        assert_eq!(hk["2800.HK"], 18.2);
        assert_eq!(prices.prices(Market::US).unwrap(), hk);
    }

    #[test]
    fn rejects_non_positive_price() {
        assert!(JsonPrices::from_json(r#"{"XLK": 0.0}"#).is_err());
        assert!(JsonPrices::from_json(r#"{"XLK": -3.0}"#).is_err());
    }
}
