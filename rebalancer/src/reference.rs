//! Static reference data: per-market sector weights and the sector→ETF map.
//!
//! Both files are loosely-typed JSON objects keyed by market code. They are
//! parsed into the engine's typed structures once, at load, so a malformed
//! weight or an unknown bias class fails the run before anything trades.

use std::collections::BTreeMap;
use std::path::Path;

use serde::de::DeserializeOwned;

use sectorbook::{EtfMap, MarketWeightConfig};

use crate::error::{Error, Result};

/// Typed reference data for one run.
#[derive(Debug, Clone)]
pub struct ReferenceData {
    pub weights: MarketWeightConfig,
    pub etf_map: EtfMap,
}

impl ReferenceData {
    /// Load `market → sector → weight` and `market → sector → class → [ticker]`.
    pub fn load(weights: &Path, etf_map: &Path) -> Result<Self> {
        let raw_weights: BTreeMap<String, BTreeMap<String, f64>> = read_json(weights)?;
        let raw_etfs: BTreeMap<String, BTreeMap<String, BTreeMap<String, Vec<String>>>> =
            read_json(etf_map)?;
        Ok(Self {
            weights: MarketWeightConfig::from_raw(raw_weights)?,
            etf_map: EtfMap::from_raw(raw_etfs)?,
        })
    }

    /// Parse both documents from strings (useful for testing).
    pub fn from_json(weights: &str, etf_map: &str) -> Result<Self> {
        let raw_weights =
            serde_json::from_str(weights).map_err(|e| Error::Input(format!("weights: {e}")))?;
        let raw_etfs =
            serde_json::from_str(etf_map).map_err(|e| Error::Input(format!("etf map: {e}")))?;
        Ok(Self {
            weights: MarketWeightConfig::from_raw(raw_weights)?,
            etf_map: EtfMap::from_raw(raw_etfs)?,
        })
    }
}

/// Read and deserialize a JSON file, keeping the path in any error.
pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let contents = std::fs::read_to_string(path).map_err(|e| Error::InputRead {
        path: path.to_path_buf(),
        source: e,
    })?;
    serde_json::from_str(&contents).map_err(|e| Error::InputParse {
        path: path.to_path_buf(),
        source: e,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use sectorbook::{Bias, BiasClass, Market};

    const WEIGHTS: &str = r#"{
        "US": {"Tech": 0.3, "Energy": 0.2, "health_care": 0.1},
        "HK": {"tech": 0.5}
    }"#;

    const ETFS: &str = r#"{
        "US": {
            "Tech": {"long": ["XLK", "VGT"], "inverseUS": ["REW"]},
            "Energy": {"long": ["XLE"], "inverseUS": ["ERY"]},
            "healthcare": {"long": ["XLV"]}
        },
        "HK": {
            "tech": {"long": ["3067.HK"], "short": ["7552.HK"]}
        }
    }"#;

    #[test]
    fn parses_and_normalizes() {
        let data = ReferenceData::from_json(WEIGHTS, ETFS).unwrap();
        assert_eq!(data.weights.weight(Market::US, "tech"), Some(0.3));
        assert_eq!(data.weights.weight(Market::US, "Health"), Some(0.1));
        assert_eq!(data.etf_map.tickers(Market::US, "tech", BiasClass::Long), ["XLK", "VGT"]);
        assert_eq!(data.etf_map.tickers(Market::US, "health", BiasClass::Long), ["XLV"]);
        assert_eq!(data.etf_map.resolve(Market::HK, "Tech", Bias::Short).unwrap(), ["7552.HK"]);
    }

    #[test]
    fn rejects_out_of_range_weight() {
        let err = ReferenceData::from_json(r#"{"US": {"tech": 1.5}}"#, ETFS).unwrap_err();
        assert!(matches!(err, Error::Engine(sectorbook::Error::InvalidWeight { .. })));
    }

    #[test]
    fn rejects_unknown_market_and_class() {
        let err = ReferenceData::from_json(r#"{"JP": {"tech": 0.5}}"#, ETFS).unwrap_err();
        assert!(matches!(err, Error::Engine(sectorbook::Error::UnknownMarket(_))));

        let bad_class = r#"{"US": {"tech": {"sideways": ["X"]}}}"#;
        let err = ReferenceData::from_json(WEIGHTS, bad_class).unwrap_err();
        assert!(matches!(err, Error::Engine(sectorbook::Error::UnknownBiasClass { .. })));
    }

    #[test]
    fn load_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let weights = dir.path().join("weights.json");
        std::fs::write(&weights, "{ not json").unwrap();
        let err = ReferenceData::load(&weights, &dir.path().join("etfs.json")).unwrap_err();
        match err {
            Error::InputParse { path, .. } => assert_eq!(path, weights),
            other => panic!("unexpected error: {other}"),
        }
    }
}
