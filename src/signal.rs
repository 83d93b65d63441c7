//! Sector scores delivered by the signal collaborator.

use std::fmt;

/// Sentiment direction of a sector, selecting standard or inverse ETFs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Bias {
    #[cfg_attr(feature = "serde", serde(alias = "LONG", alias = "Long"))]
    Long,
    #[cfg_attr(feature = "serde", serde(alias = "SHORT", alias = "Short"))]
    Short,
}

impl fmt::Display for Bias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Bias::Long => write!(f, "LONG"),
            Bias::Short => write!(f, "SHORT"),
        }
    }
}

/// A normalized sentiment score for one sector in one market on one day.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SectorScore {
    pub sector: String,
    pub score: f64,
    pub bias: Bias,
}

impl SectorScore {
    pub fn new(sector: impl Into<String>, score: f64, bias: Bias) -> Self {
        Self {
            sector: sector.into(),
            score,
            bias,
        }
    }
}

/// Derive a bias for each sector from its score alone.
///
/// Sectors scoring at or above the upper median are LONG, the rest SHORT.
/// Used when the signal source publishes scores without a direction.
pub fn bias_by_median(scores: &[(String, f64)]) -> Vec<SectorScore> {
    if scores.is_empty() {
        return Vec::new();
    }
    let mut sorted: Vec<f64> = scores.iter().map(|(_, s)| *s).collect();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted[sorted.len() / 2];

    scores
        .iter()
        .map(|(sector, score)| {
            let bias = if *score >= mid { Bias::Long } else { Bias::Short };
            SectorScore::new(sector.clone(), *score, bias)
        })
        .collect()
}

/// Canonical form of a sector name: trimmed, lower-cased, `_` as spaces,
/// with the common aliases folded together.
pub fn normalize_sector(name: &str) -> String {
    let lowered = name.trim().to_lowercase().replace('_', " ");
    let canonical = match lowered.as_str() {
        "real" | "real estate" => "real estate",
        "health care" | "healthcare" => "health",
        "consumer discretionary" => "consumer",
        "consumer staples" => "consumer staples",
        other => other,
    };
    canonical.to_string()
}
