//! TOML configuration loading and validation.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use sectorbook::{AllocationBuilder, Cents, ExecutionLimits, Market, UncoveredShort, to_cents};

use crate::error::{Error, Result};

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub data: DataConfig,
    #[serde(default)]
    pub allocation: AllocationConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
    /// Per-market settings, keyed by market code. When the table is absent
    /// every market runs with defaults.
    #[serde(default)]
    pub markets: BTreeMap<String, MarketConfig>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Locations of reference data and the position snapshot.
#[derive(Debug, Clone, Deserialize)]
pub struct DataConfig {
    pub weights: PathBuf,
    pub etf_map: PathBuf,
    pub positions: PathBuf,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AllocationConfig {
    pub min_abs_score: Option<f64>,
    #[serde(default)]
    pub uncovered_short: UncoveredShort,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionConfig {
    pub turnover_limit: Option<f64>,
    pub lot_size: Option<f64>,
    /// Smallest trade notional, in major units.
    #[serde(default = "default_min_trade")]
    pub min_trade: f64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            turnover_limit: None,
            lot_size: None,
            min_trade: default_min_trade(),
        }
    }
}

fn default_min_trade() -> f64 {
    1.0
}

#[derive(Debug, Clone, Deserialize)]
pub struct MarketConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Soft cap on BUY notional per day, in major units.
    pub budget: Option<f64>,
    /// Starting cash written by `init`, in major units.
    #[serde(default = "default_initial_cash")]
    pub initial_cash: f64,
    pub turnover_limit: Option<f64>,
    pub lot_size: Option<f64>,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            budget: None,
            initial_cash: default_initial_cash(),
            turnover_limit: None,
            lot_size: None,
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_initial_cash() -> f64 {
    400_000.0
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_dir")]
    pub dir: String,
    #[serde(default = "default_ledger_file")]
    pub ledger_file: String,
    #[serde(default = "default_audit_file")]
    pub audit_file: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            dir: default_log_dir(),
            ledger_file: default_ledger_file(),
            audit_file: default_audit_file(),
        }
    }
}

fn default_log_dir() -> String {
    "./output".into()
}
fn default_ledger_file() -> String {
    "ledger.jsonl".into()
}
fn default_audit_file() -> String {
    "audit.jsonl".into()
}

impl Config {
    /// Load config from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| Error::ConfigRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_toml(&contents)
    }

    /// Parse and validate a TOML string.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate config invariants.
    fn validate(&self) -> Result<()> {
        if let Some(t) = self.allocation.min_abs_score {
            if !t.is_finite() || t < 0.0 {
                return Err(Error::Config("min_abs_score must be >= 0".into()));
            }
        }
        check_limits("execution", self.execution.turnover_limit, self.execution.lot_size)?;
        if !self.execution.min_trade.is_finite() || self.execution.min_trade < 0.0 {
            return Err(Error::Config("min_trade must be >= 0".into()));
        }

        let mut seen = Vec::new();
        for (key, m) in &self.markets {
            let market: Market = key
                .parse()
                .map_err(|_| {
                    Error::Config(format!("unknown market '{key}' (expected US, HK or CN)"))
                })?;
            if seen.contains(&market) {
                return Err(Error::Config(format!("market {market} configured twice")));
            }
            seen.push(market);

            check_limits(&format!("markets.{key}"), m.turnover_limit, m.lot_size)?;
            if let Some(b) = m.budget {
                if !b.is_finite() || b < 0.0 {
                    return Err(Error::Config(format!("markets.{key}.budget must be >= 0")));
                }
            }
            if !m.initial_cash.is_finite() || m.initial_cash < 0.0 {
                return Err(Error::Config(format!("markets.{key}.initial_cash must be >= 0")));
            }
        }
        Ok(())
    }

    /// Settings for one market, or `None` when it is not configured.
    pub fn market(&self, market: Market) -> Option<MarketConfig> {
        if self.markets.is_empty() {
            return Some(MarketConfig::default());
        }
        self.markets
            .iter()
            .find(|(k, _)| k.parse::<Market>().ok() == Some(market))
            .map(|(_, m)| m.clone())
    }

    /// Markets to run, in `US, HK, CN` order.
    pub fn enabled_markets(&self) -> Vec<Market> {
        Market::ALL
            .into_iter()
            .filter(|&m| self.market(m).is_some_and(|c| c.enabled))
            .collect()
    }

    /// Executor limits for a market, with per-market overrides applied.
    pub fn limits_for(&self, market: Market) -> ExecutionLimits {
        let m = self.market(market).unwrap_or_default();
        let mut limits =
            ExecutionLimits::default().with_min_trade(to_cents(self.execution.min_trade));
        if let Some(t) = m.turnover_limit.or(self.execution.turnover_limit) {
            limits = limits.with_turnover_limit(t);
        }
        if let Some(b) = m.budget {
            limits = limits.with_budget(to_cents(b));
        }
        if let Some(lot) = m.lot_size.or(self.execution.lot_size) {
            limits = limits.with_lot_size(lot);
        }
        limits
    }

    pub fn initial_cash(&self, market: Market) -> Cents {
        to_cents(self.market(market).unwrap_or_default().initial_cash)
    }

    pub fn allocation_builder(&self) -> AllocationBuilder {
        let builder =
            AllocationBuilder::new().with_uncovered_short(self.allocation.uncovered_short);
        match self.allocation.min_abs_score {
            Some(t) => builder.with_min_abs_score(t),
            None => builder,
        }
    }

    /// Full path to the ledger file.
    pub fn ledger_path(&self) -> PathBuf {
        Path::new(&self.logging.dir).join(&self.logging.ledger_file)
    }

    /// Full path to the audit log file.
    pub fn audit_path(&self) -> PathBuf {
        Path::new(&self.logging.dir).join(&self.logging.audit_file)
    }
}

fn check_limits(section: &str, turnover: Option<f64>, lot: Option<f64>) -> Result<()> {
    if let Some(t) = turnover {
        if t.is_nan() || t < 0.0 {
            return Err(Error::Config(format!("{section}.turnover_limit must be >= 0")));
        }
    }
    if let Some(l) = lot {
        if !l.is_finite() || l <= 0.0 {
            return Err(Error::Config(format!("{section}.lot_size must be > 0")));
        }
    }
    Ok(())
}
