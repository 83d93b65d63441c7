//! Error types for the rebalancer.

use std::path::PathBuf;

/// All errors that can occur during rebalancer operation.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("failed to read config file {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("input error: {0}")]
    Input(String),

    #[error("failed to read {path}: {source}")]
    InputRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    InputParse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error(transparent)]
    Engine(#[from] sectorbook::Error),

    #[error("{failed} of {total} markets failed")]
    MarketsFailed { failed: usize, total: usize },

    #[error("execution aborted: {0}")]
    Aborted(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
