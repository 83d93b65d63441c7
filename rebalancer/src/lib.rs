//! sectorbook-rebalancer: daily sector ETF rebalancer built on sectorbook.
//!
//! Reads the day's sector scores and prices, builds each enabled market's
//! target allocation, plans and applies the trades against the saved
//! position snapshot, then (after confirmation) writes the new snapshot,
//! the ledger entries and an audit trail.

pub mod audit;
pub mod config;
pub mod error;
pub mod execution;
pub mod reconcile;
pub mod reference;
pub mod signals;
