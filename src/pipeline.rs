//! One market-day, end to end: scores → target → trades.
//!
//! Markets are independent. [`rebalance_markets`] runs each market against
//! its own partition of the book and returns one result per market; a
//! failure in one market does not affect the others. With the `parallel`
//! feature, [`par_rebalance_markets`] does the same on the rayon pool.

use crate::allocation::{AllocationBuilder, EtfMap, MarketWeightConfig, TargetAllocation};
use crate::error::Result;
use crate::executor::{Execution, ExecutionLimits, execute};
use crate::portfolio::PositionBook;
use crate::signal::SectorScore;
use crate::types::{Market, PriceMap};

/// Static reference data shared by every market in a run.
#[derive(Clone, Copy, Debug)]
pub struct Reference<'a> {
    pub builder: &'a AllocationBuilder,
    pub weights: &'a MarketWeightConfig,
    pub etf_map: &'a EtfMap,
}

/// Per-market inputs for one day.
#[derive(Clone, Debug)]
pub struct MarketInputs {
    pub market: Market,
    pub scores: Vec<SectorScore>,
    pub prices: PriceMap,
    pub limits: ExecutionLimits,
}

/// Target and execution for one market-day.
#[derive(Clone, Debug)]
pub struct MarketRun {
    pub target: TargetAllocation,
    pub execution: Execution,
}

/// Build the target for one market and execute it against `book`.
///
/// `book` is not modified. The returned execution's book holds the
/// resulting state for every market `book` had; merge only
/// `inputs.market` back.
pub fn rebalance_market(
    reference: Reference<'_>,
    book: &PositionBook,
    inputs: &MarketInputs,
) -> Result<MarketRun> {
    let market = inputs.market;
    let target = reference
        .builder
        .build(market, &inputs.scores, reference.weights, reference.etf_map)?;
    let execution = execute(market, &target, book, &inputs.prices, &inputs.limits)?;
    Ok(MarketRun { target, execution })
}

/// Run every market in `inputs`, sequentially, each against its own
/// partition of `book`.
pub fn rebalance_markets(
    reference: Reference<'_>,
    book: &PositionBook,
    inputs: &[MarketInputs],
) -> Vec<(Market, Result<MarketRun>)> {
    inputs
        .iter()
        .map(|i| {
            let part = book.partition(i.market);
            (i.market, rebalance_market(reference, &part, i))
        })
        .collect()
}

/// Parallel [`rebalance_markets`]. Results come back in input order.
#[cfg(feature = "parallel")]
pub fn par_rebalance_markets(
    reference: Reference<'_>,
    book: &PositionBook,
    inputs: &[MarketInputs],
) -> Vec<(Market, Result<MarketRun>)> {
    use rayon::prelude::*;

    inputs
        .par_iter()
        .map(|i| {
            let part = book.partition(i.market);
            (i.market, rebalance_market(reference, &part, i))
        })
        .collect()
}
