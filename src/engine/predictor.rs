//! Per-runner scores fed into calibration.
//!
//! The pipeline treats a score as an opaque probability-like number: it is
//! recorded in the accuracy history and mapped through the calibration
//! table, nothing more.

use crate::types::{BetType, RunnerQuote};

pub trait Predictor: Send + Sync {
    fn name(&self) -> &str;

    /// Score for one runner, or `None` if the runner cannot be scored.
    fn score(&self, bet_type: BetType, quote: &RunnerQuote) -> Option<f64>;
}

/// Scores a runner by its market-implied probability (`1 / odds`).
#[derive(Debug, Default, Clone, Copy)]
pub struct MarketImpliedPredictor;

impl Predictor for MarketImpliedPredictor {
    fn name(&self) -> &str {
        "market-implied"
    }

    fn score(&self, _bet_type: BetType, quote: &RunnerQuote) -> Option<f64> {
        if !quote.has_odds || !(quote.implied_probability > 0.0) {
            return None;
        }
        Some(quote.implied_probability)
    }
}
