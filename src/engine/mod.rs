//! Core engine: discover races, run the per-race pipeline, reconcile bets.

pub mod pipeline;
pub mod predictor;
pub mod reconciler;
pub mod results;
pub mod retry;
pub mod scanner;
pub mod single_flight;

pub use pipeline::{CycleOutcome, RacePipeline, RaceReport};
pub use reconciler::{ReconcileReport, Reconciler};
pub use retry::RetryConfig;
pub use scanner::MarketScanner;
