//! Persistence layer.
//!
//! `BetStore` is the repository the engine writes through: upserts keyed on
//! each record's natural key, plus the filtered reads the reconciler and
//! calibrator need. `MemoryStore` backs tests and dry runs; `SqliteStore`
//! is the durable implementation.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{
    AccuracyRecord, Bet, BetType, BookRecord, CalibrationBucket, MarketRecord, RunnerBookRecord,
    RunnerRecord,
};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

#[async_trait]
pub trait BetStore: Send + Sync {
    // -- Markets and books -------------------------------------------------

    /// Keyed on `market_id`. Runners are stored separately.
    async fn upsert_market(&self, market: &MarketRecord) -> Result<()>;

    /// Keyed on `(market_id, selection_id)`.
    async fn upsert_runner(&self, runner: &RunnerRecord) -> Result<()>;

    /// Keyed on `(market_id, version)`.
    async fn upsert_book(&self, book: &BookRecord) -> Result<()>;

    /// Keyed on `(market_id, version, selection_id)`.
    async fn upsert_runner_book(&self, runner_book: &RunnerBookRecord) -> Result<()>;

    async fn get_market(&self, market_id: &str) -> Result<Option<MarketRecord>>;

    // -- Bets --------------------------------------------------------------

    /// Keyed on `(bet_id, market_id, runner_id)`.
    async fn upsert_bet(&self, bet: &Bet) -> Result<()>;

    async fn get_bet(&self, bet_id: &str) -> Result<Option<Bet>>;

    /// Bets with no outcome whose status is neither LAPSED nor CANCELLED.
    async fn outstanding_bets(&self) -> Result<Vec<Bet>>;

    async fn bets_for_market(&self, market_id: &str) -> Result<Vec<Bet>>;

    // -- Calibration -------------------------------------------------------

    /// Replace every bucket for `bet_type` with `buckets`.
    async fn replace_calibration(&self, bet_type: BetType, buckets: &[CalibrationBucket])
        -> Result<()>;

    async fn calibration_buckets(&self, bet_type: BetType) -> Result<Vec<CalibrationBucket>>;

    // -- Accuracy history --------------------------------------------------

    /// Keyed on `(market_id, runner_id, bet_type)`. A row whose result is
    /// already known is left alone.
    async fn record_accuracy(&self, records: &[AccuracyRecord]) -> Result<()>;

    /// Markets with at least one row still awaiting a result.
    async fn unresolved_accuracy_markets(&self) -> Result<Vec<String>>;

    /// Apply results for one market. `None` discards the runner's rows
    /// (withdrawn). Returns the number of rows changed.
    async fn resolve_accuracy(&self, market_id: &str, results: &[(u64, Option<bool>)])
        -> Result<usize>;

    /// Drop the rows of one market that are still pending. Returns the
    /// number of rows removed.
    async fn discard_accuracy(&self, market_id: &str) -> Result<usize>;

    /// Resolved `(implied_probability, won)` pairs for one bet type.
    async fn accuracy_history(&self, bet_type: BetType) -> Result<Vec<(f64, bool)>>;
}
