//! Accuracy history and calibration rebuilds.
//!
//! Every allocated market leaves one accuracy row per scored runner. Once
//! the market closes the rows are resolved from runner statuses, and the
//! resolved history is what each bet type's calibration table is rebuilt
//! from. Rows of a market that never reports a result are dropped once the
//! race is long past.

use chrono::{Duration, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::calibration::{build_buckets, CalibrationConfig};
use crate::error::{DutchError, Result};
use crate::exchange::{Exchange, MarketBookSnapshot};
use crate::storage::BetStore;
use crate::types::{AccuracyRecord, BetType};

/// How long after the scheduled start a market may stay unresolved.
pub const DEFAULT_RESULT_EXPIRY_HOURS: i64 = 48;

pub struct ResultsTracker {
    exchange: Arc<dyn Exchange>,
    store: Arc<dyn BetStore>,
    expiry: Duration,
}

impl ResultsTracker {
    pub fn new(exchange: Arc<dyn Exchange>, store: Arc<dyn BetStore>) -> Self {
        Self {
            exchange,
            store,
            expiry: Duration::hours(DEFAULT_RESULT_EXPIRY_HOURS),
        }
    }

    pub fn with_expiry(mut self, expiry: Duration) -> Self {
        self.expiry = expiry;
        self
    }

    /// Record pending accuracy rows for one market.
    pub async fn capture(
        &self,
        market_id: &str,
        bet_type: BetType,
        scores: &[(u64, f64)],
    ) -> Result<()> {
        let records: Vec<AccuracyRecord> = scores
            .iter()
            .map(|&(runner_id, implied_probability)| AccuracyRecord {
                market_id: market_id.to_string(),
                runner_id,
                bet_type,
                implied_probability,
                won: None,
            })
            .collect();
        self.store.record_accuracy(&records).await
    }

    /// Resolve rows for markets that have closed since the last pass, and
    /// discard the pending rows of markets that are still unresolved past
    /// the expiry. Returns the number of rows changed.
    pub async fn resolve_pending(&self) -> Result<usize> {
        let market_ids = self.store.unresolved_accuracy_markets().await?;
        if market_ids.is_empty() {
            return Ok(0);
        }

        let books = self.exchange.list_market_book(&market_ids).await?;
        let mut changed = 0;
        let mut closed = HashSet::new();
        for book in books.iter().filter(|b| b.is_closed()) {
            let results = runner_results(book);
            changed += self.store.resolve_accuracy(&book.market_id, &results).await?;
            closed.insert(book.market_id.as_str());
        }

        let cutoff = Utc::now() - self.expiry;
        let mut expired = 0;
        for market_id in market_ids.iter().filter(|id| !closed.contains(id.as_str())) {
            let Some(market) = self.store.get_market(market_id).await? else {
                debug!(market_id = %market_id, "No market record, cannot age accuracy rows");
                continue;
            };
            if market.start_time < cutoff {
                let discarded = self.store.discard_accuracy(market_id).await?;
                warn!(
                    market_id = %market_id,
                    start_time = %market.start_time,
                    discarded,
                    "Market never resolved, accuracy rows discarded"
                );
                changed += discarded;
                expired += 1;
            }
        }

        if !closed.is_empty() || expired > 0 {
            info!(
                pending = market_ids.len(),
                closed = closed.len(),
                expired,
                changed,
                "Accuracy history resolved"
            );
        }
        Ok(changed)
    }

    /// Rebuild the calibration table of every bet type from resolved
    /// history. A bet type without any history keeps its current table.
    pub async fn rebuild_calibration(&self, config: &CalibrationConfig) -> Result<Vec<(BetType, u32)>> {
        let mut rebuilt = Vec::new();
        for &bet_type in BetType::ALL {
            let history = self.store.accuracy_history(bet_type).await?;
            match build_buckets(bet_type, &history, config) {
                Ok(buckets) => {
                    let bins = buckets.first().map(|b| b.bins).unwrap_or(0);
                    self.store.replace_calibration(bet_type, &buckets).await?;
                    rebuilt.push((bet_type, bins));
                }
                Err(DutchError::CalibrationUnavailable(reason)) => {
                    warn!(bet_type = %bet_type, rows = history.len(), reason = %reason, "Calibration not rebuilt");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(rebuilt)
    }
}

/// WINNER is a win, LOSER a loss, REMOVED drops the runner. Any other
/// status leaves the row pending.
fn runner_results(book: &MarketBookSnapshot) -> Vec<(u64, Option<bool>)> {
    book.runners
        .iter()
        .filter_map(|r| match r.status.as_str() {
            "WINNER" => Some((r.selection_id, Some(true))),
            "LOSER" => Some((r.selection_id, Some(false))),
            "REMOVED" => Some((r.selection_id, None)),
            _ => None,
        })
        .collect()
}
