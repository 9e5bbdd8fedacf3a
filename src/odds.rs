//! Odds normalization.
//!
//! Converts raw decimal odds into implied probabilities, removes the
//! overround per source, ranks runners by price and picks the best price
//! available across sources for payout calculations.

use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{DutchError, Result};
use crate::types::{OddsSource, RawRunner, RunnerQuote, SourceQuote};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Smallest priced field that still forms a usable pool.
pub const MIN_PRICED_RUNNERS: usize = 3;

#[derive(Debug, Clone, Deserialize)]
pub struct NormalizerConfig {
    /// Sources in priority order; the first usable one is the primary quote.
    #[serde(default = "default_sources")]
    pub sources: Vec<OddsSource>,
    #[serde(default = "default_min_runners")]
    pub min_runners: usize,
}

fn default_sources() -> Vec<OddsSource> {
    vec![OddsSource::Exchange, OddsSource::Fixed, OddsSource::Parimutuel]
}

fn default_min_runners() -> usize {
    MIN_PRICED_RUNNERS
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            sources: default_sources(),
            min_runners: default_min_runners(),
        }
    }
}

// ---------------------------------------------------------------------------
// Normalizer
// ---------------------------------------------------------------------------

/// Normalized prices for one source, aligned with the input runner order.
struct SourceTable {
    source: OddsSource,
    quotes: Vec<SourceQuote>,
}

pub struct OddsNormalizer {
    config: NormalizerConfig,
}

impl OddsNormalizer {
    pub fn new(config: NormalizerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &NormalizerConfig {
        &self.config
    }

    /// Normalize one market snapshot.
    ///
    /// Each configured source is handled independently. A source with fewer
    /// than `min_runners` priced runners is dropped; if no source survives
    /// the market is reported as `MissingOdds`.
    pub fn normalize(&self, market_id: &str, runners: &[RawRunner]) -> Result<Vec<RunnerQuote>> {
        let mut tables: Vec<SourceTable> = Vec::new();
        let mut most_priced = 0usize;

        for &source in &self.config.sources {
            let prices: Vec<Option<f64>> = runners.iter().map(|r| r.price(source)).collect();
            let priced = prices.iter().filter(|p| p.is_some()).count();
            most_priced = most_priced.max(priced);

            if priced == 0 {
                continue;
            }
            if priced < self.config.min_runners {
                warn!(
                    market_id,
                    source = %source,
                    priced,
                    min = self.config.min_runners,
                    "Dropping odds source with insufficient pool"
                );
                continue;
            }

            match Self::normalize_source(source, &prices) {
                Some(quotes) => tables.push(SourceTable { source, quotes }),
                None => warn!(market_id, source = %source, "Zero overround, dropping source"),
            }
        }

        if tables.is_empty() {
            let reason = if most_priced == 0 {
                "all runners scratched or unpriced".to_string()
            } else {
                format!(
                    "only {most_priced} runners priced, need {}",
                    self.config.min_runners
                )
            };
            return Err(DutchError::missing_odds(market_id, reason));
        }

        let quotes: Vec<RunnerQuote> = runners
            .iter()
            .enumerate()
            .map(|(i, runner)| {
                let sources: Vec<SourceQuote> =
                    tables.iter().map(|t| t.quotes[i].clone()).collect();
                let primary = &sources[0];
                let best_odds = sources
                    .iter()
                    .filter_map(|s| s.odds)
                    .fold(None, |best: Option<f64>, o| Some(best.map_or(o, |b| b.max(o))));

                RunnerQuote {
                    runner_id: runner.runner_id,
                    implied_probability: primary.implied_probability,
                    normalized_probability: primary.normalized_probability,
                    rank: primary.rank,
                    has_odds: primary.has_odds,
                    best_odds,
                    sources,
                }
            })
            .collect();

        debug!(
            market_id,
            runners = quotes.len(),
            primary = %tables[0].source,
            sources = tables.len(),
            "Odds normalized"
        );

        Ok(quotes)
    }

    /// Implied, normalized and ranked quotes for one source.
    /// Returns `None` when the overround is zero.
    fn normalize_source(source: OddsSource, prices: &[Option<f64>]) -> Option<Vec<SourceQuote>> {
        let implied: Vec<f64> = prices
            .iter()
            .map(|p| p.map(|odds| 1.0 / odds).unwrap_or(0.0))
            .collect();
        let overround: f64 = implied.iter().sum();
        if overround <= 0.0 {
            return None;
        }

        // Stable sort keeps input order for equal prices.
        let mut order: Vec<usize> = (0..prices.len()).filter(|&i| prices[i].is_some()).collect();
        order.sort_by(|&a, &b| {
            let (pa, pb) = (prices[a].unwrap_or(f64::MAX), prices[b].unwrap_or(f64::MAX));
            pa.partial_cmp(&pb).unwrap_or(std::cmp::Ordering::Equal)
        });
        let mut ranks = vec![None; prices.len()];
        for (pos, &i) in order.iter().enumerate() {
            ranks[i] = Some(pos + 1);
        }

        Some(
            prices
                .iter()
                .enumerate()
                .map(|(i, odds)| SourceQuote {
                    source,
                    odds: *odds,
                    implied_probability: implied[i],
                    normalized_probability: implied[i] / overround,
                    rank: ranks[i],
                    has_odds: odds.is_some(),
                })
                .collect(),
        )
    }
}

impl Default for OddsNormalizer {
    fn default() -> Self {
        Self::new(NormalizerConfig::default())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
