//! Probability calibration.
//!
//! Maps a raw implied probability onto an empirically calibrated one using
//! a table of quantile buckets, each with its own least-squares line fit
//! against historical outcomes. Tables are rebuilt offline from accuracy
//! history and replace the previous table wholesale.

use serde::Deserialize;
use tracing::{debug, error, info, warn};

use crate::error::{DutchError, Result};
use crate::types::{BetType, CalibrationBucket};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct CalibrationConfig {
    /// Every bucket must have strictly more positive outcomes than this.
    #[serde(default = "default_sample_floor")]
    pub sample_floor: u64,
    /// Upper bound on the generation search.
    #[serde(default = "default_max_bins")]
    pub max_bins: u32,
    /// Rebuild tables every N scheduler cycles.
    #[serde(default = "default_rebuild_every")]
    pub rebuild_every_cycles: u64,
    /// Pending accuracy rows are dropped this long after the race start.
    #[serde(default = "default_result_expiry")]
    pub result_expiry_hours: i64,
}

fn default_sample_floor() -> u64 {
    20
}

fn default_max_bins() -> u32 {
    100
}

fn default_rebuild_every() -> u64 {
    120
}

fn default_result_expiry() -> i64 {
    crate::engine::results::DEFAULT_RESULT_EXPIRY_HOURS
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            sample_floor: default_sample_floor(),
            max_bins: default_max_bins(),
            rebuild_every_cycles: default_rebuild_every(),
            result_expiry_hours: default_result_expiry(),
        }
    }
}

// ---------------------------------------------------------------------------
// Lookup
// ---------------------------------------------------------------------------

/// One bucket generation for one bet type, ordered by `left`.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationTable {
    bet_type: BetType,
    bins: u32,
    buckets: Vec<CalibrationBucket>,
}

impl CalibrationTable {
    /// Select the finest generation present for `bet_type`.
    pub fn from_buckets(bet_type: BetType, buckets: &[CalibrationBucket]) -> Result<Self> {
        let bins = buckets
            .iter()
            .filter(|b| b.bet_type == bet_type)
            .map(|b| b.bins)
            .max()
            .ok_or_else(|| {
                DutchError::CalibrationUnavailable(format!("no {bet_type} calibration table yet"))
            })?;

        let mut selected: Vec<CalibrationBucket> = buckets
            .iter()
            .filter(|b| b.bet_type == bet_type && b.bins == bins)
            .cloned()
            .collect();
        selected.sort_by(|a, b| a.left.partial_cmp(&b.left).unwrap_or(std::cmp::Ordering::Equal));

        Ok(Self {
            bet_type,
            bins,
            buckets: selected,
        })
    }

    pub fn bet_type(&self) -> BetType {
        self.bet_type
    }

    pub fn bins(&self) -> u32 {
        self.bins
    }

    pub fn buckets(&self) -> &[CalibrationBucket] {
        &self.buckets
    }

    /// Whether the buckets partition `[0, 1]` without gaps or overlaps.
    pub fn is_partition(&self) -> bool {
        const EPS: f64 = 1e-12;
        let (Some(first), Some(last)) = (self.buckets.first(), self.buckets.last()) else {
            return false;
        };
        if first.left.abs() > EPS || (last.right - 1.0).abs() > EPS {
            return false;
        }
        self.buckets
            .windows(2)
            .all(|w| (w[0].right - w[1].left).abs() <= EPS && w[0].left <= w[0].right)
    }

    /// Calibrated probability for `p`, clamped to `[0, 1]`.
    pub fn calibrate(&self, p: f64) -> Result<f64> {
        let p = p.clamp(0.0, 1.0);
        let last = self.buckets.len().saturating_sub(1);

        let bucket = self
            .buckets
            .iter()
            .enumerate()
            .find(|(i, b)| b.left <= p && (p < b.right || (*i == last && p <= b.right)))
            .map(|(_, b)| b);

        match bucket {
            Some(b) => Ok((b.coef * p + b.intercept).clamp(0.0, 1.0)),
            None => {
                error!(
                    bet_type = %self.bet_type,
                    bins = self.bins,
                    p,
                    "No calibration bucket matches probability, table does not partition [0,1]"
                );
                Err(DutchError::CalibrationUnavailable(format!(
                    "no {} bucket covers p={p:.6} in generation {}",
                    self.bet_type, self.bins
                )))
            }
        }
    }
}

/// Calibrate `p` against the finest generation in `buckets`.
pub fn calibrate(bet_type: BetType, p: f64, buckets: &[CalibrationBucket]) -> Result<f64> {
    CalibrationTable::from_buckets(bet_type, buckets)?.calibrate(p)
}

// ---------------------------------------------------------------------------
// Building
// ---------------------------------------------------------------------------

/// Fit one generation of `bins` equal-frequency buckets.
///
/// Bucket boundaries are the interpolated quantiles of the implied
/// probabilities, with the outer edges pinned to 0 and 1. The history
/// must be sorted by probability. Generations containing an empty bucket
/// (duplicate quantile edges) are returned with a zero-sample bucket.
pub fn fit_generation(bet_type: BetType, sorted: &[(f64, bool)], bins: u32) -> Vec<CalibrationBucket> {
    let bins = bins.max(1);
    let mut edges: Vec<f64> = (0..=bins)
        .map(|k| quantile(sorted, k as f64 / bins as f64))
        .collect();
    edges[0] = 0.0;
    edges[bins as usize] = 1.0;

    (0..bins as usize)
        .map(|k| {
            let (left, right) = (edges[k], edges[k + 1]);
            let last = k + 1 == bins as usize;
            let group: Vec<(f64, bool)> = sorted
                .iter()
                .copied()
                .filter(|(p, _)| *p >= left && (*p < right || (last && *p <= right)))
                .collect();

            let (coef, intercept) = least_squares(&group);
            let sample_count = group.iter().filter(|(_, won)| *won).count() as u64;
            let total = group.len() as u64;
            let mean_won = if total == 0 {
                0.0
            } else {
                sample_count as f64 / total as f64
            };

            CalibrationBucket {
                bet_type,
                bins,
                left,
                right,
                coef,
                intercept,
                sample_count,
                total,
                mean_won,
            }
        })
        .collect()
}

/// Build the finest calibration table whose buckets all clear the floor.
///
/// Starts from a single whole-population bucket and keeps splitting into
/// more quantile groups while every group has more than `sample_floor`
/// positive outcomes. The last generation that cleared the floor is kept;
/// the single bucket is the fallback. Only an empty history fails.
pub fn build_buckets(
    bet_type: BetType,
    history: &[(f64, bool)],
    config: &CalibrationConfig,
) -> Result<Vec<CalibrationBucket>> {
    let mut sorted: Vec<(f64, bool)> = history
        .iter()
        .copied()
        .filter(|(p, _)| p.is_finite())
        .map(|(p, won)| (p.clamp(0.0, 1.0), won))
        .collect();
    if sorted.is_empty() {
        return Err(DutchError::CalibrationUnavailable(format!(
            "no {bet_type} accuracy history to build from"
        )));
    }
    sorted.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

    let clears = |gen: &[CalibrationBucket]| gen.iter().all(|b| b.sample_count > config.sample_floor);

    // The whole-population bucket is kept even below the floor
    let whole = fit_generation(bet_type, &sorted, 1);
    if !clears(&whole) {
        warn!(
            bet_type = %bet_type,
            wins = whole[0].sample_count,
            floor = config.sample_floor,
            "Thin history, using a single whole-population bucket"
        );
    }

    let mut accepted = whole;
    let max_bins = config.max_bins.max(1).min(sorted.len() as u32);
    for bins in 2..=max_bins {
        let generation = fit_generation(bet_type, &sorted, bins);
        if !clears(&generation) {
            debug!(bet_type = %bet_type, bins, "Generation below sample floor, stopping");
            break;
        }
        accepted = generation;
    }

    let raw = brier_score(sorted.iter().map(|&(p, won)| (p, won)));
    let table = CalibrationTable::from_buckets(bet_type, &accepted)?;
    let calibrated = brier_score(
        sorted
            .iter()
            .filter_map(|&(p, won)| table.calibrate(p).ok().map(|c| (c, won))),
    );

    info!(
        bet_type = %bet_type,
        bins = table.bins(),
        records = sorted.len(),
        brier_raw = %format!("{raw:.4}"),
        brier_calibrated = %format!("{calibrated:.4}"),
        "Calibration table built"
    );

    Ok(accepted)
}

/// Linearly interpolated quantile of sorted values (pandas/numpy "linear").
fn quantile(sorted: &[(f64, bool)], q: f64) -> f64 {
    match sorted.len() {
        0 => 0.0,
        1 => sorted[0].0,
        n => {
            let pos = q.clamp(0.0, 1.0) * (n - 1) as f64;
            let lo = pos.floor() as usize;
            let hi = pos.ceil() as usize;
            let frac = pos - lo as f64;
            sorted[lo].0 + (sorted[hi].0 - sorted[lo].0) * frac
        }
    }
}

/// Ordinary least squares fit of `won ~ p`. Returns `(coef, intercept)`.
/// A group with no spread in `p` collapses to its mean hit rate.
fn least_squares(points: &[(f64, bool)]) -> (f64, f64) {
    if points.is_empty() {
        return (0.0, 0.0);
    }
    let n = points.len() as f64;
    let mean_x = points.iter().map(|(p, _)| p).sum::<f64>() / n;
    let mean_y = points.iter().filter(|(_, w)| *w).count() as f64 / n;

    let (mut sxy, mut sxx) = (0.0, 0.0);
    for (p, won) in points {
        let dx = p - mean_x;
        let y = if *won { 1.0 } else { 0.0 };
        sxy += dx * (y - mean_y);
        sxx += dx * dx;
    }

    if sxx <= f64::EPSILON {
        return (0.0, mean_y);
    }
    let coef = sxy / sxx;
    (coef, mean_y - coef * mean_x)
}

/// Brier = (1/N) * Σ(predicted - outcome)². Lower is better.
pub fn brier_score(points: impl Iterator<Item = (f64, bool)>) -> f64 {
    let (sum, count) = points.fold((0.0, 0usize), |(sum, count), (p, won)| {
        let outcome = if won { 1.0 } else { 0.0 };
        (sum + (p - outcome).powi(2), count + 1)
    });
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
