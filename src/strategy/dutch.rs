//! Pool-shrinking dutch stake allocator.
//!
//! Runners are ranked by calibrated probability. Starting from the full
//! field, the budget is split in proportion to probability and the
//! acceptance policy is asked to judge the resulting profit vector; the
//! least likely runner is dropped until a pool passes or none is left.

use rust_decimal::prelude::*;
use tracing::{debug, info};

use super::policy::{AcceptancePolicy, PolicyVerdict, PoolMetrics};
use crate::types::{d, f, BetType, Side, StakeProposal};

/// Allocator input for one runner in one market.
#[derive(Debug, Clone, PartialEq)]
pub struct DutchRunner {
    pub runner_id: u64,
    pub calibrated_probability: f64,
    /// Overround-adjusted market probability, for ratio checks.
    pub normalized_probability: f64,
    pub best_odds: f64,
}

/// One pool size the allocator evaluated.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolAttempt {
    pub pool_size: usize,
    /// `None` when the pool was rejected before reaching the policy.
    pub verdict: Option<PolicyVerdict>,
}

impl PoolAttempt {
    pub fn accepted(&self) -> bool {
        self.verdict.as_ref().is_some_and(PolicyVerdict::is_pass)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Allocation {
    pub bet_type: BetType,
    pub pool_size: usize,
    /// One proposal per input runner, in allocation order; zero outside the pool.
    pub proposals: Vec<StakeProposal>,
    pub total_stake: Decimal,
    /// Every pool size evaluated, largest first.
    pub attempts: Vec<PoolAttempt>,
}

impl Allocation {
    pub fn active(&self) -> impl Iterator<Item = &StakeProposal> {
        self.proposals.iter().filter(|p| p.is_active())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AllocationOutcome {
    Allocated(Allocation),
    /// No pool size satisfied the policy. A normal outcome, not an error.
    NoViableAllocation { attempts: Vec<PoolAttempt> },
}

impl AllocationOutcome {
    pub fn attempts(&self) -> &[PoolAttempt] {
        match self {
            AllocationOutcome::Allocated(a) => &a.attempts,
            AllocationOutcome::NoViableAllocation { attempts } => attempts,
        }
    }
}

pub struct DutchAllocator {
    /// Decimal places stakes are rounded to.
    stake_precision: u32,
}

impl DutchAllocator {
    pub fn new(stake_precision: u32) -> Self {
        Self { stake_precision }
    }

    /// Split `budget` across `runners` for one bet type.
    ///
    /// Acceptance is decided on unrounded stakes. Accepted stakes are then
    /// rounded half-even and payouts and profits re-derived from the
    /// rounded amounts.
    pub fn allocate(
        &self,
        bet_type: BetType,
        runners: &[DutchRunner],
        budget: Decimal,
        policy: &AcceptancePolicy,
    ) -> AllocationOutcome {
        let mut ranked: Vec<&DutchRunner> = runners.iter().collect();
        // Stable: equal probabilities keep input order
        ranked.sort_by(|a, b| {
            b.calibrated_probability
                .partial_cmp(&a.calibrated_probability)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let chunk = f(budget);
        let mut attempts = Vec::with_capacity(ranked.len());

        for pool_size in (1..=ranked.len()).rev() {
            let pool = &ranked[..pool_size];
            let total: f64 = pool.iter().map(|r| r.calibrated_probability).sum();
            if !(total > 0.0) || pool.iter().any(|r| !(r.best_odds > 0.0)) {
                attempts.push(PoolAttempt {
                    pool_size,
                    verdict: None,
                });
                continue;
            }

            let stakes: Vec<f64> = pool
                .iter()
                .map(|r| chunk * r.calibrated_probability / total)
                .collect();
            let profits: Vec<f64> = pool
                .iter()
                .zip(&stakes)
                .map(|(r, stake)| stake * r.best_odds - chunk)
                .collect();
            let ratios: Vec<Option<f64>> = pool
                .iter()
                .map(|r| {
                    (r.normalized_probability > 0.0)
                        .then(|| r.calibrated_probability / r.normalized_probability)
                })
                .collect();

            let verdict = policy.evaluate(&PoolMetrics {
                budget: chunk,
                profits: &profits,
                ratios: &ratios,
            });
            debug!(
                bet_type = %bet_type,
                pool_size,
                verdict = %verdict,
                min_profit = profits.iter().copied().fold(f64::INFINITY, f64::min),
                "Pool evaluated"
            );

            let pass = verdict.is_pass();
            attempts.push(PoolAttempt {
                pool_size,
                verdict: Some(verdict),
            });
            if pass {
                let allocation = self.finalize(bet_type, &ranked, &stakes, attempts);
                info!(
                    bet_type = %bet_type,
                    pool_size,
                    runners = ranked.len(),
                    total_stake = %allocation.total_stake,
                    "Dutch pool accepted"
                );
                return AllocationOutcome::Allocated(allocation);
            }
        }

        debug!(bet_type = %bet_type, runners = ranked.len(), "No viable dutch pool");
        AllocationOutcome::NoViableAllocation { attempts }
    }

    fn finalize(
        &self,
        bet_type: BetType,
        ranked: &[&DutchRunner],
        pool_stakes: &[f64],
        attempts: Vec<PoolAttempt>,
    ) -> Allocation {
        let rounded: Vec<Decimal> = ranked
            .iter()
            .enumerate()
            .map(|(i, _)| {
                pool_stakes.get(i).map_or(Decimal::ZERO, |&s| {
                    d(s).round_dp_with_strategy(
                        self.stake_precision,
                        RoundingStrategy::MidpointNearestEven,
                    )
                })
            })
            .collect();
        let total_stake: Decimal = rounded.iter().copied().sum();

        let proposals = ranked
            .iter()
            .zip(&rounded)
            .map(|(runner, &stake)| {
                let in_pool = stake > Decimal::ZERO;
                let expected_payout = if in_pool {
                    stake * d(runner.best_odds)
                } else {
                    Decimal::ZERO
                };
                StakeProposal {
                    runner_id: runner.runner_id,
                    bet_type,
                    side: Side::Back,
                    odds: runner.best_odds,
                    stake,
                    expected_payout,
                    implied_profit: if in_pool {
                        expected_payout - total_stake
                    } else {
                        Decimal::ZERO
                    },
                }
            })
            .collect();

        Allocation {
            bet_type,
            pool_size: pool_stakes.len(),
            proposals,
            total_stake,
            attempts,
        }
    }
}

impl Default for DutchAllocator {
    fn default() -> Self {
        Self::new(2)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
