//! Acceptance policy for a candidate dutching pool.
//!
//! A policy is a list of sub-checks over the pool's profit vector and
//! probability ratios, plus a quorum: how many of those checks must pass
//! for the pool to be accepted. All thresholds come from configuration.

use serde::Deserialize;
use std::fmt;

// ---------------------------------------------------------------------------
// Checks
// ---------------------------------------------------------------------------

/// One sub-check. Profit thresholds are fractions of the budget and must be
/// strictly exceeded; the probability ratio is inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(tag = "check", rename_all = "snake_case")]
pub enum PolicyCheck {
    /// Profit if the most likely runner wins.
    MinFirstProfit { fraction: f64 },
    /// Mean profit across the pool.
    MinAverageProfit { fraction: f64 },
    /// Profit if the least likely pool runner wins.
    MinLastProfit { fraction: f64 },
    /// Worst-case profit across the pool.
    MinProfit { fraction: f64 },
    /// Smallest calibrated / market-normalized probability in the pool.
    MinProbabilityRatio { ratio: f64 },
}

impl PolicyCheck {
    pub fn name(&self) -> &'static str {
        match self {
            PolicyCheck::MinFirstProfit { .. } => "min_first_profit",
            PolicyCheck::MinAverageProfit { .. } => "min_average_profit",
            PolicyCheck::MinLastProfit { .. } => "min_last_profit",
            PolicyCheck::MinProfit { .. } => "min_profit",
            PolicyCheck::MinProbabilityRatio { .. } => "min_probability_ratio",
        }
    }

    fn passes(&self, pool: &PoolMetrics<'_>) -> bool {
        let profit_over = |value: Option<f64>, fraction: f64| {
            value.is_some_and(|v| v > pool.budget * fraction)
        };
        match *self {
            PolicyCheck::MinFirstProfit { fraction } => {
                profit_over(pool.profits.first().copied(), fraction)
            }
            PolicyCheck::MinAverageProfit { fraction } => {
                let avg = (!pool.profits.is_empty())
                    .then(|| pool.profits.iter().sum::<f64>() / pool.profits.len() as f64);
                profit_over(avg, fraction)
            }
            PolicyCheck::MinLastProfit { fraction } => {
                profit_over(pool.profits.last().copied(), fraction)
            }
            PolicyCheck::MinProfit { fraction } => {
                let min = pool.profits.iter().copied().reduce(f64::min);
                profit_over(min, fraction)
            }
            PolicyCheck::MinProbabilityRatio { ratio } => {
                // Runners without a market probability have no ratio to judge
                pool.ratios
                    .iter()
                    .copied()
                    .flatten()
                    .reduce(f64::min)
                    .map_or(true, |min| min >= ratio)
            }
        }
    }
}

/// What the policy sees for one candidate pool, in descending probability order.
#[derive(Debug, Clone, Copy)]
pub struct PoolMetrics<'a> {
    pub budget: f64,
    pub profits: &'a [f64],
    /// Calibrated / normalized probability per runner, when defined.
    pub ratios: &'a [Option<f64>],
}

// ---------------------------------------------------------------------------
// Policy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AcceptancePolicy {
    #[serde(default)]
    pub checks: Vec<PolicyCheck>,
    /// Checks that must pass. `None` means all of them.
    #[serde(default)]
    pub quorum: Option<usize>,
}

impl Default for AcceptancePolicy {
    fn default() -> Self {
        Self {
            checks: vec![PolicyCheck::MinProfit { fraction: 0.0 }],
            quorum: None,
        }
    }
}

/// Result of evaluating a policy against one pool.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyVerdict {
    pub passed: usize,
    pub required: usize,
    pub failed_checks: Vec<&'static str>,
}

impl PolicyVerdict {
    pub fn is_pass(&self) -> bool {
        self.passed >= self.required
    }
}

impl fmt::Display for PolicyVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = if self.is_pass() { "PASS" } else { "FAIL" };
        write!(f, "{label} {}/{}", self.passed, self.required)?;
        if !self.failed_checks.is_empty() {
            write!(f, " (failed: {})", self.failed_checks.join(", "))?;
        }
        Ok(())
    }
}

impl AcceptancePolicy {
    pub fn new(checks: Vec<PolicyCheck>) -> Self {
        Self {
            checks,
            quorum: None,
        }
    }

    /// Accept every non-empty pool.
    pub fn permissive() -> Self {
        Self::new(Vec::new())
    }

    pub fn with_quorum(mut self, quorum: usize) -> Self {
        self.quorum = Some(quorum);
        self
    }

    /// Quorum clamped to the number of configured checks.
    pub fn required(&self) -> usize {
        self.quorum
            .unwrap_or(self.checks.len())
            .min(self.checks.len())
    }

    pub fn evaluate(&self, pool: &PoolMetrics<'_>) -> PolicyVerdict {
        let mut passed = 0;
        let mut failed_checks = Vec::new();
        for check in &self.checks {
            if check.passes(pool) {
                passed += 1;
            } else {
                failed_checks.push(check.name());
            }
        }
        PolicyVerdict {
            passed,
            required: self.required(),
            failed_checks,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
