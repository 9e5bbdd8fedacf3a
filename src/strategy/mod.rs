//! Staking strategy: time-to-start brackets, acceptance policy and the
//! dutch stake allocator.
//!
//! `StakingPlan` bundles the per-bet-type policies with the allocator so the
//! pipeline can run WIN and PLACE independently from one configuration.

pub mod brackets;
pub mod dutch;
pub mod policy;

use rust_decimal::Decimal;
use serde::Deserialize;

use crate::types::BetType;
use brackets::{Bracket, BettingWindow};
use dutch::{AllocationOutcome, DutchAllocator, DutchRunner};
use policy::AcceptancePolicy;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct StakingConfig {
    /// Base budget per market, before bracket scaling.
    pub budget: Decimal,
    /// Decimal places stakes are rounded to.
    #[serde(default = "default_stake_precision")]
    pub stake_precision: u32,
    #[serde(default)]
    pub brackets: Vec<Bracket>,
    #[serde(default)]
    pub win: AcceptancePolicy,
    #[serde(default)]
    pub place: AcceptancePolicy,
}

fn default_stake_precision() -> u32 {
    2
}

// ---------------------------------------------------------------------------
// Plan
// ---------------------------------------------------------------------------

pub struct StakingPlan {
    budget: Decimal,
    window: BettingWindow,
    allocator: DutchAllocator,
    win: AcceptancePolicy,
    place: AcceptancePolicy,
}

impl StakingPlan {
    pub fn new(config: &StakingConfig) -> Self {
        let window = if config.brackets.is_empty() {
            BettingWindow::default()
        } else {
            BettingWindow::new(config.brackets.clone())
        };
        Self {
            budget: config.budget,
            window,
            allocator: DutchAllocator::new(config.stake_precision),
            win: config.win.clone(),
            place: config.place.clone(),
        }
    }

    pub fn budget(&self) -> Decimal {
        self.budget
    }

    pub fn window(&self) -> &BettingWindow {
        &self.window
    }

    pub fn policy(&self, bet_type: BetType) -> &AcceptancePolicy {
        match bet_type {
            BetType::Win => &self.win,
            BetType::Place => &self.place,
        }
    }

    pub fn allocate(
        &self,
        bet_type: BetType,
        runners: &[DutchRunner],
        budget: Decimal,
    ) -> AllocationOutcome {
        self.allocator
            .allocate(bet_type, runners, budget, self.policy(bet_type))
    }
}
