//! Integration tests: the race pipeline and bet reconciliation driven
//! end-to-end against a deterministic in-memory exchange.

mod mock_exchange;
mod simulation;
mod storage;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;

use dutcher::engine::{MarketScanner, RacePipeline, RetryConfig};
use dutcher::exchange::Exchange;
use dutcher::odds::OddsNormalizer;
use dutcher::storage::BetStore;
use dutcher::strategy::policy::AcceptancePolicy;
use dutcher::strategy::{StakingConfig, StakingPlan};
use dutcher::types::{BetType, CalibrationBucket};

use mock_exchange::MockExchange;

/// Whole-range bucket that leaves probabilities unchanged.
pub fn identity_bucket(bet_type: BetType) -> CalibrationBucket {
    CalibrationBucket {
        bet_type,
        bins: 1,
        left: 0.0,
        right: 1.0,
        coef: 1.0,
        intercept: 0.0,
        sample_count: 120,
        total: 480,
        mean_won: 0.25,
    }
}

pub async fn seed_identity_calibration(store: &dyn BetStore) {
    for &bet_type in BetType::ALL {
        store
            .replace_calibration(bet_type, &[identity_bucket(bet_type)])
            .await
            .unwrap();
    }
}

pub fn staking(budget: Decimal) -> StakingPlan {
    StakingPlan::new(&StakingConfig {
        budget,
        stake_precision: 2,
        brackets: Vec::new(),
        win: AcceptancePolicy::permissive(),
        place: AcceptancePolicy::permissive(),
    })
}

pub fn fast_retry() -> RetryConfig {
    RetryConfig {
        max_attempts: 2,
        base_delay_ms: 1,
        max_delay_ms: 1,
    }
}

pub fn soon() -> DateTime<Utc> {
    Utc::now() + Duration::seconds(90)
}

pub struct Harness {
    pub exchange: Arc<MockExchange>,
    pub scanner: MarketScanner,
    pub pipeline: RacePipeline,
}

pub fn harness(exchange: MockExchange, store: Arc<dyn BetStore>, dry_run: bool) -> Harness {
    let exchange = Arc::new(exchange);
    let shared: Arc<dyn Exchange> = exchange.clone();
    Harness {
        scanner: MarketScanner::new(shared.clone(), Vec::new(), 10, 30, fast_retry()),
        pipeline: RacePipeline::new(
            shared,
            store,
            OddsNormalizer::default(),
            staking(Decimal::from(10)),
            dry_run,
        ),
        exchange,
    }
}
