//! End-to-end cycles: discovery, staking, cancellation, settlement and
//! accuracy resolution against the mock exchange.

use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use tokio_test::{assert_err, assert_ok};

use dutcher::calibration::CalibrationConfig;
use dutcher::engine::CycleOutcome;
use dutcher::storage::{BetStore, MemoryStore};
use dutcher::types::{BetOutcome, BetStatus, BetType};

use crate::mock_exchange::MockExchange;
use crate::{harness, seed_identity_calibration, soon};

fn submitted(outcome: Option<&CycleOutcome>) -> usize {
    match outcome {
        Some(CycleOutcome::Submitted { bets }) => bets.len(),
        other => panic!("expected submission, got {other:?}"),
    }
}

#[tokio::test]
async fn test_full_cycle_places_matches_and_settles() {
    let store = Arc::new(MemoryStore::new());
    seed_identity_calibration(store.as_ref()).await;

    let exchange = MockExchange::new();
    let start = soon();
    exchange.add_market("1.100", "E1", BetType::Win, start, &[2.0, 4.0, 5.0]);
    exchange.add_market("1.101", "E1", BetType::Place, start, &[1.2, 1.6, 2.0]);
    let h = harness(exchange, store.clone(), false);

    let now = Utc::now();
    let races = assert_ok!(h.scanner.scan(now).await);
    assert_eq!(races.len(), 1);
    assert_eq!(races[0].markets.len(), 2);

    let reports = h.pipeline.run_races(&races, now).await;
    assert_eq!(reports.len(), 1);
    assert_eq!(submitted(reports[0].outcome(BetType::Win)), 3);
    assert_eq!(submitted(reports[0].outcome(BetType::Place)), 3);
    assert_eq!(h.exchange.placed().len(), 6);

    // Dutch stakes never exceed the budget
    let win_total: Decimal = h
        .exchange
        .placed()
        .iter()
        .filter(|(market_id, _)| market_id == "1.100")
        .map(|(_, i)| i.size)
        .sum();
    assert!(win_total <= dec!(10));
    assert!(win_total > dec!(9.9));

    h.exchange.match_all("1.100");
    h.exchange.match_all("1.101");
    let open = assert_ok!(h.pipeline.reconciler().reconcile_open().await);
    assert_eq!(open.examined, 6);
    assert_eq!(open.updated, 6);
    for bet in assert_ok!(store.bets_for_market("1.100").await) {
        assert_eq!(bet.status, BetStatus::ExecutionComplete);
        assert_eq!(bet.size_matched, bet.size);
    }

    h.exchange.settle_market("1.100", 1);
    h.exchange.settle_market("1.101", 1);
    let settled = assert_ok!(h.pipeline.reconciler().reconcile_settled().await);
    assert_eq!(settled.updated, 6);

    let win_bets = assert_ok!(store.bets_for_market("1.100").await);
    let favourite = win_bets.iter().find(|b| b.runner_id == 1).unwrap();
    assert_eq!(favourite.status, BetStatus::Settled);
    assert_eq!(favourite.outcome, Some(BetOutcome::Won));
    assert_eq!(favourite.profit, Some(favourite.size.round_dp(2)));
    for loser in win_bets.iter().filter(|b| b.runner_id != 1) {
        assert_eq!(loser.outcome, Some(BetOutcome::Lost));
        assert_eq!(loser.profit, Some(-loser.size));
    }

    // Nothing is outstanding any more
    let again = assert_ok!(h.pipeline.reconciler().reconcile_all().await);
    assert_eq!(again.examined, 0);
    assert!(assert_ok!(store.outstanding_bets().await).is_empty());

    let resolved = assert_ok!(h.pipeline.results().resolve_pending().await);
    assert_eq!(resolved, 6);
    let history = assert_ok!(store.accuracy_history(BetType::Win).await);
    assert_eq!(history.len(), 3);
    assert_eq!(history.iter().filter(|(_, won)| *won).count(), 1);
}

#[tokio::test]
async fn test_restake_cancels_previous_orders_first() {
    let store = Arc::new(MemoryStore::new());
    seed_identity_calibration(store.as_ref()).await;

    let exchange = MockExchange::new();
    exchange.add_market("1.200", "E2", BetType::Win, soon(), &[2.0, 4.0, 5.0]);
    let h = harness(exchange, store.clone(), false);

    let races = assert_ok!(h.scanner.scan(Utc::now()).await);
    assert_ok!(h.pipeline.run_race(&races[0], Utc::now()).await);
    h.exchange.match_partial("1001", dec!(2));

    let report = assert_ok!(h.pipeline.run_race(&races[0], Utc::now()).await);
    assert_eq!(submitted(report.outcome(BetType::Win)), 3);
    assert_eq!(h.exchange.placed().len(), 6);

    let bets = assert_ok!(store.bets_for_market("1.200").await);
    assert_eq!(bets.len(), 6);
    let first = assert_ok!(store.get_bet("1001").await).unwrap();
    assert_eq!(first.status, BetStatus::ExecutionComplete);
    assert_eq!(first.size_matched, dec!(2));
    for bet_id in ["1002", "1003"] {
        let bet = assert_ok!(store.get_bet(bet_id).await).unwrap();
        assert_eq!(bet.status, BetStatus::Cancelled);
        assert_eq!(bet.size_matched, Decimal::ZERO);
    }

    // The partly matched bet settles, the fresh unmatched ones lapse
    h.exchange.settle_market("1.200", 1);
    let report = assert_ok!(h.pipeline.reconciler().reconcile_all().await);
    assert_eq!(report.updated, 4);
    assert_eq!(report.rejected, 0);

    let first = assert_ok!(store.get_bet("1001").await).unwrap();
    assert_eq!(first.outcome, Some(BetOutcome::Won));
    assert_eq!(first.profit, Some(dec!(2.00)));
    for bet_id in ["1004", "1005", "1006"] {
        let bet = assert_ok!(store.get_bet(bet_id).await).unwrap();
        assert_eq!(bet.status, BetStatus::Lapsed);
        assert_eq!(bet.outcome, None);
        assert_eq!(bet.size_cancelled, bet.size);
    }
}

#[tokio::test]
async fn test_partly_matched_bet_settles_after_remainder_lapses() {
    let store = Arc::new(MemoryStore::new());
    seed_identity_calibration(store.as_ref()).await;

    let exchange = MockExchange::new();
    exchange.add_market("1.250", "E25", BetType::Win, soon(), &[2.0, 4.0, 5.0]);
    let h = harness(exchange, store.clone(), false);

    let races = assert_ok!(h.scanner.scan(Utc::now()).await);
    assert_ok!(h.pipeline.run_race(&races[0], Utc::now()).await);
    h.exchange.match_partial("1001", dec!(2));
    assert_ok!(h.pipeline.reconciler().reconcile_open().await);
    assert_eq!(
        assert_ok!(store.get_bet("1001").await).unwrap().status,
        BetStatus::Matched
    );

    // The off lapses every unmatched remainder before results are in
    h.exchange.settle_market("1.250", 1);
    let lapsed = assert_ok!(h.pipeline.reconciler().reconcile_lapsed().await);
    assert_eq!(lapsed.updated, 3);
    assert_eq!(lapsed.rejected, 0);

    let first = assert_ok!(store.get_bet("1001").await).unwrap();
    assert_eq!(first.status, BetStatus::ExecutionComplete);
    assert_eq!(first.size_matched, dec!(2));
    assert_eq!(first.size_cancelled, first.size - dec!(2));
    for bet_id in ["1002", "1003"] {
        let bet = assert_ok!(store.get_bet(bet_id).await).unwrap();
        assert_eq!(bet.status, BetStatus::Lapsed);
    }

    let report = assert_ok!(h.pipeline.reconciler().reconcile_all().await);
    assert_eq!(report.updated, 1);
    assert_eq!(report.rejected, 0);
    let first = assert_ok!(store.get_bet("1001").await).unwrap();
    assert_eq!(first.status, BetStatus::Settled);
    assert_eq!(first.outcome, Some(BetOutcome::Won));
    assert_eq!(first.profit, Some(dec!(2.00)));
    assert!(assert_ok!(store.outstanding_bets().await).is_empty());
}

#[tokio::test]
async fn test_rejected_market_does_not_block_other_races() {
    let store = Arc::new(MemoryStore::new());
    seed_identity_calibration(store.as_ref()).await;

    let exchange = MockExchange::new();
    exchange.add_market("1.300", "E3", BetType::Win, soon(), &[2.5, 3.0, 6.0]);
    exchange.add_market(
        "1.400",
        "E4",
        BetType::Win,
        soon() + Duration::seconds(10),
        &[1.8, 4.5, 9.0],
    );
    exchange.reject_market("1.300");
    let h = harness(exchange, store.clone(), false);

    let now = Utc::now();
    let races = assert_ok!(h.scanner.scan(now).await);
    assert_eq!(races.len(), 2);
    assert_err!(h.pipeline.run_race(&races[0], now).await);

    let reports = h.pipeline.run_races(&races, now).await;
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].markets[0].market_id, "1.400");
    assert_eq!(submitted(reports[0].outcome(BetType::Win)), 3);

    assert!(h.exchange.placed().iter().all(|(market_id, _)| market_id == "1.400"));
    assert!(assert_ok!(store.bets_for_market("1.300").await).is_empty());
}

#[tokio::test]
async fn test_dry_run_places_nothing_but_records_history() {
    let store = Arc::new(MemoryStore::new());
    seed_identity_calibration(store.as_ref()).await;

    let exchange = MockExchange::new();
    exchange.add_market("1.500", "E5", BetType::Win, soon(), &[2.0, 4.0, 5.0]);
    let h = harness(exchange, store.clone(), true);

    let now = Utc::now();
    let races = assert_ok!(h.scanner.scan(now).await);
    let reports = h.pipeline.run_races(&races, now).await;

    match reports[0].outcome(BetType::Win) {
        Some(CycleOutcome::DryRun { proposals }) => {
            assert_eq!(proposals.len(), 3);
            let total: Decimal = proposals.iter().map(|p| p.stake).sum();
            assert!(total <= dec!(10));
        }
        other => panic!("expected dry run, got {other:?}"),
    }
    assert!(h.exchange.placed().is_empty());
    assert_eq!(store.bet_count().await, 0);
    assert_eq!(store.accuracy_rows().await.len(), 3);
    assert_eq!(store.book_count().await, 1);
}

#[tokio::test]
async fn test_cold_start_builds_calibration_from_history() {
    let store = Arc::new(MemoryStore::new());
    let exchange = MockExchange::new();
    exchange.add_market("1.600", "E6", BetType::Win, soon(), &[2.0, 4.0, 5.0]);
    let h = harness(exchange, store.clone(), false);

    let now = Utc::now();
    let races = assert_ok!(h.scanner.scan(now).await);
    let first = assert_ok!(h.pipeline.run_race(&races[0], now).await);
    assert!(matches!(
        first.outcome(BetType::Win),
        Some(CycleOutcome::CalibrationUnavailable { .. })
    ));
    assert!(h.exchange.placed().is_empty());

    h.exchange.settle_market("1.600", 1);
    assert_eq!(assert_ok!(h.pipeline.results().resolve_pending().await), 3);

    let config = CalibrationConfig {
        sample_floor: 0,
        max_bins: 1,
        rebuild_every_cycles: 1,
        ..CalibrationConfig::default()
    };
    let rebuilt = assert_ok!(h.pipeline.results().rebuild_calibration(&config).await);
    assert_eq!(rebuilt, vec![(BetType::Win, 1)]);

    h.exchange
        .add_market("1.700", "E7", BetType::Win, soon(), &[2.0, 4.0, 5.0]);
    let now = Utc::now();
    let races = assert_ok!(h.scanner.scan(now).await);
    let race = races
        .iter()
        .find(|r| r.markets.iter().any(|m| m.market_id == "1.700"))
        .unwrap();
    let second = assert_ok!(h.pipeline.run_race(race, now).await);
    assert!(submitted(second.outcome(BetType::Win)) >= 1);
}
