//! The same cycle against the SQLite store, checking that what the
//! reconciler writes survives the column encoding.

use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio_test::assert_ok;

use dutcher::engine::CycleOutcome;
use dutcher::storage::{BetStore, SqliteStore};
use dutcher::types::{BetOutcome, BetStatus, BetType};

use crate::mock_exchange::MockExchange;
use crate::{harness, seed_identity_calibration, soon};

#[tokio::test]
async fn test_sqlite_store_submit_and_settle() {
    let store = Arc::new(assert_ok!(SqliteStore::connect("sqlite::memory:").await));
    seed_identity_calibration(store.as_ref()).await;

    let exchange = MockExchange::new();
    exchange.add_market("1.900", "E9", BetType::Win, soon(), &[3.0, 3.5, 7.5, 11.0]);
    let shared: Arc<dyn BetStore> = store.clone();
    let h = harness(exchange, shared, false);

    let now = Utc::now();
    let races = assert_ok!(h.scanner.scan(now).await);
    let reports = h.pipeline.run_races(&races, now).await;
    let placed = match reports[0].outcome(BetType::Win) {
        Some(CycleOutcome::Submitted { bets }) => bets.clone(),
        other => panic!("expected submission, got {other:?}"),
    };
    assert_eq!(placed.len(), 4);

    let market = assert_ok!(store.get_market("1.900").await).unwrap();
    assert_eq!(market.runners.len(), 4);
    for bet in &placed {
        assert_eq!(assert_ok!(store.get_bet(&bet.bet_id).await).as_ref(), Some(bet));
    }

    h.exchange.match_all("1.900");
    h.exchange.settle_market("1.900", 2);
    let report = assert_ok!(h.pipeline.reconciler().reconcile_all().await);
    assert_eq!(report.rejected, 0);

    let settled = assert_ok!(store.bets_for_market("1.900").await);
    assert_eq!(settled.len(), 4);
    for bet in &settled {
        assert_eq!(bet.status, BetStatus::Settled);
        assert_eq!(bet.size_remaining, Decimal::ZERO);
        let expected = if bet.runner_id == 2 {
            BetOutcome::Won
        } else {
            BetOutcome::Lost
        };
        assert_eq!(bet.outcome, Some(expected));
    }
    let book: Decimal = settled.iter().filter_map(|b| b.profit).sum();
    let winner = settled.iter().find(|b| b.runner_id == 2).unwrap();
    assert_eq!(winner.profit, Some((winner.size * Decimal::new(25, 1)).round_dp(2)));
    assert!(book > Decimal::ZERO);

    assert_eq!(assert_ok!(h.pipeline.results().resolve_pending().await), 4);
    assert!(assert_ok!(store.unresolved_accuracy_markets().await).is_empty());
}
