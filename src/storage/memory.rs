//! In-process `BetStore`.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::Mutex;

use super::BetStore;
use crate::error::Result;
use crate::types::{
    AccuracyRecord, Bet, BetType, BookRecord, CalibrationBucket, MarketRecord, RunnerBookRecord,
    RunnerRecord,
};

type BetKey = (String, String, u64);
type AccuracyKey = (String, u64, BetType);

#[derive(Default)]
struct Inner {
    markets: HashMap<String, MarketRecord>,
    runners: HashMap<(String, u64), RunnerRecord>,
    books: HashMap<(String, u64), BookRecord>,
    runner_books: HashMap<(String, u64, u64), RunnerBookRecord>,
    /// Ordered so reads come back in a stable order.
    bets: BTreeMap<BetKey, Bet>,
    calibration: HashMap<BetType, Vec<CalibrationBucket>>,
    accuracy: BTreeMap<AccuracyKey, AccuracyRecord>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn bet_count(&self) -> usize {
        self.inner.lock().await.bets.len()
    }

    pub async fn book_count(&self) -> usize {
        self.inner.lock().await.books.len()
    }

    pub async fn runner_book_count(&self) -> usize {
        self.inner.lock().await.runner_books.len()
    }

    pub async fn accuracy_rows(&self) -> Vec<AccuracyRecord> {
        self.inner.lock().await.accuracy.values().cloned().collect()
    }
}

#[async_trait]
impl BetStore for MemoryStore {
    async fn upsert_market(&self, market: &MarketRecord) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.markets.insert(market.market_id.clone(), market.clone());
        Ok(())
    }

    async fn upsert_runner(&self, runner: &RunnerRecord) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner
            .runners
            .insert((runner.market_id.clone(), runner.selection_id), runner.clone());
        Ok(())
    }

    async fn upsert_book(&self, book: &BookRecord) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner
            .books
            .insert((book.market_id.clone(), book.version), book.clone());
        Ok(())
    }

    async fn upsert_runner_book(&self, runner_book: &RunnerBookRecord) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.runner_books.insert(
            (
                runner_book.market_id.clone(),
                runner_book.version,
                runner_book.selection_id,
            ),
            runner_book.clone(),
        );
        Ok(())
    }

    async fn get_market(&self, market_id: &str) -> Result<Option<MarketRecord>> {
        let inner = self.inner.lock().await;
        let Some(market) = inner.markets.get(market_id) else {
            return Ok(None);
        };
        let mut market = market.clone();
        let mut runners: Vec<RunnerRecord> = inner
            .runners
            .values()
            .filter(|r| r.market_id == market_id)
            .cloned()
            .collect();
        runners.sort_by_key(|r| (r.sort_priority, r.selection_id));
        market.runners = runners;
        Ok(Some(market))
    }

    async fn upsert_bet(&self, bet: &Bet) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let key = (bet.bet_id.clone(), bet.market_id.clone(), bet.runner_id);
        inner.bets.insert(key, bet.clone());
        Ok(())
    }

    async fn get_bet(&self, bet_id: &str) -> Result<Option<Bet>> {
        let inner = self.inner.lock().await;
        Ok(inner.bets.values().find(|b| b.bet_id == bet_id).cloned())
    }

    async fn outstanding_bets(&self) -> Result<Vec<Bet>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .bets
            .values()
            .filter(|b| b.is_outstanding())
            .cloned()
            .collect())
    }

    async fn bets_for_market(&self, market_id: &str) -> Result<Vec<Bet>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .bets
            .values()
            .filter(|b| b.market_id == market_id)
            .cloned()
            .collect())
    }

    async fn replace_calibration(
        &self,
        bet_type: BetType,
        buckets: &[CalibrationBucket],
    ) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.calibration.insert(bet_type, buckets.to_vec());
        Ok(())
    }

    async fn calibration_buckets(&self, bet_type: BetType) -> Result<Vec<CalibrationBucket>> {
        let inner = self.inner.lock().await;
        Ok(inner.calibration.get(&bet_type).cloned().unwrap_or_default())
    }

    async fn record_accuracy(&self, records: &[AccuracyRecord]) -> Result<()> {
        let mut inner = self.inner.lock().await;
        for record in records {
            let key = (record.market_id.clone(), record.runner_id, record.bet_type);
            match inner.accuracy.get(&key) {
                Some(existing) if existing.won.is_some() => {}
                _ => {
                    inner.accuracy.insert(key, record.clone());
                }
            }
        }
        Ok(())
    }

    async fn unresolved_accuracy_markets(&self) -> Result<Vec<String>> {
        let inner = self.inner.lock().await;
        let mut markets: Vec<String> = inner
            .accuracy
            .values()
            .filter(|r| r.won.is_none())
            .map(|r| r.market_id.clone())
            .collect();
        markets.dedup();
        Ok(markets)
    }

    async fn resolve_accuracy(
        &self,
        market_id: &str,
        results: &[(u64, Option<bool>)],
    ) -> Result<usize> {
        let mut inner = self.inner.lock().await;
        let mut changed = 0;
        for &(runner_id, won) in results {
            let keys: Vec<AccuracyKey> = inner
                .accuracy
                .keys()
                .filter(|(m, r, _)| m == market_id && *r == runner_id)
                .cloned()
                .collect();
            for key in keys {
                match won {
                    None => {
                        inner.accuracy.remove(&key);
                        changed += 1;
                    }
                    Some(won) => {
                        if let Some(row) = inner.accuracy.get_mut(&key) {
                            if row.won != Some(won) {
                                row.won = Some(won);
                                changed += 1;
                            }
                        }
                    }
                }
            }
        }
        Ok(changed)
    }

    async fn discard_accuracy(&self, market_id: &str) -> Result<usize> {
        let mut inner = self.inner.lock().await;
        let before = inner.accuracy.len();
        inner
            .accuracy
            .retain(|(m, _, _), row| m != market_id || row.won.is_some());
        Ok(before - inner.accuracy.len())
    }

    async fn accuracy_history(&self, bet_type: BetType) -> Result<Vec<(f64, bool)>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .accuracy
            .values()
            .filter(|r| r.bet_type == bet_type)
            .filter_map(|r| r.won.map(|won| (r.implied_probability, won)))
            .collect())
    }
}
