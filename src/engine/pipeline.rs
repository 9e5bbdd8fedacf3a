//! Per-race stage runner.
//!
//! For each market of a race: cancel what is still executable, capture the
//! book, normalize odds, score and calibrate, allocate the budget, then
//! submit (or log, in dry-run mode). Expected reasons to skip a market come
//! back as `CycleOutcome` values; only exchange and storage failures are
//! errors, and they end that race's cycle without touching other races.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use rust_decimal::Decimal;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::calibration::CalibrationTable;
use crate::engine::predictor::{MarketImpliedPredictor, Predictor};
use crate::engine::reconciler::Reconciler;
use crate::engine::results::ResultsTracker;
use crate::engine::single_flight::SingleFlight;
use crate::error::{DutchError, Result};
use crate::exchange::{Exchange, MarketBookSnapshot, PlaceInstruction};
use crate::odds::OddsNormalizer;
use crate::storage::BetStore;
use crate::strategy::dutch::{AllocationOutcome, DutchRunner};
use crate::strategy::StakingPlan;
use crate::types::{
    Bet, BetType, BookRecord, MarketRecord, OddsSource, Race, RawRunner, RunnerBookRecord,
    RunnerQuote, StakeProposal,
};

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    Submitted { bets: Vec<Bet> },
    DryRun { proposals: Vec<StakeProposal> },
    /// No pool size passed the acceptance policy.
    NoViableAllocation { pools_tried: usize },
    MissingOdds { reason: String },
    CalibrationUnavailable { reason: String },
    /// Stopped before any instruction was sent.
    Aborted { reason: String },
    AlreadyInFlight,
}

impl CycleOutcome {
    fn label(&self) -> &'static str {
        match self {
            CycleOutcome::Submitted { .. } => "submitted",
            CycleOutcome::DryRun { .. } => "dry_run",
            CycleOutcome::NoViableAllocation { .. } => "no_viable_allocation",
            CycleOutcome::MissingOdds { .. } => "missing_odds",
            CycleOutcome::CalibrationUnavailable { .. } => "calibration_unavailable",
            CycleOutcome::Aborted { .. } => "aborted",
            CycleOutcome::AlreadyInFlight => "already_in_flight",
        }
    }
}

impl fmt::Display for CycleOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CycleOutcome::Submitted { bets } => write!(f, "submitted {} bets", bets.len()),
            CycleOutcome::DryRun { proposals } => write!(f, "dry run, {} stakes", proposals.len()),
            CycleOutcome::NoViableAllocation { pools_tried } => {
                write!(f, "no viable allocation ({pools_tried} pools tried)")
            }
            CycleOutcome::MissingOdds { reason } => write!(f, "missing odds: {reason}"),
            CycleOutcome::CalibrationUnavailable { reason } => {
                write!(f, "calibration unavailable: {reason}")
            }
            CycleOutcome::Aborted { reason } => write!(f, "aborted: {reason}"),
            CycleOutcome::AlreadyInFlight => write!(f, "already in flight"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MarketOutcome {
    pub market_id: String,
    pub bet_type: BetType,
    pub outcome: CycleOutcome,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RaceReport {
    pub race_id: String,
    pub markets: Vec<MarketOutcome>,
}

impl RaceReport {
    fn uniform(race: &Race, outcome: CycleOutcome) -> Self {
        Self {
            race_id: race.race_id.clone(),
            markets: race
                .markets
                .iter()
                .map(|m| MarketOutcome {
                    market_id: m.market_id.clone(),
                    bet_type: m.bet_type,
                    outcome: outcome.clone(),
                })
                .collect(),
        }
    }

    pub fn outcome(&self, bet_type: BetType) -> Option<&CycleOutcome> {
        self.markets
            .iter()
            .find(|m| m.bet_type == bet_type)
            .map(|m| &m.outcome)
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

pub struct RacePipeline {
    exchange: Arc<dyn Exchange>,
    store: Arc<dyn BetStore>,
    normalizer: OddsNormalizer,
    predictor: Arc<dyn Predictor>,
    staking: StakingPlan,
    reconciler: Reconciler,
    results: ResultsTracker,
    flights: SingleFlight,
    dry_run: bool,
}

impl RacePipeline {
    pub fn new(
        exchange: Arc<dyn Exchange>,
        store: Arc<dyn BetStore>,
        normalizer: OddsNormalizer,
        staking: StakingPlan,
        dry_run: bool,
    ) -> Self {
        Self {
            reconciler: Reconciler::new(Arc::clone(&exchange), Arc::clone(&store)),
            results: ResultsTracker::new(Arc::clone(&exchange), Arc::clone(&store)),
            exchange,
            store,
            normalizer,
            predictor: Arc::new(MarketImpliedPredictor),
            staking,
            flights: SingleFlight::new(),
            dry_run,
        }
    }

    pub fn with_predictor(mut self, predictor: Arc<dyn Predictor>) -> Self {
        self.predictor = predictor;
        self
    }

    pub fn with_result_expiry(mut self, expiry: chrono::Duration) -> Self {
        self.results = self.results.with_expiry(expiry);
        self
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    pub fn results(&self) -> &ResultsTracker {
        &self.results
    }

    pub fn flights(&self) -> &SingleFlight {
        &self.flights
    }

    /// Process races concurrently. A failed race is logged and left out of
    /// the returned reports.
    pub async fn run_races(&self, races: &[Race], now: DateTime<Utc>) -> Vec<RaceReport> {
        let results = join_all(races.iter().map(|race| self.run_race(race, now))).await;
        races
            .iter()
            .zip(results)
            .filter_map(|(race, result)| match result {
                Ok(report) => Some(report),
                Err(e) => {
                    error!(race_id = %race.race_id, race = %race, error = %e, "Race cycle failed");
                    None
                }
            })
            .collect()
    }

    /// One allocation cycle for one race.
    pub async fn run_race(&self, race: &Race, now: DateTime<Utc>) -> Result<RaceReport> {
        let Some(_guard) = self.flights.try_acquire(&race.race_id) else {
            debug!(race_id = %race.race_id, "Race already in flight");
            return Ok(RaceReport::uniform(race, CycleOutcome::AlreadyInFlight));
        };

        let budget = match self
            .staking
            .window()
            .budget_for(self.staking.budget(), race.start_time, now)
        {
            Ok(budget) => budget,
            Err(rejection) => {
                debug!(race_id = %race.race_id, reason = %rejection, "Outside betting window");
                return Ok(RaceReport::uniform(
                    race,
                    CycleOutcome::Aborted {
                        reason: rejection.to_string(),
                    },
                ));
            }
        };

        let mut markets = Vec::with_capacity(race.markets.len());
        for market in &race.markets {
            let outcome = match self.run_market(market, budget, now).await {
                Ok(outcome) => outcome,
                Err(DutchError::MissingOdds { reason, .. }) => CycleOutcome::MissingOdds { reason },
                Err(DutchError::CalibrationUnavailable(reason)) => {
                    CycleOutcome::CalibrationUnavailable { reason }
                }
                Err(e) => return Err(e),
            };
            info!(
                race_id = %race.race_id,
                market_id = %market.market_id,
                bet_type = %market.bet_type,
                outcome = outcome.label(),
                detail = %outcome,
                "Market processed"
            );
            markets.push(MarketOutcome {
                market_id: market.market_id.clone(),
                bet_type: market.bet_type,
                outcome,
            });
        }

        Ok(RaceReport {
            race_id: race.race_id.clone(),
            markets,
        })
    }

    async fn run_market(
        &self,
        market: &MarketRecord,
        budget: Decimal,
        now: DateTime<Utc>,
    ) -> Result<CycleOutcome> {
        let market_id = market.market_id.as_str();

        // Nothing new may be submitted until the old orders are dealt with
        self.reconciler.cancel_outstanding(market_id).await?;

        let book = self
            .exchange
            .list_market_book(&[market.market_id.clone()])
            .await?
            .into_iter()
            .find(|b| b.market_id == market.market_id)
            .ok_or_else(|| DutchError::missing_odds(market_id, "no market book returned"))?;
        self.capture_book(market, &book, now).await?;

        if book.inplay || book.status != "OPEN" {
            return Ok(CycleOutcome::Aborted {
                reason: format!("market {} (inplay={})", book.status, book.inplay),
            });
        }

        let raw: Vec<RawRunner> = book
            .runners
            .iter()
            .map(|r| match (r.is_active(), r.best_back) {
                (true, Some(back)) => RawRunner::new(r.selection_id, vec![(OddsSource::Exchange, back.price)]),
                (true, None) => RawRunner::new(r.selection_id, Vec::new()),
                (false, _) => RawRunner::scratched(r.selection_id),
            })
            .collect();
        let quotes = self.normalizer.normalize(market_id, &raw)?;

        let scores: Vec<(&RunnerQuote, f64)> = quotes
            .iter()
            .filter_map(|q| self.predictor.score(market.bet_type, q).map(|s| (q, s)))
            .collect();
        let history: Vec<(u64, f64)> = scores.iter().map(|(q, s)| (q.runner_id, *s)).collect();
        self.results
            .capture(market_id, market.bet_type, &history)
            .await?;

        let buckets = self.store.calibration_buckets(market.bet_type).await?;
        let table = CalibrationTable::from_buckets(market.bet_type, &buckets)?;

        let mut runners = Vec::with_capacity(scores.len());
        for (quote, score) in &scores {
            runners.push(DutchRunner {
                runner_id: quote.runner_id,
                calibrated_probability: table.calibrate(*score)?,
                normalized_probability: quote.normalized_probability,
                best_odds: quote.best_odds.unwrap_or(0.0),
            });
        }

        let allocation = match self.staking.allocate(market.bet_type, &runners, budget) {
            AllocationOutcome::Allocated(allocation) => allocation,
            AllocationOutcome::NoViableAllocation { attempts } => {
                return Ok(CycleOutcome::NoViableAllocation {
                    pools_tried: attempts.len(),
                });
            }
        };
        info!(
            market_id,
            bet_type = %market.bet_type,
            pool_size = allocation.pool_size,
            field = runners.len(),
            total_stake = %allocation.total_stake,
            budget = %budget,
            "Allocation accepted"
        );

        let proposals: Vec<StakeProposal> = allocation.active().cloned().collect();
        if proposals.is_empty() {
            return Ok(CycleOutcome::Aborted {
                reason: "every stake rounded to zero".to_string(),
            });
        }

        if self.dry_run {
            for proposal in &proposals {
                info!(
                    market_id,
                    runner_id = proposal.runner_id,
                    bet_type = %proposal.bet_type,
                    stake = %proposal.stake,
                    odds = format!("{:.2}", proposal.odds),
                    profit = %proposal.implied_profit,
                    "[DRY RUN] Would place bet"
                );
            }
            return Ok(CycleOutcome::DryRun { proposals });
        }

        let instructions: Vec<PlaceInstruction> = proposals
            .iter()
            .map(|p| PlaceInstruction {
                selection_id: p.runner_id,
                side: p.side,
                size: p.stake,
                price: p.odds,
            })
            .collect();
        let reports = self.exchange.place_orders(market_id, &instructions).await?;
        let bets = self
            .reconciler
            .record_submission(market_id, market.bet_type, &reports)
            .await?;
        Ok(CycleOutcome::Submitted { bets })
    }

    /// Persist the market, its runners and this book version.
    async fn capture_book(
        &self,
        market: &MarketRecord,
        book: &MarketBookSnapshot,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.store.upsert_market(market).await?;
        for runner in &market.runners {
            self.store.upsert_runner(runner).await?;
        }
        self.store
            .upsert_book(&BookRecord {
                market_id: book.market_id.clone(),
                version: book.version,
                status: book.status.clone(),
                inplay: book.inplay,
                number_of_runners: book.number_of_runners,
                number_of_active_runners: book.number_of_active_runners,
                total_matched: book.total_matched,
                captured_at: now,
            })
            .await?;
        for r in &book.runners {
            self.store
                .upsert_runner_book(&RunnerBookRecord {
                    market_id: book.market_id.clone(),
                    version: book.version,
                    selection_id: r.selection_id,
                    status: r.status.clone(),
                    last_price_traded: r.last_price_traded,
                    back_price: r.best_back.map(|p| p.price),
                    back_size: r.best_back.map(|p| p.size),
                    lay_price: r.best_lay.map(|p| p.price),
                    lay_size: r.best_lay.map(|p| p.size),
                })
                .await?;
        }

        let active = book.runners.iter().filter(|r| r.is_active()).count();
        if active != book.number_of_active_runners as usize {
            warn!(
                market_id = %book.market_id,
                expected = book.number_of_active_runners,
                received = active,
                "PartialData: runner count differs from book, continuing"
            );
        }
        Ok(())
    }
}
