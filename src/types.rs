//! Shared types for DUTCHER.
//!
//! These types form the data model used across all modules.
//! They are designed to be stable so that odds, calibration, strategy,
//! exchange and engine modules can depend on them without circular references.

use chrono::{DateTime, Utc};
use rust_decimal::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Convert an `f64` into a `Decimal`, falling back to zero for NaN/inf.
pub fn d(value: f64) -> Decimal {
    Decimal::from_f64(value).unwrap_or(Decimal::ZERO)
}

/// Convert a `Decimal` into an `f64` (zero if out of range).
pub fn f(value: Decimal) -> f64 {
    value.to_f64().unwrap_or(0.0)
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Which market a stake goes into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BetType {
    Win,
    Place,
}

impl BetType {
    pub const ALL: &'static [BetType] = &[BetType::Win, BetType::Place];

    /// Exchange market type code.
    pub fn market_type(&self) -> &'static str {
        match self {
            BetType::Win => "WIN",
            BetType::Place => "PLACE",
        }
    }
}

impl fmt::Display for BetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.market_type())
    }
}

impl std::str::FromStr for BetType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "WIN" | "W" => Ok(BetType::Win),
            "PLACE" | "P" => Ok(BetType::Place),
            _ => Err(anyhow::anyhow!("Unknown bet type: {s}")),
        }
    }
}

/// Order direction on the exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Back,
    Lay,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Back => "BACK",
            Side::Lay => "LAY",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Side {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "BACK" => Ok(Side::Back),
            "LAY" => Ok(Side::Lay),
            _ => Err(anyhow::anyhow!("Unknown side: {s}")),
        }
    }
}

/// Where a decimal price came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OddsSource {
    /// Bookmaker fixed odds.
    Fixed,
    /// Tote / parimutuel dividend estimate.
    Parimutuel,
    /// Best available back price on the exchange.
    Exchange,
}

impl fmt::Display for OddsSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OddsSource::Fixed => write!(f, "fixed"),
            OddsSource::Parimutuel => write!(f, "parimutuel"),
            OddsSource::Exchange => write!(f, "exchange"),
        }
    }
}

// ---------------------------------------------------------------------------
// Odds
// ---------------------------------------------------------------------------

/// One runner as delivered by an odds provider, before normalization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawRunner {
    pub runner_id: u64,
    pub scratched: bool,
    /// Decimal odds per source. Zero or missing means no price.
    pub odds: Vec<(OddsSource, f64)>,
}

impl RawRunner {
    pub fn new(runner_id: u64, odds: Vec<(OddsSource, f64)>) -> Self {
        Self {
            runner_id,
            scratched: false,
            odds,
        }
    }

    pub fn scratched(runner_id: u64) -> Self {
        Self {
            runner_id,
            scratched: true,
            odds: Vec::new(),
        }
    }

    /// Usable price for a source, if any.
    pub fn price(&self, source: OddsSource) -> Option<f64> {
        if self.scratched {
            return None;
        }
        self.odds
            .iter()
            .find(|(s, _)| *s == source)
            .map(|(_, o)| *o)
            .filter(|o| o.is_finite() && *o > 0.0)
    }
}

/// Per-source normalized view of a runner's price.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceQuote {
    pub source: OddsSource,
    pub odds: Option<f64>,
    pub implied_probability: f64,
    pub normalized_probability: f64,
    /// 1 = shortest price. `None` when the runner has no price on this source.
    pub rank: Option<usize>,
    pub has_odds: bool,
}

/// Normalized snapshot of one runner for one market refresh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunnerQuote {
    pub runner_id: u64,
    /// Primary source values (first usable source in configured order).
    pub implied_probability: f64,
    pub normalized_probability: f64,
    pub rank: Option<usize>,
    pub has_odds: bool,
    /// Highest price offered across all usable sources.
    pub best_odds: Option<f64>,
    pub sources: Vec<SourceQuote>,
}

impl fmt::Display for RunnerQuote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.rank, self.best_odds) {
            (Some(rank), Some(odds)) => write!(
                f,
                "#{} rank={} implied={:.1}% norm={:.1}% best={:.2}",
                self.runner_id,
                rank,
                self.implied_probability * 100.0,
                self.normalized_probability * 100.0,
                odds,
            ),
            _ => write!(f, "#{} (no odds)", self.runner_id),
        }
    }
}

// ---------------------------------------------------------------------------
// Calibration
// ---------------------------------------------------------------------------

/// A probability-range-specific linear correction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationBucket {
    pub bet_type: BetType,
    /// Table generation; higher = finer granularity.
    pub bins: u32,
    pub left: f64,
    pub right: f64,
    pub coef: f64,
    pub intercept: f64,
    /// Positive outcomes in the bucket.
    pub sample_count: u64,
    /// Rows in the bucket.
    pub total: u64,
    /// Empirical hit rate.
    pub mean_won: f64,
}

impl fmt::Display for CalibrationBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{} bins={}] [{:.4}, {:.4}) coef={:.4} intercept={:.4} wins={}/{}",
            self.bet_type,
            self.bins,
            self.left,
            self.right,
            self.coef,
            self.intercept,
            self.sample_count,
            self.total,
        )
    }
}

/// A historical `(implied probability, outcome)` pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccuracyRecord {
    pub market_id: String,
    pub runner_id: u64,
    pub bet_type: BetType,
    pub implied_probability: f64,
    /// `None` until the market result is known.
    pub won: Option<bool>,
}

// ---------------------------------------------------------------------------
// Staking
// ---------------------------------------------------------------------------

/// Per-runner output of one allocator invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StakeProposal {
    pub runner_id: u64,
    pub bet_type: BetType,
    pub side: Side,
    pub odds: f64,
    pub stake: Decimal,
    pub expected_payout: Decimal,
    pub implied_profit: Decimal,
}

impl fmt::Display for StakeProposal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} #{} ${} @ {:.2} (payout ${} profit ${})",
            self.bet_type,
            self.side,
            self.runner_id,
            self.stake,
            self.odds,
            self.expected_payout,
            self.implied_profit,
        )
    }
}

impl StakeProposal {
    pub fn is_active(&self) -> bool {
        self.stake > Decimal::ZERO
    }
}

// ---------------------------------------------------------------------------
// Bets
// ---------------------------------------------------------------------------

/// Exchange lifecycle status of a bet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BetStatus {
    Pending,
    Executable,
    /// Executable with part of the size matched.
    Matched,
    Lapsed,
    Cancelled,
    ExecutionComplete,
    Settled,
}

impl BetStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BetStatus::Pending => "PENDING",
            BetStatus::Executable => "EXECUTABLE",
            BetStatus::Matched => "MATCHED",
            BetStatus::Lapsed => "LAPSED",
            BetStatus::Cancelled => "CANCELLED",
            BetStatus::ExecutionComplete => "EXECUTION_COMPLETE",
            BetStatus::Settled => "SETTLED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BetStatus::Settled
                | BetStatus::Lapsed
                | BetStatus::Cancelled
                | BetStatus::ExecutionComplete
        )
    }

    /// Has an unmatched remainder that can still be cancelled.
    pub fn is_cancellable(&self) -> bool {
        matches!(self, BetStatus::Executable | BetStatus::Matched)
    }

    /// Whether moving from `self` to `next` is a legal lifecycle step.
    /// Re-applying the current status is always legal.
    pub fn can_transition_to(&self, next: BetStatus) -> bool {
        use BetStatus::*;
        if *self == next {
            return true;
        }
        match self {
            Pending => next != Pending,
            Executable => next != Pending,
            Matched => !matches!(next, Pending | Executable),
            // A fully matched bet still has to settle.
            ExecutionComplete => next == Settled,
            Settled | Lapsed | Cancelled => false,
        }
    }
}

impl fmt::Display for BetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for BetStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "PENDING" => Ok(BetStatus::Pending),
            "EXECUTABLE" => Ok(BetStatus::Executable),
            "MATCHED" => Ok(BetStatus::Matched),
            "LAPSED" => Ok(BetStatus::Lapsed),
            "CANCELLED" => Ok(BetStatus::Cancelled),
            "EXECUTION_COMPLETE" => Ok(BetStatus::ExecutionComplete),
            "SETTLED" => Ok(BetStatus::Settled),
            _ => Err(anyhow::anyhow!("Unknown bet status: {s}")),
        }
    }
}

/// Final result of a settled bet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BetOutcome {
    Won,
    Lost,
    Void,
}

impl BetOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            BetOutcome::Won => "WON",
            BetOutcome::Lost => "LOST",
            BetOutcome::Void => "VOID",
        }
    }
}

impl fmt::Display for BetOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for BetOutcome {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "WON" | "WIN" => Ok(BetOutcome::Won),
            "LOST" | "LOSE" => Ok(BetOutcome::Lost),
            "VOID" | "VOIDED" => Ok(BetOutcome::Void),
            _ => Err(anyhow::anyhow!("Unknown bet outcome: {s}")),
        }
    }
}

/// A bet placed on the exchange, persisted until settlement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bet {
    pub bet_id: String,
    pub market_id: String,
    pub runner_id: u64,
    pub bet_type: BetType,
    pub side: Side,
    pub price: f64,
    pub size: Decimal,
    pub status: BetStatus,
    pub size_matched: Decimal,
    pub size_remaining: Decimal,
    pub size_cancelled: Decimal,
    pub outcome: Option<BetOutcome>,
    pub profit: Option<Decimal>,
    pub placed_at: DateTime<Utc>,
}

impl fmt::Display for Bet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} {} {} #{} ${} @ {:.2} matched=${} {}",
            self.bet_id,
            self.market_id,
            self.bet_type,
            self.side,
            self.runner_id,
            self.size,
            self.price,
            self.size_matched,
            self.status,
        )?;
        if let Some(outcome) = self.outcome {
            write!(f, " {outcome}")?;
        }
        Ok(())
    }
}

impl Bet {
    /// No recorded outcome and a status that can still change.
    pub fn is_outstanding(&self) -> bool {
        self.outcome.is_none()
            && !matches!(self.status, BetStatus::Lapsed | BetStatus::Cancelled)
    }

    /// Lifecycle check for this particular bet. A fully executed bet with
    /// nothing matched has nothing to settle, so it may still close.
    pub fn can_move_to(&self, next: BetStatus) -> bool {
        match (self.status, next) {
            (BetStatus::ExecutionComplete, BetStatus::Lapsed | BetStatus::Cancelled) => {
                self.size_matched.is_zero()
            }
            (from, to) => from.can_transition_to(to),
        }
    }

    /// Natural key used for upserts.
    pub fn key(&self) -> (&str, &str, u64) {
        (&self.bet_id, &self.market_id, self.runner_id)
    }
}

// ---------------------------------------------------------------------------
// Markets and books
// ---------------------------------------------------------------------------

/// A race: a start time plus the exchange markets tied to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Race {
    pub race_id: String,
    pub venue: String,
    pub start_time: DateTime<Utc>,
    pub markets: Vec<MarketRecord>,
}

impl fmt::Display for Race {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} ({} markets)",
            self.venue,
            self.start_time.format("%H:%M"),
            self.markets.len(),
        )
    }
}

impl Race {
    pub fn market(&self, bet_type: BetType) -> Option<&MarketRecord> {
        self.markets.iter().find(|m| m.bet_type == bet_type)
    }

    pub fn has_started(&self, now: DateTime<Utc>) -> bool {
        self.start_time <= now
    }
}

/// Exchange market tied 1:1 to a race for a given bet type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketRecord {
    pub market_id: String,
    pub race_id: String,
    pub bet_type: BetType,
    pub name: String,
    pub start_time: DateTime<Utc>,
    pub total_matched: f64,
    pub runners: Vec<RunnerRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunnerRecord {
    pub market_id: String,
    pub selection_id: u64,
    pub name: String,
    pub sort_priority: u32,
}

/// One version of a market book.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookRecord {
    pub market_id: String,
    pub version: u64,
    pub status: String,
    pub inplay: bool,
    pub number_of_runners: u32,
    pub number_of_active_runners: u32,
    pub total_matched: f64,
    pub captured_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunnerBookRecord {
    pub market_id: String,
    pub version: u64,
    pub selection_id: u64,
    pub status: String,
    pub last_price_traded: Option<f64>,
    pub back_price: Option<f64>,
    pub back_size: Option<f64>,
    pub lay_price: Option<f64>,
    pub lay_size: Option<f64>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
