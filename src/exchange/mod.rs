//! Exchange integration.
//!
//! Defines the `Exchange` trait (market discovery, books, order placement,
//! cancellation and order queries) and the wire-neutral types passed across
//! it. `betfair` provides the live implementation.

pub mod betfair;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::{BetOutcome, BetStatus, BetType, Side};

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// Catalogue query: racing event types starting inside a time window.
#[derive(Debug, Clone, PartialEq)]
pub struct MarketFilter {
    pub event_type_ids: Vec<String>,
    pub bet_types: Vec<BetType>,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

/// One LIMIT order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaceInstruction {
    pub selection_id: u64,
    pub side: Side,
    pub size: Decimal,
    pub price: f64,
}

/// Which cleared-order ledger to query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ClearedStatus {
    Settled,
    Lapsed,
    Cancelled,
}

impl ClearedStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClearedStatus::Settled => "SETTLED",
            ClearedStatus::Lapsed => "LAPSED",
            ClearedStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn bet_status(&self) -> BetStatus {
        match self {
            ClearedStatus::Settled => BetStatus::Settled,
            ClearedStatus::Lapsed => BetStatus::Lapsed,
            ClearedStatus::Cancelled => BetStatus::Cancelled,
        }
    }
}

impl std::fmt::Display for ClearedStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunnerSummary {
    pub selection_id: u64,
    pub name: String,
    pub sort_priority: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSummary {
    pub market_id: String,
    pub market_name: String,
    /// `None` for market types other than WIN/PLACE.
    pub bet_type: Option<BetType>,
    pub event_id: String,
    pub venue: String,
    pub start_time: DateTime<Utc>,
    pub total_matched: f64,
    pub runners: Vec<RunnerSummary>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceSize {
    pub price: f64,
    pub size: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunnerBookSnapshot {
    pub selection_id: u64,
    /// ACTIVE, WINNER, LOSER, REMOVED, ...
    pub status: String,
    pub last_price_traded: Option<f64>,
    pub best_back: Option<PriceSize>,
    pub best_lay: Option<PriceSize>,
}

impl RunnerBookSnapshot {
    pub fn is_active(&self) -> bool {
        self.status == "ACTIVE"
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketBookSnapshot {
    pub market_id: String,
    /// OPEN, SUSPENDED, CLOSED, ...
    pub status: String,
    pub inplay: bool,
    pub version: u64,
    pub number_of_runners: u32,
    pub number_of_active_runners: u32,
    pub total_matched: f64,
    pub runners: Vec<RunnerBookSnapshot>,
}

impl MarketBookSnapshot {
    pub fn is_closed(&self) -> bool {
        self.status == "CLOSED"
    }
}

/// Outcome of one placement instruction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub selection_id: u64,
    /// Missing when the instruction failed.
    pub bet_id: Option<String>,
    pub status: BetStatus,
    pub price: f64,
    pub size: Decimal,
    pub size_matched: Decimal,
    pub error_code: Option<String>,
    pub placed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CancelReport {
    pub bet_id: String,
    pub success: bool,
    pub size_cancelled: Decimal,
    pub error_code: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenOrderState {
    pub bet_id: String,
    pub market_id: String,
    pub selection_id: u64,
    pub status: BetStatus,
    pub size_matched: Decimal,
    pub size_remaining: Decimal,
    pub size_cancelled: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClearedOrderRecord {
    pub bet_id: String,
    pub market_id: String,
    pub selection_id: u64,
    pub status: ClearedStatus,
    /// Present for settled orders only.
    pub outcome: Option<BetOutcome>,
    pub profit: Option<Decimal>,
    pub size_cancelled: Decimal,
    pub settled_at: Option<DateTime<Utc>>,
}

/// Lifecycle status for an exchange order status code.
///
/// The exchange only reports EXECUTABLE or EXECUTION_COMPLETE for live
/// orders; an executable order with some size matched is partially matched.
pub fn order_status(code: &str, size_matched: Decimal) -> BetStatus {
    match code {
        "EXECUTION_COMPLETE" => BetStatus::ExecutionComplete,
        "EXECUTABLE" if size_matched > Decimal::ZERO => BetStatus::Matched,
        "EXECUTABLE" => BetStatus::Executable,
        other => other.parse().unwrap_or(BetStatus::Pending),
    }
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// A betting exchange.
///
/// One instance is shared process-wide; implementations own their session
/// and must re-authenticate transparently when it expires.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Exchange: Send + Sync {
    async fn list_market_catalogue(&self, filter: &MarketFilter) -> Result<Vec<MarketSummary>>;

    async fn list_market_book(&self, market_ids: &[String]) -> Result<Vec<MarketBookSnapshot>>;

    /// Submit all instructions for one market in a single request.
    /// A whole-request rejection is `DutchError::ExchangeRejected`.
    async fn place_orders(
        &self,
        market_id: &str,
        instructions: &[PlaceInstruction],
    ) -> Result<Vec<ExecutionReport>>;

    async fn cancel_orders(&self, market_id: &str, bet_ids: &[String]) -> Result<Vec<CancelReport>>;

    async fn list_current_orders(&self, bet_ids: &[String]) -> Result<Vec<OpenOrderState>>;

    async fn list_cleared_orders(
        &self,
        bet_ids: &[String],
        status: ClearedStatus,
    ) -> Result<Vec<ClearedOrderRecord>>;
}
