//! Mock exchange for integration testing.
//!
//! Provides a deterministic `Exchange` implementation that lists known
//! markets, accepts orders, and lets test code drive matching, settlement
//! and lapsing. All state is in-memory with no external dependencies.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};

use dutcher::error::{DutchError, Result};
use dutcher::exchange::*;
use dutcher::types::{BetOutcome, BetType};

#[derive(Debug, Clone)]
struct Order {
    market_id: String,
    selection_id: u64,
    price: f64,
    size: Decimal,
    size_matched: Decimal,
    complete: bool,
    cleared: Vec<ClearedOrderRecord>,
}

/// A mock betting exchange.
///
/// Markets, books and order state are fully controllable from test code.
#[derive(Default)]
pub struct MockExchange {
    catalogue: Arc<Mutex<Vec<MarketSummary>>>,
    books: Arc<Mutex<HashMap<String, MarketBookSnapshot>>>,
    orders: Arc<Mutex<BTreeMap<String, Order>>>,
    placed: Arc<Mutex<Vec<(String, PlaceInstruction)>>>,
    rejected_markets: Arc<Mutex<HashSet<String>>>,
    next_bet: Arc<Mutex<u64>>,
}

impl MockExchange {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an open market with one active runner per price. Selection ids
    /// are 1, 2, 3, ... in price order.
    pub fn add_market(
        &self,
        market_id: &str,
        event_id: &str,
        bet_type: BetType,
        start_time: DateTime<Utc>,
        prices: &[f64],
    ) {
        let runners: Vec<RunnerSummary> = (1..=prices.len() as u64)
            .map(|id| RunnerSummary {
                selection_id: id,
                name: format!("{id}. Runner"),
                sort_priority: id as u32,
            })
            .collect();
        self.catalogue.lock().unwrap().push(MarketSummary {
            market_id: market_id.to_string(),
            market_name: format!("{bet_type} market"),
            bet_type: Some(bet_type),
            event_id: event_id.to_string(),
            venue: "Mock Park".to_string(),
            start_time,
            total_matched: 1_000.0,
            runners,
        });

        let book = MarketBookSnapshot {
            market_id: market_id.to_string(),
            status: "OPEN".to_string(),
            inplay: false,
            version: 1,
            number_of_runners: prices.len() as u32,
            number_of_active_runners: prices.len() as u32,
            total_matched: 1_000.0,
            runners: prices
                .iter()
                .enumerate()
                .map(|(i, &price)| RunnerBookSnapshot {
                    selection_id: i as u64 + 1,
                    status: "ACTIVE".to_string(),
                    last_price_traded: Some(price),
                    best_back: Some(PriceSize { price, size: 200.0 }),
                    best_lay: Some(PriceSize {
                        price: price + 0.1,
                        size: 150.0,
                    }),
                })
                .collect(),
        };
        self.books.lock().unwrap().insert(market_id.to_string(), book);
    }

    /// Reject every placement on `market_id`.
    pub fn reject_market(&self, market_id: &str) {
        self.rejected_markets.lock().unwrap().insert(market_id.to_string());
    }

    /// All instructions received so far, with their market ids.
    pub fn placed(&self) -> Vec<(String, PlaceInstruction)> {
        self.placed.lock().unwrap().clone()
    }

    /// Fully match every live order on `market_id`.
    pub fn match_all(&self, market_id: &str) {
        let mut orders = self.orders.lock().unwrap();
        for order in orders.values_mut().filter(|o| o.market_id == market_id && !o.complete) {
            order.size_matched = order.size;
            order.complete = true;
        }
    }

    /// Match part of one order.
    pub fn match_partial(&self, bet_id: &str, amount: Decimal) {
        let mut orders = self.orders.lock().unwrap();
        if let Some(order) = orders.get_mut(bet_id) {
            order.size_matched = (order.size_matched + amount).min(order.size);
            order.complete = order.size_matched == order.size;
        }
    }

    /// Close the market with `winner` as the only WINNER. Matched orders
    /// settle and unmatched ones lapse. A live order that matched in part
    /// gets both: its remainder lapses and the matched part settles.
    pub fn settle_market(&self, market_id: &str, winner: u64) {
        if let Some(book) = self.books.lock().unwrap().get_mut(market_id) {
            book.status = "CLOSED".to_string();
            book.version += 1;
            book.number_of_active_runners = 0;
            for runner in &mut book.runners {
                runner.status = if runner.selection_id == winner {
                    "WINNER".to_string()
                } else {
                    "LOSER".to_string()
                };
                runner.best_back = None;
                runner.best_lay = None;
            }
        }

        let mut orders = self.orders.lock().unwrap();
        for (bet_id, order) in orders.iter_mut() {
            if order.market_id != market_id || !order.cleared.is_empty() {
                continue;
            }
            let remainder = order.size - order.size_matched;
            if !order.complete && order.size_matched > Decimal::ZERO && remainder > Decimal::ZERO {
                order.cleared.push(ClearedOrderRecord {
                    bet_id: bet_id.clone(),
                    market_id: market_id.to_string(),
                    selection_id: order.selection_id,
                    status: ClearedStatus::Lapsed,
                    outcome: None,
                    profit: None,
                    size_cancelled: remainder,
                    settled_at: Some(Utc::now()),
                });
            }
            let record = if order.size_matched > Decimal::ZERO {
                let won = order.selection_id == winner;
                let price = Decimal::try_from(order.price).unwrap_or(Decimal::ONE);
                ClearedOrderRecord {
                    bet_id: bet_id.clone(),
                    market_id: market_id.to_string(),
                    selection_id: order.selection_id,
                    status: ClearedStatus::Settled,
                    outcome: Some(if won { BetOutcome::Won } else { BetOutcome::Lost }),
                    profit: Some(if won {
                        (order.size_matched * (price - Decimal::ONE)).round_dp(2)
                    } else {
                        -order.size_matched
                    }),
                    size_cancelled: remainder,
                    settled_at: Some(Utc::now()),
                }
            } else {
                ClearedOrderRecord {
                    bet_id: bet_id.clone(),
                    market_id: market_id.to_string(),
                    selection_id: order.selection_id,
                    status: ClearedStatus::Lapsed,
                    outcome: None,
                    profit: None,
                    size_cancelled: order.size,
                    settled_at: Some(Utc::now()),
                }
            };
            order.complete = true;
            order.cleared.push(record);
        }
    }

    fn check_rejected(&self, operation: &str, market_id: &str) -> Result<()> {
        if self.rejected_markets.lock().unwrap().contains(market_id) {
            return Err(DutchError::rejected(operation, market_id, "MARKET_SUSPENDED"));
        }
        Ok(())
    }
}

#[async_trait]
impl Exchange for MockExchange {
    async fn list_market_catalogue(&self, filter: &MarketFilter) -> Result<Vec<MarketSummary>> {
        Ok(self
            .catalogue
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.start_time >= filter.from && m.start_time <= filter.to)
            .filter(|m| m.bet_type.map_or(false, |t| filter.bet_types.contains(&t)))
            .cloned()
            .collect())
    }

    async fn list_market_book(&self, market_ids: &[String]) -> Result<Vec<MarketBookSnapshot>> {
        let books = self.books.lock().unwrap();
        Ok(market_ids.iter().filter_map(|id| books.get(id).cloned()).collect())
    }

    async fn place_orders(
        &self,
        market_id: &str,
        instructions: &[PlaceInstruction],
    ) -> Result<Vec<ExecutionReport>> {
        self.check_rejected("placeOrders", market_id)?;

        let mut reports = Vec::with_capacity(instructions.len());
        for instruction in instructions {
            let bet_id = {
                let mut next = self.next_bet.lock().unwrap();
                *next += 1;
                format!("{}", 1000 + *next)
            };
            self.orders.lock().unwrap().insert(
                bet_id.clone(),
                Order {
                    market_id: market_id.to_string(),
                    selection_id: instruction.selection_id,
                    price: instruction.price,
                    size: instruction.size,
                    size_matched: Decimal::ZERO,
                    complete: false,
                    cleared: Vec::new(),
                },
            );
            self.placed
                .lock()
                .unwrap()
                .push((market_id.to_string(), instruction.clone()));
            reports.push(ExecutionReport {
                selection_id: instruction.selection_id,
                bet_id: Some(bet_id),
                status: order_status("EXECUTABLE", Decimal::ZERO),
                price: instruction.price,
                size: instruction.size,
                size_matched: Decimal::ZERO,
                error_code: None,
                placed_at: Utc::now(),
            });
        }
        Ok(reports)
    }

    async fn cancel_orders(&self, market_id: &str, bet_ids: &[String]) -> Result<Vec<CancelReport>> {
        self.check_rejected("cancelOrders", market_id)?;

        let mut orders = self.orders.lock().unwrap();
        Ok(bet_ids
            .iter()
            .map(|bet_id| match orders.get_mut(bet_id) {
                Some(order) if !order.complete => {
                    let remaining = order.size - order.size_matched;
                    order.complete = true;
                    if order.size_matched == Decimal::ZERO {
                        order.cleared.push(ClearedOrderRecord {
                            bet_id: bet_id.clone(),
                            market_id: market_id.to_string(),
                            selection_id: order.selection_id,
                            status: ClearedStatus::Cancelled,
                            outcome: None,
                            profit: None,
                            size_cancelled: remaining,
                            settled_at: Some(Utc::now()),
                        });
                    }
                    CancelReport {
                        bet_id: bet_id.clone(),
                        success: true,
                        size_cancelled: remaining,
                        error_code: None,
                    }
                }
                _ => CancelReport {
                    bet_id: bet_id.clone(),
                    success: false,
                    size_cancelled: Decimal::ZERO,
                    error_code: Some("BET_TAKEN_OR_LAPSED".to_string()),
                },
            })
            .collect())
    }

    async fn list_current_orders(&self, bet_ids: &[String]) -> Result<Vec<OpenOrderState>> {
        let orders = self.orders.lock().unwrap();
        Ok(bet_ids
            .iter()
            .filter_map(|id| orders.get(id).map(|o| (id, o)))
            .filter(|(_, o)| o.cleared.is_empty())
            .map(|(id, o)| {
                let code = if o.complete { "EXECUTION_COMPLETE" } else { "EXECUTABLE" };
                let remaining = if o.complete {
                    Decimal::ZERO
                } else {
                    o.size - o.size_matched
                };
                OpenOrderState {
                    bet_id: id.clone(),
                    market_id: o.market_id.clone(),
                    selection_id: o.selection_id,
                    status: order_status(code, o.size_matched),
                    size_matched: o.size_matched,
                    size_remaining: remaining,
                    size_cancelled: o.size - o.size_matched - remaining,
                }
            })
            .collect())
    }

    async fn list_cleared_orders(
        &self,
        bet_ids: &[String],
        status: ClearedStatus,
    ) -> Result<Vec<ClearedOrderRecord>> {
        let orders = self.orders.lock().unwrap();
        Ok(bet_ids
            .iter()
            .filter_map(|id| orders.get(id))
            .flat_map(|o| o.cleared.iter().cloned())
            .filter(|r| r.status == status)
            .collect())
    }
}
