//! Bet lifecycle reconciliation.
//!
//! Bets are created from placement reports and afterwards only changed
//! here, by folding exchange order state into the stored rows. Every pass
//! is scoped to the bet ids still outstanding and is idempotent: applying
//! the same exchange snapshot twice leaves the rows untouched.

use rust_decimal::Decimal;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::error::{DutchError, Result};
use crate::exchange::{ClearedOrderRecord, ClearedStatus, Exchange, ExecutionReport, OpenOrderState};
use crate::storage::BetStore;
use crate::types::{Bet, BetStatus, BetType, Side};

/// Counts from one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Outstanding bets the pass covered.
    pub examined: usize,
    pub updated: usize,
    pub unchanged: usize,
    /// Exchange records that would have been an illegal status change.
    pub rejected: usize,
}

impl ReconcileReport {
    fn merge(&mut self, other: ReconcileReport) {
        self.examined += other.examined;
        self.updated += other.updated;
        self.unchanged += other.unchanged;
        self.rejected += other.rejected;
    }
}

impl fmt::Display for ReconcileReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "examined={} updated={} unchanged={} rejected={}",
            self.examined, self.updated, self.unchanged, self.rejected
        )
    }
}

enum Applied {
    Updated(Bet),
    Unchanged,
    Rejected,
}

pub struct Reconciler {
    exchange: Arc<dyn Exchange>,
    store: Arc<dyn BetStore>,
}

impl Reconciler {
    pub fn new(exchange: Arc<dyn Exchange>, store: Arc<dyn BetStore>) -> Self {
        Self { exchange, store }
    }

    // -- Submission ----------------------------------------------------------

    /// Persist one `Bet` per successful instruction. Status and matched size
    /// come straight from the execution report.
    pub async fn record_submission(
        &self,
        market_id: &str,
        bet_type: BetType,
        reports: &[ExecutionReport],
    ) -> Result<Vec<Bet>> {
        let mut bets = Vec::with_capacity(reports.len());
        for report in reports {
            let Some(bet_id) = report.bet_id.clone() else {
                warn!(
                    market_id,
                    selection_id = report.selection_id,
                    error_code = ?report.error_code,
                    "Instruction failed, no bet recorded"
                );
                continue;
            };
            let bet = Bet {
                bet_id,
                market_id: market_id.to_string(),
                runner_id: report.selection_id,
                bet_type,
                side: Side::Back,
                price: report.price,
                size: report.size,
                status: report.status,
                size_matched: report.size_matched,
                size_remaining: (report.size - report.size_matched).max(Decimal::ZERO),
                size_cancelled: Decimal::ZERO,
                outcome: None,
                profit: None,
                placed_at: report.placed_at,
            };
            self.store.upsert_bet(&bet).await?;
            info!(bet = %bet, "Bet recorded");
            bets.push(bet);
        }
        Ok(bets)
    }

    // -- Cancellation --------------------------------------------------------

    /// Cancel every executable bet on `market_id` ahead of a fresh
    /// allocation. Returns the number of successful cancellations.
    ///
    /// A bet the exchange refuses to cancel is marked EXECUTION_COMPLETE so
    /// it is not retried every cycle. A cancelled bet that had already
    /// matched in part also becomes EXECUTION_COMPLETE: its matched portion
    /// still has to settle.
    pub async fn cancel_outstanding(&self, market_id: &str) -> Result<usize> {
        let targets: Vec<Bet> = self
            .store
            .bets_for_market(market_id)
            .await?
            .into_iter()
            .filter(|b| b.outcome.is_none() && b.status.is_cancellable())
            .collect();
        if targets.is_empty() {
            debug!(market_id, "Nothing to cancel");
            return Ok(0);
        }

        let bet_ids: Vec<String> = targets.iter().map(|b| b.bet_id.clone()).collect();
        let reports = self.exchange.cancel_orders(market_id, &bet_ids).await?;
        let by_id: HashMap<&str, _> = reports.iter().map(|r| (r.bet_id.as_str(), r)).collect();

        let mut cancelled = 0;
        for mut bet in targets {
            match by_id.get(bet.bet_id.as_str()) {
                Some(report) if report.success => {
                    // Whatever was not cancelled had matched
                    let matched = (bet.size - report.size_cancelled).max(Decimal::ZERO);
                    bet.size_matched = matched;
                    bet.size_cancelled = report.size_cancelled;
                    bet.size_remaining = Decimal::ZERO;
                    bet.status = if matched > Decimal::ZERO {
                        BetStatus::ExecutionComplete
                    } else {
                        BetStatus::Cancelled
                    };
                    cancelled += 1;
                }
                other => {
                    warn!(
                        bet_id = %bet.bet_id,
                        market_id,
                        error_code = ?other.and_then(|r| r.error_code.as_deref()),
                        "Cancellation refused, closing bet"
                    );
                    bet.status = BetStatus::ExecutionComplete;
                }
            }
            self.store.upsert_bet(&bet).await?;
        }

        info!(market_id, requested = bet_ids.len(), cancelled, "Outstanding bets cancelled");
        Ok(cancelled)
    }

    // -- Reconciliation passes -----------------------------------------------

    /// Open, settled, lapsed then cancelled.
    pub async fn reconcile_all(&self) -> Result<ReconcileReport> {
        let mut total = self.reconcile_open().await?;
        total.merge(self.reconcile_settled().await?);
        total.merge(self.reconcile_lapsed().await?);
        total.merge(self.reconcile_cancelled().await?);
        Ok(total)
    }

    /// Fold current order state (status and sizes) into outstanding bets.
    pub async fn reconcile_open(&self) -> Result<ReconcileReport> {
        let Some((mut outstanding, bet_ids)) = self.outstanding().await? else {
            return Ok(ReconcileReport::default());
        };
        let orders = self.exchange.list_current_orders(&bet_ids).await?;
        let mut report = ReconcileReport {
            examined: bet_ids.len(),
            ..Default::default()
        };
        for order in &orders {
            let Some(bet) = outstanding.get_mut(&order.bet_id) else {
                debug!(bet_id = %order.bet_id, "Current order not outstanding, ignoring");
                continue;
            };
            let applied = apply_open(bet, order);
            self.commit(bet, applied, &mut report).await?;
        }
        debug!(%report, "Open orders reconciled");
        Ok(report)
    }

    /// Record outcome and profit for settled bets.
    pub async fn reconcile_settled(&self) -> Result<ReconcileReport> {
        self.reconcile_cleared(ClearedStatus::Settled).await
    }

    pub async fn reconcile_lapsed(&self) -> Result<ReconcileReport> {
        self.reconcile_cleared(ClearedStatus::Lapsed).await
    }

    pub async fn reconcile_cancelled(&self) -> Result<ReconcileReport> {
        self.reconcile_cleared(ClearedStatus::Cancelled).await
    }

    async fn reconcile_cleared(&self, status: ClearedStatus) -> Result<ReconcileReport> {
        let Some((mut outstanding, bet_ids)) = self.outstanding().await? else {
            return Ok(ReconcileReport::default());
        };
        let records = self.exchange.list_cleared_orders(&bet_ids, status).await?;
        let mut report = ReconcileReport {
            examined: bet_ids.len(),
            ..Default::default()
        };
        for record in &records {
            if record.status != status {
                warn!(bet_id = %record.bet_id, expected = %status, got = %record.status, "Unexpected cleared status");
                continue;
            }
            let Some(bet) = outstanding.get_mut(&record.bet_id) else {
                debug!(bet_id = %record.bet_id, "Cleared order not outstanding, ignoring");
                continue;
            };
            let applied = match status {
                ClearedStatus::Settled => apply_settlement(bet, record)?,
                ClearedStatus::Lapsed | ClearedStatus::Cancelled => apply_closure(bet, record),
            };
            self.commit(bet, applied, &mut report).await?;
        }
        if report.updated > 0 {
            info!(status = %status, %report, "Cleared orders reconciled");
        }
        Ok(report)
    }

    /// Outstanding bets keyed by bet id, plus the id list to query with.
    async fn outstanding(&self) -> Result<Option<(HashMap<String, Bet>, Vec<String>)>> {
        let bets = self.store.outstanding_bets().await?;
        if bets.is_empty() {
            return Ok(None);
        }
        let bet_ids: Vec<String> = bets.iter().map(|b| b.bet_id.clone()).collect();
        let by_id = bets.into_iter().map(|b| (b.bet_id.clone(), b)).collect();
        Ok(Some((by_id, bet_ids)))
    }

    async fn commit(&self, bet: &mut Bet, applied: Applied, report: &mut ReconcileReport) -> Result<()> {
        match applied {
            Applied::Updated(next) => {
                self.store.upsert_bet(&next).await?;
                debug!(bet = %next, "Bet updated");
                *bet = next;
                report.updated += 1;
            }
            Applied::Unchanged => report.unchanged += 1,
            Applied::Rejected => report.rejected += 1,
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// State folding
// ---------------------------------------------------------------------------

fn guarded(bet: &Bet, next: Bet) -> Applied {
    if next == *bet {
        return Applied::Unchanged;
    }
    if !bet.can_move_to(next.status) {
        warn!(
            bet_id = %bet.bet_id,
            from = %bet.status,
            to = %next.status,
            "Illegal status transition, ignoring exchange record"
        );
        return Applied::Rejected;
    }
    Applied::Updated(next)
}

fn apply_open(bet: &Bet, order: &OpenOrderState) -> Applied {
    let next = Bet {
        status: order.status,
        size_matched: order.size_matched,
        size_remaining: order.size_remaining,
        size_cancelled: order.size_cancelled,
        ..bet.clone()
    };
    guarded(bet, next)
}

/// An outcome is written at most once. Seeing the same settlement again is
/// a no-op; a different one is a conflict.
fn apply_settlement(bet: &Bet, record: &ClearedOrderRecord) -> Result<Applied> {
    let Some(outcome) = record.outcome else {
        warn!(bet_id = %bet.bet_id, "Settled order without an outcome");
        return Ok(Applied::Rejected);
    };
    if let Some(existing) = bet.outcome {
        if existing == outcome && bet.profit == record.profit {
            return Ok(Applied::Unchanged);
        }
        let conflict = DutchError::SettlementConflict {
            bet_id: bet.bet_id.clone(),
            existing_outcome: existing,
            existing_profit: bet.profit,
            incoming_outcome: outcome,
            incoming_profit: record.profit,
        };
        error!(error = %conflict, "Settlement conflict");
        return Err(conflict);
    }
    let next = Bet {
        status: BetStatus::Settled,
        outcome: Some(outcome),
        profit: record.profit,
        size_remaining: Decimal::ZERO,
        ..bet.clone()
    };
    Ok(guarded(bet, next))
}

/// A lapse or cancellation only ends a bet that never matched. When part
/// of it matched, the record closes the remainder and the bet waits for
/// its settlement as fully executed.
fn apply_closure(bet: &Bet, record: &ClearedOrderRecord) -> Applied {
    let mut matched = bet.size_matched;
    if record.size_cancelled > Decimal::ZERO {
        matched = matched.max((bet.size - record.size_cancelled).max(Decimal::ZERO));
    }
    let status = if matched > Decimal::ZERO {
        BetStatus::ExecutionComplete
    } else {
        record.status.bet_status()
    };
    // The cancelled size is optional on cleared records.
    let size_cancelled = if record.size_cancelled > Decimal::ZERO {
        record.size_cancelled
    } else {
        bet.size - matched
    };
    let next = Bet {
        status,
        size_matched: matched,
        size_cancelled,
        size_remaining: Decimal::ZERO,
        ..bet.clone()
    };
    guarded(bet, next)
}
