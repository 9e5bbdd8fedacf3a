//! Market discovery.
//!
//! Queries the exchange catalogue for WIN and PLACE markets starting inside
//! the look-back/look-ahead window and groups them into races. A race is
//! every market sharing an event and a start time.

use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::engine::retry::{with_retry, RetryConfig};
use crate::error::{DutchError, Result};
use crate::exchange::{Exchange, MarketFilter, MarketSummary};
use crate::types::{BetType, MarketRecord, Race, RunnerRecord};

/// Horse racing and greyhound racing.
pub const DEFAULT_EVENT_TYPES: &[&str] = &["7", "4339"];

pub struct MarketScanner {
    exchange: Arc<dyn Exchange>,
    event_type_ids: Vec<String>,
    lookback: Duration,
    lookahead: Duration,
    retry: RetryConfig,
}

impl MarketScanner {
    pub fn new(
        exchange: Arc<dyn Exchange>,
        event_type_ids: Vec<String>,
        lookback_mins: i64,
        lookahead_mins: i64,
        retry: RetryConfig,
    ) -> Self {
        let event_type_ids = if event_type_ids.is_empty() {
            DEFAULT_EVENT_TYPES.iter().map(|s| s.to_string()).collect()
        } else {
            event_type_ids
        };
        Self {
            exchange,
            event_type_ids,
            lookback: Duration::minutes(lookback_mins),
            lookahead: Duration::minutes(lookahead_mins),
            retry,
        }
    }

    pub fn filter(&self, now: DateTime<Utc>) -> MarketFilter {
        MarketFilter {
            event_type_ids: self.event_type_ids.clone(),
            bet_types: BetType::ALL.to_vec(),
            from: now - self.lookback,
            to: now + self.lookahead,
        }
    }

    /// Races in the current window, earliest first.
    ///
    /// An empty catalogue is `DataUnavailable` and retried with backoff;
    /// the error is returned once the attempt budget is spent.
    pub async fn scan(&self, now: DateTime<Utc>) -> Result<Vec<Race>> {
        let filter = &self.filter(now);
        let exchange = &self.exchange;
        let catalogue = with_retry(&self.retry, "listMarketCatalogue", move || async move {
            let markets = exchange.list_market_catalogue(filter).await?;
            if markets.is_empty() {
                return Err(DutchError::DataUnavailable(format!(
                    "no markets between {} and {}",
                    filter.from.format("%H:%M"),
                    filter.to.format("%H:%M"),
                )));
            }
            Ok(markets)
        })
        .await?;

        let races = group_races(catalogue);
        info!(count = races.len(), "Races discovered");
        Ok(races)
    }
}

/// Group catalogue entries into races keyed on `(start_time, event_id)`.
/// Markets of other types are ignored.
pub fn group_races(catalogue: Vec<MarketSummary>) -> Vec<Race> {
    let mut races: BTreeMap<(DateTime<Utc>, String), Race> = BTreeMap::new();

    for summary in catalogue {
        let Some(bet_type) = summary.bet_type else {
            debug!(market_id = %summary.market_id, name = %summary.market_name, "Skipping market type");
            continue;
        };
        let race_id = format!("{}-{}", summary.event_id, summary.start_time.timestamp());
        let race = races
            .entry((summary.start_time, summary.event_id.clone()))
            .or_insert_with(|| Race {
                race_id: race_id.clone(),
                venue: summary.venue.clone(),
                start_time: summary.start_time,
                markets: Vec::new(),
            });

        if race.market(bet_type).is_some() {
            debug!(market_id = %summary.market_id, race_id = %race_id, "Duplicate bet type for race");
            continue;
        }

        let runners = summary
            .runners
            .iter()
            .map(|r| RunnerRecord {
                market_id: summary.market_id.clone(),
                selection_id: r.selection_id,
                name: r.name.clone(),
                sort_priority: r.sort_priority,
            })
            .collect();
        race.markets.push(MarketRecord {
            market_id: summary.market_id,
            race_id,
            bet_type,
            name: summary.market_name,
            start_time: summary.start_time,
            total_matched: summary.total_matched,
            runners,
        });
    }

    races.into_values().collect()
}
