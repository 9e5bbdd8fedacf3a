//! Betfair Exchange client.
//!
//! JSON-over-REST betting API. Every call carries the application key and a
//! session token from the SSO login endpoint:
//! `X-Application: {app_key}`, `X-Authentication: {session_token}`.
//!
//! The session is created lazily on first use. A 401, or an API error of
//! `INVALID_SESSION_INFORMATION` / `NO_SESSION`, drops the token, logs in
//! again and repeats the call once.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::{
    order_status, CancelReport, ClearedOrderRecord, ClearedStatus, Exchange, ExecutionReport,
    MarketBookSnapshot, MarketFilter, MarketSummary, OpenOrderState, PlaceInstruction,
    PriceSize, RunnerBookSnapshot, RunnerSummary,
};
use crate::error::{DutchError, Result};
use crate::types::{d, f, BetOutcome, BetStatus, BetType};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

const AUTH_URL: &str = "https://identitysso.betfair.com/api/login";
const BETTING_URL: &str = "https://api.betfair.com/exchange/betting/rest/v1.0";

/// Maximum markets per catalogue request.
const CATALOGUE_LIMIT: u32 = 200;

/// listMarketBook accepts at most this many market ids per request.
const BOOK_BATCH: usize = 40;

const SESSION_ERRORS: &[&str] = &["INVALID_SESSION_INFORMATION", "NO_SESSION"];

// ---------------------------------------------------------------------------
// Betfair API types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginResponse {
    session_token: Option<String>,
    login_status: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MarketCatalogue {
    market_id: String,
    market_name: String,
    #[serde(default)]
    description: Option<MarketDescription>,
    #[serde(default)]
    event: Option<EventInfo>,
    #[serde(default)]
    total_matched: Option<f64>,
    #[serde(default)]
    market_start_time: Option<String>,
    #[serde(default)]
    runners: Vec<RunnerCatalogue>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MarketDescription {
    #[serde(default)]
    market_type: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventInfo {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    venue: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RunnerCatalogue {
    selection_id: u64,
    runner_name: String,
    #[serde(default)]
    sort_priority: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MarketBook {
    market_id: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    inplay: Option<bool>,
    #[serde(default)]
    version: Option<u64>,
    #[serde(default)]
    number_of_runners: Option<u32>,
    #[serde(default)]
    number_of_active_runners: Option<u32>,
    #[serde(default)]
    total_matched: Option<f64>,
    #[serde(default)]
    runners: Vec<RunnerBook>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RunnerBook {
    selection_id: u64,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    last_price_traded: Option<f64>,
    #[serde(default)]
    ex: Option<ExchangePrices>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExchangePrices {
    #[serde(default)]
    available_to_back: Vec<WirePriceSize>,
    #[serde(default)]
    available_to_lay: Vec<WirePriceSize>,
}

#[derive(Debug, Deserialize)]
struct WirePriceSize {
    price: f64,
    size: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaceExecutionReport {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    error_code: Option<String>,
    #[serde(default)]
    instruction_reports: Vec<PlaceInstructionReport>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaceInstructionReport {
    #[serde(default)]
    error_code: Option<String>,
    #[serde(default)]
    order_status: Option<String>,
    instruction: WirePlaceInstruction,
    #[serde(default)]
    bet_id: Option<String>,
    #[serde(default)]
    placed_date: Option<String>,
    #[serde(default)]
    size_matched: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WirePlaceInstruction {
    selection_id: u64,
    #[serde(default)]
    limit_order: Option<WireLimitOrder>,
}

#[derive(Debug, Deserialize)]
struct WireLimitOrder {
    size: f64,
    price: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CancelExecutionReport {
    #[serde(default)]
    error_code: Option<String>,
    #[serde(default)]
    instruction_reports: Vec<CancelInstructionReport>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CancelInstructionReport {
    status: String,
    #[serde(default)]
    error_code: Option<String>,
    instruction: WireCancelInstruction,
    #[serde(default)]
    size_cancelled: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireCancelInstruction {
    bet_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CurrentOrderSummaryReport {
    #[serde(default)]
    current_orders: Vec<CurrentOrder>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CurrentOrder {
    bet_id: String,
    market_id: String,
    selection_id: u64,
    status: String,
    #[serde(default)]
    size_matched: Option<f64>,
    #[serde(default)]
    size_remaining: Option<f64>,
    #[serde(default)]
    size_cancelled: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClearedOrderSummaryReport {
    #[serde(default)]
    cleared_orders: Vec<ClearedOrder>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClearedOrder {
    bet_id: String,
    market_id: String,
    selection_id: u64,
    #[serde(default)]
    bet_outcome: Option<String>,
    #[serde(default)]
    profit: Option<f64>,
    #[serde(default)]
    size_cancelled: Option<f64>,
    #[serde(default)]
    settled_date: Option<String>,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct BetfairClient {
    http: Client,
    app_key: String,
    username: String,
    password: SecretString,
    session_token: RwLock<Option<String>>,
    auth_url: String,
    betting_url: String,
}

impl BetfairClient {
    pub fn new(
        app_key: String,
        username: String,
        password: SecretString,
        timeout: Duration,
    ) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent("DUTCHER/0.1.0")
            .build()?;

        Ok(Self {
            http,
            app_key,
            username,
            password,
            session_token: RwLock::new(None),
            auth_url: AUTH_URL.to_string(),
            betting_url: BETTING_URL.to_string(),
        })
    }

    /// Point the client at different endpoints (sandbox or test server).
    pub fn with_urls(mut self, auth_url: impl Into<String>, betting_url: impl Into<String>) -> Self {
        self.auth_url = auth_url.into();
        self.betting_url = betting_url.into();
        self
    }

    // -- Session -----------------------------------------------------------

    /// Log in and replace any current session.
    pub async fn login(&self) -> Result<()> {
        let token = self.authenticate().await?;
        *self.session_token.write().await = Some(token);
        Ok(())
    }

    /// Drop the current session; the next call logs in again.
    pub async fn invalidate(&self) {
        *self.session_token.write().await = None;
    }

    pub async fn has_session(&self) -> bool {
        self.session_token.read().await.is_some()
    }

    async fn authenticate(&self) -> Result<String> {
        info!("Authenticating with Betfair...");

        let resp = self
            .http
            .post(&self.auth_url)
            .header("X-Application", &self.app_key)
            .header("Accept", "application/json")
            .form(&[
                ("username", self.username.as_str()),
                ("password", self.password.expose_secret().as_str()),
            ])
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(DutchError::Exchange {
                endpoint: "login".into(),
                message: format!("{status}: {body}"),
            });
        }

        let login: LoginResponse = resp.json().await?;
        if login.login_status != "SUCCESS" {
            return Err(DutchError::Exchange {
                endpoint: "login".into(),
                message: format!("login rejected: {}", login.login_status),
            });
        }

        let token = login.session_token.ok_or_else(|| DutchError::Exchange {
            endpoint: "login".into(),
            message: "no session token returned".into(),
        })?;

        info!("Betfair authentication successful");
        Ok(token)
    }

    /// Current session token, logging in if there is none.
    async fn ensure_session(&self) -> Result<String> {
        if let Some(token) = self.session_token.read().await.as_ref() {
            return Ok(token.clone());
        }
        let mut guard = self.session_token.write().await;
        // Another task may have logged in while we waited for the lock
        if let Some(token) = guard.as_ref() {
            return Ok(token.clone());
        }
        let token = self.authenticate().await?;
        *guard = Some(token.clone());
        Ok(token)
    }

    // -- API helpers -------------------------------------------------------

    /// Authenticated POST to the betting API, re-logging in once on expiry.
    async fn betting_api<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        body: &serde_json::Value,
    ) -> Result<T> {
        let token = self.ensure_session().await?;
        match self.call(endpoint, &token, body).await {
            Err(DutchError::SessionExpired) => {
                warn!(endpoint, "Betfair session expired, re-authenticating...");
                self.invalidate().await;
                let token = self.ensure_session().await?;
                self.call(endpoint, &token, body).await
            }
            other => other,
        }
    }

    async fn call<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        token: &str,
        body: &serde_json::Value,
    ) -> Result<T> {
        let url = format!("{}/{endpoint}/", self.betting_url);
        debug!(url = %url, "Betfair API request");

        let resp = self
            .http
            .post(&url)
            .header("X-Application", &self.app_key)
            .header("X-Authentication", token)
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await?;

        if resp.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(DutchError::SessionExpired);
        }
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            if is_session_error(&text) {
                return Err(DutchError::SessionExpired);
            }
            return Err(DutchError::Exchange {
                endpoint: endpoint.to_string(),
                message: format!("{status}: {text}"),
            });
        }

        Ok(resp.json().await?)
    }

    // -- Conversion helpers ------------------------------------------------

    fn to_summary(catalogue: MarketCatalogue) -> Option<MarketSummary> {
        let start_time = parse_time(catalogue.market_start_time.as_deref())?;
        let bet_type = catalogue
            .description
            .as_ref()
            .and_then(|d| d.market_type.as_deref())
            .and_then(|t| t.parse::<BetType>().ok());
        let event = catalogue.event.as_ref();

        Some(MarketSummary {
            market_id: catalogue.market_id,
            market_name: catalogue.market_name,
            bet_type,
            event_id: event.and_then(|e| e.id.clone()).unwrap_or_default(),
            venue: event
                .and_then(|e| e.venue.clone().or_else(|| e.name.clone()))
                .unwrap_or_default(),
            start_time,
            total_matched: catalogue.total_matched.unwrap_or(0.0),
            runners: catalogue
                .runners
                .into_iter()
                .map(|r| RunnerSummary {
                    selection_id: r.selection_id,
                    name: r.runner_name,
                    sort_priority: r.sort_priority.unwrap_or(0),
                })
                .collect(),
        })
    }

    fn to_book(book: MarketBook) -> MarketBookSnapshot {
        let best = |levels: &[WirePriceSize]| {
            levels.first().map(|p| PriceSize {
                price: p.price,
                size: p.size,
            })
        };
        MarketBookSnapshot {
            market_id: book.market_id,
            status: book.status.unwrap_or_else(|| "UNKNOWN".into()),
            inplay: book.inplay.unwrap_or(false),
            version: book.version.unwrap_or(0),
            number_of_runners: book.number_of_runners.unwrap_or(0),
            number_of_active_runners: book.number_of_active_runners.unwrap_or(0),
            total_matched: book.total_matched.unwrap_or(0.0),
            runners: book
                .runners
                .into_iter()
                .map(|r| RunnerBookSnapshot {
                    selection_id: r.selection_id,
                    status: r.status.unwrap_or_else(|| "ACTIVE".into()),
                    last_price_traded: r.last_price_traded,
                    best_back: r.ex.as_ref().and_then(|ex| best(&ex.available_to_back)),
                    best_lay: r.ex.as_ref().and_then(|ex| best(&ex.available_to_lay)),
                })
                .collect(),
        }
    }

    fn to_execution_reports(market_id: &str, resp: PlaceExecutionReport) -> Result<Vec<ExecutionReport>> {
        if resp.instruction_reports.is_empty() {
            let reason = resp
                .error_code
                .or(resp.status)
                .unwrap_or_else(|| "no instruction reports".into());
            return Err(DutchError::rejected("placeOrders", market_id, reason));
        }

        Ok(resp
            .instruction_reports
            .into_iter()
            .map(|r| {
                let size_matched = d(r.size_matched.unwrap_or(0.0));
                let (size, price) = r
                    .instruction
                    .limit_order
                    .as_ref()
                    .map_or((0.0, 0.0), |o| (o.size, o.price));
                let status = match (&r.bet_id, r.order_status.as_deref()) {
                    (Some(_), Some(code)) => order_status(code, size_matched),
                    (Some(_), None) => BetStatus::Executable,
                    (None, _) => BetStatus::Pending,
                };
                ExecutionReport {
                    selection_id: r.instruction.selection_id,
                    bet_id: r.bet_id,
                    status,
                    price,
                    size: d(size),
                    size_matched,
                    error_code: r.error_code,
                    placed_at: parse_time(r.placed_date.as_deref()).unwrap_or_else(Utc::now),
                }
            })
            .collect())
    }

    fn to_cancel_reports(market_id: &str, resp: CancelExecutionReport) -> Result<Vec<CancelReport>> {
        if resp.instruction_reports.is_empty() {
            if let Some(code) = resp.error_code {
                return Err(DutchError::rejected("cancelOrders", market_id, code));
            }
        }
        Ok(resp
            .instruction_reports
            .into_iter()
            .map(|r| CancelReport {
                bet_id: r.instruction.bet_id,
                success: r.status == "SUCCESS",
                size_cancelled: d(r.size_cancelled.unwrap_or(0.0)),
                error_code: r.error_code,
            })
            .collect())
    }

    fn to_open_order(order: CurrentOrder) -> OpenOrderState {
        let size_matched = d(order.size_matched.unwrap_or(0.0));
        OpenOrderState {
            status: order_status(&order.status, size_matched),
            bet_id: order.bet_id,
            market_id: order.market_id,
            selection_id: order.selection_id,
            size_matched,
            size_remaining: d(order.size_remaining.unwrap_or(0.0)),
            size_cancelled: d(order.size_cancelled.unwrap_or(0.0)),
        }
    }

    fn to_cleared(order: ClearedOrder, status: ClearedStatus) -> ClearedOrderRecord {
        let settled = status == ClearedStatus::Settled;
        ClearedOrderRecord {
            bet_id: order.bet_id,
            market_id: order.market_id,
            selection_id: order.selection_id,
            status,
            outcome: if settled {
                order.bet_outcome.as_deref().and_then(parse_outcome)
            } else {
                None
            },
            profit: if settled { order.profit.map(d) } else { None },
            size_cancelled: d(order.size_cancelled.unwrap_or(0.0)),
            settled_at: parse_time(order.settled_date.as_deref()),
        }
    }
}

fn is_session_error(body: &str) -> bool {
    SESSION_ERRORS.iter().any(|code| body.contains(code))
}

fn parse_time(value: Option<&str>) -> Option<DateTime<Utc>> {
    value
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

/// Betfair reports a successful place-market bet as `PLACED`.
fn parse_outcome(code: &str) -> Option<BetOutcome> {
    match code {
        "PLACED" => Some(BetOutcome::Won),
        other => other.parse().ok(),
    }
}

fn rfc3339(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Secs, true)
}

// ---------------------------------------------------------------------------
// Exchange trait implementation
// ---------------------------------------------------------------------------

#[async_trait]
impl Exchange for BetfairClient {
    async fn list_market_catalogue(&self, filter: &MarketFilter) -> Result<Vec<MarketSummary>> {
        let market_types: Vec<&str> = filter.bet_types.iter().map(|b| b.market_type()).collect();
        let body = serde_json::json!({
            "filter": {
                "eventTypeIds": filter.event_type_ids,
                "marketTypeCodes": market_types,
                "marketStartTime": {
                    "from": rfc3339(filter.from),
                    "to": rfc3339(filter.to)
                }
            },
            "maxResults": CATALOGUE_LIMIT,
            "marketProjection": [
                "EVENT",
                "MARKET_START_TIME",
                "MARKET_DESCRIPTION",
                "RUNNER_DESCRIPTION"
            ],
            "sort": "FIRST_TO_START"
        });

        let catalogues: Vec<MarketCatalogue> = self.betting_api("listMarketCatalogue", &body).await?;
        let count = catalogues.len();
        let summaries: Vec<MarketSummary> =
            catalogues.into_iter().filter_map(Self::to_summary).collect();
        if summaries.len() < count {
            warn!(
                dropped = count - summaries.len(),
                "Catalogue entries without a start time dropped"
            );
        }
        debug!(count = summaries.len(), "Betfair market catalogue fetched");
        Ok(summaries)
    }

    async fn list_market_book(&self, market_ids: &[String]) -> Result<Vec<MarketBookSnapshot>> {
        let mut books = Vec::with_capacity(market_ids.len());
        for chunk in market_ids.chunks(BOOK_BATCH) {
            let body = serde_json::json!({
                "marketIds": chunk,
                "priceProjection": {
                    "priceData": ["EX_BEST_OFFERS"],
                    "virtualise": false
                }
            });
            let batch: Vec<MarketBook> = self.betting_api("listMarketBook", &body).await?;
            books.extend(batch.into_iter().map(Self::to_book));
        }
        Ok(books)
    }

    async fn place_orders(
        &self,
        market_id: &str,
        instructions: &[PlaceInstruction],
    ) -> Result<Vec<ExecutionReport>> {
        let wire: Vec<serde_json::Value> = instructions
            .iter()
            .map(|i| {
                serde_json::json!({
                    "orderType": "LIMIT",
                    "selectionId": i.selection_id,
                    "side": i.side.as_str(),
                    "limitOrder": {
                        "size": f(i.size),
                        "price": i.price,
                        "persistenceType": "LAPSE"
                    }
                })
            })
            .collect();
        // The exchange de-duplicates requests sharing a customer reference
        let body = serde_json::json!({
            "marketId": market_id,
            "instructions": wire,
            "customerRef": uuid::Uuid::new_v4().simple().to_string()
        });

        let resp: PlaceExecutionReport = self.betting_api("placeOrders", &body).await?;
        let reports = Self::to_execution_reports(market_id, resp)?;

        info!(
            market_id,
            instructions = instructions.len(),
            placed = reports.iter().filter(|r| r.bet_id.is_some()).count(),
            "Betfair orders placed"
        );
        Ok(reports)
    }

    async fn cancel_orders(&self, market_id: &str, bet_ids: &[String]) -> Result<Vec<CancelReport>> {
        if bet_ids.is_empty() {
            return Ok(Vec::new());
        }
        let instructions: Vec<serde_json::Value> = bet_ids
            .iter()
            .map(|id| serde_json::json!({ "betId": id }))
            .collect();
        let body = serde_json::json!({
            "marketId": market_id,
            "instructions": instructions
        });

        let resp: CancelExecutionReport = self.betting_api("cancelOrders", &body).await?;
        Self::to_cancel_reports(market_id, resp)
    }

    async fn list_current_orders(&self, bet_ids: &[String]) -> Result<Vec<OpenOrderState>> {
        if bet_ids.is_empty() {
            return Ok(Vec::new());
        }
        let body = serde_json::json!({
            "betIds": bet_ids,
            "orderProjection": "ALL"
        });
        let resp: CurrentOrderSummaryReport = self.betting_api("listCurrentOrders", &body).await?;
        Ok(resp.current_orders.into_iter().map(Self::to_open_order).collect())
    }

    async fn list_cleared_orders(
        &self,
        bet_ids: &[String],
        status: ClearedStatus,
    ) -> Result<Vec<ClearedOrderRecord>> {
        if bet_ids.is_empty() {
            return Ok(Vec::new());
        }
        let body = serde_json::json!({
            "betStatus": status.as_str(),
            "betIds": bet_ids
        });
        let resp: ClearedOrderSummaryReport = self.betting_api("listClearedOrders", &body).await?;
        Ok(resp
            .cleared_orders
            .into_iter()
            .map(|o| Self::to_cleared(o, status))
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_catalogue_to_summary() {
        let catalogue: MarketCatalogue = serde_json::from_str(
            r#"{
                "marketId": "1.2001",
                "marketName": "R3 1200m Mdn",
                "totalMatched": 1520.5,
                "marketStartTime": "2026-10-19T04:35:00.000Z",
                "description": { "marketType": "PLACE" },
                "event": { "id": "3301", "name": "Flemington (AUS) 19th Oct", "venue": "Flemington" },
                "runners": [
                    { "selectionId": 11, "runnerName": "1. Alpha", "sortPriority": 1 },
                    { "selectionId": 12, "runnerName": "2. Bravo", "sortPriority": 2 }
                ]
            }"#,
        )
        .unwrap();

        let summary = BetfairClient::to_summary(catalogue).unwrap();
        assert_eq!(summary.bet_type, Some(BetType::Place));
        assert_eq!(summary.venue, "Flemington");
        assert_eq!(summary.event_id, "3301");
        assert_eq!(summary.runners.len(), 2);
        assert_eq!(summary.runners[1].sort_priority, 2);
        assert_eq!(summary.start_time.to_rfc3339(), "2026-10-19T04:35:00+00:00");
    }

    #[test]
    fn test_catalogue_without_start_time_dropped() {
        let catalogue: MarketCatalogue =
            serde_json::from_str(r#"{ "marketId": "1.1", "marketName": "x" }"#).unwrap();
        assert!(BetfairClient::to_summary(catalogue).is_none());
    }

    #[test]
    fn test_book_best_prices() {
        let book: MarketBook = serde_json::from_str(
            r#"{
                "marketId": "1.2001",
                "status": "OPEN",
                "inplay": false,
                "version": 4411,
                "numberOfRunners": 3,
                "numberOfActiveRunners": 2,
                "totalMatched": 880.0,
                "runners": [
                    { "selectionId": 11, "status": "ACTIVE", "lastPriceTraded": 3.1,
                      "ex": { "availableToBack": [{ "price": 3.05, "size": 40.0 }, { "price": 3.0, "size": 12.0 }],
                              "availableToLay": [{ "price": 3.15, "size": 22.0 }] } },
                    { "selectionId": 12, "status": "ACTIVE", "ex": { "availableToBack": [], "availableToLay": [] } },
                    { "selectionId": 13, "status": "REMOVED" }
                ]
            }"#,
        )
        .unwrap();

        let snapshot = BetfairClient::to_book(book);
        assert_eq!(snapshot.version, 4411);
        assert_eq!(snapshot.number_of_active_runners, 2);
        assert_eq!(snapshot.runners[0].best_back, Some(PriceSize { price: 3.05, size: 40.0 }));
        assert_eq!(snapshot.runners[0].best_lay.map(|p| p.price), Some(3.15));
        assert_eq!(snapshot.runners[1].best_back, None);
        assert!(!snapshot.runners[2].is_active());
        assert!(!snapshot.is_closed());
    }

    #[test]
    fn test_place_report_mapping() {
        let resp: PlaceExecutionReport = serde_json::from_str(
            r#"{
                "status": "PROCESSED_WITH_ERRORS",
                "marketId": "1.2001",
                "instructionReports": [
                    { "status": "SUCCESS", "orderStatus": "EXECUTABLE", "betId": "9001",
                      "placedDate": "2026-10-19T04:30:01.000Z", "sizeMatched": 2.0,
                      "instruction": { "selectionId": 11, "limitOrder": { "size": 5.0, "price": 3.05 } } },
                    { "status": "SUCCESS", "orderStatus": "EXECUTION_COMPLETE", "betId": "9002", "sizeMatched": 3.0,
                      "instruction": { "selectionId": 12, "limitOrder": { "size": 3.0, "price": 4.4 } } },
                    { "status": "FAILURE", "errorCode": "INVALID_ODDS",
                      "instruction": { "selectionId": 13, "limitOrder": { "size": 2.0, "price": 7.77 } } }
                ]
            }"#,
        )
        .unwrap();

        let reports = BetfairClient::to_execution_reports("1.2001", resp).unwrap();
        assert_eq!(reports[0].status, BetStatus::Matched);
        assert_eq!(reports[0].size_matched, dec!(2));
        assert_eq!(reports[0].size, dec!(5));
        assert_eq!(reports[1].status, BetStatus::ExecutionComplete);
        assert_eq!(reports[2].bet_id, None);
        assert_eq!(reports[2].status, BetStatus::Pending);
        assert_eq!(reports[2].error_code.as_deref(), Some("INVALID_ODDS"));
    }

    #[test]
    fn test_place_rejected_whole_request() {
        let resp: PlaceExecutionReport = serde_json::from_str(
            r#"{ "status": "FAILURE", "errorCode": "INSUFFICIENT_FUNDS", "instructionReports": [] }"#,
        )
        .unwrap();
        let err = BetfairClient::to_execution_reports("1.2001", resp).unwrap_err();
        assert!(matches!(err, DutchError::ExchangeRejected { ref reason, .. } if reason == "INSUFFICIENT_FUNDS"));
    }

    #[test]
    fn test_cancel_report_mapping() {
        let resp: CancelExecutionReport = serde_json::from_str(
            r#"{
                "status": "PROCESSED_WITH_ERRORS",
                "instructionReports": [
                    { "status": "SUCCESS", "sizeCancelled": 3.0, "instruction": { "betId": "9001" } },
                    { "status": "FAILURE", "errorCode": "BET_TAKEN_OR_LAPSED", "instruction": { "betId": "9002" } }
                ]
            }"#,
        )
        .unwrap();
        let reports = BetfairClient::to_cancel_reports("1.2001", resp).unwrap();
        assert!(reports[0].success);
        assert_eq!(reports[0].size_cancelled, dec!(3));
        assert!(!reports[1].success);
        assert_eq!(reports[1].error_code.as_deref(), Some("BET_TAKEN_OR_LAPSED"));
    }

    #[test]
    fn test_current_order_mapping() {
        let order: CurrentOrder = serde_json::from_str(
            r#"{ "betId": "9001", "marketId": "1.2001", "selectionId": 11, "status": "EXECUTABLE",
                 "sizeMatched": 1.5, "sizeRemaining": 3.5, "sizeCancelled": 0.0 }"#,
        )
        .unwrap();
        let state = BetfairClient::to_open_order(order);
        assert_eq!(state.status, BetStatus::Matched);
        assert_eq!(state.size_remaining, dec!(3.5));
    }

    #[test]
    fn test_cleared_order_mapping() {
        let settled: ClearedOrder = serde_json::from_str(
            r#"{ "betId": "9001", "marketId": "1.2001", "selectionId": 11, "betOutcome": "WON",
                 "profit": 10.25, "settledDate": "2026-10-19T05:01:00.000Z" }"#,
        )
        .unwrap();
        let record = BetfairClient::to_cleared(settled, ClearedStatus::Settled);
        assert_eq!(record.outcome, Some(BetOutcome::Won));
        assert_eq!(record.profit, Some(dec!(10.25)));
        assert!(record.settled_at.is_some());

        let lapsed: ClearedOrder = serde_json::from_str(
            r#"{ "betId": "9002", "marketId": "1.2001", "selectionId": 12, "sizeCancelled": 4.0, "profit": 0.0 }"#,
        )
        .unwrap();
        let record = BetfairClient::to_cleared(lapsed, ClearedStatus::Lapsed);
        assert_eq!(record.outcome, None);
        assert_eq!(record.profit, None);
        assert_eq!(record.size_cancelled, dec!(4));
    }

    #[test]
    fn test_outcome_codes() {
        assert_eq!(parse_outcome("PLACED"), Some(BetOutcome::Won));
        assert_eq!(parse_outcome("LOST"), Some(BetOutcome::Lost));
        assert_eq!(parse_outcome("???"), None);
    }

    #[test]
    fn test_session_error_detection() {
        assert!(is_session_error(
            r#"{"detail":{"APINGException":{"errorCode":"INVALID_SESSION_INFORMATION"}}}"#
        ));
        assert!(is_session_error("NO_SESSION"));
        assert!(!is_session_error(r#"{"errorCode":"TOO_MUCH_DATA"}"#));
    }

    #[tokio::test]
    async fn test_session_lifecycle_without_network() {
        let client = BetfairClient::new(
            "app".into(),
            "user".into(),
            SecretString::new("pw".into()),
            Duration::from_secs(1),
        )
        .unwrap();
        assert!(!client.has_session().await);
        *client.session_token.write().await = Some("token".into());
        assert_eq!(client.ensure_session().await.unwrap(), "token");
        client.invalidate().await;
        assert!(!client.has_session().await);
    }
}
