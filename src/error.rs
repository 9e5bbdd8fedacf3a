//! Domain error types.
//!
//! Expected "skip this race" situations (no viable pool, cold-start
//! calibration) surface as outcome enums at the pipeline level; these
//! variants are what the individual stages report.

use rust_decimal::Decimal;

use crate::types::BetOutcome;

pub type Result<T, E = DutchError> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum DutchError {
    #[error("Data unavailable: {0}")]
    DataUnavailable(String),

    #[error("Missing odds for {market_id}: {reason}")]
    MissingOdds { market_id: String, reason: String },

    #[error("Calibration unavailable: {0}")]
    CalibrationUnavailable(String),

    #[error("Exchange rejected {operation} on {market_id}: {reason}")]
    ExchangeRejected {
        operation: String,
        market_id: String,
        reason: String,
    },

    #[error(
        "Settlement conflict on bet {bet_id}: stored {existing_outcome}/{existing_profit:?}, \
         received {incoming_outcome}/{incoming_profit:?}"
    )]
    SettlementConflict {
        bet_id: String,
        existing_outcome: BetOutcome,
        existing_profit: Option<Decimal>,
        incoming_outcome: BetOutcome,
        incoming_profit: Option<Decimal>,
    },

    #[error("Exchange session expired")]
    SessionExpired,

    #[error("Exchange error ({endpoint}): {message}")]
    Exchange { endpoint: String, message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("Corrupt stored value in {column}: {value}")]
    Corrupt { column: String, value: String },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl DutchError {
    pub fn missing_odds(market_id: &str, reason: impl Into<String>) -> Self {
        DutchError::MissingOdds {
            market_id: market_id.to_string(),
            reason: reason.into(),
        }
    }

    pub fn rejected(operation: &str, market_id: &str, reason: impl Into<String>) -> Self {
        DutchError::ExchangeRejected {
            operation: operation.to_string(),
            market_id: market_id.to_string(),
            reason: reason.into(),
        }
    }

    /// Whether the retry runner may try the failed call again.
    pub fn is_retryable(&self) -> bool {
        match self {
            DutchError::DataUnavailable(_) | DutchError::SessionExpired => true,
            DutchError::Http(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }
}
