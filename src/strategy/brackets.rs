//! Time-to-start betting brackets.
//!
//! The budget committed to a race depends on how close it is to the off.
//! Outside every bracket (too early) or after the start, nothing is staked.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::fmt;

use crate::types::d;

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct Bracket {
    /// Upper bound (inclusive) on seconds remaining before the start.
    pub max_secs_to_start: i64,
    /// Fraction of the base budget to commit inside this bracket.
    pub budget_fraction: f64,
}

/// Why a race is outside the betting window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowRejection {
    Started { secs_since_start: i64 },
    TooEarly { secs_to_start: i64 },
}

impl fmt::Display for WindowRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WindowRejection::Started { secs_since_start } => {
                write!(f, "race started {secs_since_start}s ago")
            }
            WindowRejection::TooEarly { secs_to_start } => {
                write!(f, "no bracket for {secs_to_start}s to start")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BettingWindow {
    brackets: Vec<Bracket>,
}

impl BettingWindow {
    pub fn new(mut brackets: Vec<Bracket>) -> Self {
        brackets.sort_by_key(|b| b.max_secs_to_start);
        Self { brackets }
    }

    pub fn brackets(&self) -> &[Bracket] {
        &self.brackets
    }

    /// Tightest bracket containing the current time-to-start.
    pub fn bracket_for(
        &self,
        start_time: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<&Bracket, WindowRejection> {
        let secs_to_start = (start_time - now).num_seconds();
        if start_time <= now {
            return Err(WindowRejection::Started {
                secs_since_start: -secs_to_start,
            });
        }
        self.brackets
            .iter()
            .find(|b| secs_to_start <= b.max_secs_to_start)
            .ok_or(WindowRejection::TooEarly { secs_to_start })
    }

    /// Budget for a race starting at `start_time`.
    pub fn budget_for(
        &self,
        base: Decimal,
        start_time: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Decimal, WindowRejection> {
        let bracket = self.bracket_for(start_time, now)?;
        Ok(base * d(bracket.budget_fraction))
    }
}

impl Default for BettingWindow {
    fn default() -> Self {
        Self::new(vec![
            Bracket {
                max_secs_to_start: 120,
                budget_fraction: 1.0,
            },
            Bracket {
                max_secs_to_start: 900,
                budget_fraction: 0.5,
            },
        ])
    }
}
