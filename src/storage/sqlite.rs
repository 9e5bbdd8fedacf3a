//! SQLite-backed `BetStore`.
//!
//! Decimals are stored as TEXT and timestamps as RFC 3339 TEXT so values
//! round-trip exactly. Tables are created on connect.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::str::FromStr;
use tracing::info;

use super::BetStore;
use crate::error::{DutchError, Result};
use crate::types::{
    AccuracyRecord, Bet, BetType, BookRecord, CalibrationBucket, MarketRecord, RunnerBookRecord,
    RunnerRecord,
};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS markets (
        market_id TEXT PRIMARY KEY,
        race_id TEXT NOT NULL,
        bet_type TEXT NOT NULL,
        name TEXT NOT NULL,
        start_time TEXT NOT NULL,
        total_matched REAL NOT NULL DEFAULT 0
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS runners (
        market_id TEXT NOT NULL,
        selection_id INTEGER NOT NULL,
        name TEXT NOT NULL,
        sort_priority INTEGER NOT NULL,
        PRIMARY KEY (market_id, selection_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS books (
        market_id TEXT NOT NULL,
        version INTEGER NOT NULL,
        status TEXT NOT NULL,
        inplay INTEGER NOT NULL,
        number_of_runners INTEGER NOT NULL,
        number_of_active_runners INTEGER NOT NULL,
        total_matched REAL NOT NULL,
        captured_at TEXT NOT NULL,
        PRIMARY KEY (market_id, version)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS runner_books (
        market_id TEXT NOT NULL,
        version INTEGER NOT NULL,
        selection_id INTEGER NOT NULL,
        status TEXT NOT NULL,
        last_price_traded REAL,
        back_price REAL,
        back_size REAL,
        lay_price REAL,
        lay_size REAL,
        PRIMARY KEY (market_id, version, selection_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS bets (
        bet_id TEXT NOT NULL,
        market_id TEXT NOT NULL,
        runner_id INTEGER NOT NULL,
        bet_type TEXT NOT NULL,
        side TEXT NOT NULL,
        price REAL NOT NULL,
        size TEXT NOT NULL,
        status TEXT NOT NULL,
        size_matched TEXT NOT NULL,
        size_remaining TEXT NOT NULL,
        size_cancelled TEXT NOT NULL,
        outcome TEXT,
        profit TEXT,
        placed_at TEXT NOT NULL,
        PRIMARY KEY (bet_id, market_id, runner_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS calibration_buckets (
        bet_type TEXT NOT NULL,
        bins INTEGER NOT NULL,
        left_bound REAL NOT NULL,
        right_bound REAL NOT NULL,
        coef REAL NOT NULL,
        intercept REAL NOT NULL,
        sample_count INTEGER NOT NULL,
        total INTEGER NOT NULL,
        mean_won REAL NOT NULL,
        PRIMARY KEY (bet_type, bins, left_bound)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS accuracy (
        market_id TEXT NOT NULL,
        runner_id INTEGER NOT NULL,
        bet_type TEXT NOT NULL,
        implied_probability REAL NOT NULL,
        won INTEGER,
        PRIMARY KEY (market_id, runner_id, bet_type)
    )
    "#,
];

#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `url` and ensure the schema.
    pub async fn connect(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        // Each connection to an in-memory database is a separate database
        let max_connections = if url.contains(":memory:") { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.init().await?;
        info!(url, "SQLite store ready");
        Ok(store)
    }

    async fn init(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Column helpers
// ---------------------------------------------------------------------------

fn corrupt(column: &str, value: impl ToString) -> DutchError {
    DutchError::Corrupt {
        column: column.to_string(),
        value: value.to_string(),
    }
}

fn get_decimal(row: &SqliteRow, column: &str) -> Result<Decimal> {
    let text: String = row.try_get(column)?;
    Decimal::from_str(&text).map_err(|_| corrupt(column, text))
}

fn get_opt_decimal(row: &SqliteRow, column: &str) -> Result<Option<Decimal>> {
    let text: Option<String> = row.try_get(column)?;
    text.map(|t| Decimal::from_str(&t).map_err(|_| corrupt(column, t)))
        .transpose()
}

fn get_time(row: &SqliteRow, column: &str) -> Result<DateTime<Utc>> {
    let text: String = row.try_get(column)?;
    DateTime::parse_from_rfc3339(&text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| corrupt(column, text))
}

fn get_parsed<T: FromStr>(row: &SqliteRow, column: &str) -> Result<T> {
    let text: String = row.try_get(column)?;
    text.parse().map_err(|_| corrupt(column, text))
}

fn get_u64(row: &SqliteRow, column: &str) -> Result<u64> {
    let value: i64 = row.try_get(column)?;
    u64::try_from(value).map_err(|_| corrupt(column, value))
}

fn bet_from_row(row: &SqliteRow) -> Result<Bet> {
    let outcome: Option<String> = row.try_get("outcome")?;
    Ok(Bet {
        bet_id: row.try_get("bet_id")?,
        market_id: row.try_get("market_id")?,
        runner_id: get_u64(row, "runner_id")?,
        bet_type: get_parsed(row, "bet_type")?,
        side: get_parsed(row, "side")?,
        price: row.try_get("price")?,
        size: get_decimal(row, "size")?,
        status: get_parsed(row, "status")?,
        size_matched: get_decimal(row, "size_matched")?,
        size_remaining: get_decimal(row, "size_remaining")?,
        size_cancelled: get_decimal(row, "size_cancelled")?,
        outcome: outcome
            .map(|o| o.parse().map_err(|_| corrupt("outcome", o)))
            .transpose()?,
        profit: get_opt_decimal(row, "profit")?,
        placed_at: get_time(row, "placed_at")?,
    })
}

const BET_COLUMNS: &str = "bet_id, market_id, runner_id, bet_type, side, price, size, status, \
     size_matched, size_remaining, size_cancelled, outcome, profit, placed_at";

#[async_trait]
impl BetStore for SqliteStore {
    async fn upsert_market(&self, market: &MarketRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO markets (market_id, race_id, bet_type, name, start_time, total_matched)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(market_id) DO UPDATE SET
                race_id = excluded.race_id,
                bet_type = excluded.bet_type,
                name = excluded.name,
                start_time = excluded.start_time,
                total_matched = excluded.total_matched
            "#,
        )
        .bind(&market.market_id)
        .bind(&market.race_id)
        .bind(market.bet_type.to_string())
        .bind(&market.name)
        .bind(market.start_time.to_rfc3339())
        .bind(market.total_matched)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn upsert_runner(&self, runner: &RunnerRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO runners (market_id, selection_id, name, sort_priority)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(market_id, selection_id) DO UPDATE SET
                name = excluded.name,
                sort_priority = excluded.sort_priority
            "#,
        )
        .bind(&runner.market_id)
        .bind(runner.selection_id as i64)
        .bind(&runner.name)
        .bind(runner.sort_priority as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn upsert_book(&self, book: &BookRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO books (market_id, version, status, inplay, number_of_runners,
                               number_of_active_runners, total_matched, captured_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(market_id, version) DO UPDATE SET
                status = excluded.status,
                inplay = excluded.inplay,
                number_of_runners = excluded.number_of_runners,
                number_of_active_runners = excluded.number_of_active_runners,
                total_matched = excluded.total_matched,
                captured_at = excluded.captured_at
            "#,
        )
        .bind(&book.market_id)
        .bind(book.version as i64)
        .bind(&book.status)
        .bind(book.inplay)
        .bind(book.number_of_runners as i64)
        .bind(book.number_of_active_runners as i64)
        .bind(book.total_matched)
        .bind(book.captured_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn upsert_runner_book(&self, rb: &RunnerBookRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO runner_books (market_id, version, selection_id, status, last_price_traded,
                                      back_price, back_size, lay_price, lay_size)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(market_id, version, selection_id) DO UPDATE SET
                status = excluded.status,
                last_price_traded = excluded.last_price_traded,
                back_price = excluded.back_price,
                back_size = excluded.back_size,
                lay_price = excluded.lay_price,
                lay_size = excluded.lay_size
            "#,
        )
        .bind(&rb.market_id)
        .bind(rb.version as i64)
        .bind(rb.selection_id as i64)
        .bind(&rb.status)
        .bind(rb.last_price_traded)
        .bind(rb.back_price)
        .bind(rb.back_size)
        .bind(rb.lay_price)
        .bind(rb.lay_size)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_market(&self, market_id: &str) -> Result<Option<MarketRecord>> {
        let Some(row) = sqlx::query("SELECT * FROM markets WHERE market_id = ?")
            .bind(market_id)
            .fetch_optional(&self.pool)
            .await?
        else {
            return Ok(None);
        };

        let runners = sqlx::query(
            "SELECT * FROM runners WHERE market_id = ? ORDER BY sort_priority, selection_id",
        )
        .bind(market_id)
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(|r| -> Result<RunnerRecord> {
            Ok(RunnerRecord {
                market_id: r.try_get("market_id")?,
                selection_id: get_u64(r, "selection_id")?,
                name: r.try_get("name")?,
                sort_priority: r.try_get::<i64, _>("sort_priority")? as u32,
            })
        })
        .collect::<Result<Vec<_>>>()?;

        Ok(Some(MarketRecord {
            market_id: row.try_get("market_id")?,
            race_id: row.try_get("race_id")?,
            bet_type: get_parsed(&row, "bet_type")?,
            name: row.try_get("name")?,
            start_time: get_time(&row, "start_time")?,
            total_matched: row.try_get("total_matched")?,
            runners,
        }))
    }

    async fn upsert_bet(&self, bet: &Bet) -> Result<()> {
        sqlx::query(&format!(
            r#"
            INSERT INTO bets ({BET_COLUMNS})
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(bet_id, market_id, runner_id) DO UPDATE SET
                status = excluded.status,
                size_matched = excluded.size_matched,
                size_remaining = excluded.size_remaining,
                size_cancelled = excluded.size_cancelled,
                outcome = excluded.outcome,
                profit = excluded.profit
            "#
        ))
        .bind(&bet.bet_id)
        .bind(&bet.market_id)
        .bind(bet.runner_id as i64)
        .bind(bet.bet_type.to_string())
        .bind(bet.side.as_str())
        .bind(bet.price)
        .bind(bet.size.to_string())
        .bind(bet.status.as_str())
        .bind(bet.size_matched.to_string())
        .bind(bet.size_remaining.to_string())
        .bind(bet.size_cancelled.to_string())
        .bind(bet.outcome.map(|o| o.as_str()))
        .bind(bet.profit.map(|p| p.to_string()))
        .bind(bet.placed_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_bet(&self, bet_id: &str) -> Result<Option<Bet>> {
        sqlx::query(&format!("SELECT {BET_COLUMNS} FROM bets WHERE bet_id = ? LIMIT 1"))
            .bind(bet_id)
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(bet_from_row)
            .transpose()
    }

    async fn outstanding_bets(&self) -> Result<Vec<Bet>> {
        sqlx::query(&format!(
            "SELECT {BET_COLUMNS} FROM bets \
             WHERE outcome IS NULL AND status NOT IN ('LAPSED', 'CANCELLED') \
             ORDER BY bet_id"
        ))
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(bet_from_row)
        .collect()
    }

    async fn bets_for_market(&self, market_id: &str) -> Result<Vec<Bet>> {
        sqlx::query(&format!(
            "SELECT {BET_COLUMNS} FROM bets WHERE market_id = ? ORDER BY bet_id"
        ))
        .bind(market_id)
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(bet_from_row)
        .collect()
    }

    async fn replace_calibration(
        &self,
        bet_type: BetType,
        buckets: &[CalibrationBucket],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM calibration_buckets WHERE bet_type = ?")
            .bind(bet_type.to_string())
            .execute(&mut *tx)
            .await?;
        for b in buckets {
            sqlx::query(
                r#"
                INSERT INTO calibration_buckets (bet_type, bins, left_bound, right_bound, coef,
                                                 intercept, sample_count, total, mean_won)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(bet_type.to_string())
            .bind(b.bins as i64)
            .bind(b.left)
            .bind(b.right)
            .bind(b.coef)
            .bind(b.intercept)
            .bind(b.sample_count as i64)
            .bind(b.total as i64)
            .bind(b.mean_won)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn calibration_buckets(&self, bet_type: BetType) -> Result<Vec<CalibrationBucket>> {
        sqlx::query(
            "SELECT * FROM calibration_buckets WHERE bet_type = ? ORDER BY bins, left_bound",
        )
        .bind(bet_type.to_string())
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(|row| -> Result<CalibrationBucket> {
            Ok(CalibrationBucket {
                bet_type,
                bins: row.try_get::<i64, _>("bins")? as u32,
                left: row.try_get("left_bound")?,
                right: row.try_get("right_bound")?,
                coef: row.try_get("coef")?,
                intercept: row.try_get("intercept")?,
                sample_count: get_u64(row, "sample_count")?,
                total: get_u64(row, "total")?,
                mean_won: row.try_get("mean_won")?,
            })
        })
        .collect()
    }

    async fn record_accuracy(&self, records: &[AccuracyRecord]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for r in records {
            sqlx::query(
                r#"
                INSERT INTO accuracy (market_id, runner_id, bet_type, implied_probability, won)
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT(market_id, runner_id, bet_type) DO UPDATE SET
                    implied_probability = excluded.implied_probability,
                    won = excluded.won
                WHERE accuracy.won IS NULL
                "#,
            )
            .bind(&r.market_id)
            .bind(r.runner_id as i64)
            .bind(r.bet_type.to_string())
            .bind(r.implied_probability)
            .bind(r.won)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn unresolved_accuracy_markets(&self) -> Result<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT DISTINCT market_id FROM accuracy WHERE won IS NULL ORDER BY market_id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(m,)| m).collect())
    }

    async fn resolve_accuracy(
        &self,
        market_id: &str,
        results: &[(u64, Option<bool>)],
    ) -> Result<usize> {
        let mut tx = self.pool.begin().await?;
        let mut changed = 0u64;
        for &(runner_id, won) in results {
            let result = match won {
                None => {
                    sqlx::query("DELETE FROM accuracy WHERE market_id = ? AND runner_id = ?")
                        .bind(market_id)
                        .bind(runner_id as i64)
                        .execute(&mut *tx)
                        .await?
                }
                Some(won) => {
                    sqlx::query(
                        "UPDATE accuracy SET won = ? \
                         WHERE market_id = ? AND runner_id = ? AND (won IS NULL OR won != ?)",
                    )
                    .bind(won)
                    .bind(market_id)
                    .bind(runner_id as i64)
                    .bind(won)
                    .execute(&mut *tx)
                    .await?
                }
            };
            changed += result.rows_affected();
        }
        tx.commit().await?;
        Ok(changed as usize)
    }

    async fn discard_accuracy(&self, market_id: &str) -> Result<usize> {
        let result = sqlx::query("DELETE FROM accuracy WHERE market_id = ? AND won IS NULL")
            .bind(market_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() as usize)
    }

    async fn accuracy_history(&self, bet_type: BetType) -> Result<Vec<(f64, bool)>> {
        let rows: Vec<(f64, bool)> = sqlx::query_as(
            "SELECT implied_probability, won FROM accuracy WHERE bet_type = ? AND won IS NOT NULL",
        )
        .bind(bet_type.to_string())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}
