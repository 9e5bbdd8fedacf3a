//! DUTCHER — race odds calibration and dutch staking agent
//!
//! Entry point. Loads configuration, initialises structured logging,
//! wires the exchange client and bet store, and runs the scheduler loop
//! (reconcile → resolve results → rebuild calibration → scan → stake)
//! with graceful shutdown.

use anyhow::{Context, Result};
use chrono::Utc;
use secrecy::SecretString;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use dutcher::config::{self, AppConfig};
use dutcher::engine::{CycleOutcome, MarketScanner, RacePipeline, RaceReport};
use dutcher::exchange::betfair::BetfairClient;
use dutcher::exchange::Exchange;
use dutcher::odds::OddsNormalizer;
use dutcher::storage::{BetStore, SqliteStore};
use dutcher::strategy::StakingPlan;

const BANNER: &str = r#"
 ____  _   _ _____ ____ _   _ _____ ____
|  _ \| | | |_   _/ ___| | | | ____|  _ \
| | | | | | | | || |   | |_| |  _| | |_) |
| |_| | |_| | | || |___|  _  | |___|  _ <
|____/ \___/  |_| \____|_| |_|_____|_| \_\

  Calibrated dutch staking for racing exchanges
  v0.1.0
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let cfg = AppConfig::load("config.toml")?;

    init_logging(&cfg);

    println!("{BANNER}");
    info!(
        agent_name = %cfg.agent.name,
        cycle_interval_secs = cfg.agent.cycle_interval_secs,
        budget = %cfg.staking.budget,
        dry_run = cfg.agent.dry_run,
        "DUTCHER starting up"
    );

    // -- Initialise components -------------------------------------------

    let store: Arc<dyn BetStore> = Arc::new(
        SqliteStore::connect(&cfg.storage.database_url)
            .await
            .context("Failed to open bet store")?,
    );

    let client = BetfairClient::new(
        AppConfig::resolve_env(&cfg.exchange.app_key_env)?,
        AppConfig::resolve_env(&cfg.exchange.username_env)?,
        SecretString::new(AppConfig::resolve_env(&cfg.exchange.password_env)?),
        Duration::from_secs(cfg.exchange.timeout_secs),
    )?;
    if let Err(e) = client.login().await {
        // Calls log in lazily, so a failed first login is not fatal
        warn!(error = %e, "Initial exchange login failed");
    }
    let exchange: Arc<dyn Exchange> = Arc::new(client);

    let scanner = MarketScanner::new(
        Arc::clone(&exchange),
        cfg.exchange.event_type_ids.clone(),
        cfg.exchange.lookback_mins,
        cfg.exchange.lookahead_mins,
        cfg.retry.clone(),
    );
    let pipeline = RacePipeline::new(
        exchange,
        store,
        OddsNormalizer::new(cfg.normalizer.clone()),
        StakingPlan::new(&cfg.staking),
        cfg.agent.dry_run,
    )
    .with_result_expiry(chrono::Duration::hours(cfg.calibration.result_expiry_hours));

    // -- Main loop -------------------------------------------------------

    let mut interval = tokio::time::interval(Duration::from_secs(cfg.agent.cycle_interval_secs));
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    let mut cycle: u64 = 0;

    info!(
        interval_secs = cfg.agent.cycle_interval_secs,
        "Entering main loop. Press Ctrl+C to stop."
    );

    loop {
        tokio::select! {
            _ = interval.tick() => {
                cycle += 1;
                if let Err(e) = run_cycle(&cfg, &scanner, &pipeline, cycle).await {
                    error!(cycle, error = %e, "Cycle abandoned");
                }
            }
            _ = &mut shutdown => {
                info!("Shutdown signal received.");
                break;
            }
        }
    }

    info!(cycles = cycle, "DUTCHER shut down cleanly.");
    Ok(())
}

/// One scheduler tick.
async fn run_cycle(
    cfg: &config::AppConfig,
    scanner: &MarketScanner,
    pipeline: &RacePipeline,
    cycle: u64,
) -> Result<()> {
    info!(cycle, "Starting cycle");

    // 1. Bring outstanding bets up to date
    match pipeline.reconciler().reconcile_all().await {
        Ok(report) => info!(cycle, %report, "Bets reconciled"),
        Err(e) => error!(cycle, error = %e, "Reconciliation failed"),
    }

    // 2. Resolve accuracy history for closed markets
    if let Err(e) = pipeline.results().resolve_pending().await {
        warn!(cycle, error = %e, "Results pass failed");
    }

    // 3. Periodic calibration rebuild
    let every = cfg.calibration.rebuild_every_cycles.max(1);
    if cycle == 1 || cycle % every == 0 {
        let rebuilt = pipeline
            .results()
            .rebuild_calibration(&cfg.calibration)
            .await
            .context("Calibration rebuild failed")?;
        for (bet_type, bins) in rebuilt {
            info!(bet_type = %bet_type, bins, "Calibration table rebuilt");
        }
    }

    // 4. Discover and stake races
    let now = Utc::now();
    let races = scanner.scan(now).await.context("Market discovery failed")?;
    let reports = pipeline.run_races(&races, now).await;
    log_cycle_summary(cycle, races.len(), &reports);
    Ok(())
}

/// Log a one-line cycle summary.
fn log_cycle_summary(cycle: u64, races: usize, reports: &[RaceReport]) {
    let outcomes = move || reports.iter().flat_map(|r| r.markets.iter().map(|m| &m.outcome));
    let submitted = outcomes()
        .filter(|o| matches!(o, CycleOutcome::Submitted { .. }))
        .count();
    let dry_run = outcomes()
        .filter(|o| matches!(o, CycleOutcome::DryRun { .. }))
        .count();
    let skipped = outcomes().count() - submitted - dry_run;
    info!(
        cycle,
        races,
        failed = races - reports.len(),
        submitted,
        dry_run,
        skipped,
        "Cycle complete"
    );
}

/// Initialise the `tracing` subscriber. `RUST_LOG` and `DUTCHER_LOG_JSON`
/// override the `[agent]` logging settings.
fn init_logging(cfg: &config::AppConfig) {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cfg.agent.log_filter));

    let json_logging = cfg.agent.log_json || std::env::var("DUTCHER_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
