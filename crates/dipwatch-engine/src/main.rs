use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use dipwatch_alerts::{
    AlertEngine, KvStateStore, MemoryKv, NoiseControl, Notifier, QuietHours, RedisKv, RuleStore,
    SqliteRuleStore, SqliteSuppressionStore, SuppressionStore,
};
use dipwatch_core::{BarSource, Clock, KvStore, SystemClock};
use dipwatch_notify::NotificationHub;
use dipwatch_scoring::ScoringEngine;
use dipwatch_sectors::{SectorStateMachine, StateThresholds, SuggestionEmitter};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tokio::signal::unix::SignalKind;
use tokio::time::{self, MissedTickBehavior};

mod config;
mod market_hours;
mod mock_bars;
mod pipeline;

use config::EngineConfig;
use market_hours::is_market_open;
use mock_bars::MockBarSource;
use pipeline::EvaluationPipeline;

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Load .env, init tracing
    dotenvy::dotenv().ok();

    let json_logging = std::env::var("RUST_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    if json_logging {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .init();
    }

    tracing::info!("Starting DipWatch monitoring engine");

    // 2. Load configuration
    let config = EngineConfig::from_env()?;
    tracing::info!("Configuration loaded");
    tracing::info!("  Alert cycle: every {} min", config.alert_cycle_minutes);
    tracing::info!(
        "  Sector refresh: every {} min (market hours, {})",
        config.sector_cycle_minutes,
        config.exchange_timezone
    );
    tracing::info!(
        "  Budgets: {}/day per user, {}/day per symbol",
        config.daily_user_cap,
        config.daily_symbol_cap
    );
    tracing::info!(
        "  Quiet hours: {} - {} ({})",
        config.quiet_start,
        config.quiet_end,
        config.exchange_timezone
    );
    tracing::info!("  Universe: {} sectors", config.sectors.len());

    // 3. State KV: Redis, or in-process fallback when unreachable
    let kv: Arc<dyn KvStore> = match RedisKv::connect(&config.redis_url).await {
        Ok(kv) => {
            tracing::info!("State KV: redis at {}", config.redis_url);
            Arc::new(kv)
        }
        Err(e) => {
            tracing::warn!(
                "Redis unavailable ({e}); degrading to in-process state \
                 (TTLs and budget atomicity are best-effort)"
            );
            Arc::new(MemoryKv::new())
        }
    };

    // 4. Durable stores (SQLite)
    let connect_options = SqliteConnectOptions::from_str(&config.database_url)?
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .connect_with(connect_options)
        .await?;

    let rule_store = Arc::new(SqliteRuleStore::new(pool.clone()));
    rule_store.init().await?;
    let suppression_store = Arc::new(SqliteSuppressionStore::new(pool.clone()));
    suppression_store.init().await?;
    tracing::info!("Durable stores initialized ({})", config.database_url);

    // 5. Clock, notifier, noise control, alert engine
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let notifier: Arc<dyn Notifier> =
        Arc::new(NotificationHub::standard(config.fcm_endpoint.clone()));

    let noise = NoiseControl::new(
        kv.clone(),
        config.daily_user_cap,
        config.daily_symbol_cap,
        QuietHours {
            start: config.quiet_start,
            end: config.quiet_end,
        },
        config.exchange_timezone,
    );

    let alert_engine = Arc::new(AlertEngine::new(
        Arc::new(KvStateStore::new(kv.clone())),
        suppression_store.clone() as Arc<dyn SuppressionStore>,
        notifier.clone(),
        noise,
        clock.clone(),
    ));
    tracing::info!("Alert engine initialized");

    // 6. Bar source. Vendor integrations plug in here; the deterministic
    //    mock keeps the engine runnable without one.
    let bars: Arc<dyn BarSource> = Arc::new(MockBarSource::new());

    // 7. Evaluation pipeline
    let sector_thresholds = StateThresholds {
        cooldown_duration_seconds: config.sector_cooldown_seconds,
        ..StateThresholds::default()
    };
    let scoring = ScoringEngine::new(dipwatch_scoring::ScoringFilters {
        min_price: config.min_price,
        min_adtv: config.min_adtv,
        exclude_surveillance: true,
    });

    let pipeline = Arc::new(EvaluationPipeline::new(
        config.clone(),
        bars,
        clock.clone(),
        kv,
        rule_store.clone() as Arc<dyn RuleStore>,
        alert_engine,
        notifier,
        scoring,
        SectorStateMachine::new(sector_thresholds),
        SuggestionEmitter::new(config.bundle_cooldown_minutes),
    ));
    tracing::info!("Evaluation pipeline initialized");

    // 8. Startup warm-up, off the critical path
    {
        let pipeline = Arc::clone(&pipeline);
        tokio::spawn(async move {
            pipeline.run_warmup().await;
        });
    }

    // 9. Scheduled jobs. Each job runs inside its own loop, so a slow run
    //    can never overlap itself; Skip drops ticks missed meanwhile.
    let alert_job = {
        let pipeline = Arc::clone(&pipeline);
        let clock = clock.clone();
        let gate_on_market_hours = config.alert_cycle_market_hours_only;
        let timezone = config.exchange_timezone;
        let mut interval =
            time::interval(Duration::from_secs(config.alert_cycle_minutes * 60));
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tokio::spawn(async move {
            loop {
                interval.tick().await;
                if gate_on_market_hours && !is_market_open(clock.now(), timezone) {
                    tracing::debug!("alert cycle skipped: market closed");
                    continue;
                }
                if let Err(e) = Arc::clone(&pipeline).run_alert_cycle().await {
                    tracing::error!("alert cycle failed: {e}");
                }
            }
        })
    };

    let sector_job = {
        let pipeline = Arc::clone(&pipeline);
        let clock = clock.clone();
        let timezone = config.exchange_timezone;
        let mut interval =
            time::interval(Duration::from_secs(config.sector_cycle_minutes * 60));
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tokio::spawn(async move {
            loop {
                interval.tick().await;
                if !is_market_open(clock.now(), timezone) {
                    tracing::debug!("sector refresh skipped: market closed");
                    continue;
                }
                if let Err(e) = Arc::clone(&pipeline).run_sector_cycle().await {
                    tracing::error!("sector refresh failed: {e}");
                }
            }
        })
    };

    tracing::info!(
        "Engine running. Alert cycle every {} min, sector refresh every {} min. \
         Press Ctrl+C to stop.",
        config.alert_cycle_minutes,
        config.sector_cycle_minutes
    );

    // 10. Graceful shutdown on SIGINT/SIGTERM
    let mut sigterm = tokio::signal::unix::signal(SignalKind::terminate())?;
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received SIGINT");
        }
        _ = sigterm.recv() => {
            tracing::info!("Received SIGTERM");
        }
    }

    tracing::info!("Shutdown signal received, stopping jobs...");
    alert_job.abort();
    sector_job.abort();

    tracing::info!("DipWatch engine shut down.");
    Ok(())
}
