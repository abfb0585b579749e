//! The scheduled evaluation pipeline: pull bars, compute signals, feed the
//! rule and sector state machines, and dispatch notifications.
//!
//! Per-symbol work fans out onto independent tasks; per-rule evaluation
//! within a symbol stays sequential so state transitions for a rule are
//! linearizable. Every cycle joins all of its tasks before returning.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use dipwatch_alerts::{AlertEngine, AlertEvent, AlertPriority, AlertRule, Notifier, RuleStore};
use dipwatch_core::{
    Bar, BarInterval, BarSource, Clock, DipwatchError, IndicatorSet, KvStore, MarketContext,
    SectorSpec,
};
use dipwatch_scoring::{rank_candidates, CandidateInput, ScoringEngine, VolumeData};
use dipwatch_sectors::{
    compute_snapshot, SectorEvent, SectorMember, SectorMetrics, SectorStateMachine,
    SuggestionBundle, SuggestionEmitter,
};
use dipwatch_signals::{adtv, all_indicators, analyze_dip, DipAnalysis};
use serde_json::json;
use tokio::sync::Mutex;

use crate::config::EngineConfig;

/// Minimum daily bars before a symbol is evaluated at all.
const MIN_ALERT_BARS: usize = 50;

/// Everything computed for one instrument in one cycle.
struct InstrumentSnapshot {
    symbol: String,
    price: f64,
    volume: f64,
    indicators: IndicatorSet,
    dip: DipAnalysis,
    adtv: f64,
}

impl InstrumentSnapshot {
    fn from_bars(symbol: &str, bars: &[Bar], lookback_days: u32) -> Self {
        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
        let highs: Vec<f64> = bars.iter().map(|b| b.high).collect();
        let volumes: Vec<f64> = bars.iter().map(|b| b.volume).collect();
        let dates: Vec<DateTime<Utc>> = bars.iter().map(|b| b.timestamp).collect();

        let indicators = all_indicators(&closes, &volumes);
        let dip = analyze_dip(symbol, &closes, &highs, Some(&dates), lookback_days as usize);
        let adtv = adtv(&closes, &volumes, 20).unwrap_or(0.0);

        Self {
            symbol: symbol.to_string(),
            price: closes.last().copied().unwrap_or(0.0),
            volume: volumes.last().copied().unwrap_or(0.0),
            indicators,
            dip,
            adtv,
        }
    }

    fn market_context(&self, pre_score: Option<u8>) -> MarketContext {
        MarketContext {
            price: self.price,
            dip_pct: self.dip.dip_pct,
            rsi: self.indicators.rsi,
            macd_hist: self.indicators.macd.as_ref().map(|m| m.histogram),
            volume: self.volume,
            avg_volume: self.indicators.volume_avg,
            pre_score,
        }
    }

    fn sector_member(&self) -> SectorMember {
        SectorMember {
            symbol: self.symbol.clone(),
            current_price: self.price,
            rsi: self.indicators.rsi,
            sma200: self.indicators.sma200,
            lower_band: self.indicators.bollinger.as_ref().map(|b| b.lower),
            current_volume: self.volume,
            volume_avg: self.indicators.volume_avg,
            dip_pct: self.dip.dip_pct,
        }
    }
}

pub struct EvaluationPipeline {
    config: EngineConfig,
    bars: Arc<dyn BarSource>,
    clock: Arc<dyn Clock>,
    kv: Arc<dyn KvStore>,
    rules: Arc<dyn RuleStore>,
    alerts: Arc<AlertEngine>,
    notifier: Arc<dyn Notifier>,
    scoring: ScoringEngine,
    sectors: Mutex<SectorStateMachine>,
    emitter: Mutex<SuggestionEmitter>,
}

impl EvaluationPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: EngineConfig,
        bars: Arc<dyn BarSource>,
        clock: Arc<dyn Clock>,
        kv: Arc<dyn KvStore>,
        rules: Arc<dyn RuleStore>,
        alerts: Arc<AlertEngine>,
        notifier: Arc<dyn Notifier>,
        scoring: ScoringEngine,
        sectors: SectorStateMachine,
        emitter: SuggestionEmitter,
    ) -> Self {
        Self {
            config,
            bars,
            clock,
            kv,
            rules,
            alerts,
            notifier,
            scoring,
            sectors: Mutex::new(sectors),
            emitter: Mutex::new(emitter),
        }
    }

    /// Fetch daily bars through the KV cache. Empty means "skip this symbol
    /// this cycle" — transient failures never bubble up.
    async fn cached_bars(&self, symbol: &str) -> Vec<Bar> {
        let key = format!("bars:{symbol}:1d:{}", self.config.bar_history_days);

        if let Ok(Some(raw)) = self.kv.get(&key).await {
            if let Ok(bars) = serde_json::from_str::<Vec<Bar>>(&raw) {
                return bars;
            }
        }

        let bars = self.fetch_with_retry(symbol).await;

        if !bars.is_empty() {
            if let Ok(raw) = serde_json::to_string(&bars) {
                if let Err(e) = self
                    .kv
                    .set_ex(&key, &raw, self.config.bar_cache_ttl_seconds)
                    .await
                {
                    tracing::debug!("bar cache write failed for {symbol}: {e}");
                }
            }
        }

        bars
    }

    async fn fetch_with_retry(&self, symbol: &str) -> Vec<Bar> {
        let timeout = StdDuration::from_secs(self.config.bar_fetch_timeout_seconds);

        for attempt in 1..=self.config.bar_fetch_retries + 1 {
            let fetch = self
                .bars
                .fetch(symbol, BarInterval::Day1, self.config.bar_history_days);

            match tokio::time::timeout(timeout, fetch).await {
                Ok(Ok(bars)) => return bars,
                Ok(Err(e)) => {
                    tracing::warn!("bar fetch failed for {symbol} (attempt {attempt}): {e}");
                }
                Err(_) => {
                    tracing::warn!("bar fetch timed out for {symbol} (attempt {attempt})");
                }
            }
        }

        Vec::new()
    }

    /// One alert cycle: load enabled rules, group by symbol, fan out.
    pub async fn run_alert_cycle(self: Arc<Self>) -> Result<(), DipwatchError> {
        let started = self.clock.now();

        let rules = self.rules.list(None, None).await?;
        let mut by_symbol: HashMap<String, Vec<AlertRule>> = HashMap::new();
        for rule in rules.into_iter().filter(|r| r.enabled) {
            by_symbol.entry(rule.symbol.clone()).or_default().push(rule);
        }

        if by_symbol.is_empty() {
            tracing::debug!("no active alert rules");
            return Ok(());
        }

        tracing::info!("alert cycle: evaluating {} symbols", by_symbol.len());

        let mut handles = Vec::with_capacity(by_symbol.len());
        for (symbol, group) in by_symbol {
            let pipeline = Arc::clone(&self);
            handles.push(tokio::spawn(async move {
                pipeline.evaluate_symbol_rules(&symbol, &group).await;
            }));
        }
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!("symbol evaluation task panicked: {e}");
            }
        }

        let elapsed = self.clock.now() - started;
        tracing::info!("alert cycle completed in {}ms", elapsed.num_milliseconds());
        Ok(())
    }

    /// Evaluate all of one symbol's rules sequentially against one context.
    async fn evaluate_symbol_rules(&self, symbol: &str, group: &[AlertRule]) {
        let bars = self.cached_bars(symbol).await;
        if bars.len() < MIN_ALERT_BARS {
            tracing::debug!(
                "insufficient data for {symbol}: {} bars (< {MIN_ALERT_BARS})",
                bars.len()
            );
            return;
        }

        let snapshot =
            InstrumentSnapshot::from_bars(symbol, &bars, self.config.bar_history_days);
        let pre_score = self.scoring.score(
            symbol,
            snapshot.price,
            snapshot.adtv,
            false,
            &snapshot.indicators,
            &snapshot.dip,
            VolumeData {
                current_volume: snapshot.volume,
                volume_avg: snapshot.indicators.volume_avg,
            },
        );
        let context = snapshot.market_context(Some(pre_score.pre_score));

        for rule in group {
            if let Err(e) = self.alerts.evaluate_rule(rule, &context).await {
                tracing::error!("rule {} evaluation failed: {e}", rule.id);
            }
        }
    }

    /// One sector refresh: per sector, fetch member bars, aggregate, feed
    /// the sector state machine, and bundle/notify on qualifying events.
    pub async fn run_sector_cycle(self: Arc<Self>) -> Result<(), DipwatchError> {
        let sectors = self.config.sectors.clone();
        tracing::info!("sector refresh: {} sectors", sectors.len());

        for spec in &sectors {
            Arc::clone(&self).refresh_sector(spec).await;
        }

        Ok(())
    }

    async fn refresh_sector(self: Arc<Self>, spec: &SectorSpec) {
        // Member fetches are independent; fan out and join.
        let mut handles = Vec::with_capacity(spec.members.len());
        for symbol in &spec.members {
            let pipeline = Arc::clone(&self);
            let symbol = symbol.clone();
            handles.push(tokio::spawn(async move {
                let bars = pipeline.cached_bars(&symbol).await;
                (symbol, bars)
            }));
        }

        let mut snapshots = Vec::new();
        for handle in handles {
            match handle.await {
                Ok((symbol, bars)) if bars.len() >= MIN_ALERT_BARS => {
                    snapshots.push(InstrumentSnapshot::from_bars(
                        &symbol,
                        &bars,
                        self.config.bar_history_days,
                    ));
                }
                Ok((symbol, bars)) => {
                    tracing::debug!("skipping {symbol} this cycle: {} bars", bars.len());
                }
                Err(e) => tracing::error!("member fetch task panicked: {e}"),
            }
        }

        let now = self.clock.now();
        let members: Vec<SectorMember> =
            snapshots.iter().map(|s| s.sector_member()).collect();
        let snapshot = compute_snapshot(
            &spec.id,
            &spec.name,
            &members,
            spec.weights.as_deref(),
            now,
        );

        tracing::info!(
            sector = %spec.id,
            dip = format!("{:.2}", snapshot.dip_pct),
            rsi40 = format!("{:.2}", snapshot.rsi40_breadth),
            members = snapshot.constituents_count,
            "sector snapshot"
        );

        let event = {
            let mut machine = self.sectors.lock().await;
            machine.update(&spec.id, SectorMetrics::from(&snapshot), now)
        };

        if let Some(event) = event {
            self.handle_sector_event(spec, &event, &snapshots, now).await;
        }
    }

    async fn handle_sector_event(
        &self,
        spec: &SectorSpec,
        event: &SectorEvent,
        snapshots: &[InstrumentSnapshot],
        now: DateTime<Utc>,
    ) {
        let candidates: Vec<CandidateInput> = snapshots
            .iter()
            .map(|s| CandidateInput {
                pre_score: self.scoring.score(
                    &s.symbol,
                    s.price,
                    s.adtv,
                    false,
                    &s.indicators,
                    &s.dip,
                    VolumeData {
                        current_volume: s.volume,
                        volume_avg: s.indicators.volume_avg,
                    },
                ),
                current_price: s.price,
                sma200: s.indicators.sma200,
                lower_band: s.indicators.bollinger.as_ref().map(|b| b.lower),
                adtv: s.adtv,
            })
            .collect();

        let ranked = rank_candidates(candidates, self.config.candidate_limit);

        let bundle = {
            let mut emitter = self.emitter.lock().await;
            emitter.create_bundle(event, ranked, now)
        };

        if let Some(bundle) = bundle {
            let notification = bundle_notification(spec, event, &bundle, now);
            if !self.notifier.dispatch(&notification).await {
                tracing::warn!("sector bundle push partially failed for {}", spec.id);
            }
        }
    }

    /// Startup warm-up: both refreshes once, spawned by the caller so
    /// serving is not blocked.
    pub async fn run_warmup(self: Arc<Self>) {
        tracing::info!("startup warm-up: pre-populating sector and alert state");
        if let Err(e) = Arc::clone(&self).run_sector_cycle().await {
            tracing::error!("warm-up sector cycle failed: {e}");
        }
        if let Err(e) = self.run_alert_cycle().await {
            tracing::error!("warm-up alert cycle failed: {e}");
        }
    }
}

/// Shape a suggestion bundle as a push notification. The collapse key
/// derives from the synthetic sector rule id, so re-alerts for the same
/// sector replace earlier unread pushes.
fn bundle_notification(
    spec: &SectorSpec,
    event: &SectorEvent,
    bundle: &SuggestionBundle,
    now: DateTime<Utc>,
) -> AlertEvent {
    let top: Vec<&str> = bundle
        .candidates
        .iter()
        .take(3)
        .map(|c| c.symbol.as_str())
        .collect();

    AlertEvent {
        id: bundle.bundle_id.clone(),
        rule_id: format!("sector:{}", spec.id),
        symbol: spec.id.clone(),
        fired_at: now,
        priority: AlertPriority::High,
        value: event.metrics_snapshot.dip_pct,
        threshold: 0.0,
        message: format!(
            "{} moved to {}: dip {:.1}%, watch {}",
            spec.name,
            event.new_state.as_str().to_uppercase(),
            event.metrics_snapshot.dip_pct,
            top.join(", ")
        ),
        chips: bundle.severity_tags.clone(),
        payload: serde_json::to_value(bundle).unwrap_or_else(|_| json!({})),
        push_sent: false,
        digest_batch_id: None,
    }
}
