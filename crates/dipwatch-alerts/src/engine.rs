//! Per-rule alert state machine: IDLE/ARMED/TRIGGERED/COOLDOWN with
//! debounce, hysteresis reset, cooldown, and the noise-controlled fire
//! path.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Duration;
use dipwatch_core::{Clock, DipwatchError, MarketContext};
use serde_json::json;
use uuid::Uuid;

use crate::models::{
    AlertCondition, AlertEvent, AlertPriority, AlertRule, AlertState, AlertStateKind,
    SuppressionEntry, SuppressionReason,
};
use crate::noise::NoiseControl;
use crate::storage::{StateStore, SuppressionStore};

/// Dispatches one alert event to all configured providers. Returns the AND
/// of provider successes; a failure must never abort other providers.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn dispatch(&self, event: &AlertEvent) -> bool;
}

/// Outcome of one rule evaluation tick.
#[derive(Debug, Clone)]
pub struct EvaluationOutcome {
    /// Event emitted and dispatched this tick, if any.
    pub event: Option<AlertEvent>,
    /// Suppression recorded this tick, if any.
    pub suppressed: Option<SuppressionReason>,
    pub new_state: AlertStateKind,
}

pub struct AlertEngine {
    states: Arc<dyn StateStore>,
    suppressions: Arc<dyn SuppressionStore>,
    notifier: Arc<dyn Notifier>,
    noise: NoiseControl,
    clock: Arc<dyn Clock>,
}

impl AlertEngine {
    pub fn new(
        states: Arc<dyn StateStore>,
        suppressions: Arc<dyn SuppressionStore>,
        notifier: Arc<dyn Notifier>,
        noise: NoiseControl,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            states,
            suppressions,
            notifier,
            noise,
            clock,
        }
    }

    /// Evaluate a single rule against freshly computed market data, driving
    /// the rule's state machine one tick.
    pub async fn evaluate_rule(
        &self,
        rule: &AlertRule,
        market: &MarketContext,
    ) -> Result<EvaluationOutcome, DipwatchError> {
        let now = self.clock.now();
        let mut state = match self.states.get_state(&rule.id, &rule.symbol).await? {
            Some(state) => state,
            None => AlertState::new(&rule.id, &rule.symbol, now),
        };

        // 1. Cooldown: wait it out, or fall back to IDLE once expired.
        if state.state == AlertStateKind::Cooldown {
            match state.cooldown_until {
                Some(until) if now >= until => {
                    transition(&mut state, AlertStateKind::Idle, now, "cooldown ended");
                }
                Some(_) => {
                    return Ok(EvaluationOutcome {
                        event: None,
                        suppressed: None,
                        new_state: state.state,
                    });
                }
                None => {
                    // Invariant violation: repair to IDLE rather than wedge the rule.
                    tracing::error!(rule = %rule.id, "cooldown state without cooldown_until");
                    transition(&mut state, AlertStateKind::Idle, now, "invariant repair");
                }
            }
        }

        // 2. Condition evaluation.
        let (met, value) = check_condition(rule, market);

        // 3. Transition table.
        let mut outcome = EvaluationOutcome {
            event: None,
            suppressed: None,
            new_state: state.state,
        };

        match state.state {
            AlertStateKind::Idle => {
                if met {
                    if rule.debounce_seconds > 0 {
                        transition(&mut state, AlertStateKind::Armed, now, "debounce started");
                        state.first_signal_at = Some(now);
                    } else {
                        let fired = self.fire(rule, &mut state, value).await?;
                        outcome.event = fired.event;
                        outcome.suppressed = fired.suppressed;
                    }
                }
            }
            AlertStateKind::Armed => {
                if met {
                    let held_long_enough = state
                        .first_signal_at
                        .map(|first| now - first >= Duration::seconds(rule.debounce_seconds))
                        .unwrap_or(false);
                    if held_long_enough {
                        let fired = self.fire(rule, &mut state, value).await?;
                        outcome.event = fired.event;
                        outcome.suppressed = fired.suppressed;
                    }
                } else {
                    transition(&mut state, AlertStateKind::Idle, now, "debounce lost");
                }
            }
            AlertStateKind::Triggered => {
                if should_reset(rule, value, met) {
                    state.cooldown_until = Some(now + Duration::seconds(rule.cooldown_seconds));
                    transition(&mut state, AlertStateKind::Cooldown, now, "entering cooldown");
                }
            }
            AlertStateKind::Cooldown => {
                // Handled in step 1.
            }
        }

        // Persist the evaluated value every tick regardless of transition.
        state.last_value = Some(value);
        self.states.save_state(&state).await?;

        outcome.new_state = state.state;
        Ok(outcome)
    }

    /// Fire sub-protocol: quiet hours, budget, then dispatch. The state
    /// advances to TRIGGERED in every branch so the rule is not immediately
    /// re-evaluated.
    async fn fire(
        &self,
        rule: &AlertRule,
        state: &mut AlertState,
        value: f64,
    ) -> Result<EvaluationOutcome, DipwatchError> {
        let now = self.clock.now();

        // (a) Quiet hours — only HIGH priority bypasses.
        if self.noise.is_quiet_hours(now) && rule.priority != AlertPriority::High {
            self.log_suppression(rule, SuppressionReason::QuietHours, json!({}))
                .await;
            transition(state, AlertStateKind::Triggered, now, "suppressed: quiet hours");
            state.last_triggered_at = Some(now);
            return Ok(EvaluationOutcome {
                event: None,
                suppressed: Some(SuppressionReason::QuietHours),
                new_state: state.state,
            });
        }

        // (b) Daily budgets.
        if let Some(denial) = self.noise.check_budget(&rule.user_id, &rule.symbol, now).await {
            self.log_suppression(rule, denial.reason, denial.meta).await;
            transition(state, AlertStateKind::Triggered, now, "suppressed: budget");
            state.last_triggered_at = Some(now);
            return Ok(EvaluationOutcome {
                event: None,
                suppressed: Some(denial.reason),
                new_state: state.state,
            });
        }

        // (c) Build, dispatch, consume.
        let mut event = AlertEvent {
            id: Uuid::new_v4().to_string(),
            rule_id: rule.id.clone(),
            symbol: rule.symbol.clone(),
            fired_at: now,
            priority: rule.priority,
            value,
            threshold: rule.threshold,
            message: format_message(rule, value),
            chips: vec![format!("{} {:.2}", rule.condition.as_str(), value)],
            payload: json!({ "value": value }),
            push_sent: false,
            digest_batch_id: None,
        };

        event.push_sent = self.notifier.dispatch(&event).await;

        self.noise
            .consume_budget(&rule.user_id, &rule.symbol, now)
            .await;
        transition(state, AlertStateKind::Triggered, now, "alert fired");
        state.last_triggered_at = Some(now);

        tracing::info!(
            symbol = %rule.symbol,
            rule = %rule.id,
            push_sent = event.push_sent,
            "alert fired: {}",
            event.message
        );

        Ok(EvaluationOutcome {
            event: Some(event),
            suppressed: None,
            new_state: state.state,
        })
    }

    async fn log_suppression(
        &self,
        rule: &AlertRule,
        reason: SuppressionReason,
        meta: serde_json::Value,
    ) {
        let entry = SuppressionEntry {
            id: Uuid::new_v4().to_string(),
            rule_id: rule.id.clone(),
            symbol: rule.symbol.clone(),
            timestamp: self.clock.now(),
            reason,
            meta,
        };

        if let Err(e) = self.suppressions.append(&entry).await {
            tracing::warn!("failed to append suppression log: {e}");
        }
    }
}

/// Evaluate the rule condition; returns (met, current value).
pub fn check_condition(rule: &AlertRule, market: &MarketContext) -> (bool, f64) {
    match rule.condition {
        AlertCondition::DipGt => {
            let value = market.dip_pct;
            (value >= rule.threshold, value)
        }
        AlertCondition::RsiLt => {
            let value = market.rsi.unwrap_or(100.0);
            (value < rule.threshold, value)
        }
        AlertCondition::MacdBullish => {
            let value = market.macd_hist.unwrap_or(0.0);
            (value > 0.0 && value > rule.threshold, value)
        }
        AlertCondition::VolumeSpike => {
            let avg = market.avg_volume.unwrap_or(0.0);
            let value = if avg > 0.0 { market.volume / avg } else { 0.0 };
            (avg > 0.0 && value >= rule.threshold, value)
        }
        AlertCondition::PreScoreGt => {
            let value = market.pre_score.unwrap_or(0) as f64;
            (value > rule.threshold, value)
        }
    }
}

/// Hysteresis reset predicate for a TRIGGERED rule.
///
/// DIP_GT resets below `threshold - h`; RSI_LT above `threshold + h`; every
/// other condition resets as soon as it evaluates false.
fn should_reset(rule: &AlertRule, value: f64, met: bool) -> bool {
    let h = rule.hysteresis_reset;

    match rule.condition {
        AlertCondition::DipGt => value < rule.threshold - h,
        AlertCondition::RsiLt => value > rule.threshold + h,
        AlertCondition::MacdBullish
        | AlertCondition::VolumeSpike
        | AlertCondition::PreScoreGt => !met,
    }
}

fn format_message(rule: &AlertRule, value: f64) -> String {
    match rule.condition {
        AlertCondition::DipGt => format!(
            "Dip reached {value:.1}% (Threshold: {}%)",
            rule.threshold
        ),
        AlertCondition::RsiLt => format!(
            "RSI dropped to {value:.1} (Threshold: {})",
            rule.threshold
        ),
        _ => format!(
            "Alert triggered: {} = {value:.2}",
            rule.condition.as_str()
        ),
    }
}

/// Update state transition metadata, keeping the ARMED/COOLDOWN field
/// invariants intact on exit.
fn transition(
    state: &mut AlertState,
    next: AlertStateKind,
    now: chrono::DateTime<chrono::Utc>,
    reason: &str,
) {
    if next != AlertStateKind::Armed {
        state.first_signal_at = None;
    }
    if next != AlertStateKind::Cooldown {
        state.cooldown_until = None;
    }

    tracing::debug!(
        rule = %state.rule_id,
        from = state.state.as_str(),
        to = next.as_str(),
        "rule transition ({reason})"
    );

    state.state = next;
    state.last_transition_at = now;
}
