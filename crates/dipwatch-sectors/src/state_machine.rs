//! Sector state machine: NORMAL/WATCH/ALERT/COOLDOWN with hysteresis to
//! avoid flapping and a worsen-based re-alert path during cooldown.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::aggregator::SectorSnapshot;

/// Sector monitoring states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectorState {
    Normal,
    Watch,
    Alert,
    Cooldown,
}

impl SectorState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SectorState::Normal => "normal",
            SectorState::Watch => "watch",
            SectorState::Alert => "alert",
            SectorState::Cooldown => "cooldown",
        }
    }
}

/// Configurable thresholds for state transitions.
#[derive(Debug, Clone)]
pub struct StateThresholds {
    // Entry thresholds
    pub watch_dip_min: f64,
    pub watch_rsi40_breadth_min: f64,
    pub alert_dip_min: f64,
    pub alert_rsi40_breadth_min: f64,
    pub alert_lowerband_breadth_min: f64,

    // Exit thresholds (hysteresis, less strict than entry)
    pub watch_exit_dip: f64,
    pub watch_exit_rsi40: f64,
    pub alert_exit_dip: f64,
    pub alert_exit_rsi40: f64,

    pub cooldown_duration_seconds: i64,

    // Re-alert triggers during cooldown
    pub dip_worsen_threshold: f64,
    pub breadth_worsen_threshold: f64,
}

impl Default for StateThresholds {
    fn default() -> Self {
        Self {
            watch_dip_min: 5.0,
            watch_rsi40_breadth_min: 0.35,
            alert_dip_min: 8.0,
            alert_rsi40_breadth_min: 0.45,
            alert_lowerband_breadth_min: 0.55,
            watch_exit_dip: 4.0,
            watch_exit_rsi40: 0.33,
            alert_exit_dip: 7.0,
            alert_exit_rsi40: 0.43,
            cooldown_duration_seconds: 1800,
            dip_worsen_threshold: 2.0,
            breadth_worsen_threshold: 0.10,
        }
    }
}

/// The metrics the machine compares across snapshots.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SectorMetrics {
    pub dip_pct: f64,
    pub rsi40_breadth: f64,
    pub lowerband_breadth: f64,
}

impl From<&SectorSnapshot> for SectorMetrics {
    fn from(snapshot: &SectorSnapshot) -> Self {
        Self {
            dip_pct: snapshot.dip_pct,
            rsi40_breadth: snapshot.rsi40_breadth,
            lowerband_breadth: snapshot.lowerband_breadth,
        }
    }
}

/// Event emitted on state change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SectorEvent {
    pub event_id: String,
    pub sector_id: String,
    pub ts: DateTime<Utc>,
    pub previous_state: SectorState,
    pub new_state: SectorState,
    pub metrics_snapshot: SectorMetrics,
    pub trigger_reason: String,
}

/// Tracks current state and bounded history for a sector.
#[derive(Debug, Clone)]
pub struct SectorStateRecord {
    pub sector_id: String,
    pub current_state: SectorState,
    pub last_transition: DateTime<Utc>,
    /// Set iff `current_state == Cooldown`.
    pub cooldown_until: Option<DateTime<Utc>>,
    /// Set while in Alert or Cooldown; worsen deltas compare against it.
    pub last_alert_metrics: Option<SectorMetrics>,
    pub history: Vec<SectorEvent>,
}

const MAX_HISTORY: usize = 100;

/// Manages sector state transitions with hysteresis.
pub struct SectorStateMachine {
    thresholds: StateThresholds,
    states: HashMap<String, SectorStateRecord>,
}

impl SectorStateMachine {
    pub fn new(thresholds: StateThresholds) -> Self {
        Self {
            thresholds,
            states: HashMap::new(),
        }
    }

    /// Feed a snapshot; returns an event iff the state changed.
    pub fn update(
        &mut self,
        sector_id: &str,
        metrics: SectorMetrics,
        now: DateTime<Utc>,
    ) -> Option<SectorEvent> {
        let record = self
            .states
            .entry(sector_id.to_string())
            .or_insert_with(|| SectorStateRecord {
                sector_id: sector_id.to_string(),
                current_state: SectorState::Normal,
                last_transition: now,
                cooldown_until: None,
                last_alert_metrics: None,
                history: Vec::new(),
            });

        let current = record.current_state;
        let mut next = current;
        let mut reason = String::new();
        let thresholds = &self.thresholds;

        match current {
            SectorState::Normal => {
                if metrics.dip_pct >= thresholds.alert_dip_min
                    && (metrics.rsi40_breadth >= thresholds.alert_rsi40_breadth_min
                        || metrics.lowerband_breadth >= thresholds.alert_lowerband_breadth_min)
                {
                    next = SectorState::Alert;
                    reason = "Alert criteria met".to_string();
                } else if metrics.dip_pct >= thresholds.watch_dip_min
                    && metrics.rsi40_breadth >= thresholds.watch_rsi40_breadth_min
                {
                    next = SectorState::Watch;
                    reason = "Watch criteria met".to_string();
                }
            }
            SectorState::Watch => {
                if metrics.dip_pct >= thresholds.alert_dip_min
                    && (metrics.rsi40_breadth >= thresholds.alert_rsi40_breadth_min
                        || metrics.lowerband_breadth >= thresholds.alert_lowerband_breadth_min)
                {
                    next = SectorState::Alert;
                    reason = "Escalated from WATCH to ALERT".to_string();
                } else if metrics.dip_pct < thresholds.watch_exit_dip
                    || metrics.rsi40_breadth < thresholds.watch_exit_rsi40
                {
                    next = SectorState::Normal;
                    reason = "Watch criteria no longer met".to_string();
                }
            }
            SectorState::Alert => {
                if metrics.dip_pct < thresholds.alert_exit_dip
                    || metrics.rsi40_breadth < thresholds.alert_exit_rsi40
                {
                    next = SectorState::Cooldown;
                    reason = "Alert ended, entering cooldown".to_string();
                }
            }
            SectorState::Cooldown => {
                let expired = record.cooldown_until.is_some_and(|until| now >= until);
                let worsened = record.last_alert_metrics.as_ref().is_some_and(|last| {
                    metrics.dip_pct - last.dip_pct >= thresholds.dip_worsen_threshold
                        || metrics.rsi40_breadth - last.rsi40_breadth
                            >= thresholds.breadth_worsen_threshold
                });

                if expired {
                    next = SectorState::Normal;
                    reason = "Cooldown expired".to_string();
                } else if worsened {
                    next = SectorState::Alert;
                    reason = "Conditions worsened during cooldown".to_string();
                }
            }
        }

        if next == current {
            return None;
        }

        // Maintain the cooldown/alert-metrics invariants on entry and exit.
        match next {
            SectorState::Alert => {
                record.cooldown_until = None;
                record.last_alert_metrics = Some(metrics);
            }
            SectorState::Cooldown => {
                record.cooldown_until =
                    Some(now + Duration::seconds(thresholds.cooldown_duration_seconds));
                record.last_alert_metrics = Some(metrics);
            }
            SectorState::Normal | SectorState::Watch => {
                record.cooldown_until = None;
                record.last_alert_metrics = None;
            }
        }

        let event = SectorEvent {
            event_id: Uuid::new_v4().to_string(),
            sector_id: sector_id.to_string(),
            ts: now,
            previous_state: current,
            new_state: next,
            metrics_snapshot: metrics,
            trigger_reason: reason,
        };

        record.current_state = next;
        record.last_transition = now;
        record.history.push(event.clone());
        if record.history.len() > MAX_HISTORY {
            let excess = record.history.len() - MAX_HISTORY;
            record.history.drain(..excess);
        }

        tracing::info!(
            sector = sector_id,
            from = event.previous_state.as_str(),
            to = event.new_state.as_str(),
            reason = %event.trigger_reason,
            "sector state transition"
        );

        Some(event)
    }

    pub fn current_state(&self, sector_id: &str) -> SectorState {
        self.states
            .get(sector_id)
            .map(|r| r.current_state)
            .unwrap_or(SectorState::Normal)
    }

    pub fn record(&self, sector_id: &str) -> Option<&SectorStateRecord> {
        self.states.get(sector_id)
    }

    pub fn history(&self, sector_id: &str, limit: usize) -> Vec<SectorEvent> {
        match self.states.get(sector_id) {
            Some(record) => {
                let history = &record.history;
                let start = history.len().saturating_sub(limit);
                history[start..].to_vec()
            }
            None => Vec::new(),
        }
    }
}

impl Default for SectorStateMachine {
    fn default() -> Self {
        Self::new(StateThresholds::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn metrics(dip: f64, rsi40: f64, lowerband: f64) -> SectorMetrics {
        SectorMetrics {
            dip_pct: dip,
            rsi40_breadth: rsi40,
            lowerband_breadth: lowerband,
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 3, 10, 0, 0).unwrap()
    }

    #[test]
    fn normal_to_watch_and_alert() {
        let mut sm = SectorStateMachine::default();

        let event = sm.update("it", metrics(5.5, 0.40, 0.1), t0()).unwrap();
        assert_eq!(event.new_state, SectorState::Watch);

        let event = sm.update("it", metrics(9.0, 0.50, 0.1), t0()).unwrap();
        assert_eq!(event.previous_state, SectorState::Watch);
        assert_eq!(event.new_state, SectorState::Alert);
    }

    #[test]
    fn normal_jumps_straight_to_alert_when_criteria_met() {
        let mut sm = SectorStateMachine::default();
        let event = sm.update("it", metrics(9.0, 0.50, 0.1), t0()).unwrap();
        assert_eq!(event.previous_state, SectorState::Normal);
        assert_eq!(event.new_state, SectorState::Alert);
    }

    #[test]
    fn alert_via_lowerband_breadth_alternative() {
        let mut sm = SectorStateMachine::default();
        let event = sm.update("it", metrics(8.5, 0.20, 0.60), t0()).unwrap();
        assert_eq!(event.new_state, SectorState::Alert);
    }

    #[test]
    fn identical_snapshots_cause_at_most_one_transition() {
        let mut sm = SectorStateMachine::default();
        let m = metrics(9.0, 0.50, 0.1);

        assert!(sm.update("it", m, t0()).is_some());
        assert!(sm.update("it", m, t0()).is_none());
        assert!(sm.update("it", m, t0()).is_none());
    }

    #[test]
    fn alert_exits_through_cooldown_never_directly_to_normal() {
        let mut sm = SectorStateMachine::default();
        sm.update("it", metrics(9.0, 0.50, 0.1), t0());

        let event = sm.update("it", metrics(1.0, 0.05, 0.0), t0()).unwrap();
        assert_eq!(event.new_state, SectorState::Cooldown);
        assert!(sm.record("it").unwrap().cooldown_until.is_some());

        // Even at fully recovered metrics the next hop is cooldown expiry.
        let event = sm.update(
            "it",
            metrics(0.0, 0.0, 0.0),
            t0() + Duration::seconds(1801),
        );
        assert_eq!(event.unwrap().new_state, SectorState::Normal);
        assert!(sm.record("it").unwrap().cooldown_until.is_none());
    }

    #[test]
    fn hysteresis_holds_alert_between_entry_and_exit_bands() {
        let mut sm = SectorStateMachine::default();
        sm.update("it", metrics(9.0, 0.50, 0.1), t0());

        // dip 7.5 is below entry (8) but above exit (7): no transition.
        assert!(sm.update("it", metrics(7.5, 0.50, 0.1), t0()).is_none());
        assert_eq!(sm.current_state("it"), SectorState::Alert);
    }

    #[test]
    fn worsen_re_alert_during_cooldown() {
        let mut sm = SectorStateMachine::default();
        sm.update("it", metrics(9.0, 0.50, 0.1), t0());
        sm.update("it", metrics(6.0, 0.50, 0.1), t0()); // exit to cooldown at dip 6

        // 5 minutes later, dip deepened by 2.5 and breadth rose by 0.12.
        let event = sm
            .update("it", metrics(8.5, 0.62, 0.1), t0() + Duration::minutes(5))
            .unwrap();
        assert_eq!(event.new_state, SectorState::Alert);
        assert!(event.trigger_reason.to_lowercase().contains("worsen"));
    }

    #[test]
    fn small_drift_during_cooldown_does_not_re_alert() {
        let mut sm = SectorStateMachine::default();
        sm.update("it", metrics(9.0, 0.50, 0.1), t0());
        sm.update("it", metrics(6.0, 0.50, 0.1), t0());

        assert!(sm
            .update("it", metrics(7.0, 0.55, 0.1), t0() + Duration::minutes(5))
            .is_none());
        assert_eq!(sm.current_state("it"), SectorState::Cooldown);
    }

    #[test]
    fn watch_exit_uses_hysteresis_band() {
        let mut sm = SectorStateMachine::default();
        sm.update("it", metrics(5.5, 0.40, 0.1), t0());

        // dip 4.5 is under watch entry (5) but over exit (4): hold WATCH.
        assert!(sm.update("it", metrics(4.5, 0.40, 0.1), t0()).is_none());

        let event = sm.update("it", metrics(3.5, 0.40, 0.1), t0()).unwrap();
        assert_eq!(event.new_state, SectorState::Normal);
    }

    #[test]
    fn history_is_capped() {
        let mut sm = SectorStateMachine::default();
        let mut now = t0();

        for _ in 0..120 {
            sm.update("it", metrics(5.5, 0.40, 0.1), now); // -> WATCH
            now += Duration::minutes(1);
            sm.update("it", metrics(0.0, 0.0, 0.0), now); // -> NORMAL
            now += Duration::minutes(1);
        }

        assert!(sm.record("it").unwrap().history.len() <= 100);
        assert_eq!(sm.history("it", 10).len(), 10);
    }

    #[test]
    fn cooldown_invariant_tracks_state() {
        let mut sm = SectorStateMachine::default();
        sm.update("it", metrics(9.0, 0.50, 0.1), t0());
        assert!(sm.record("it").unwrap().cooldown_until.is_none());
        assert!(sm.record("it").unwrap().last_alert_metrics.is_some());

        sm.update("it", metrics(6.0, 0.50, 0.1), t0());
        let record = sm.record("it").unwrap();
        assert_eq!(record.current_state, SectorState::Cooldown);
        assert!(record.cooldown_until.is_some());
        assert!(record.last_alert_metrics.is_some());
    }
}
