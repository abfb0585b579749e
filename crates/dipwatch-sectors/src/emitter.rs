//! Suggestion bundle emitter: packages ranked candidates on qualifying
//! sector events, with per-sector dedup cooldown and bounded history.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use dipwatch_scoring::RankedCandidate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::state_machine::{SectorEvent, SectorState};

/// A bundle of suggested candidates for a sector event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuggestionBundle {
    pub bundle_id: String,
    pub event_id: String,
    pub sector_id: String,
    pub ts: DateTime<Utc>,
    pub candidates: Vec<RankedCandidate>,
    pub severity_tags: Vec<String>,
}

const MAX_BUNDLES_PER_SECTOR: usize = 20;

/// Creates and stores suggestion bundles, deduplicating within a cooldown
/// window unless the event is a fresh ALERT or a worsen re-alert.
pub struct SuggestionEmitter {
    bundles: HashMap<String, Vec<SuggestionBundle>>,
    last_bundle_at: HashMap<String, DateTime<Utc>>,
    bundle_cooldown: Duration,
}

impl SuggestionEmitter {
    pub fn new(bundle_cooldown_minutes: i64) -> Self {
        Self {
            bundles: HashMap::new(),
            last_bundle_at: HashMap::new(),
            bundle_cooldown: Duration::minutes(bundle_cooldown_minutes),
        }
    }

    fn severity_tags(event: &SectorEvent) -> Vec<String> {
        let mut tags = Vec::new();
        let metrics = &event.metrics_snapshot;

        if metrics.dip_pct > 15.0 {
            tags.push("dip_severity: major".to_string());
        } else if metrics.dip_pct > 10.0 {
            tags.push("dip_severity: moderate".to_string());
        }

        if metrics.rsi40_breadth > 0.6 {
            tags.push("breadth: high".to_string());
        }

        tags
    }

    fn should_emit(&self, event: &SectorEvent, now: DateTime<Utc>) -> bool {
        // A fresh ALERT transition always produces a bundle.
        if event.new_state == SectorState::Alert && event.previous_state != SectorState::Alert {
            return true;
        }

        if let Some(last) = self.last_bundle_at.get(&event.sector_id) {
            if now - *last < self.bundle_cooldown {
                // A worsen trigger overrides the dedup window.
                return event.trigger_reason.to_lowercase().contains("worsen");
            }
        }

        true
    }

    /// Create and store a bundle if dedup conditions allow and there is at
    /// least one candidate.
    pub fn create_bundle(
        &mut self,
        event: &SectorEvent,
        candidates: Vec<RankedCandidate>,
        now: DateTime<Utc>,
    ) -> Option<SuggestionBundle> {
        if !self.should_emit(event, now) {
            return None;
        }

        if candidates.is_empty() {
            return None;
        }

        let bundle = SuggestionBundle {
            bundle_id: Uuid::new_v4().to_string(),
            event_id: event.event_id.clone(),
            sector_id: event.sector_id.clone(),
            ts: now,
            candidates,
            severity_tags: Self::severity_tags(event),
        };

        let history = self.bundles.entry(event.sector_id.clone()).or_default();
        history.push(bundle.clone());
        if history.len() > MAX_BUNDLES_PER_SECTOR {
            let excess = history.len() - MAX_BUNDLES_PER_SECTOR;
            history.drain(..excess);
        }

        self.last_bundle_at.insert(event.sector_id.clone(), now);

        tracing::info!(
            bundle = %bundle.bundle_id,
            sector = %event.sector_id,
            candidates = bundle.candidates.len(),
            "created suggestion bundle"
        );

        Some(bundle)
    }

    pub fn latest_bundle(&self, sector_id: &str) -> Option<&SuggestionBundle> {
        self.bundles.get(sector_id)?.last()
    }

    pub fn bundles(&self, sector_id: &str) -> &[SuggestionBundle] {
        self.bundles
            .get(sector_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

impl Default for SuggestionEmitter {
    fn default() -> Self {
        Self::new(30)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_machine::SectorMetrics;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 3, 10, 0, 0).unwrap()
    }

    fn event(
        sector: &str,
        previous: SectorState,
        new: SectorState,
        reason: &str,
        dip: f64,
        rsi40: f64,
    ) -> SectorEvent {
        SectorEvent {
            event_id: Uuid::new_v4().to_string(),
            sector_id: sector.to_string(),
            ts: t0(),
            previous_state: previous,
            new_state: new,
            metrics_snapshot: SectorMetrics {
                dip_pct: dip,
                rsi40_breadth: rsi40,
                lowerband_breadth: 0.0,
            },
            trigger_reason: reason.to_string(),
        }
    }

    fn candidates() -> Vec<RankedCandidate> {
        vec![RankedCandidate {
            symbol: "LARGE".to_string(),
            rank: 1,
            pre_score: 8,
            reasons: vec![],
            flags: vec![],
            distance_to_sma200_pct: 1.0,
            distance_to_lower_band_pct: 2.0,
            adtv: 5e6,
        }]
    }

    #[test]
    fn fresh_alert_always_bundles() {
        let mut emitter = SuggestionEmitter::default();
        let alert = event("it", SectorState::Normal, SectorState::Alert, "Alert criteria met", 9.0, 0.5);

        let bundle = emitter.create_bundle(&alert, candidates(), t0());
        assert!(bundle.is_some());

        // A second fresh ALERT transition bypasses the dedup window too.
        let again = emitter.create_bundle(&alert, candidates(), t0() + Duration::minutes(5));
        assert!(again.is_some());
    }

    #[test]
    fn no_candidates_means_no_bundle() {
        let mut emitter = SuggestionEmitter::default();
        let alert = event("it", SectorState::Normal, SectorState::Alert, "Alert criteria met", 9.0, 0.5);
        assert!(emitter.create_bundle(&alert, vec![], t0()).is_none());
    }

    #[test]
    fn non_alert_event_within_window_is_suppressed() {
        let mut emitter = SuggestionEmitter::default();
        let alert = event("it", SectorState::Normal, SectorState::Alert, "Alert criteria met", 9.0, 0.5);
        emitter.create_bundle(&alert, candidates(), t0());

        let cooldown = event("it", SectorState::Alert, SectorState::Cooldown, "Alert ended", 6.0, 0.5);
        assert!(emitter
            .create_bundle(&cooldown, candidates(), t0() + Duration::minutes(10))
            .is_none());
    }

    #[test]
    fn worsen_overrides_dedup_window() {
        let mut emitter = SuggestionEmitter::default();
        let alert = event("it", SectorState::Normal, SectorState::Alert, "Alert criteria met", 9.0, 0.5);
        emitter.create_bundle(&alert, candidates(), t0());

        let worsen = event(
            "it",
            SectorState::Alert,
            SectorState::Alert,
            "Conditions worsened during cooldown",
            11.0,
            0.62,
        );
        let bundle = emitter.create_bundle(&worsen, candidates(), t0() + Duration::minutes(5));
        assert!(bundle.is_some());
    }

    #[test]
    fn severity_tags_from_metrics() {
        let mut emitter = SuggestionEmitter::default();
        let deep = event("it", SectorState::Normal, SectorState::Alert, "Alert criteria met", 16.0, 0.7);
        let bundle = emitter.create_bundle(&deep, candidates(), t0()).unwrap();

        assert!(bundle.severity_tags.contains(&"dip_severity: major".to_string()));
        assert!(bundle.severity_tags.contains(&"breadth: high".to_string()));

        let moderate = event("en", SectorState::Normal, SectorState::Alert, "Alert criteria met", 11.0, 0.3);
        let bundle = emitter.create_bundle(&moderate, candidates(), t0()).unwrap();
        assert_eq!(bundle.severity_tags, vec!["dip_severity: moderate".to_string()]);
    }

    #[test]
    fn per_sector_history_is_capped_at_twenty() {
        let mut emitter = SuggestionEmitter::default();
        for i in 0..25 {
            let alert = event("it", SectorState::Normal, SectorState::Alert, "Alert criteria met", 9.0, 0.5);
            emitter.create_bundle(&alert, candidates(), t0() + Duration::hours(i));
        }

        assert_eq!(emitter.bundles("it").len(), 20);
        assert!(emitter.latest_bundle("it").is_some());
    }
}
