//! Dip classification: rolling window highs, severity bands, and
//! corporate-action price adjustments.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Dip severity, banded on distance from the rolling high.
/// Bands are right-open: a dip of exactly 8.0% is Moderate, 7.999% Minor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DipClass {
    None,
    Micro,
    Minor,
    Moderate,
    Significant,
    Major,
    Extreme,
}

impl DipClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            DipClass::None => "none",
            DipClass::Micro => "micro",
            DipClass::Minor => "minor",
            DipClass::Moderate => "moderate",
            DipClass::Significant => "significant",
            DipClass::Major => "major",
            DipClass::Extreme => "extreme",
        }
    }
}

/// Result of dip analysis for one instrument.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DipAnalysis {
    pub symbol: String,
    pub current_price: f64,
    pub high_52w: f64,
    pub high_52w_date: Option<DateTime<Utc>>,
    pub dip_pct: f64,
    pub dip_class: DipClass,
    pub days_from_high: Option<usize>,
}

/// Maximum high over the last `lookback` samples (all samples if fewer).
pub fn rolling_high(highs: &[f64], lookback: usize) -> f64 {
    let window = if highs.len() > lookback {
        &highs[highs.len() - lookback..]
    } else {
        highs
    };

    window.iter().copied().fold(0.0, f64::max)
}

/// Dip percentage (clamped to >= 0) and its severity band.
pub fn classify_dip(current_price: f64, high: f64) -> (f64, DipClass) {
    if high == 0.0 {
        return (0.0, DipClass::None);
    }

    let dip_pct = (high - current_price) / high * 100.0;

    if dip_pct < 0.0 {
        // At a new high.
        return (0.0, DipClass::None);
    }

    let class = match dip_pct {
        d if d < 3.0 => DipClass::None,
        d if d < 5.0 => DipClass::Micro,
        d if d < 8.0 => DipClass::Minor,
        d if d < 12.0 => DipClass::Moderate,
        d if d < 15.0 => DipClass::Significant,
        d if d < 25.0 => DipClass::Major,
        _ => DipClass::Extreme,
    };

    (dip_pct, class)
}

/// Locate the rolling high in the series: the most recent index where the
/// high matches within 0.01. Returns the date and how many bars ago it was.
pub fn find_high_date(
    highs: &[f64],
    dates: &[DateTime<Utc>],
    high: f64,
) -> Option<(DateTime<Utc>, usize)> {
    if highs.is_empty() || highs.len() != dates.len() {
        return None;
    }

    let idx = highs.iter().rposition(|h| (h - high).abs() < 0.01)?;
    Some((dates[idx], highs.len() - idx - 1))
}

/// Full dip analysis over closing/high history.
pub fn analyze_dip(
    symbol: &str,
    closes: &[f64],
    highs: &[f64],
    dates: Option<&[DateTime<Utc>]>,
    lookback: usize,
) -> DipAnalysis {
    let current_price = closes.last().copied().unwrap_or(0.0);

    if closes.is_empty() || highs.is_empty() {
        return DipAnalysis {
            symbol: symbol.to_string(),
            current_price: 0.0,
            high_52w: 0.0,
            high_52w_date: None,
            dip_pct: 0.0,
            dip_class: DipClass::None,
            days_from_high: None,
        };
    }

    let high_52w = rolling_high(highs, lookback);
    let (dip_pct, dip_class) = classify_dip(current_price, high_52w);

    let located = dates.and_then(|dates| find_high_date(highs, dates, high_52w));

    DipAnalysis {
        symbol: symbol.to_string(),
        current_price,
        high_52w,
        high_52w_date: located.map(|(date, _)| date),
        dip_pct,
        dip_class,
        days_from_high: located.map(|(_, days)| days),
    }
}

/// Divide historical prices by a split ratio (e.g. 2.0 for a 2:1 split).
/// Pure transform, applied before classification.
pub fn adjust_for_split(prices: &[f64], split_ratio: f64) -> Vec<f64> {
    prices.iter().map(|p| p / split_ratio).collect()
}

/// Divide historical prices by a bonus-issue ratio (e.g. 1.5 for 1:2).
pub fn adjust_for_bonus(prices: &[f64], bonus_ratio: f64) -> Vec<f64> {
    prices.iter().map(|p| p / bonus_ratio).collect()
}

/// Rolling dip state for streaming bars: maintains the window high as bars
/// arrive instead of rescanning full history.
#[derive(Debug, Clone)]
pub struct DipTracker {
    symbol: String,
    lookback: usize,
    closes: Vec<f64>,
    highs: Vec<f64>,
    dates: Vec<DateTime<Utc>>,
    current_high: f64,
}

impl DipTracker {
    pub fn new(symbol: impl Into<String>, lookback: usize) -> Self {
        Self {
            symbol: symbol.into(),
            lookback,
            closes: Vec::new(),
            highs: Vec::new(),
            dates: Vec::new(),
            current_high: 0.0,
        }
    }

    pub fn add_bar(&mut self, close: f64, high: f64, date: DateTime<Utc>) {
        self.closes.push(close);
        self.highs.push(high);
        self.dates.push(date);

        if self.highs.len() > self.lookback {
            let excess = self.highs.len() - self.lookback;
            self.closes.drain(..excess);
            self.highs.drain(..excess);
            self.dates.drain(..excess);
        }

        self.current_high = rolling_high(&self.highs, self.lookback);
    }

    pub fn analysis(&self) -> DipAnalysis {
        analyze_dip(
            &self.symbol,
            &self.closes,
            &self.highs,
            Some(&self.dates),
            self.lookback,
        )
    }

    pub fn is_new_high(&self) -> bool {
        match self.closes.last() {
            Some(&close) => close >= self.current_high,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn days(n: usize) -> Vec<DateTime<Utc>> {
        (0..n)
            .map(|i| Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + chrono::Duration::days(i as i64))
            .collect()
    }

    #[test]
    fn classification_bands_are_right_open() {
        let (_, class) = classify_dip(92.0, 100.0);
        assert_eq!(class, DipClass::Moderate); // exactly 8.0

        let (dip, class) = classify_dip(92.001, 100.0);
        assert!(dip < 8.0);
        assert_eq!(class, DipClass::Minor);

        assert_eq!(classify_dip(100.0, 100.0).1, DipClass::None);
        assert_eq!(classify_dip(96.0, 100.0).1, DipClass::Micro);
        assert_eq!(classify_dip(88.0, 100.0).1, DipClass::Moderate);
        assert_eq!(classify_dip(87.0, 100.0).1, DipClass::Significant);
        assert_eq!(classify_dip(80.0, 100.0).1, DipClass::Major);
        assert_eq!(classify_dip(70.0, 100.0).1, DipClass::Extreme);
    }

    #[test]
    fn new_high_clamps_to_zero() {
        let (dip, class) = classify_dip(110.0, 100.0);
        assert_eq!(dip, 0.0);
        assert_eq!(class, DipClass::None);
    }

    #[test]
    fn zero_high_is_none() {
        let (dip, class) = classify_dip(50.0, 0.0);
        assert_eq!(dip, 0.0);
        assert_eq!(class, DipClass::None);
    }

    #[test]
    fn rolling_high_uses_lookback_window() {
        let highs = vec![200.0, 100.0, 110.0, 105.0];
        assert_eq!(rolling_high(&highs, 3), 110.0);
        assert_eq!(rolling_high(&highs, 10), 200.0);
    }

    #[test]
    fn high_date_prefers_last_occurrence() {
        let highs = vec![100.0, 120.0, 110.0, 120.0, 115.0];
        let dates = days(highs.len());

        let (date, days_ago) = find_high_date(&highs, &dates, 120.0).unwrap();
        assert_eq!(date, dates[3]);
        assert_eq!(days_ago, 1);
    }

    #[test]
    fn analyze_handles_empty_history() {
        let analysis = analyze_dip("EMPTY", &[], &[], None, 365);
        assert_eq!(analysis.dip_pct, 0.0);
        assert_eq!(analysis.dip_class, DipClass::None);
        assert!(analysis.days_from_high.is_none());
    }

    #[test]
    fn split_adjustment_scales_prices() {
        let adjusted = adjust_for_split(&[100.0, 200.0], 2.0);
        assert_eq!(adjusted, vec![50.0, 100.0]);
    }

    #[test]
    fn tracker_matches_batch_analysis() {
        let highs = vec![100.0, 120.0, 110.0, 108.0, 104.0];
        let closes = vec![99.0, 118.0, 108.0, 106.0, 102.0];
        let dates = days(highs.len());

        let mut tracker = DipTracker::new("TRK", 365);
        for i in 0..highs.len() {
            tracker.add_bar(closes[i], highs[i], dates[i]);
        }

        let streamed = tracker.analysis();
        let batch = analyze_dip("TRK", &closes, &highs, Some(&dates), 365);

        assert_eq!(streamed.dip_pct, batch.dip_pct);
        assert_eq!(streamed.high_52w, batch.high_52w);
        assert_eq!(streamed.dip_class, batch.dip_class);
        assert!(!tracker.is_new_high());
    }

    #[test]
    fn tracker_trims_to_lookback() {
        let mut tracker = DipTracker::new("TRIM", 3);
        let dates = days(5);
        for (i, date) in dates.iter().enumerate() {
            tracker.add_bar(100.0 + i as f64, 200.0 - i as f64 * 10.0, *date);
        }

        // Window only holds the last 3 bars, so the early 200/190 highs fall out.
        assert_eq!(tracker.analysis().high_52w, 180.0);
    }
}
