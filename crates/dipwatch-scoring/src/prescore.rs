//! Pre-score engine: maps an instrument's indicator/dip/volume tuple to an
//! even score 0–12 with per-component reasons.

use dipwatch_core::IndicatorSet;
use dipwatch_signals::DipAnalysis;
use serde::{Deserialize, Serialize};

/// Configurable filters for candidate stocks.
#[derive(Debug, Clone)]
pub struct ScoringFilters {
    /// Minimum 20-day average daily traded value.
    pub min_adtv: f64,
    /// Minimum stock price.
    pub min_price: f64,
    /// Exclude instruments under exchange surveillance.
    pub exclude_surveillance: bool,
}

impl Default for ScoringFilters {
    fn default() -> Self {
        Self {
            min_adtv: 1_000_000.0,
            min_price: 50.0,
            exclude_surveillance: true,
        }
    }
}

/// Pre-score result for a stock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreScore {
    pub symbol: String,
    /// 0–12, always even: six independent 0/2 checks.
    pub pre_score: u8,
    pub reasons: Vec<String>,
    /// Warnings like "volatility_risk" or "filtered".
    pub flags: Vec<String>,
}

/// Per-instrument inputs the scorer needs beyond the indicator set.
#[derive(Debug, Clone, Copy)]
pub struct VolumeData {
    pub current_volume: f64,
    pub volume_avg: Option<f64>,
}

/// Scores stocks against the dip-buying checklist (0–12 scale).
#[derive(Debug, Clone, Default)]
pub struct ScoringEngine {
    filters: ScoringFilters,
}

impl ScoringEngine {
    pub fn new(filters: ScoringFilters) -> Self {
        Self { filters }
    }

    /// Check the quality pre-filter. Returns the failure reason when the
    /// instrument does not qualify.
    pub fn passes_filters(
        &self,
        current_price: f64,
        adtv: f64,
        under_surveillance: bool,
    ) -> Result<(), String> {
        if current_price < self.filters.min_price {
            return Err(format!(
                "Price {:.2} below min {:.2}",
                current_price, self.filters.min_price
            ));
        }

        if adtv < self.filters.min_adtv {
            return Err(format!(
                "ADTV {:.0} below min {:.0}",
                adtv, self.filters.min_adtv
            ));
        }

        if self.filters.exclude_surveillance && under_surveillance {
            return Err("Under surveillance".to_string());
        }

        Ok(())
    }

    /// Calculate the pre-score for a filtered instrument.
    ///
    /// Each satisfied check adds +2: dip 8–15%, RSI 30–40 (or <30 with a
    /// volatility flag), bullish MACD, holding/testing SMA200, lower-band
    /// touch, volume spike ≥ 1.5× avg20.
    pub fn calculate(
        &self,
        symbol: &str,
        current_price: f64,
        indicators: &IndicatorSet,
        dip: &DipAnalysis,
        volume: VolumeData,
    ) -> PreScore {
        let mut score = 0u8;
        let mut reasons = Vec::new();
        let mut flags = Vec::new();

        // 1. Dip 8-15%
        if (8.0..=15.0).contains(&dip.dip_pct) {
            score += 2;
            reasons.push(format!("Dip {:.1}% (+2)", dip.dip_pct));
        }

        // 2. RSI 30-40, or <30 with volatility flag
        if let Some(rsi) = indicators.rsi {
            if (30.0..=40.0).contains(&rsi) {
                score += 2;
                reasons.push(format!("RSI {:.0} (+2)", rsi));
            } else if rsi < 30.0 {
                score += 2;
                reasons.push(format!("RSI {:.0} (+2)", rsi));
                flags.push("volatility_risk".to_string());
            }
        }

        // 3. MACD bullish
        if let Some(macd) = &indicators.macd {
            if macd.macd > macd.signal || macd.histogram > 0.0 {
                score += 2;
                reasons.push("MACD rising (+2)".to_string());
            }
        }

        // 4. At/above or testing SMA200 ("testing" = within 3% below)
        if let Some(sma200) = indicators.sma200 {
            if current_price > 0.0 {
                if current_price >= sma200 {
                    score += 2;
                    reasons.push("Holding SMA200 (+2)".to_string());
                } else if current_price >= sma200 * 0.97 {
                    score += 2;
                    reasons.push("Testing SMA200 (+2)".to_string());
                }
            }
        }

        // 5. Near/touching lower Bollinger (within +2%)
        if let Some(bollinger) = &indicators.bollinger {
            if current_price > 0.0 && current_price <= bollinger.lower * 1.02 {
                score += 2;
                reasons.push("Lower band touch (+2)".to_string());
            }
        }

        // 6. Volume spike >= 1.5x avg20
        if let Some(volume_avg) = volume.volume_avg {
            if volume_avg > 0.0 {
                let ratio = volume.current_volume / volume_avg;
                if ratio >= 1.5 {
                    score += 2;
                    reasons.push(format!("Vol {:.1}x (+2)", ratio));
                }
            }
        }

        PreScore {
            symbol: symbol.to_string(),
            pre_score: score,
            reasons,
            flags,
        }
    }

    /// Filter, then score. Filtered instruments come back with score 0 and
    /// a "filtered" flag so callers can tell denial from a weak setup.
    pub fn score(
        &self,
        symbol: &str,
        current_price: f64,
        adtv: f64,
        under_surveillance: bool,
        indicators: &IndicatorSet,
        dip: &DipAnalysis,
        volume: VolumeData,
    ) -> PreScore {
        if let Err(reason) = self.passes_filters(current_price, adtv, under_surveillance) {
            return PreScore {
                symbol: symbol.to_string(),
                pre_score: 0,
                reasons: vec![format!("Filtered: {reason}")],
                flags: vec!["filtered".to_string()],
            };
        }

        self.calculate(symbol, current_price, indicators, dip, volume)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dipwatch_core::{BollingerOutput, MacdOutput};
    use dipwatch_signals::DipClass;

    fn dip(pct: f64) -> DipAnalysis {
        DipAnalysis {
            symbol: "TEST".into(),
            current_price: 100.0,
            high_52w: 120.0,
            high_52w_date: None,
            dip_pct: pct,
            dip_class: DipClass::Moderate,
            days_from_high: None,
        }
    }

    fn perfect_setup() -> IndicatorSet {
        IndicatorSet {
            rsi: Some(35.0),
            macd: Some(MacdOutput {
                macd: 1.0,
                signal: 0.5,
                histogram: 0.5,
            }),
            sma50: Some(102.0),
            sma200: Some(98.0),
            bollinger: Some(BollingerOutput {
                upper: 120.0,
                middle: 110.0,
                lower: 100.0,
            }),
            volume_avg: Some(1_000_000.0),
        }
    }

    #[test]
    fn full_checklist_scores_twelve() {
        let engine = ScoringEngine::default();
        let score = engine.calculate(
            "FULL",
            100.0,
            &perfect_setup(),
            &dip(10.0),
            VolumeData {
                current_volume: 2_000_000.0,
                volume_avg: Some(1_000_000.0),
            },
        );

        assert_eq!(score.pre_score, 12);
        assert_eq!(score.reasons.len(), 6);
        assert!(score.flags.is_empty());
    }

    #[test]
    fn score_is_always_even_and_bounded() {
        let engine = ScoringEngine::default();
        for dip_pct in [0.0, 5.0, 9.0, 16.0] {
            let score = engine.calculate(
                "EVEN",
                100.0,
                &perfect_setup(),
                &dip(dip_pct),
                VolumeData {
                    current_volume: 500_000.0,
                    volume_avg: Some(1_000_000.0),
                },
            );
            assert!(score.pre_score <= 12);
            assert_eq!(score.pre_score % 2, 0);
        }
    }

    #[test]
    fn oversold_rsi_scores_with_volatility_flag() {
        let engine = ScoringEngine::default();
        let mut indicators = perfect_setup();
        indicators.rsi = Some(25.0);

        let score = engine.calculate(
            "OVERSOLD",
            100.0,
            &indicators,
            &dip(10.0),
            VolumeData {
                current_volume: 0.0,
                volume_avg: None,
            },
        );

        assert!(score.flags.contains(&"volatility_risk".to_string()));
        assert!(score.reasons.iter().any(|r| r.starts_with("RSI")));
    }

    #[test]
    fn testing_sma200_counts_within_three_percent() {
        let engine = ScoringEngine::default();
        let mut indicators = IndicatorSet {
            sma200: Some(100.0),
            ..Default::default()
        };

        let at_test_range = engine.calculate(
            "TESTING",
            97.0,
            &indicators,
            &dip(0.0),
            VolumeData {
                current_volume: 0.0,
                volume_avg: None,
            },
        );
        assert_eq!(at_test_range.pre_score, 2);
        assert!(at_test_range.reasons[0].starts_with("Testing"));

        indicators.sma200 = Some(100.0);
        let below = engine.calculate(
            "BELOW",
            96.0,
            &indicators,
            &dip(0.0),
            VolumeData {
                current_volume: 0.0,
                volume_avg: None,
            },
        );
        assert_eq!(below.pre_score, 0);
    }

    #[test]
    fn filter_failure_returns_zero_with_flag() {
        let engine = ScoringEngine::default();
        let score = engine.score(
            "CHEAP",
            10.0,
            5_000_000.0,
            false,
            &perfect_setup(),
            &dip(10.0),
            VolumeData {
                current_volume: 2_000_000.0,
                volume_avg: Some(1_000_000.0),
            },
        );

        assert_eq!(score.pre_score, 0);
        assert!(score.flags.contains(&"filtered".to_string()));
    }

    #[test]
    fn surveillance_listing_is_filtered() {
        let engine = ScoringEngine::default();
        assert!(engine.passes_filters(100.0, 2_000_000.0, true).is_err());
        assert!(engine.passes_filters(100.0, 2_000_000.0, false).is_ok());
    }
}
