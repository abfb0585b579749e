//! Candidate ranking: composite sort over pre-scored instruments.

use serde::{Deserialize, Serialize};

use crate::prescore::PreScore;

pub const DEFAULT_CANDIDATE_LIMIT: usize = 12;

/// A ranked candidate with score and ranking details.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedCandidate {
    pub symbol: String,
    /// 1-based rank within the bundle.
    pub rank: usize,
    pub pre_score: u8,
    pub reasons: Vec<String>,
    pub flags: Vec<String>,

    // Ranking metrics kept for transparency
    pub distance_to_sma200_pct: f64,
    pub distance_to_lower_band_pct: f64,
    pub adtv: f64,
}

/// Raw material for ranking one instrument.
#[derive(Debug, Clone)]
pub struct CandidateInput {
    pub pre_score: PreScore,
    pub current_price: f64,
    pub sma200: Option<f64>,
    pub lower_band: Option<f64>,
    pub adtv: f64,
}

/// Composite sort key. Higher is better.
///
/// Primary: pre-score × 100. Secondary: SMA200 proximity (only when holding,
/// capped at 10 points). Tertiary: lower-band proximity (capped at 5).
/// Quaternary: ADTV as an infinitesimal liquidity tie-break.
pub fn ranking_score(
    pre_score: u8,
    current_price: f64,
    sma200: Option<f64>,
    lower_band: Option<f64>,
    adtv: f64,
) -> f64 {
    let mut total = pre_score as f64 * 100.0;

    if let Some(sma200) = sma200 {
        if current_price > 0.0 && sma200 > 0.0 && current_price >= sma200 {
            let dist_pct = (current_price - sma200).abs() / sma200;
            total += (0.10 - dist_pct).max(0.0) * 100.0;
        }
    }

    if let Some(lower) = lower_band {
        if current_price > 0.0 && lower > 0.0 {
            let dist_pct = (current_price - lower).abs() / lower;
            total += (0.10 - dist_pct).max(0.0) * 50.0;
        }
    }

    total += adtv / 1_000_000_000_000.0;

    total
}

/// Rank candidates: drop zero scores, sort by the composite key descending,
/// keep the top `limit`, and re-index ranks starting at 1.
pub fn rank_candidates(candidates: Vec<CandidateInput>, limit: usize) -> Vec<RankedCandidate> {
    let mut scored: Vec<(f64, CandidateInput)> = candidates
        .into_iter()
        .filter(|c| c.pre_score.pre_score > 0)
        .map(|c| {
            let score = ranking_score(
                c.pre_score.pre_score,
                c.current_price,
                c.sma200,
                c.lower_band,
                c.adtv,
            );
            (score, c)
        })
        .collect();

    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(limit);

    scored
        .into_iter()
        .enumerate()
        .map(|(i, (_, c))| {
            let dist_sma = match c.sma200 {
                Some(sma) if c.current_price > 0.0 && sma > 0.0 => {
                    (c.current_price - sma) / sma * 100.0
                }
                _ => 0.0,
            };
            let dist_lower = match c.lower_band {
                Some(lower) if c.current_price > 0.0 && lower > 0.0 => {
                    (c.current_price - lower) / lower * 100.0
                }
                _ => 0.0,
            };

            RankedCandidate {
                symbol: c.pre_score.symbol.clone(),
                rank: i + 1,
                pre_score: c.pre_score.pre_score,
                reasons: c.pre_score.reasons,
                flags: c.pre_score.flags,
                distance_to_sma200_pct: dist_sma,
                distance_to_lower_band_pct: dist_lower,
                adtv: c.adtv,
            }
        })
        .collect()
}
