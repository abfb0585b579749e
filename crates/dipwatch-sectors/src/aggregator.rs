//! Sector aggregation: synthetic dip line and breadth metrics from
//! constituent stocks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-constituent inputs for aggregation. `None` always means the
/// indicator could not be computed for that member.
#[derive(Debug, Clone)]
pub struct SectorMember {
    pub symbol: String,
    pub current_price: f64,
    pub rsi: Option<f64>,
    pub sma200: Option<f64>,
    pub lower_band: Option<f64>,
    pub current_volume: f64,
    pub volume_avg: Option<f64>,
    pub dip_pct: f64,
}

/// Sector state at a point in time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SectorSnapshot {
    pub sector_id: String,
    pub sector_name: String,
    pub ts: DateTime<Utc>,
    /// Weight-averaged dip percentage.
    pub dip_pct: f64,
    /// Fraction of members with RSI < 40.
    pub rsi40_breadth: f64,
    /// Fraction of members at/above SMA200.
    pub sma200_up_breadth: f64,
    /// Fraction of members within +2% of the lower Bollinger band.
    pub lowerband_breadth: f64,
    /// Mean of current/avg20 volume ratios; 1.0 when undefined.
    pub avg_volume_ratio: f64,
    pub constituents_count: usize,
}

impl SectorSnapshot {
    pub fn empty(sector_id: &str, sector_name: &str, ts: DateTime<Utc>) -> Self {
        Self {
            sector_id: sector_id.to_string(),
            sector_name: sector_name.to_string(),
            ts,
            dip_pct: 0.0,
            rsi40_breadth: 0.0,
            sma200_up_breadth: 0.0,
            lowerband_breadth: 0.0,
            avg_volume_ratio: 1.0,
            constituents_count: 0,
        }
    }
}

/// Fraction of members with RSI < 40, over members with a known RSI.
pub fn rsi40_breadth(members: &[SectorMember]) -> f64 {
    let valid: Vec<f64> = members.iter().filter_map(|m| m.rsi).collect();
    if valid.is_empty() {
        return 0.0;
    }

    let below = valid.iter().filter(|&&rsi| rsi < 40.0).count();
    below as f64 / valid.len() as f64
}

/// Fraction of members at or above their SMA200, over valid (price, sma) pairs.
pub fn sma200_up_breadth(members: &[SectorMember]) -> f64 {
    let valid: Vec<(f64, f64)> = members
        .iter()
        .filter(|m| m.current_price > 0.0)
        .filter_map(|m| m.sma200.map(|sma| (m.current_price, sma)))
        .collect();
    if valid.is_empty() {
        return 0.0;
    }

    let above = valid.iter().filter(|(price, sma)| price >= sma).count();
    above as f64 / valid.len() as f64
}

/// Fraction of members within +2% of their lower Bollinger band.
pub fn lowerband_breadth(members: &[SectorMember]) -> f64 {
    let valid: Vec<(f64, f64)> = members
        .iter()
        .filter(|m| m.current_price > 0.0)
        .filter_map(|m| m.lower_band.map(|lower| (m.current_price, lower)))
        .collect();
    if valid.is_empty() {
        return 0.0;
    }

    let near = valid
        .iter()
        .filter(|(price, lower)| *price <= lower * 1.02)
        .count();
    near as f64 / valid.len() as f64
}

/// Mean of current/avg volume ratios; 1.0 when no member has a valid pair.
pub fn avg_volume_ratio(members: &[SectorMember]) -> f64 {
    let ratios: Vec<f64> = members
        .iter()
        .filter_map(|m| match m.volume_avg {
            Some(avg) if avg > 0.0 => Some(m.current_volume / avg),
            _ => None,
        })
        .collect();
    if ratios.is_empty() {
        return 1.0;
    }

    ratios.iter().sum::<f64>() / ratios.len() as f64
}

/// Compute a full sector snapshot from member data.
///
/// Weights default to equal; any provided weights are renormalized to sum
/// to one. Empty member lists produce a zeroed snapshot.
pub fn compute_snapshot(
    sector_id: &str,
    sector_name: &str,
    members: &[SectorMember],
    weights: Option<&[f64]>,
    ts: DateTime<Utc>,
) -> SectorSnapshot {
    let n = members.len();
    if n == 0 {
        return SectorSnapshot::empty(sector_id, sector_name, ts);
    }

    let weights: Vec<f64> = match weights {
        Some(w) if w.len() == n && w.iter().sum::<f64>() > 0.0 => {
            let sum: f64 = w.iter().sum();
            w.iter().map(|x| x / sum).collect()
        }
        _ => vec![1.0 / n as f64; n],
    };

    let weighted_dip: f64 = members
        .iter()
        .zip(&weights)
        .map(|(m, w)| m.dip_pct * w)
        .sum();

    SectorSnapshot {
        sector_id: sector_id.to_string(),
        sector_name: sector_name.to_string(),
        ts,
        dip_pct: weighted_dip,
        rsi40_breadth: rsi40_breadth(members),
        sma200_up_breadth: sma200_up_breadth(members),
        lowerband_breadth: lowerband_breadth(members),
        avg_volume_ratio: avg_volume_ratio(members),
        constituents_count: n,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(symbol: &str, price: f64, rsi: Option<f64>, dip: f64) -> SectorMember {
        SectorMember {
            symbol: symbol.to_string(),
            current_price: price,
            rsi,
            sma200: Some(price),
            lower_band: Some(price * 0.9),
            current_volume: 1_000_000.0,
            volume_avg: Some(1_000_000.0),
            dip_pct: dip,
        }
    }

    #[test]
    fn empty_members_produce_zeroed_snapshot() {
        let snapshot = compute_snapshot("it", "IT", &[], None, Utc::now());
        assert_eq!(snapshot.constituents_count, 0);
        assert_eq!(snapshot.dip_pct, 0.0);
        assert_eq!(snapshot.avg_volume_ratio, 1.0);
    }

    #[test]
    fn rsi_breadth_skips_missing_values() {
        let members = vec![
            member("A", 100.0, Some(35.0), 5.0),
            member("B", 100.0, Some(55.0), 5.0),
            member("C", 100.0, None, 5.0),
        ];
        assert_eq!(rsi40_breadth(&members), 0.5);
    }

    #[test]
    fn weighted_dip_renormalizes_weights() {
        let members = vec![member("A", 100.0, None, 10.0), member("B", 100.0, None, 2.0)];

        // Weights 3:1 should renormalize to 0.75/0.25.
        let snapshot = compute_snapshot("x", "X", &members, Some(&[3.0, 1.0]), Utc::now());
        assert!((snapshot.dip_pct - 8.0).abs() < 1e-9);

        // Mismatched weight count falls back to equal weighting.
        let snapshot = compute_snapshot("x", "X", &members, Some(&[1.0]), Utc::now());
        assert!((snapshot.dip_pct - 6.0).abs() < 1e-9);
    }

    #[test]
    fn breadth_ratios_stay_in_unit_interval() {
        let members = vec![
            member("A", 100.0, Some(30.0), 12.0),
            member("B", 90.0, Some(45.0), 6.0),
            member("C", 110.0, Some(38.0), 9.0),
        ];
        let snapshot = compute_snapshot("x", "X", &members, None, Utc::now());

        for ratio in [
            snapshot.rsi40_breadth,
            snapshot.sma200_up_breadth,
            snapshot.lowerband_breadth,
        ] {
            assert!((0.0..=1.0).contains(&ratio));
        }
    }

    #[test]
    fn lowerband_breadth_uses_two_percent_tolerance() {
        let mut at_band = member("AT", 90.0, None, 0.0);
        at_band.lower_band = Some(89.0); // 90 <= 89·1.02 = 90.78
        let mut away = member("AWAY", 100.0, None, 0.0);
        away.lower_band = Some(89.0);

        assert_eq!(lowerband_breadth(&[at_band, away]), 0.5);
    }

    #[test]
    fn volume_ratio_averages_valid_pairs() {
        let mut spike = member("SPIKE", 100.0, None, 0.0);
        spike.current_volume = 3_000_000.0;
        let mut no_avg = member("NOAVG", 100.0, None, 0.0);
        no_avg.volume_avg = None;
        let flat = member("FLAT", 100.0, None, 0.0);

        // (3.0 + 1.0) / 2 over the two valid pairs.
        assert_eq!(avg_volume_ratio(&[spike, no_avg, flat]), 2.0);
    }
}
