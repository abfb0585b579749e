//! Deterministic mock bar source for development and tests.
//!
//! Generates a seeded random walk per symbol so repeated fetches return
//! identical history and the engine runs end-to-end without a market-data
//! vendor.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use dipwatch_core::{Bar, BarInterval, BarSource, DipwatchError};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const MAX_BARS: u32 = 1000;

pub struct MockBarSource;

impl MockBarSource {
    pub fn new() -> Self {
        Self
    }

    fn seed_for(symbol: &str) -> u64 {
        let mut hasher = DefaultHasher::new();
        symbol.hash(&mut hasher);
        hasher.finish()
    }

    fn base_price(symbol: &str) -> f64 {
        match symbol {
            "RELIANCE.NS" => 2500.0,
            "TCS.NS" => 3500.0,
            "INFY.NS" => 1500.0,
            "HDFCBANK.NS" => 1600.0,
            "ICICIBANK.NS" => 950.0,
            _ => 100.0 + (Self::seed_for(symbol) % 900) as f64,
        }
    }

    /// Approximately standard-normal sample (Irwin-Hall of 12 uniforms).
    fn gauss(rng: &mut StdRng) -> f64 {
        (0..12).map(|_| rng.gen::<f64>()).sum::<f64>() - 6.0
    }

    fn generate(symbol: &str, num_bars: u32, interval_minutes: i64) -> Vec<Bar> {
        let mut rng = StdRng::seed_from_u64(Self::seed_for(symbol));

        let daily_volatility = 0.02 + rng.gen::<f64>() * 0.01; // 2-3%
        let trend = (rng.gen::<f64>() - 0.5) * 0.001;

        let mut price = Self::base_price(symbol);
        // Anchor the series to the current day so lookups by recency work.
        let mut ts = Utc::now()
            - Duration::minutes(interval_minutes * num_bars as i64);

        let mut bars = Vec::with_capacity(num_bars as usize);
        for _ in 0..num_bars {
            let price_change = trend + daily_volatility * Self::gauss(&mut rng);
            price *= 1.0 + price_change;

            let range = price * (0.01 + rng.gen::<f64>() * 0.02); // 1-3% intraday
            let mut high = price + rng.gen::<f64>() * range * 0.7;
            let mut low = price - rng.gen::<f64>() * range * 0.7;
            let open = low + rng.gen::<f64>() * (high - low);
            let close = price;

            high = high.max(open).max(close);
            low = low.min(open).min(close);

            let base_volume = 1_000_000.0 + rng.gen::<f64>() * 500_000.0;
            let volume = (base_volume * (1.0 + price_change.abs() * 10.0)).round();

            bars.push(Bar {
                timestamp: ts,
                open: (open * 100.0).round() / 100.0,
                high: (high * 100.0).round() / 100.0,
                low: (low * 100.0).round() / 100.0,
                close: (close * 100.0).round() / 100.0,
                volume,
            });

            ts += Duration::minutes(interval_minutes);
        }

        bars
    }
}

impl Default for MockBarSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BarSource for MockBarSource {
    async fn fetch(
        &self,
        symbol: &str,
        interval: BarInterval,
        lookback_days: u32,
    ) -> Result<Vec<Bar>, DipwatchError> {
        let interval_minutes = interval.minutes();
        let num_bars =
            (lookback_days as i64 * 1440 / interval_minutes).min(MAX_BARS as i64) as u32;

        Ok(Self::generate(symbol, num_bars, interval_minutes))
    }
}
