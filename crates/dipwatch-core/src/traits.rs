use async_trait::async_trait;

use crate::{Bar, BarInterval, DipwatchError};

/// Source of OHLCV history.
///
/// Contract: bars sorted by timestamp ascending, no duplicates, UTC
/// timestamps, `volume >= 0`. An empty result means "skip this symbol this
/// cycle" and is not an error.
#[async_trait]
pub trait BarSource: Send + Sync {
    async fn fetch(
        &self,
        symbol: &str,
        interval: BarInterval,
        lookback_days: u32,
    ) -> Result<Vec<Bar>, DipwatchError>;
}

/// Fast key-value store used for alert state, budget counters, and the bar
/// cache. String values; structured entities are stored as JSON.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, DipwatchError>;

    async fn set(&self, key: &str, value: &str) -> Result<(), DipwatchError>;

    /// SET with a TTL in seconds.
    async fn set_ex(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<(), DipwatchError>;

    async fn delete(&self, key: &str) -> Result<(), DipwatchError>;

    async fn incr(&self, key: &str) -> Result<i64, DipwatchError>;

    async fn expire(&self, key: &str, ttl_seconds: u64) -> Result<(), DipwatchError>;

    /// Increment two counters and refresh both TTLs in one atomic pipeline.
    /// A crash mid-fire must not leave a counter without a TTL.
    async fn incr_pair_with_ttl(
        &self,
        first_key: &str,
        second_key: &str,
        ttl_seconds: u64,
    ) -> Result<(i64, i64), DipwatchError>;
}
