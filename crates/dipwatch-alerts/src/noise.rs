//! Noise control: daily alert budgets and the quiet-hours gate.
//!
//! Budgets are counted against the UTC calendar day under
//! `budget:user:{u}:{YYYYMMDD}` and `budget:symbol:{u}:{sym}:{YYYYMMDD}`
//! with a 24h TTL. Quiet hours are evaluated in the configured exchange
//! timezone, never the process's local time.

use std::sync::Arc;

use chrono::{DateTime, NaiveTime, Utc};
use chrono_tz::Tz;
use dipwatch_core::KvStore;
use serde_json::json;

use crate::models::SuppressionReason;

pub const DEFAULT_DAILY_USER_CAP: i64 = 5;
pub const DEFAULT_DAILY_SYMBOL_CAP: i64 = 2;
const BUDGET_TTL_SECONDS: u64 = 86_400;

/// A time-of-day window, right-open, possibly crossing midnight.
#[derive(Debug, Clone, Copy)]
pub struct QuietHours {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl QuietHours {
    pub fn contains(&self, time: NaiveTime) -> bool {
        if self.start < self.end {
            self.start <= time && time < self.end
        } else {
            // Crosses midnight
            time >= self.start || time < self.end
        }
    }
}

/// The verdict of a budget check, with the denial context for the
/// suppression log.
#[derive(Debug, Clone)]
pub struct BudgetDenial {
    pub reason: SuppressionReason,
    pub meta: serde_json::Value,
}

pub struct NoiseControl {
    kv: Arc<dyn KvStore>,
    daily_user_cap: i64,
    daily_symbol_cap: i64,
    quiet_hours: QuietHours,
    timezone: Tz,
}

impl NoiseControl {
    pub fn new(
        kv: Arc<dyn KvStore>,
        daily_user_cap: i64,
        daily_symbol_cap: i64,
        quiet_hours: QuietHours,
        timezone: Tz,
    ) -> Self {
        Self {
            kv,
            daily_user_cap,
            daily_symbol_cap,
            quiet_hours,
            timezone,
        }
    }

    fn user_key(user_id: &str, now: DateTime<Utc>) -> String {
        format!("budget:user:{}:{}", user_id, now.format("%Y%m%d"))
    }

    fn symbol_key(user_id: &str, symbol: &str, now: DateTime<Utc>) -> String {
        format!(
            "budget:symbol:{}:{}:{}",
            user_id,
            symbol,
            now.format("%Y%m%d")
        )
    }

    /// Whether the exchange-local time of `now` falls inside quiet hours.
    pub fn is_quiet_hours(&self, now: DateTime<Utc>) -> bool {
        let local = now.with_timezone(&self.timezone).time();
        self.quiet_hours.contains(local)
    }

    async fn counter(&self, key: &str) -> i64 {
        match self.kv.get(key).await {
            Ok(Some(raw)) => raw.parse().unwrap_or(0),
            Ok(None) => 0,
            Err(e) => {
                // Store down: budget enforcement is best-effort.
                tracing::debug!("budget counter read failed ({key}): {e}");
                0
            }
        }
    }

    /// Check both daily caps; `Some` when either would be exceeded.
    pub async fn check_budget(
        &self,
        user_id: &str,
        symbol: &str,
        now: DateTime<Utc>,
    ) -> Option<BudgetDenial> {
        let user_count = self.counter(&Self::user_key(user_id, now)).await;
        if user_count >= self.daily_user_cap {
            return Some(BudgetDenial {
                reason: SuppressionReason::Budget,
                meta: json!({
                    "scope": "user",
                    "count": user_count,
                    "cap": self.daily_user_cap,
                }),
            });
        }

        let symbol_count = self.counter(&Self::symbol_key(user_id, symbol, now)).await;
        if symbol_count >= self.daily_symbol_cap {
            return Some(BudgetDenial {
                reason: SuppressionReason::Budget,
                meta: json!({
                    "scope": "symbol",
                    "count": symbol_count,
                    "cap": self.daily_symbol_cap,
                }),
            });
        }

        None
    }

    /// Increment both counters and refresh their TTLs atomically.
    pub async fn consume_budget(&self, user_id: &str, symbol: &str, now: DateTime<Utc>) {
        let user_key = Self::user_key(user_id, now);
        let symbol_key = Self::symbol_key(user_id, symbol, now);

        if let Err(e) = self
            .kv
            .incr_pair_with_ttl(&user_key, &symbol_key, BUDGET_TTL_SECONDS)
            .await
        {
            tracing::warn!("failed to consume alert budget for {user_id}/{symbol}: {e}");
        }
    }
}
