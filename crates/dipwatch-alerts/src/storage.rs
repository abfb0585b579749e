//! Persistence adapters: durable rule rows and the append-only suppression
//! log live in SQLite; the fast-changing alert state lives in the KV store
//! as JSON under `alert:state:{rule_id}`.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dipwatch_core::{DipwatchError, KvStore};
use sqlx::SqlitePool;

use crate::models::{
    AlertCondition, AlertPriority, AlertRule, AlertState, SuppressionEntry, SuppressionReason,
};

fn db_err(e: sqlx::Error) -> DipwatchError {
    DipwatchError::StoreUnavailable(e.to_string())
}

/// Durable CRUD for alert rules.
#[async_trait]
pub trait RuleStore: Send + Sync {
    async fn create(&self, rule: &AlertRule) -> Result<(), DipwatchError>;
    async fn list(
        &self,
        user_id: Option<&str>,
        symbol: Option<&str>,
    ) -> Result<Vec<AlertRule>, DipwatchError>;
    async fn delete(&self, rule_id: &str) -> Result<(), DipwatchError>;
}

/// Fast per-rule state persistence.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn get_state(
        &self,
        rule_id: &str,
        symbol: &str,
    ) -> Result<Option<AlertState>, DipwatchError>;
    async fn save_state(&self, state: &AlertState) -> Result<(), DipwatchError>;
    async fn delete_state(&self, rule_id: &str) -> Result<(), DipwatchError>;
}

/// Append-only suppression log.
#[async_trait]
pub trait SuppressionStore: Send + Sync {
    async fn append(&self, entry: &SuppressionEntry) -> Result<(), DipwatchError>;
    async fn query(
        &self,
        rule_id: &str,
        limit: usize,
    ) -> Result<Vec<SuppressionEntry>, DipwatchError>;
}

/// Delete a rule and its cached state together. Rule deletion cascades to
/// state so a recreated rule id starts from IDLE.
pub async fn delete_rule_cascade(
    rules: &dyn RuleStore,
    states: &dyn StateStore,
    rule_id: &str,
) -> Result<(), DipwatchError> {
    rules.delete(rule_id).await?;
    states.delete_state(rule_id).await
}

// --- State (KV) ---

fn state_key(rule_id: &str) -> String {
    format!("alert:state:{rule_id}")
}

/// Alert state in the KV store, JSON-encoded.
pub struct KvStateStore {
    kv: Arc<dyn KvStore>,
}

impl KvStateStore {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }
}

#[async_trait]
impl StateStore for KvStateStore {
    async fn get_state(
        &self,
        rule_id: &str,
        _symbol: &str,
    ) -> Result<Option<AlertState>, DipwatchError> {
        let raw = self.kv.get(&state_key(rule_id)).await?;
        match raw {
            Some(json) => serde_json::from_str(&json)
                .map(Some)
                .map_err(|e| DipwatchError::InvalidData(format!("alert state decode: {e}"))),
            None => Ok(None),
        }
    }

    async fn save_state(&self, state: &AlertState) -> Result<(), DipwatchError> {
        let json = serde_json::to_string(state)
            .map_err(|e| DipwatchError::InvalidData(format!("alert state encode: {e}")))?;
        self.kv.set(&state_key(&state.rule_id), &json).await
    }

    async fn delete_state(&self, rule_id: &str) -> Result<(), DipwatchError> {
        self.kv.delete(&state_key(rule_id)).await
    }
}

// --- Rules (SQLite) ---

pub struct SqliteRuleStore {
    pool: SqlitePool,
}

impl SqliteRuleStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn init(&self) -> Result<(), DipwatchError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS alert_rules (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                symbol TEXT NOT NULL,
                condition TEXT NOT NULL,
                threshold REAL NOT NULL,
                debounce_seconds INTEGER NOT NULL,
                hysteresis_reset REAL NOT NULL,
                enabled INTEGER NOT NULL,
                cooldown_seconds INTEGER NOT NULL,
                priority TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(())
    }
}

type RuleRow = (
    String,
    String,
    String,
    String,
    f64,
    i64,
    f64,
    i64,
    i64,
    String,
    String,
    String,
);

fn parse_rule_row(row: RuleRow) -> Result<AlertRule, DipwatchError> {
    let (
        id,
        user_id,
        symbol,
        condition,
        threshold,
        debounce_seconds,
        hysteresis_reset,
        enabled,
        cooldown_seconds,
        priority,
        created_at,
        updated_at,
    ) = row;

    let parse_ts = |s: &str| {
        DateTime::parse_from_rfc3339(s)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| DipwatchError::Configuration(format!("bad timestamp {s}: {e}")))
    };

    Ok(AlertRule {
        id,
        user_id,
        symbol,
        condition: AlertCondition::parse(&condition)?,
        threshold,
        debounce_seconds,
        hysteresis_reset,
        enabled: enabled != 0,
        cooldown_seconds,
        priority: AlertPriority::parse(&priority)?,
        created_at: parse_ts(&created_at)?,
        updated_at: parse_ts(&updated_at)?,
    })
}

#[async_trait]
impl RuleStore for SqliteRuleStore {
    async fn create(&self, rule: &AlertRule) -> Result<(), DipwatchError> {
        sqlx::query(
            "INSERT INTO alert_rules
             (id, user_id, symbol, condition, threshold, debounce_seconds,
              hysteresis_reset, enabled, cooldown_seconds, priority, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&rule.id)
        .bind(&rule.user_id)
        .bind(&rule.symbol)
        .bind(rule.condition.as_str())
        .bind(rule.threshold)
        .bind(rule.debounce_seconds)
        .bind(rule.hysteresis_reset)
        .bind(rule.enabled as i64)
        .bind(rule.cooldown_seconds)
        .bind(rule.priority.as_str())
        .bind(rule.created_at.to_rfc3339())
        .bind(rule.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(())
    }

    async fn list(
        &self,
        user_id: Option<&str>,
        symbol: Option<&str>,
    ) -> Result<Vec<AlertRule>, DipwatchError> {
        let mut query = String::from(
            "SELECT id, user_id, symbol, condition, threshold, debounce_seconds,
                    hysteresis_reset, enabled, cooldown_seconds, priority, created_at, updated_at
             FROM alert_rules WHERE 1=1",
        );
        if user_id.is_some() {
            query.push_str(" AND user_id = ?");
        }
        if symbol.is_some() {
            query.push_str(" AND symbol = ?");
        }

        let mut q = sqlx::query_as::<_, RuleRow>(&query);
        if let Some(user_id) = user_id {
            q = q.bind(user_id.to_string());
        }
        if let Some(symbol) = symbol {
            q = q.bind(symbol.to_string());
        }

        let rows = q.fetch_all(&self.pool).await.map_err(db_err)?;

        // A malformed row is ignored this cycle and logged, never fatal.
        let mut rules = Vec::with_capacity(rows.len());
        for row in rows {
            match parse_rule_row(row) {
                Ok(rule) => rules.push(rule),
                Err(e) => tracing::warn!("skipping malformed alert rule: {e}"),
            }
        }

        Ok(rules)
    }

    async fn delete(&self, rule_id: &str) -> Result<(), DipwatchError> {
        sqlx::query("DELETE FROM alert_rules WHERE id = ?")
            .bind(rule_id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }
}

// --- Suppression log (SQLite) ---

pub struct SqliteSuppressionStore {
    pool: SqlitePool,
}

impl SqliteSuppressionStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn init(&self) -> Result<(), DipwatchError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS suppression_logs (
                id TEXT PRIMARY KEY,
                rule_id TEXT NOT NULL,
                symbol TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                reason TEXT NOT NULL,
                meta TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(())
    }
}

#[async_trait]
impl SuppressionStore for SqliteSuppressionStore {
    async fn append(&self, entry: &SuppressionEntry) -> Result<(), DipwatchError> {
        sqlx::query(
            "INSERT INTO suppression_logs (id, rule_id, symbol, timestamp, reason, meta)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&entry.id)
        .bind(&entry.rule_id)
        .bind(&entry.symbol)
        .bind(entry.timestamp.to_rfc3339())
        .bind(entry.reason.as_str())
        .bind(entry.meta.to_string())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(())
    }

    async fn query(
        &self,
        rule_id: &str,
        limit: usize,
    ) -> Result<Vec<SuppressionEntry>, DipwatchError> {
        let rows: Vec<(String, String, String, String, String, String)> = sqlx::query_as(
            "SELECT id, rule_id, symbol, timestamp, reason, meta
             FROM suppression_logs WHERE rule_id = ?
             ORDER BY timestamp DESC LIMIT ?",
        )
        .bind(rule_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let mut entries = Vec::with_capacity(rows.len());
        for (id, rule_id, symbol, timestamp, reason, meta) in rows {
            let timestamp = DateTime::parse_from_rfc3339(&timestamp)
                .map_err(|e| DipwatchError::InvalidData(format!("bad timestamp: {e}")))?
                .with_timezone(&Utc);
            entries.push(SuppressionEntry {
                id,
                rule_id,
                symbol,
                timestamp,
                reason: SuppressionReason::parse(&reason)?,
                meta: serde_json::from_str(&meta).unwrap_or(serde_json::Value::Null),
            });
        }

        Ok(entries)
    }
}

// --- In-memory implementations (tests and degraded mode) ---

#[derive(Default)]
pub struct MemoryRuleStore {
    rules: DashMap<String, AlertRule>,
}

impl MemoryRuleStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RuleStore for MemoryRuleStore {
    async fn create(&self, rule: &AlertRule) -> Result<(), DipwatchError> {
        self.rules.insert(rule.id.clone(), rule.clone());
        Ok(())
    }

    async fn list(
        &self,
        user_id: Option<&str>,
        symbol: Option<&str>,
    ) -> Result<Vec<AlertRule>, DipwatchError> {
        let mut rules: Vec<AlertRule> = self
            .rules
            .iter()
            .map(|r| r.value().clone())
            .filter(|r| user_id.is_none_or(|u| r.user_id == u))
            .filter(|r| symbol.is_none_or(|s| r.symbol == s))
            .collect();
        rules.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(rules)
    }

    async fn delete(&self, rule_id: &str) -> Result<(), DipwatchError> {
        self.rules.remove(rule_id);
        Ok(())
    }
}

#[derive(Default)]
pub struct MemorySuppressionStore {
    entries: std::sync::Mutex<Vec<SuppressionEntry>>,
}

impl MemorySuppressionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SuppressionStore for MemorySuppressionStore {
    async fn append(&self, entry: &SuppressionEntry) -> Result<(), DipwatchError> {
        self.entries.lock().unwrap().push(entry.clone());
        Ok(())
    }

    async fn query(
        &self,
        rule_id: &str,
        limit: usize,
    ) -> Result<Vec<SuppressionEntry>, DipwatchError> {
        let entries = self.entries.lock().unwrap();
        let mut matching: Vec<SuppressionEntry> = entries
            .iter()
            .filter(|e| e.rule_id == rule_id)
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        matching.truncate(limit);
        Ok(matching)
    }
}
