use chrono::{DateTime, Utc};
use dipwatch_core::DipwatchError;
use serde::{Deserialize, Serialize};

/// Rule condition kinds. A closed set; the evaluator matches exhaustively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertCondition {
    /// Dip >= threshold %
    DipGt,
    /// RSI < threshold
    RsiLt,
    /// MACD histogram > 0 and > threshold
    MacdBullish,
    /// Volume >= threshold × average volume
    VolumeSpike,
    /// Pre-score > threshold
    PreScoreGt,
}

impl AlertCondition {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertCondition::DipGt => "dip_gt",
            AlertCondition::RsiLt => "rsi_lt",
            AlertCondition::MacdBullish => "macd_bullish",
            AlertCondition::VolumeSpike => "volume_spike",
            AlertCondition::PreScoreGt => "pre_score_gt",
        }
    }

    pub fn parse(value: &str) -> Result<Self, DipwatchError> {
        match value {
            "dip_gt" => Ok(AlertCondition::DipGt),
            "rsi_lt" => Ok(AlertCondition::RsiLt),
            "macd_bullish" => Ok(AlertCondition::MacdBullish),
            "volume_spike" => Ok(AlertCondition::VolumeSpike),
            "pre_score_gt" => Ok(AlertCondition::PreScoreGt),
            other => Err(DipwatchError::Configuration(format!(
                "unknown alert condition: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertPriority {
    High,
    Medium,
    Low,
}

impl AlertPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertPriority::High => "high",
            AlertPriority::Medium => "medium",
            AlertPriority::Low => "low",
        }
    }

    pub fn parse(value: &str) -> Result<Self, DipwatchError> {
        match value {
            "high" => Ok(AlertPriority::High),
            "medium" => Ok(AlertPriority::Medium),
            "low" => Ok(AlertPriority::Low),
            other => Err(DipwatchError::Configuration(format!(
                "unknown priority: {other}"
            ))),
        }
    }
}

/// Per-rule state machine states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertStateKind {
    Idle,
    /// Condition met, waiting out the debounce window.
    Armed,
    /// Alert fired.
    Triggered,
    /// In cooldown after the trigger cleared.
    Cooldown,
}

impl AlertStateKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertStateKind::Idle => "idle",
            AlertStateKind::Armed => "armed",
            AlertStateKind::Triggered => "triggered",
            AlertStateKind::Cooldown => "cooldown",
        }
    }
}

/// Why a would-be trigger was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuppressionReason {
    Budget,
    QuietHours,
    Cooldown,
    AwaitingConfirmation,
    LowPriority,
    BurstRollup,
    CorporateAction,
    Halt,
}

impl SuppressionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SuppressionReason::Budget => "budget",
            SuppressionReason::QuietHours => "quiet_hours",
            SuppressionReason::Cooldown => "cooldown",
            SuppressionReason::AwaitingConfirmation => "awaiting_confirmation",
            SuppressionReason::LowPriority => "low_priority",
            SuppressionReason::BurstRollup => "burst_rollup",
            SuppressionReason::CorporateAction => "corporate_action",
            SuppressionReason::Halt => "halt",
        }
    }

    pub fn parse(value: &str) -> Result<Self, DipwatchError> {
        match value {
            "budget" => Ok(SuppressionReason::Budget),
            "quiet_hours" => Ok(SuppressionReason::QuietHours),
            "cooldown" => Ok(SuppressionReason::Cooldown),
            "awaiting_confirmation" => Ok(SuppressionReason::AwaitingConfirmation),
            "low_priority" => Ok(SuppressionReason::LowPriority),
            "burst_rollup" => Ok(SuppressionReason::BurstRollup),
            "corporate_action" => Ok(SuppressionReason::CorporateAction),
            "halt" => Ok(SuppressionReason::Halt),
            other => Err(DipwatchError::Configuration(format!(
                "unknown suppression reason: {other}"
            ))),
        }
    }
}

/// A user alert rule, pinned to one symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRule {
    pub id: String,
    pub user_id: String,
    pub symbol: String,
    pub condition: AlertCondition,
    pub threshold: f64,

    // Sensitivity & tuning
    /// Condition must hold continuously for this long before firing.
    pub debounce_seconds: i64,
    /// Value must retreat past threshold by this margin to clear a trigger.
    pub hysteresis_reset: f64,

    // Noise control
    pub enabled: bool,
    pub cooldown_seconds: i64,
    pub priority: AlertPriority,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AlertRule {
    pub fn new(
        id: impl Into<String>,
        symbol: impl Into<String>,
        condition: AlertCondition,
        threshold: f64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            user_id: "default_user".to_string(),
            symbol: symbol.into(),
            condition,
            threshold,
            debounce_seconds: 0,
            hysteresis_reset: 0.0,
            enabled: true,
            cooldown_seconds: 3600,
            priority: AlertPriority::Medium,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Per (rule, symbol) state machine record.
///
/// Invariants: `cooldown_until` is set iff `state == Cooldown`;
/// `first_signal_at` is set iff `state == Armed`; `last_triggered_at` is
/// monotonically non-decreasing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertState {
    pub rule_id: String,
    pub symbol: String,
    pub state: AlertStateKind,

    pub last_transition_at: DateTime<Utc>,
    pub last_triggered_at: Option<DateTime<Utc>>,
    pub cooldown_until: Option<DateTime<Utc>>,

    /// Most recent evaluated value, persisted every tick.
    pub last_value: Option<f64>,

    /// When the condition first held, while armed.
    pub first_signal_at: Option<DateTime<Utc>>,
}

impl AlertState {
    pub fn new(rule_id: impl Into<String>, symbol: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            rule_id: rule_id.into(),
            symbol: symbol.into(),
            state: AlertStateKind::Idle,
            last_transition_at: now,
            last_triggered_at: None,
            cooldown_until: None,
            last_value: None,
            first_signal_at: None,
        }
    }
}

/// Emitted when a rule fires successfully. Immutable after emission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertEvent {
    pub id: String,
    pub rule_id: String,
    pub symbol: String,
    pub fired_at: DateTime<Utc>,
    pub priority: AlertPriority,

    // Context
    pub value: f64,
    pub threshold: f64,
    pub message: String,
    pub chips: Vec<String>,
    pub payload: serde_json::Value,

    // Delivery status
    pub push_sent: bool,
    pub digest_batch_id: Option<String>,
}

/// Append-only record of a denied trigger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuppressionEntry {
    pub id: String,
    pub rule_id: String,
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub reason: SuppressionReason,
    pub meta: serde_json::Value,
}
