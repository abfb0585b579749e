use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// OHLCV bar data
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Bar interval requested from a `BarSource`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BarInterval {
    Minute15,
    Hour1,
    Day1,
}

impl BarInterval {
    pub fn as_str(&self) -> &'static str {
        match self {
            BarInterval::Minute15 => "15m",
            BarInterval::Hour1 => "1h",
            BarInterval::Day1 => "1d",
        }
    }

    pub fn minutes(&self) -> i64 {
        match self {
            BarInterval::Minute15 => 15,
            BarInterval::Hour1 => 60,
            BarInterval::Day1 => 1440,
        }
    }
}

/// MACD output: line, signal line, histogram.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MacdOutput {
    pub macd: f64,
    pub signal: f64,
    pub histogram: f64,
}

/// Bollinger band output (middle = SMA, upper/lower = middle ± k·σ).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BollingerOutput {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
}

/// The standard indicator set computed per instrument each cycle.
/// `None` always means "insufficient history", never an error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndicatorSet {
    pub rsi: Option<f64>,
    pub macd: Option<MacdOutput>,
    pub sma50: Option<f64>,
    pub sma200: Option<f64>,
    pub bollinger: Option<BollingerOutput>,
    pub volume_avg: Option<f64>,
}

/// Per-tick market snapshot handed to the alert rule state machine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MarketContext {
    pub price: f64,
    pub dip_pct: f64,
    pub rsi: Option<f64>,
    pub macd_hist: Option<f64>,
    pub volume: f64,
    pub avg_volume: Option<f64>,
    pub pre_score: Option<u8>,
}

/// A sector in the monitored universe: members and optional weight hints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SectorSpec {
    pub id: String,
    pub name: String,
    pub members: Vec<String>,
    #[serde(default)]
    pub weights: Option<Vec<f64>>,
}
