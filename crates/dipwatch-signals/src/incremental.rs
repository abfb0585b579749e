//! Incremental indicator state for streaming updates.
//!
//! The batch functions in `indicators` recompute from full history; these
//! trackers hold the EMA state so a new bar is O(1). Seeded from history,
//! they produce the same values as the batch path for the same inputs.

use dipwatch_core::MacdOutput;

use crate::indicators::{ema_series, finite_or};

/// Wilder RSI state: smoothed average gain/loss plus the previous close.
///
/// Until `period` differences have been seen the tracker buffers them; the
/// averages are then seeded with their simple mean, so the incremental and
/// batch paths agree for identical inputs.
#[derive(Debug, Clone)]
pub struct IncrementalRsi {
    period: usize,
    prev_close: Option<f64>,
    warmup: Vec<(f64, f64)>,
    avg_gain: Option<f64>,
    avg_loss: Option<f64>,
}

impl IncrementalRsi {
    pub fn new(period: usize) -> Self {
        Self {
            period,
            prev_close: None,
            warmup: Vec::new(),
            avg_gain: None,
            avg_loss: None,
        }
    }

    /// Seed the tracker from closing history. Needs `period + 1` closes to
    /// produce values immediately; with less, the state warms up per tick.
    pub fn from_history(closes: &[f64], period: usize) -> Self {
        let mut tracker = Self::new(period);
        for &close in closes {
            tracker.update(close);
        }
        tracker
    }

    /// Push a close; returns the RSI once enough samples have been seen.
    pub fn update(&mut self, close: f64) -> Option<f64> {
        let prev = match self.prev_close.replace(close) {
            Some(prev) => prev,
            None => return None,
        };

        let delta = close - prev;
        let gain = delta.max(0.0);
        let loss = (-delta).max(0.0);
        let alpha = 1.0 / self.period as f64;

        match (self.avg_gain, self.avg_loss) {
            (Some(avg_gain), Some(avg_loss)) => {
                self.avg_gain = Some(alpha * gain + (1.0 - alpha) * avg_gain);
                self.avg_loss = Some(alpha * loss + (1.0 - alpha) * avg_loss);
            }
            _ => {
                self.warmup.push((gain, loss));
                if self.warmup.len() < self.period {
                    return None;
                }
                let n = self.warmup.len() as f64;
                self.avg_gain = Some(self.warmup.iter().map(|(g, _)| g).sum::<f64>() / n);
                self.avg_loss = Some(self.warmup.iter().map(|(_, l)| l).sum::<f64>() / n);
                self.warmup.clear();
            }
        }

        self.value()
    }

    pub fn value(&self) -> Option<f64> {
        let avg_gain = self.avg_gain?;
        let avg_loss = self.avg_loss?;

        if avg_loss == 0.0 {
            return Some(100.0);
        }

        let rs = avg_gain / avg_loss;
        Some(finite_or(100.0 - (100.0 / (1.0 + rs)), 50.0))
    }
}

/// MACD EMA state: fast/slow close EMAs plus the signal EMA of the line.
#[derive(Debug, Clone)]
pub struct IncrementalMacd {
    fast: usize,
    slow: usize,
    signal: usize,
    ema_fast: Option<f64>,
    ema_slow: Option<f64>,
    ema_signal: Option<f64>,
    samples: usize,
}

impl IncrementalMacd {
    pub fn new(fast: usize, slow: usize, signal: usize) -> Self {
        Self {
            fast,
            slow,
            signal,
            ema_fast: None,
            ema_slow: None,
            ema_signal: None,
            samples: 0,
        }
    }

    pub fn from_history(closes: &[f64], fast: usize, slow: usize, signal: usize) -> Self {
        let mut tracker = Self::new(fast, slow, signal);
        if closes.is_empty() {
            return tracker;
        }

        let ema_fast = ema_series(closes, fast);
        let ema_slow = ema_series(closes, slow);
        let line: Vec<f64> = ema_fast
            .iter()
            .zip(ema_slow.iter())
            .map(|(f, s)| f - s)
            .collect();
        let signal_line = ema_series(&line, signal);

        tracker.ema_fast = ema_fast.last().copied();
        tracker.ema_slow = ema_slow.last().copied();
        tracker.ema_signal = signal_line.last().copied();
        tracker.samples = closes.len();
        tracker
    }

    /// Push a close; returns MACD output once `slow + signal` samples exist.
    pub fn update(&mut self, close: f64) -> Option<MacdOutput> {
        let alpha_fast = 2.0 / (self.fast as f64 + 1.0);
        let alpha_slow = 2.0 / (self.slow as f64 + 1.0);
        let alpha_signal = 2.0 / (self.signal as f64 + 1.0);

        let ema_fast = match self.ema_fast {
            Some(prev) => alpha_fast * close + (1.0 - alpha_fast) * prev,
            None => close,
        };
        let ema_slow = match self.ema_slow {
            Some(prev) => alpha_slow * close + (1.0 - alpha_slow) * prev,
            None => close,
        };

        let line = ema_fast - ema_slow;
        let ema_signal = match self.ema_signal {
            Some(prev) => alpha_signal * line + (1.0 - alpha_signal) * prev,
            None => line,
        };

        self.ema_fast = Some(ema_fast);
        self.ema_slow = Some(ema_slow);
        self.ema_signal = Some(ema_signal);
        self.samples += 1;

        self.value()
    }

    pub fn value(&self) -> Option<MacdOutput> {
        if self.samples < self.slow + self.signal {
            return None;
        }

        let macd = self.ema_fast? - self.ema_slow?;
        let signal = self.ema_signal?;
        Some(MacdOutput {
            macd,
            signal,
            histogram: macd - signal,
        })
    }
}
