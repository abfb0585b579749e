use dipwatch_core::{BollingerOutput, IndicatorSet, MacdOutput};

/// Return val if it is finite, otherwise return default.
#[inline]
pub fn finite_or(val: f64, default: f64) -> f64 {
    if val.is_finite() {
        val
    } else {
        default
    }
}

/// Simple Moving Average over the last `period` samples.
pub fn sma(data: &[f64], period: usize) -> Option<f64> {
    if period == 0 || data.len() < period {
        return None;
    }

    let sum: f64 = data[data.len() - period..].iter().sum();
    Some(finite_or(sum / period as f64, 0.0))
}

/// Recursive EMA over the whole series, seeded at the first sample.
/// Output length equals input length; MACD relies on this alignment.
pub fn ema_series(data: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || data.is_empty() {
        return vec![];
    }

    let alpha = 2.0 / (period as f64 + 1.0);
    let mut result = Vec::with_capacity(data.len());
    let mut prev = data[0];
    result.push(prev);

    for &value in &data[1..] {
        prev = finite_or(alpha * value + (1.0 - alpha) * prev, prev);
        result.push(prev);
    }

    result
}

/// Relative Strength Index with Wilder smoothing.
///
/// Seed: simple mean of the first `period` gains/losses; thereafter
/// `avg = (avg·(period−1) + x) / period`. Needs `period + 1` samples.
/// Returns 100 when the average loss is zero.
pub fn rsi(closes: &[f64], period: usize) -> Option<f64> {
    if period == 0 || closes.len() < period + 1 {
        return None;
    }

    let mut gains = Vec::with_capacity(closes.len() - 1);
    let mut losses = Vec::with_capacity(closes.len() - 1);

    for window in closes.windows(2) {
        let change = window[1] - window[0];
        if change > 0.0 {
            gains.push(change);
            losses.push(0.0);
        } else {
            gains.push(0.0);
            losses.push(change.abs());
        }
    }

    let mut avg_gain = gains[..period].iter().sum::<f64>() / period as f64;
    let mut avg_loss = losses[..period].iter().sum::<f64>() / period as f64;

    for i in period..gains.len() {
        avg_gain = (avg_gain * (period - 1) as f64 + gains[i]) / period as f64;
        avg_loss = (avg_loss * (period - 1) as f64 + losses[i]) / period as f64;
    }

    if avg_loss == 0.0 {
        return Some(100.0);
    }

    let rs = avg_gain / avg_loss;
    Some(finite_or(100.0 - (100.0 / (1.0 + rs)), 50.0))
}

/// MACD line, signal line, and histogram at the latest sample.
/// Needs `slow + signal` samples.
pub fn macd(closes: &[f64], fast: usize, slow: usize, signal: usize) -> Option<MacdOutput> {
    if fast == 0 || slow == 0 || signal == 0 || slow < fast {
        return None;
    }
    if closes.len() < slow + signal {
        return None;
    }

    let ema_fast = ema_series(closes, fast);
    let ema_slow = ema_series(closes, slow);

    let macd_line: Vec<f64> = ema_fast
        .iter()
        .zip(ema_slow.iter())
        .map(|(f, s)| f - s)
        .collect();

    let signal_line = ema_series(&macd_line, signal);

    let macd_last = *macd_line.last()?;
    let signal_last = *signal_line.last()?;

    Some(MacdOutput {
        macd: macd_last,
        signal: signal_last,
        histogram: macd_last - signal_last,
    })
}

/// Bollinger bands: middle = SMA(period), bands at ± `std_dev` population σ.
pub fn bollinger(closes: &[f64], period: usize, std_dev: f64) -> Option<BollingerOutput> {
    if period == 0 || closes.len() < period {
        return None;
    }

    let window = &closes[closes.len() - period..];
    let middle = window.iter().sum::<f64>() / period as f64;
    let variance = window.iter().map(|x| (x - middle).powi(2)).sum::<f64>() / period as f64;
    let sigma = variance.sqrt();

    Some(BollingerOutput {
        upper: finite_or(middle + std_dev * sigma, middle),
        middle: finite_or(middle, 0.0),
        lower: finite_or(middle - std_dev * sigma, middle),
    })
}

/// Arithmetic mean of the last `period` volumes.
pub fn volume_avg(volumes: &[f64], period: usize) -> Option<f64> {
    if period == 0 || volumes.len() < period {
        return None;
    }

    let sum: f64 = volumes[volumes.len() - period..].iter().sum();
    Some(finite_or(sum / period as f64, 0.0))
}

/// Average Daily Traded Value: mean of close × volume over the last
/// `period` sessions.
pub fn adtv(closes: &[f64], volumes: &[f64], period: usize) -> Option<f64> {
    let n = closes.len().min(volumes.len());
    if period == 0 || n < period {
        return None;
    }

    let sum: f64 = closes[n - period..n]
        .iter()
        .zip(&volumes[n - period..n])
        .map(|(c, v)| c * v)
        .sum();
    Some(finite_or(sum / period as f64, 0.0))
}

/// Compute the standard per-instrument indicator set in one pass.
pub fn all_indicators(closes: &[f64], volumes: &[f64]) -> IndicatorSet {
    IndicatorSet {
        rsi: rsi(closes, 14),
        macd: macd(closes, 12, 26, 9),
        sma50: sma(closes, 50),
        sma200: sma(closes, 200),
        bollinger: bollinger(closes, 20, 2.0),
        volume_avg: volume_avg(volumes, 20),
    }
}
