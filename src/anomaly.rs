//! Composite anomaly and coherence scoring over the rolling buffers.
//!
//! Two composite pointers come out of here: `q` flags sudden volume, spread,
//! or price-acceleration change; `g` only fires when curvature, timing
//! regularity, and local contrast line up simultaneously, so it stays near
//! zero on most real cadences. Both are clamped to [0, 1]. The stability
//! report comes from the long-horizon field series via masked
//! autocorrelation. Insufficient history degrades every metric to zero
//! rather than erroring.

use crate::aggregator::{mean, stddev, MarketSnapshot, SeriesView};

/// Minimum samples before `q`, `g`, and the coherence pair are computed.
const MIN_HISTORY: usize = 5;
/// Trailing prices fed into the acceleration estimate.
const ACCEL_SAMPLES: usize = 5;

const VOLUME_SPIKE_SCALE: f64 = 3.0;
const SPREAD_SCALE: f64 = 200.0;
const ACCEL_SCALE: f64 = 500.0;
const CURVATURE_SCALE: f64 = 400.0;
const CONTRAST_SCALE: f64 = 200.0;
const TREND_SCALE: f64 = 25.0;

const Q_VOLUME_WEIGHT: f64 = 0.4;
const Q_SPREAD_WEIGHT: f64 = 0.3;
const Q_ACCEL_WEIGHT: f64 = 0.3;

/// Timing-regularity target for `g`: the ratio of the two most recent time
/// deltas must fall within `RATIO_TOLERANCE` of this.
const RATIO_TARGET: f64 = 1.618;
const RATIO_TOLERANCE: f64 = 0.25;

const EMA_FAST_PERIOD: usize = 6;
const EMA_SLOW_PERIOD: usize = 24;

/// Field-series samples required before the stability pass runs.
const STABILITY_MIN_SAMPLES: usize = 64;
const STABILITY_MAX_LAG: usize = 50;
/// Lags below this are the trivial self-match band and never considered.
pub const STABILITY_MASK_LAGS: usize = 3;
/// Fraction of the series used as the amplification baseline.
const BASELINE_FRACTION: f64 = 0.1;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StabilityReport {
    /// Max normalized autocorrelation outside the masking band, floored at 0.
    pub coherence_peak: f64,
    pub peak_lag: usize,
    /// RMS power of the mean-centered series.
    pub rms: f64,
    /// RMS relative to the early baseline slice; unbounded positive.
    pub amplification: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AnomalyReport {
    pub q: f64,
    pub g: f64,
    pub c_lin: f64,
    pub c_nonlin: f64,
    pub stability: StabilityReport,
}

fn capped(value: f64) -> f64 {
    value.clamp(0.0, 1.0)
}

fn ema(xs: &[f64], period: usize) -> f64 {
    let alpha = 2.0 / (period as f64 + 1.0);
    let mut value = 0.0;
    let mut seeded = false;
    for &x in xs {
        if !seeded {
            value = x;
            seeded = true;
        } else {
            value = alpha * x + (1.0 - alpha) * value;
        }
    }
    value
}

/// Anomaly pointer: weighted sum of capped volume-spike, spread-anomaly, and
/// price-acceleration sub-scores.
fn anomaly_pointer(snapshot: &MarketSnapshot, prices: &[f64], volumes: &[f64]) -> f64 {
    if prices.len() < MIN_HISTORY || volumes.len() < MIN_HISTORY {
        return 0.0;
    }
    let vol_mean = mean(volumes);
    let volume_score = if vol_mean > 0.0 {
        capped(snapshot.last_volume / vol_mean / VOLUME_SPIKE_SCALE)
    } else {
        0.0
    };

    let spread_score = if snapshot.last_price > 0.0 {
        capped(snapshot.spread / snapshot.last_price * SPREAD_SCALE)
    } else {
        0.0
    };

    let tail = &prices[prices.len().saturating_sub(ACCEL_SAMPLES)..];
    let accel_score = if tail.len() >= 3 && snapshot.last_price > 0.0 {
        let mut sum = 0.0;
        for w in tail.windows(3) {
            sum += (w[2] - 2.0 * w[1] + w[0]).abs();
        }
        let mean_accel = sum / (tail.len() - 2) as f64;
        capped(mean_accel / snapshot.last_price * ACCEL_SCALE)
    } else {
        0.0
    };

    capped(
        Q_VOLUME_WEIGHT * volume_score
            + Q_SPREAD_WEIGHT * spread_score
            + Q_ACCEL_WEIGHT * accel_score,
    )
}

/// Timing-regularity factor: peaks at 1 when the delta ratio hits the target,
/// linearly falls to 0 at the tolerance edge, 0 outside the band.
fn ratio_match(timestamps: &[u64]) -> f64 {
    let n = timestamps.len();
    if n < 3 {
        return 0.0;
    }
    let dt_new = timestamps[n - 1].saturating_sub(timestamps[n - 2]) as f64;
    let dt_old = timestamps[n - 2].saturating_sub(timestamps[n - 3]) as f64;
    if dt_old <= 0.0 {
        return 0.0;
    }
    let ratio = dt_new / dt_old;
    let miss = (ratio - RATIO_TARGET).abs();
    if miss > RATIO_TOLERANCE {
        0.0
    } else {
        1.0 - miss / RATIO_TOLERANCE
    }
}

/// Geometric brake score: curvature × timing regularity × local contrast.
/// Any near-zero factor collapses the product, by construction.
fn brake_score(prices: &[f64], timestamps: &[u64]) -> f64 {
    let n = prices.len();
    if n < 3 {
        return 0.0;
    }
    let level = prices[n - 1];
    if level <= 0.0 {
        return 0.0;
    }
    let curvature = (prices[n - 1] - 2.0 * prices[n - 2] + prices[n - 3]).abs() / level;
    let curvature_score = capped(curvature * CURVATURE_SCALE);

    let timing_score = ratio_match(timestamps);

    let contrast = (prices[n - 1] - prices[n - 2]).abs() / level;
    let contrast_score = capped(contrast * CONTRAST_SCALE);

    capped(curvature_score * timing_score * contrast_score)
}

/// Linear coherence: fast/slow EMA divergence normalized by the slow EMA.
fn linear_coherence(prices: &[f64]) -> f64 {
    if prices.len() < MIN_HISTORY {
        return 0.0;
    }
    let fast = ema(prices, EMA_FAST_PERIOD);
    let slow = ema(prices, EMA_SLOW_PERIOD);
    if slow <= 0.0 {
        return 0.0;
    }
    capped((fast - slow).abs() / slow * TREND_SCALE)
}

/// Nonlinear coherence: inverse of normalized volatility, high when calm.
fn nonlinear_coherence(prices: &[f64]) -> f64 {
    if prices.len() < MIN_HISTORY {
        return 0.0;
    }
    let m = mean(prices);
    if m <= 0.0 {
        return 0.0;
    }
    capped(1.0 / (1.0 + stddev(prices) / m))
}

/// Masked-autocorrelation stability over the long field series.
pub fn stability(field: &[f64]) -> StabilityReport {
    let n = field.len();
    if n < STABILITY_MIN_SAMPLES {
        return StabilityReport::default();
    }
    let m = mean(field);
    let centered: Vec<f64> = field.iter().map(|x| x - m).collect();

    let power: f64 = centered.iter().map(|x| x * x).sum();
    if power <= 0.0 {
        return StabilityReport::default();
    }

    let max_lag = STABILITY_MAX_LAG.min(n / 2);
    let mut peak = f64::NEG_INFINITY;
    let mut peak_lag = 0;
    for lag in STABILITY_MASK_LAGS..=max_lag {
        let mut acc = 0.0;
        for i in 0..n - lag {
            acc += centered[i] * centered[i + lag];
        }
        let ac = acc / power;
        if ac > peak {
            peak = ac;
            peak_lag = lag;
        }
    }

    let rms = (power / n as f64).sqrt();
    let baseline_len = ((n as f64 * BASELINE_FRACTION) as usize).max(2);
    let baseline_power: f64 = centered[..baseline_len].iter().map(|x| x * x).sum();
    let baseline_rms = (baseline_power / baseline_len as f64).sqrt();
    let amplification = if baseline_rms > 0.0 { rms / baseline_rms } else { 0.0 };

    StabilityReport {
        coherence_peak: peak.max(0.0),
        peak_lag,
        rms,
        amplification,
    }
}

/// Full analysis pass over one symbol's current state.
pub fn analyze(snapshot: &MarketSnapshot, series: &SeriesView) -> AnomalyReport {
    AnomalyReport {
        q: anomaly_pointer(snapshot, &series.prices, &series.volumes),
        g: brake_score(&series.prices, &series.timestamps),
        c_lin: linear_coherence(&series.prices),
        c_nonlin: nonlinear_coherence(&series.prices),
        stability: stability(&series.field),
    }
}
