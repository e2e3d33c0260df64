//! Adaptive decision threshold from a sliding percentile.
//!
//! Fixed thresholds miscalibrate across symbols with different coherence
//! distributions; a sliding percentile self-calibrates while the floor and
//! ceiling stop it drifting into always-pass or never-pass territory.

use std::collections::VecDeque;

use crate::config::Config;

pub struct AdaptiveThresholdCalibrator {
    history: VecDeque<f64>,
    cap: usize,
    warmup: usize,
    percentile: f64,
    base: f64,
    floor: f64,
    ceiling: f64,
}

impl AdaptiveThresholdCalibrator {
    pub fn new(cfg: &Config) -> Self {
        Self {
            history: VecDeque::with_capacity(cfg.calibration_history_cap),
            cap: cfg.calibration_history_cap,
            warmup: cfg.calibration_warmup,
            percentile: cfg.threshold_percentile,
            base: cfg.base_threshold,
            floor: cfg.threshold_floor,
            ceiling: cfg.threshold_ceiling,
        }
    }

    /// Append one coherence sample, evicting the oldest at capacity.
    pub fn observe(&mut self, sample: f64) {
        if self.history.len() == self.cap {
            self.history.pop_front();
        }
        self.history.push_back(sample);
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    /// Base threshold until warm, then the nearest-rank percentile of the
    /// sorted history clamped to [floor, ceiling].
    pub fn current_threshold(&self) -> f64 {
        if self.history.len() < self.warmup {
            return self.base;
        }
        let mut sorted: Vec<f64> = self.history.iter().copied().collect();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let rank = ((self.percentile * sorted.len() as f64).ceil() as usize)
            .clamp(1, sorted.len());
        sorted[rank - 1].clamp(self.floor, self.ceiling)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn calibrator(cap: usize, warmup: usize, pct: f64) -> AdaptiveThresholdCalibrator {
        AdaptiveThresholdCalibrator {
            history: VecDeque::with_capacity(cap),
            cap,
            warmup,
            percentile: pct,
            base: 0.55,
            floor: 0.40,
            ceiling: 0.85,
        }
    }

    #[test]
    fn base_threshold_before_warmup() {
        let mut cal = calibrator(100, 10, 0.65);
        for _ in 0..9 {
            cal.observe(0.99);
        }
        assert_eq!(cal.current_threshold(), 0.55);
    }

    #[test]
    fn warm_threshold_within_floor_ceiling() {
        let mut cal = calibrator(100, 10, 0.65);
        // All samples above the ceiling: output must clamp down.
        for _ in 0..20 {
            cal.observe(0.95);
        }
        assert_eq!(cal.current_threshold(), 0.85);

        // All samples below the floor: output must clamp up.
        let mut cal = calibrator(100, 10, 0.65);
        for _ in 0..20 {
            cal.observe(0.05);
        }
        assert_eq!(cal.current_threshold(), 0.40);
    }

    #[test]
    fn percentile_of_known_history() {
        let mut cal = calibrator(100, 10, 0.65);
        for i in 1..=10 {
            cal.observe(i as f64 / 20.0 + 0.3); // 0.35, 0.40 .. 0.80
        }
        // Nearest rank of the 65th percentile over 10 samples is index 7.
        let t = cal.current_threshold();
        assert!((t - 0.65).abs() < 1e-9, "t={}", t);
    }

    #[test]
    fn history_is_bounded_and_fifo() {
        let mut cal = calibrator(5, 1, 0.5);
        for i in 0..50 {
            cal.observe(i as f64);
            assert!(cal.len() <= 5);
        }
        // Only the last 5 samples (45..49) remain; the median is 47,
        // clamped to the ceiling.
        assert_eq!(cal.current_threshold(), 0.85);
        assert_eq!(cal.history.front().copied(), Some(45.0));
    }

    #[test]
    fn exact_warmup_boundary() {
        let mut cal = calibrator(100, 3, 0.5);
        cal.observe(0.6);
        cal.observe(0.6);
        assert_eq!(cal.current_threshold(), 0.55, "below warmup");
        cal.observe(0.6);
        assert_eq!(cal.current_threshold(), 0.6, "at warmup");
    }
}
