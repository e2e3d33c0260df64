//! Consensus voting over a fixed panel of oscillators.
//!
//! Each oscillator resonates against the current field value; the vote is the
//! number of panel members whose resonance clears the threshold. Pure
//! function of its inputs, which is what makes it independently testable.

use std::f64::consts::TAU;

/// One member of the panel. Frequencies are distinct and positive; weights
/// feed the informational weighted resonance, not the vote count.
#[derive(Debug, Clone, Copy)]
pub struct Oscillator {
    pub name: &'static str,
    pub frequency: f64,
    pub weight: f64,
}

/// The fixed panel. An explicit array of a concrete type, so the panel size
/// is a compile-time fact rather than a runtime key count.
pub const PANEL: [Oscillator; 9] = [
    Oscillator { name: "h1", frequency: 1.0, weight: 1.0 },
    Oscillator { name: "h2", frequency: 2.0, weight: 0.9 },
    Oscillator { name: "h3", frequency: 3.0, weight: 0.8 },
    Oscillator { name: "h4", frequency: 4.0, weight: 0.7 },
    Oscillator { name: "h5", frequency: 5.0, weight: 0.6 },
    Oscillator { name: "h6", frequency: 6.0, weight: 0.5 },
    Oscillator { name: "h7", frequency: 7.0, weight: 0.4 },
    Oscillator { name: "h8", frequency: 8.0, weight: 0.3 },
    Oscillator { name: "h9", frequency: 9.0, weight: 0.2 },
];

/// Ternary directional bias derived from the field sign.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Buy,
    Sell,
    Neutral,
}

impl Direction {
    pub fn from_sign(field: f64) -> Self {
        if field > 0.0 {
            Direction::Buy
        } else if field < 0.0 {
            Direction::Sell
        } else {
            Direction::Neutral
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Buy => "BUY",
            Direction::Sell => "SELL",
            Direction::Neutral => "NEUTRAL",
        }
    }

    pub fn is_neutral(&self) -> bool {
        matches!(self, Direction::Neutral)
    }
}

/// Derived each cycle, never stored.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConsensusVote {
    /// Number of resonant oscillators, in `[0, PANEL.len()]`.
    pub count: usize,
    pub direction: Direction,
    /// Weight-normalized mean resonance across the panel, in [0, 1].
    pub weighted: f64,
}

pub fn resonance(osc: &Oscillator, field: f64) -> f64 {
    (TAU * osc.frequency * field).sin().abs()
}

/// Evaluate the panel against `field`. Deterministic: identical inputs always
/// yield the identical vote.
pub fn vote(field: f64, threshold: f64) -> ConsensusVote {
    let mut count = 0;
    let mut weighted_sum = 0.0;
    let mut weight_total = 0.0;
    for osc in &PANEL {
        let r = resonance(osc, field);
        if r > threshold {
            count += 1;
        }
        weighted_sum += osc.weight * r;
        weight_total += osc.weight;
    }
    ConsensusVote {
        count,
        direction: Direction::from_sign(field),
        weighted: if weight_total > 0.0 { weighted_sum / weight_total } else { 0.0 },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frequencies_are_distinct_and_positive() {
        for (i, a) in PANEL.iter().enumerate() {
            assert!(a.frequency > 0.0);
            for b in &PANEL[i + 1..] {
                assert_ne!(a.frequency, b.frequency);
            }
        }
    }

    #[test]
    fn vote_is_deterministic() {
        for field in [-0.37, -0.001, 0.0, 0.042, 1.7] {
            let a = vote(field, 0.5);
            let b = vote(field, 0.5);
            assert_eq!(a, b, "field={}", field);
        }
    }

    #[test]
    fn count_bounded_by_panel_size() {
        for field in [-2.0, -0.5, 0.013, 0.25, 3.14] {
            let v = vote(field, 0.5);
            assert!(v.count <= PANEL.len());
        }
    }

    #[test]
    fn zero_field_is_neutral_with_no_votes() {
        let v = vote(0.0, 0.5);
        // sin(0) = 0 for every frequency, so nothing resonates.
        assert_eq!(v.count, 0);
        assert_eq!(v.direction, Direction::Neutral);
        assert_eq!(v.weighted, 0.0);
    }

    #[test]
    fn direction_follows_field_sign() {
        assert_eq!(vote(0.3, 0.5).direction, Direction::Buy);
        assert_eq!(vote(-0.3, 0.5).direction, Direction::Sell);
    }

    #[test]
    fn lower_threshold_never_reduces_count() {
        for field in [0.07, 0.19, 0.55] {
            let strict = vote(field, 0.8);
            let loose = vote(field, 0.2);
            assert!(loose.count >= strict.count);
        }
    }

    #[test]
    fn weighted_resonance_in_unit_range() {
        for field in [-1.0, -0.3, 0.11, 0.77] {
            let v = vote(field, 0.5);
            assert!((0.0..=1.0).contains(&v.weighted), "weighted={}", v.weighted);
        }
    }
}
