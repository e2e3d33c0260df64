//! Decision fusion: votes + calibrated threshold + anomaly scores in, one
//! EXECUTE/SKIP verdict with a named reason out.
//!
//! Reasons are evaluated in fixed precedence; every cycle produces exactly
//! one record regardless of branch, which is the audit contract downstream
//! consumers rely on.

use serde::Serialize;

use crate::anomaly::AnomalyReport;
use crate::oscillator::{ConsensusVote, Direction};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    Execute,
    Skip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Reason {
    InsufficientVotes,
    InsufficientVotesGuarded,
    LowCoherence,
    NeutralSignal,
    ContrarianEntry,
    ContrarianEntryGuarded,
    ConsensusEntry,
}

impl Reason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Reason::InsufficientVotes => "INSUFFICIENT_VOTES",
            Reason::InsufficientVotesGuarded => "INSUFFICIENT_VOTES_GUARDED",
            Reason::LowCoherence => "LOW_COHERENCE",
            Reason::NeutralSignal => "NEUTRAL_SIGNAL",
            Reason::ContrarianEntry => "CONTRARIAN_ENTRY",
            Reason::ContrarianEntryGuarded => "CONTRARIAN_ENTRY_GUARDED",
            Reason::ConsensusEntry => "CONSENSUS_ENTRY",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct GateConfig {
    pub required_votes: usize,
    pub contrarian_enabled: bool,
    /// Anomaly pointer level at which the contrarian path engages.
    pub contrarian_trigger: f64,
    /// Amplification ratio above which the contrarian path demands one
    /// extra vote.
    pub guard_bound: f64,
}

/// Immutable audit entry for one decision cycle. Written once, never updated.
#[derive(Debug, Clone, Serialize)]
pub struct DecisionRecord {
    pub cycle: u64,
    pub ts_ms: u64,
    pub symbol: String,
    pub field: f64,
    pub votes: usize,
    pub direction: &'static str,
    pub coherence: f64,
    pub boosted_coherence: f64,
    pub threshold: f64,
    pub q: f64,
    pub g: f64,
    pub coherence_peak: f64,
    pub amplification: f64,
    pub verdict: Verdict,
    pub reason: &'static str,
}

/// Evaluate the fixed-precedence decision chain.
pub fn decide(
    cfg: &GateConfig,
    vote: &ConsensusVote,
    report: &AnomalyReport,
    boosted_coherence: f64,
    threshold: f64,
) -> (Verdict, Reason) {
    if cfg.contrarian_enabled && report.q >= cfg.contrarian_trigger {
        let guarded = report.stability.amplification > cfg.guard_bound;
        let required = cfg.required_votes + usize::from(guarded);
        return if vote.count >= required {
            let reason = if guarded {
                Reason::ContrarianEntryGuarded
            } else {
                Reason::ContrarianEntry
            };
            (Verdict::Execute, reason)
        } else {
            let reason = if guarded {
                Reason::InsufficientVotesGuarded
            } else {
                Reason::InsufficientVotes
            };
            (Verdict::Skip, reason)
        };
    }

    if vote.count < cfg.required_votes {
        return (Verdict::Skip, Reason::InsufficientVotes);
    }
    if boosted_coherence < threshold {
        return (Verdict::Skip, Reason::LowCoherence);
    }
    if vote.direction.is_neutral() {
        return (Verdict::Skip, Reason::NeutralSignal);
    }
    (Verdict::Execute, Reason::ConsensusEntry)
}

/// Directional verdict for the execute path; `Neutral` only survives through
/// the contrarian branch, which checks votes alone.
pub fn verdict_direction(vote: &ConsensusVote) -> Direction {
    vote.direction
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anomaly::StabilityReport;

    fn gate_config() -> GateConfig {
        GateConfig {
            required_votes: 6,
            contrarian_enabled: false,
            contrarian_trigger: 0.7,
            guard_bound: 12.0,
        }
    }

    fn vote(count: usize, direction: Direction) -> ConsensusVote {
        ConsensusVote {
            count,
            direction,
            weighted: 0.5,
        }
    }

    fn report(q: f64, amplification: f64) -> AnomalyReport {
        AnomalyReport {
            q,
            g: 0.0,
            c_lin: 0.5,
            c_nonlin: 0.5,
            stability: StabilityReport {
                coherence_peak: 0.5,
                peak_lag: 10,
                rms: 0.1,
                amplification,
            },
        }
    }

    #[test]
    fn five_of_nine_votes_skips_even_with_high_coherence() {
        let (verdict, reason) = decide(
            &gate_config(),
            &vote(5, Direction::Buy),
            &report(0.0, 1.0),
            0.95,
            0.55,
        );
        assert_eq!(verdict, Verdict::Skip);
        assert_eq!(reason, Reason::InsufficientVotes);
    }

    #[test]
    fn low_coherence_skips_despite_votes() {
        let (verdict, reason) = decide(
            &gate_config(),
            &vote(7, Direction::Buy),
            &report(0.0, 1.0),
            0.80,
            0.85,
        );
        assert_eq!(verdict, Verdict::Skip);
        assert_eq!(reason, Reason::LowCoherence);
    }

    #[test]
    fn executes_buy_when_all_checks_pass() {
        let (verdict, reason) = decide(
            &gate_config(),
            &vote(7, Direction::Buy),
            &report(0.0, 1.0),
            0.90,
            0.85,
        );
        assert_eq!(verdict, Verdict::Execute);
        assert_eq!(reason, Reason::ConsensusEntry);
    }

    #[test]
    fn neutral_direction_skips_after_other_checks() {
        let (verdict, reason) = decide(
            &gate_config(),
            &vote(7, Direction::Neutral),
            &report(0.0, 1.0),
            0.90,
            0.85,
        );
        assert_eq!(verdict, Verdict::Skip);
        assert_eq!(reason, Reason::NeutralSignal);
    }

    #[test]
    fn contrarian_guarded_needs_extra_vote() {
        let cfg = GateConfig {
            required_votes: 5,
            contrarian_enabled: true,
            ..gate_config()
        };
        // Amplification 15 > guard 12: requirement becomes 6, and 6 votes pass.
        let (verdict, reason) = decide(
            &cfg,
            &vote(6, Direction::Sell),
            &report(0.85, 15.0),
            0.10,
            0.85,
        );
        assert_eq!(verdict, Verdict::Execute);
        assert_eq!(reason, Reason::ContrarianEntryGuarded);

        // Same inputs with only the normal requirement met: guarded skip.
        let (verdict, reason) = decide(
            &cfg,
            &vote(5, Direction::Sell),
            &report(0.85, 15.0),
            0.10,
            0.85,
        );
        assert_eq!(verdict, Verdict::Skip);
        assert_eq!(reason, Reason::InsufficientVotesGuarded);
    }

    #[test]
    fn contrarian_unguarded_uses_normal_requirement() {
        let cfg = GateConfig {
            required_votes: 5,
            contrarian_enabled: true,
            ..gate_config()
        };
        let (verdict, reason) = decide(
            &cfg,
            &vote(5, Direction::Buy),
            &report(0.85, 2.0),
            0.10,
            0.85,
        );
        assert_eq!(verdict, Verdict::Execute);
        assert_eq!(reason, Reason::ContrarianEntry);
    }

    #[test]
    fn contrarian_path_ignored_when_disabled() {
        // Same high anomaly pointer, contrarian off: falls through to the
        // normal chain and skips on votes.
        let (verdict, reason) = decide(
            &gate_config(),
            &vote(5, Direction::Buy),
            &report(0.85, 15.0),
            0.90,
            0.55,
        );
        assert_eq!(verdict, Verdict::Skip);
        assert_eq!(reason, Reason::InsufficientVotes);
    }

    #[test]
    fn contrarian_below_trigger_uses_normal_chain() {
        let cfg = GateConfig {
            required_votes: 5,
            contrarian_enabled: true,
            ..gate_config()
        };
        let (verdict, reason) = decide(
            &cfg,
            &vote(7, Direction::Buy),
            &report(0.5, 15.0),
            0.90,
            0.55,
        );
        assert_eq!(verdict, Verdict::Execute);
        assert_eq!(reason, Reason::ConsensusEntry);
    }
}
