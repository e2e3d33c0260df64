//! Decision engine: one task, one cycle timer, one audit trail.
//!
//! Market events mutate the aggregator as they arrive; every cycle tick takes
//! an immutable view of the current state, runs the full signal chain, and
//! emits exactly one decision record. Ticks missed while a cycle is running
//! are skipped, never queued.

use std::collections::VecDeque;

use anyhow::{anyhow, Result};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

use crate::aggregator::SnapshotAggregator;
use crate::anomaly::{self, AnomalyReport};
use crate::calibrator::AdaptiveThresholdCalibrator;
use crate::config::Config;
use crate::events::StreamEvent;
use crate::gate::{self, DecisionRecord, GateConfig};
use crate::logging::{self, json_log, obj, ts_epoch_ms, v_int, v_str, Level};
use crate::oscillator;

/// Blend the two coherence measures and let a strong periodic echo in the
/// field history nudge the blend upward, capped at 1.
fn boosted_coherence(c_lin: f64, c_nonlin: f64, coherence_peak: f64) -> f64 {
    let blend = (c_lin + c_nonlin) / 2.0;
    (blend * (1.0 + 0.1 * coherence_peak)).clamp(0.0, 1.0)
}

pub struct DecisionEngine {
    cfg: Config,
    gate_cfg: GateConfig,
    aggregator: SnapshotAggregator,
    calibrator: AdaptiveThresholdCalibrator,
    cycle: u64,
    audit: VecDeque<DecisionRecord>,
}

impl DecisionEngine {
    pub fn new(cfg: &Config) -> Self {
        Self {
            cfg: cfg.clone(),
            gate_cfg: GateConfig {
                required_votes: cfg.required_votes,
                contrarian_enabled: cfg.contrarian_enabled,
                contrarian_trigger: cfg.contrarian_trigger,
                guard_bound: cfg.contrarian_guard_bound,
            },
            aggregator: SnapshotAggregator::new(cfg),
            calibrator: AdaptiveThresholdCalibrator::new(cfg),
            cycle: 0,
            audit: VecDeque::with_capacity(cfg.audit_ring_cap),
        }
    }

    /// Feed one stream event. Returns an error only for a fatal stream
    /// failure, which ends the run.
    pub fn on_stream_event(&mut self, event: &StreamEvent) -> Result<()> {
        match event {
            StreamEvent::Market(m) => self.aggregator.on_event(m),
            StreamEvent::State(state) => {
                json_log("engine", "stream_state", obj(&[("state", v_str(state.as_str()))]));
            }
            StreamEvent::SubscriptionAck { id } => {
                logging::log(
                    Level::Debug,
                    "engine",
                    "subscription_ack",
                    obj(&[("request_id", v_int(*id))]),
                );
            }
            StreamEvent::SubscriptionError { id, message } => {
                logging::log(
                    Level::Warn,
                    "engine",
                    "subscription_error",
                    obj(&[("request_id", v_int(*id)), ("message", v_str(message))]),
                );
            }
            StreamEvent::Fatal(msg) => {
                return Err(anyhow!("stream failed: {msg}"));
            }
        }
        Ok(())
    }

    /// Run one decision cycle over the current aggregated state. Always
    /// produces exactly one record, including during warm-up.
    pub fn run_cycle(&mut self) -> DecisionRecord {
        self.cycle += 1;

        let snapshot = self.aggregator.snapshot(&self.cfg.symbol);
        let series = self.aggregator.series(&self.cfg.symbol);

        let field = snapshot
            .as_ref()
            .and_then(|s| s.momentum)
            .unwrap_or(0.0);
        let vote = oscillator::vote(field, self.cfg.vote_threshold);
        let report = match &snapshot {
            Some(snap) => anomaly::analyze(snap, &series),
            None => AnomalyReport::default(),
        };

        let coherence = (report.c_lin + report.c_nonlin) / 2.0;
        let boosted = boosted_coherence(
            report.c_lin,
            report.c_nonlin,
            report.stability.coherence_peak,
        );
        self.calibrator.observe(boosted);
        let threshold = self.calibrator.current_threshold();

        let (verdict, reason) = gate::decide(&self.gate_cfg, &vote, &report, boosted, threshold);

        let record = DecisionRecord {
            cycle: self.cycle,
            ts_ms: ts_epoch_ms(),
            symbol: self.cfg.symbol.clone(),
            field,
            votes: vote.count,
            direction: gate::verdict_direction(&vote).as_str(),
            coherence,
            boosted_coherence: boosted,
            threshold,
            q: report.q,
            g: report.g,
            coherence_peak: report.stability.coherence_peak,
            amplification: report.stability.amplification,
            verdict,
            reason: reason.as_str(),
        };

        if let Ok(Value::Object(fields)) = serde_json::to_value(&record) {
            json_log("engine", "decision", fields);
        }

        if self.audit.len() == self.cfg.audit_ring_cap {
            self.audit.pop_front();
        }
        self.audit.push_back(record.clone());
        record
    }

    pub fn audit_trail(&self) -> impl Iterator<Item = &DecisionRecord> {
        self.audit.iter()
    }

    pub fn cycles_run(&self) -> u64 {
        self.cycle
    }

    /// Drive the engine until the stream channel closes or fails fatally.
    pub async fn run(&mut self, mut events: mpsc::Receiver<StreamEvent>) -> Result<()> {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(self.cfg.cycle_secs));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick fires immediately; burn it so the first cycle sees
        // a full interval of data.
        ticker.tick().await;

        loop {
            tokio::select! {
                event = events.recv() => {
                    match event {
                        Some(ev) => self.on_stream_event(&ev)?,
                        None => {
                            json_log("engine", "stream_channel_closed", obj(&[]));
                            return Ok(());
                        }
                    }
                }
                _ = ticker.tick() => {
                    self.run_cycle();
                }
            }
        }
    }
}
