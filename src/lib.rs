//! Market-stream ingestion and consensus decision pipeline.
//!
//! Trades and quotes arrive over a managed WebSocket connection, roll into
//! bounded per-symbol buffers, and once per cycle an oscillator panel, an
//! anomaly analyzer, and an adaptively calibrated threshold are fused into a
//! single EXECUTE/SKIP verdict with a full audit record.

pub mod aggregator;
pub mod anomaly;
pub mod calibrator;
pub mod config;
pub mod engine;
pub mod events;
pub mod gate;
pub mod logging;
pub mod oscillator;
pub mod stream;
