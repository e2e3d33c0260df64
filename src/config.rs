use anyhow::{bail, Result};
use url::Url;

use crate::oscillator::PANEL;

#[derive(Debug, Clone)]
pub struct Config {
    pub symbol: String,
    pub ws_endpoint: String,
    /// Decision cycle interval in seconds.
    pub cycle_secs: u64,

    // Rolling buffers
    pub price_buffer_cap: usize,
    pub field_series_cap: usize,
    /// Window for volatility/momentum over the most recent prices.
    pub stats_window: usize,
    /// Samples required before volatility/momentum are considered meaningful.
    pub min_samples: usize,

    // Consensus voting
    pub vote_threshold: f64,
    pub required_votes: usize,

    // Adaptive threshold calibration
    pub base_threshold: f64,
    pub threshold_floor: f64,
    pub threshold_ceiling: f64,
    pub threshold_percentile: f64,
    pub calibration_warmup: usize,
    pub calibration_history_cap: usize,

    // Contrarian path
    pub contrarian_enabled: bool,
    pub contrarian_trigger: f64,
    pub contrarian_guard_bound: f64,

    // Stream lifecycle
    pub heartbeat_secs: u64,
    /// Multiples of the heartbeat interval without traffic before the
    /// connection is declared dead.
    pub stale_multiplier: u64,
    pub reconnect_base_ms: u64,
    pub reconnect_max_ms: u64,
    pub reconnect_max_attempts: u32,

    /// Bounded audit ring of recent decision records.
    pub audit_ring_cap: usize,
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            symbol: std::env::var("SYMBOL").unwrap_or_else(|_| "BTCUSDT".to_string()),
            ws_endpoint: std::env::var("WS_ENDPOINT")
                .unwrap_or_else(|_| "wss://stream.binance.com:9443/stream".to_string()),
            cycle_secs: env_parse("CYCLE_SECS", 60),
            price_buffer_cap: env_parse("PRICE_BUFFER_CAP", 100),
            field_series_cap: env_parse("FIELD_SERIES_CAP", 500),
            stats_window: env_parse("STATS_WINDOW", 20),
            min_samples: env_parse("MIN_SAMPLES", 5),
            vote_threshold: env_parse("VOTE_THRESHOLD", 0.5),
            required_votes: env_parse("REQUIRED_VOTES", 6),
            base_threshold: env_parse("BASE_THRESHOLD", 0.55),
            threshold_floor: env_parse("THRESHOLD_FLOOR", 0.40),
            threshold_ceiling: env_parse("THRESHOLD_CEILING", 0.85),
            threshold_percentile: env_parse("THRESHOLD_PERCENTILE", 0.65),
            calibration_warmup: env_parse("CALIBRATION_WARMUP", 30),
            calibration_history_cap: env_parse("CALIBRATION_HISTORY_CAP", 200),
            contrarian_enabled: std::env::var("CONTRARIAN")
                .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(false),
            contrarian_trigger: env_parse("CONTRARIAN_TRIGGER", 0.7),
            contrarian_guard_bound: env_parse("CONTRARIAN_GUARD_BOUND", 12.0),
            heartbeat_secs: env_parse("HEARTBEAT_SECS", 20),
            stale_multiplier: env_parse("STALE_MULTIPLIER", 3),
            reconnect_base_ms: env_parse("RECONNECT_BASE_MS", 1000),
            reconnect_max_ms: env_parse("RECONNECT_MAX_MS", 60_000),
            reconnect_max_attempts: env_parse("RECONNECT_MAX_ATTEMPTS", 10),
            audit_ring_cap: env_parse("AUDIT_RING_CAP", 512),
        }
    }

    /// Reject inconsistent settings at startup instead of mid-run.
    pub fn validate(&self) -> Result<()> {
        if self.symbol.is_empty() {
            bail!("SYMBOL must not be empty");
        }
        if Url::parse(&self.ws_endpoint).is_err() {
            bail!("WS_ENDPOINT is not a valid URL: {}", self.ws_endpoint);
        }
        if self.cycle_secs == 0 {
            bail!("CYCLE_SECS must be positive");
        }
        if self.required_votes > PANEL.len() {
            bail!(
                "REQUIRED_VOTES ({}) exceeds panel size ({})",
                self.required_votes,
                PANEL.len()
            );
        }
        if !(self.vote_threshold > 0.0 && self.vote_threshold < 1.0) {
            bail!("VOTE_THRESHOLD must be in (0, 1)");
        }
        if self.threshold_floor > self.threshold_ceiling {
            bail!("THRESHOLD_FLOOR must not exceed THRESHOLD_CEILING");
        }
        if !(0.0..=1.0).contains(&self.threshold_percentile) {
            bail!("THRESHOLD_PERCENTILE must be in [0, 1]");
        }
        if self.price_buffer_cap == 0 || self.field_series_cap == 0 {
            bail!("buffer capacities must be positive");
        }
        if self.stats_window == 0 || self.min_samples == 0 {
            bail!("STATS_WINDOW and MIN_SAMPLES must be positive");
        }
        if self.min_samples > self.stats_window {
            bail!("MIN_SAMPLES must not exceed STATS_WINDOW");
        }
        if self.heartbeat_secs == 0 || self.stale_multiplier == 0 {
            bail!("heartbeat settings must be positive");
        }
        if self.reconnect_base_ms == 0 || self.reconnect_max_attempts == 0 {
            bail!("reconnect settings must be positive");
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) fn test_config() -> Config {
    Config {
        symbol: "BTCUSDT".to_string(),
        ws_endpoint: "wss://stream.binance.com:9443/stream".to_string(),
        cycle_secs: 60,
        price_buffer_cap: 100,
        field_series_cap: 500,
        stats_window: 20,
        min_samples: 5,
        vote_threshold: 0.5,
        required_votes: 6,
        base_threshold: 0.55,
        threshold_floor: 0.40,
        threshold_ceiling: 0.85,
        threshold_percentile: 0.65,
        calibration_warmup: 30,
        calibration_history_cap: 200,
        contrarian_enabled: false,
        contrarian_trigger: 0.7,
        contrarian_guard_bound: 12.0,
        heartbeat_secs: 20,
        stale_multiplier: 3,
        reconnect_base_ms: 1000,
        reconnect_max_ms: 60_000,
        reconnect_max_attempts: 10,
        audit_ring_cap: 512,
    }
}
