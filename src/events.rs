//! Typed events flowing from the stream connection to the engine.
//!
//! Everything downstream of the socket is a plain enum on an mpsc channel, so
//! ordering and backpressure are explicit rather than buried in listener
//! registration order.

/// Decoded market data, one event per inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum MarketEvent {
    Trade {
        symbol: String,
        price: f64,
        qty: f64,
        ts_ms: u64,
    },
    Quote {
        symbol: String,
        bid: f64,
        bid_qty: f64,
        ask: f64,
        ask_qty: f64,
    },
}

impl MarketEvent {
    pub fn symbol(&self) -> &str {
        match self {
            MarketEvent::Trade { symbol, .. } => symbol,
            MarketEvent::Quote { symbol, .. } => symbol,
        }
    }
}

/// Connection lifecycle, surfaced as explicit transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Open,
    ReconnectWait,
    Closing,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::ReconnectWait => "reconnect_wait",
            ConnectionState::Closing => "closing",
        }
    }
}

/// Everything the stream task can tell its owner.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Market(MarketEvent),
    State(ConnectionState),
    /// Peer acknowledged a subscribe/unsubscribe request.
    SubscriptionAck { id: u64 },
    /// Peer rejected a request; recoverable, the connection stays up.
    SubscriptionError { id: u64, message: String },
    /// Reconnect budget exhausted; the stream is gone for good.
    Fatal(String),
}
