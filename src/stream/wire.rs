//! Wire protocol for the combined market stream.
//!
//! Subscribe/unsubscribe requests carry a batch of stream names and a
//! monotonically increasing id; acks are matched by that id. Channel data
//! arrives wrapped in a `{stream, data}` envelope. Anything that does not
//! decode is dropped by the caller, never escalated.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::events::MarketEvent;

pub const METHOD_SUBSCRIBE: &str = "SUBSCRIBE";
pub const METHOD_UNSUBSCRIBE: &str = "UNSUBSCRIBE";

#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionRequest {
    pub method: &'static str,
    pub params: Vec<String>,
    pub id: u64,
}

impl SubscriptionRequest {
    pub fn subscribe(params: Vec<String>, id: u64) -> Self {
        Self {
            method: METHOD_SUBSCRIBE,
            params,
            id,
        }
    }

    pub fn unsubscribe(params: Vec<String>, id: u64) -> Self {
        Self {
            method: METHOD_UNSUBSCRIBE,
            params,
            id,
        }
    }
}

#[derive(Debug, Deserialize)]
struct AckFrame {
    #[serde(default)]
    error: Option<Value>,
    id: u64,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    stream: String,
    data: Value,
}

#[derive(Debug, Deserialize)]
struct TradePayload {
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "p")]
    price: String,
    #[serde(rename = "q")]
    qty: String,
    #[serde(rename = "T")]
    trade_time: u64,
}

#[derive(Debug, Deserialize)]
struct BookTickerPayload {
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "b")]
    bid: String,
    #[serde(rename = "B")]
    bid_qty: String,
    #[serde(rename = "a")]
    ask: String,
    #[serde(rename = "A")]
    ask_qty: String,
}

/// A decoded inbound text frame.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    Ack { id: u64, error: Option<String> },
    Market(MarketEvent),
}

/// Canonical stream name for a symbol and channel kind.
pub fn stream_name(symbol: &str, channel: &str) -> String {
    format!("{}@{}", symbol.to_lowercase(), channel)
}

/// Decode one text frame. `None` means the payload did not match any known
/// shape and should be dropped.
pub fn decode_frame(text: &str) -> Option<InboundFrame> {
    let raw: Value = serde_json::from_str(text).ok()?;

    if raw.get("id").is_some() && (raw.get("result").is_some() || raw.get("error").is_some()) {
        let ack: AckFrame = serde_json::from_value(raw).ok()?;
        let error = ack.error.map(|e| {
            e.get("msg")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| e.to_string())
        });
        return Some(InboundFrame::Ack { id: ack.id, error });
    }

    let envelope: Envelope = serde_json::from_value(raw).ok()?;
    let channel = envelope.stream.rsplit('@').next()?;
    match channel {
        "trade" => {
            let t: TradePayload = serde_json::from_value(envelope.data).ok()?;
            Some(InboundFrame::Market(MarketEvent::Trade {
                symbol: t.symbol,
                price: t.price.parse().ok()?,
                qty: t.qty.parse().ok()?,
                ts_ms: t.trade_time,
            }))
        }
        "bookTicker" => {
            let b: BookTickerPayload = serde_json::from_value(envelope.data).ok()?;
            Some(InboundFrame::Market(MarketEvent::Quote {
                symbol: b.symbol,
                bid: b.bid.parse().ok()?,
                bid_qty: b.bid_qty.parse().ok()?,
                ask: b.ask.parse().ok()?,
                ask_qty: b.ask_qty.parse().ok()?,
            }))
        }
        _ => None,
    }
}
