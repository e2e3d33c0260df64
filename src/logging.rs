//! Structured JSONL logging.
//!
//! One JSON object per line on stdout, tagged with a run id and a monotonic
//! sequence number so downstream tooling can order and correlate entries.
//! Decision records flow through here too; persisting them is the telemetry
//! sink's problem, not ours.

use chrono::Utc;
use serde_json::{json, Map, Value};
use std::process;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Debug = 0,
    Info = 1,
    Warn = 2,
    Error = 3,
}

impl Level {
    pub fn from_env() -> Self {
        match std::env::var("LOG_LEVEL").as_deref() {
            Ok("debug") => Level::Debug,
            Ok("warn") => Level::Warn,
            Ok("error") => Level::Error,
            _ => Level::Info,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
        }
    }
}

static LOG_SEQ: AtomicU64 = AtomicU64::new(0);
static RUN_ID: OnceLock<String> = OnceLock::new();

fn run_id() -> &'static str {
    RUN_ID.get_or_init(|| {
        std::env::var("RUN_ID")
            .unwrap_or_else(|_| format!("r-{}-{}", ts_epoch_ms(), process::id()))
    })
}

/// RFC3339 timestamp with milliseconds
pub fn ts_now() -> String {
    Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Epoch milliseconds (for replay correlation)
pub fn ts_epoch_ms() -> u64 {
    Utc::now().timestamp_millis() as u64
}

/// Emit a structured entry if `level` clears the env-configured minimum.
pub fn log(level: Level, component: &str, event: &str, fields: Map<String, Value>) {
    if level < Level::from_env() {
        return;
    }
    let mut entry = Map::new();
    entry.insert("ts".to_string(), json!(ts_now()));
    entry.insert("run_id".to_string(), json!(run_id()));
    entry.insert(
        "seq".to_string(),
        json!(LOG_SEQ.fetch_add(1, Ordering::SeqCst)),
    );
    entry.insert("lvl".to_string(), json!(level.as_str()));
    entry.insert("component".to_string(), json!(component));
    entry.insert("event".to_string(), json!(event));
    entry.insert("data".to_string(), Value::Object(fields));
    println!("{}", Value::Object(entry));
}

/// Info-level shorthand used for routine events.
pub fn json_log(component: &str, event: &str, fields: Map<String, Value>) {
    log(Level::Info, component, event, fields);
}

// Small builders so call sites stay one-liners.

pub fn obj(pairs: &[(&str, Value)]) -> Map<String, Value> {
    let mut map = Map::new();
    for (k, v) in pairs {
        map.insert((*k).to_string(), v.clone());
    }
    map
}

pub fn v_str(s: &str) -> Value {
    Value::String(s.to_string())
}

pub fn v_num(n: f64) -> Value {
    json!(n)
}

pub fn v_int(n: u64) -> Value {
    json!(n)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_ordering() {
        assert!(Level::Debug < Level::Info);
        assert!(Level::Info < Level::Warn);
        assert!(Level::Warn < Level::Error);
    }

    #[test]
    fn obj_builds_map() {
        let m = obj(&[("a", v_num(1.0)), ("b", v_str("x"))]);
        assert_eq!(m.len(), 2);
        assert_eq!(m["b"], Value::String("x".to_string()));
    }

    #[test]
    fn seq_is_monotonic() {
        let a = LOG_SEQ.fetch_add(1, Ordering::SeqCst);
        let b = LOG_SEQ.fetch_add(1, Ordering::SeqCst);
        assert!(b > a);
    }
}
