//! WebSocket stream connection manager.
//!
//! Owns the socket lifecycle: connect, subscribe, liveness, reconnect with
//! exponential backoff, and replay of the subscription set after every
//! reconnect. Runs as a single task; the engine talks to it over channels.

pub mod backoff;
pub mod wire;

use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use url::Url;

use crate::config::Config;
use crate::events::{ConnectionState, StreamEvent};
use crate::logging::{self, obj, v_int, v_str, Level};
use backoff::ReconnectPolicy;
use wire::{InboundFrame, SubscriptionRequest};

/// Instructions from the engine to the connection task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamCommand {
    Subscribe(Vec<String>),
    Unsubscribe(Vec<String>),
    Disconnect,
}

/// Ordered, duplicate-free set of stream names. Order is preserved so the
/// replay after a reconnect sends the same request the caller built up.
#[derive(Debug, Default, Clone)]
pub struct SubscriptionSet {
    streams: Vec<String>,
}

impl SubscriptionSet {
    pub fn add(&mut self, name: &str) -> bool {
        if self.streams.iter().any(|s| s == name) {
            return false;
        }
        self.streams.push(name.to_string());
        true
    }

    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.streams.len();
        self.streams.retain(|s| s != name);
        self.streams.len() != before
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn replay_params(&self) -> Vec<String> {
        self.streams.clone()
    }
}

/// How long the socket may go without any inbound frame before the
/// connection is treated as dead.
fn stale_after(heartbeat_secs: u64, stale_multiplier: u64) -> Duration {
    Duration::from_secs(heartbeat_secs.saturating_mul(stale_multiplier))
}

enum SessionEnd {
    /// Caller asked to shut down; no reconnect.
    Disconnect,
    /// Connection dropped or went stale; reconnect applies.
    Lost(anyhow::Error),
}

pub struct StreamConnectionManager {
    endpoint: Url,
    heartbeat_secs: u64,
    stale_multiplier: u64,
    policy: ReconnectPolicy,
    subscriptions: SubscriptionSet,
    next_id: u64,
    state: ConnectionState,
    events: mpsc::Sender<StreamEvent>,
    commands: mpsc::Receiver<StreamCommand>,
}

impl StreamConnectionManager {
    pub fn new(
        cfg: &Config,
        events: mpsc::Sender<StreamEvent>,
        commands: mpsc::Receiver<StreamCommand>,
    ) -> Result<Self> {
        let endpoint = Url::parse(&cfg.ws_endpoint)
            .with_context(|| format!("bad ws endpoint {}", cfg.ws_endpoint))?;
        Ok(Self {
            endpoint,
            heartbeat_secs: cfg.heartbeat_secs,
            stale_multiplier: cfg.stale_multiplier,
            policy: ReconnectPolicy::new(cfg.reconnect_base_ms, cfg.reconnect_max_ms, cfg.reconnect_max_attempts),
            subscriptions: SubscriptionSet::default(),
            next_id: 0,
            state: ConnectionState::Disconnected,
            events,
            commands,
        })
    }

    fn next_request_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    async fn set_state(&mut self, next: ConnectionState) {
        if self.state == next {
            return;
        }
        logging::log(
            Level::Info,
            "stream",
            "state_change",
            obj(&[
                ("from", v_str(self.state.as_str())),
                ("to", v_str(next.as_str())),
            ]),
        );
        self.state = next;
        let _ = self.events.send(StreamEvent::State(next)).await;
    }

    /// Fold a command into the subscription set before a session exists, so
    /// the first connect already carries it.
    fn apply_offline(&mut self, cmd: StreamCommand) -> bool {
        match cmd {
            StreamCommand::Subscribe(names) => {
                for n in &names {
                    self.subscriptions.add(n);
                }
                false
            }
            StreamCommand::Unsubscribe(names) => {
                for n in &names {
                    self.subscriptions.remove(n);
                }
                false
            }
            StreamCommand::Disconnect => true,
        }
    }

    /// Drive the connection until a graceful disconnect or the reconnect
    /// budget is spent. Fatal exhaustion is reported on the event channel
    /// before returning the error.
    pub async fn run(mut self) -> Result<()> {
        loop {
            while let Ok(cmd) = self.commands.try_recv() {
                if self.apply_offline(cmd) {
                    self.set_state(ConnectionState::Disconnected).await;
                    return Ok(());
                }
            }

            self.set_state(ConnectionState::Connecting).await;
            let end = match self.session().await {
                Ok(end) => end,
                Err(e) => SessionEnd::Lost(e),
            };

            match end {
                SessionEnd::Disconnect => {
                    self.set_state(ConnectionState::Disconnected).await;
                    return Ok(());
                }
                SessionEnd::Lost(err) => {
                    logging::log(
                        Level::Warn,
                        "stream",
                        "connection_lost",
                        obj(&[("error", v_str(&err.to_string()))]),
                    );
                    match self.policy.next_delay() {
                        Some(delay) => {
                            self.set_state(ConnectionState::ReconnectWait).await;
                            logging::log(
                                Level::Info,
                                "stream",
                                "reconnect_wait",
                                obj(&[
                                    ("attempt", v_int(u64::from(self.policy.attempts()))),
                                    ("delay_ms", v_int(delay.as_millis() as u64)),
                                ]),
                            );
                            if self.wait_for_reconnect(delay).await {
                                self.set_state(ConnectionState::Disconnected).await;
                                return Ok(());
                            }
                        }
                        None => {
                            let msg = format!(
                                "reconnect budget exhausted after {} attempts: {}",
                                self.policy.attempts(),
                                err
                            );
                            let _ = self.events.send(StreamEvent::Fatal(msg.clone())).await;
                            self.set_state(ConnectionState::Disconnected).await;
                            return Err(anyhow!(msg));
                        }
                    }
                }
            }
        }
    }

    /// Sit out the backoff delay while still servicing commands, so a
    /// disconnect during the wait tears down immediately instead of after
    /// the full delay. Returns true when the wait ended in a disconnect.
    async fn wait_for_reconnect(&mut self, delay: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + delay;
        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => return false,
                cmd = self.commands.recv() => {
                    match cmd {
                        Some(cmd) => {
                            if self.apply_offline(cmd) {
                                return true;
                            }
                        }
                        None => return true,
                    }
                }
            }
        }
    }

    /// One socket session: connect, replay subscriptions, pump frames until
    /// the connection ends one way or the other.
    async fn session(&mut self) -> Result<SessionEnd> {
        let connect = tokio_tungstenite::connect_async(self.endpoint.to_string());
        tokio::pin!(connect);
        let (ws, _resp) = loop {
            tokio::select! {
                result = &mut connect => break result.context("websocket connect")?,
                cmd = self.commands.recv() => {
                    match cmd {
                        Some(cmd) => {
                            if self.apply_offline(cmd) {
                                return Ok(SessionEnd::Disconnect);
                            }
                        }
                        None => return Ok(SessionEnd::Disconnect),
                    }
                }
            }
        };
        let (mut write, mut read) = ws.split();

        self.set_state(ConnectionState::Open).await;
        self.policy.reset();

        if !self.subscriptions.is_empty() {
            let id = self.next_request_id();
            let req = SubscriptionRequest::subscribe(self.subscriptions.replay_params(), id);
            let text = serde_json::to_string(&req)?;
            write.send(Message::Text(text)).await.context("replay subscribe")?;
            logging::log(
                Level::Info,
                "stream",
                "subscriptions_replayed",
                obj(&[
                    ("count", v_int(self.subscriptions.len() as u64)),
                    ("request_id", v_int(id)),
                ]),
            );
        }

        let staleness = stale_after(self.heartbeat_secs, self.stale_multiplier);
        let mut ping = tokio::time::interval(Duration::from_secs(self.heartbeat_secs));
        ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut last_inbound = Instant::now();

        loop {
            tokio::select! {
                cmd = self.commands.recv() => {
                    match cmd {
                        Some(StreamCommand::Subscribe(names)) => {
                            let fresh: Vec<String> = names
                                .iter()
                                .filter(|n| self.subscriptions.add(n))
                                .cloned()
                                .collect();
                            if !fresh.is_empty() {
                                let id = self.next_request_id();
                                let req = SubscriptionRequest::subscribe(fresh, id);
                                write
                                    .send(Message::Text(serde_json::to_string(&req)?))
                                    .await
                                    .context("send subscribe")?;
                            }
                        }
                        Some(StreamCommand::Unsubscribe(names)) => {
                            let dropped: Vec<String> = names
                                .iter()
                                .filter(|n| self.subscriptions.remove(n))
                                .cloned()
                                .collect();
                            if !dropped.is_empty() {
                                let id = self.next_request_id();
                                let req = SubscriptionRequest::unsubscribe(dropped, id);
                                write
                                    .send(Message::Text(serde_json::to_string(&req)?))
                                    .await
                                    .context("send unsubscribe")?;
                            }
                        }
                        Some(StreamCommand::Disconnect) | None => {
                            self.set_state(ConnectionState::Closing).await;
                            let _ = write.send(Message::Close(None)).await;
                            return Ok(SessionEnd::Disconnect);
                        }
                    }
                }
                _ = ping.tick() => {
                    if last_inbound.elapsed() >= staleness {
                        return Ok(SessionEnd::Lost(anyhow!(
                            "no inbound frames for {}s",
                            last_inbound.elapsed().as_secs()
                        )));
                    }
                    write.send(Message::Ping(Vec::new())).await.context("send ping")?;
                }
                frame = read.next() => {
                    match frame {
                        Some(Ok(Message::Text(text))) => {
                            last_inbound = Instant::now();
                            self.handle_text(&text).await;
                        }
                        Some(Ok(Message::Ping(data))) => {
                            last_inbound = Instant::now();
                            write.send(Message::Pong(data)).await.context("send pong")?;
                        }
                        Some(Ok(Message::Pong(_))) => {
                            last_inbound = Instant::now();
                        }
                        Some(Ok(Message::Close(_))) => {
                            return Ok(SessionEnd::Lost(anyhow!("server closed connection")));
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            return Ok(SessionEnd::Lost(anyhow!("websocket error: {e}")));
                        }
                        None => {
                            return Ok(SessionEnd::Lost(anyhow!("websocket stream ended")));
                        }
                    }
                }
            }
        }
    }

    async fn handle_text(&mut self, text: &str) {
        match wire::decode_frame(text) {
            Some(InboundFrame::Market(event)) => {
                let _ = self.events.send(StreamEvent::Market(event)).await;
            }
            Some(InboundFrame::Ack { id, error: None }) => {
                logging::log(
                    Level::Debug,
                    "stream",
                    "request_ack",
                    obj(&[("request_id", v_int(id))]),
                );
                let _ = self.events.send(StreamEvent::SubscriptionAck { id }).await;
            }
            Some(InboundFrame::Ack { id, error: Some(message) }) => {
                logging::log(
                    Level::Warn,
                    "stream",
                    "request_rejected",
                    obj(&[
                        ("request_id", v_int(id)),
                        ("message", v_str(&message)),
                    ]),
                );
                let _ = self
                    .events
                    .send(StreamEvent::SubscriptionError { id, message })
                    .await;
            }
            None => {
                logging::log(
                    Level::Warn,
                    "stream",
                    "frame_dropped",
                    obj(&[("bytes", v_int(text.len() as u64))]),
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;

    #[test]
    fn subscription_set_is_idempotent_and_ordered() {
        let mut set = SubscriptionSet::default();
        assert!(set.add("btcusdt@trade"));
        assert!(set.add("btcusdt@bookTicker"));
        assert!(!set.add("btcusdt@trade"));
        assert_eq!(set.len(), 2);
        assert_eq!(
            set.replay_params(),
            vec!["btcusdt@trade".to_string(), "btcusdt@bookTicker".to_string()]
        );
    }

    #[test]
    fn subscription_set_remove_reports_membership() {
        let mut set = SubscriptionSet::default();
        set.add("btcusdt@trade");
        assert!(set.remove("btcusdt@trade"));
        assert!(!set.remove("btcusdt@trade"));
        assert!(set.is_empty());
    }

    #[test]
    fn request_ids_are_strictly_increasing() {
        let cfg = test_config();
        let (etx, _erx) = mpsc::channel(8);
        let (_ctx, crx) = mpsc::channel(8);
        let mut mgr = StreamConnectionManager::new(&cfg, etx, crx).unwrap();
        let a = mgr.next_request_id();
        let b = mgr.next_request_id();
        let c = mgr.next_request_id();
        assert!(a < b && b < c);
    }

    #[test]
    fn offline_commands_update_subscriptions() {
        let cfg = test_config();
        let (etx, _erx) = mpsc::channel(8);
        let (_ctx, crx) = mpsc::channel(8);
        let mut mgr = StreamConnectionManager::new(&cfg, etx, crx).unwrap();
        assert!(!mgr.apply_offline(StreamCommand::Subscribe(vec![
            "btcusdt@trade".to_string(),
            "btcusdt@trade".to_string(),
        ])));
        assert_eq!(mgr.subscriptions.len(), 1);
        assert!(!mgr.apply_offline(StreamCommand::Unsubscribe(vec![
            "btcusdt@trade".to_string()
        ])));
        assert!(mgr.subscriptions.is_empty());
        assert!(mgr.apply_offline(StreamCommand::Disconnect));
    }

    #[test]
    fn staleness_window_scales_with_multiplier() {
        assert_eq!(stale_after(20, 3), Duration::from_secs(60));
        assert_eq!(stale_after(5, 2), Duration::from_secs(10));
    }

    #[tokio::test]
    async fn disconnect_cancels_pending_reconnect_wait() {
        let mut cfg = test_config();
        // Nothing listens on port 9, so every connect attempt fails fast and
        // the manager ends up sitting in the backoff wait.
        cfg.ws_endpoint = "ws://127.0.0.1:9/stream".to_string();
        cfg.reconnect_base_ms = 5_000;
        cfg.reconnect_max_ms = 5_000;
        let (etx, mut erx) = mpsc::channel(32);
        let (ctx, crx) = mpsc::channel(8);
        let mgr = StreamConnectionManager::new(&cfg, etx, crx).unwrap();
        let handle = tokio::spawn(mgr.run());

        loop {
            let event = tokio::time::timeout(Duration::from_secs(5), erx.recv())
                .await
                .expect("manager emitted no state events")
                .expect("event channel closed before reconnect wait");
            if event == StreamEvent::State(ConnectionState::ReconnectWait) {
                break;
            }
        }

        ctx.send(StreamCommand::Disconnect).await.unwrap();
        // Teardown must beat the 5s backoff delay by a wide margin.
        let result = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("disconnect left the manager sleeping out the backoff");
        assert!(result.unwrap().is_ok());
    }

    #[test]
    fn rejects_bad_endpoint() {
        let mut cfg = test_config();
        cfg.ws_endpoint = "not a url".to_string();
        let (etx, _erx) = mpsc::channel(8);
        let (_ctx, crx) = mpsc::channel(8);
        assert!(StreamConnectionManager::new(&cfg, etx, crx).is_err());
    }
}
