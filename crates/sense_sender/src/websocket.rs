//! WebSocket transport: a dedicated task owns the priority queue and the
//! connection; the orchestrator only ever enqueues. Connect/auth/backoff
//! loop and circuit breaker are modeled on the wearable gateway client's
//! reconnect pattern, simplified to this protocol's fire-and-forget event
//! sends (no RPC method dispatch, no challenge frame beyond an optional
//! bearer token at connect time).

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::{mpsc, Mutex};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::connect_async;
use tracing::{debug, info, warn};

use sense_gate::{Priority, QueuedEvent, SenseEvent};

use crate::circuit::CircuitBreaker;
use crate::queue::PriorityQueue;
use crate::Sender;

const ACK_TIMEOUT: Duration = Duration::from_secs(2);
const MAX_RECONNECT_DELAY_S: f64 = 60.0;
const MAX_ATTEMPTS: u32 = 3;

/// Handle shared with the caller: enqueues events for the background
/// sender task to drain. Cheap to clone.
#[derive(Clone)]
pub struct WebSocketSender {
    tx: mpsc::UnboundedSender<QueuedEvent>,
    pub events_dropped: Arc<AtomicU64>,
    max_queue_size: usize,
    queue_len: Arc<AtomicU64>,
}

impl WebSocketSender {
    /// Spawns the background connect/drain task and returns a handle.
    /// `token` is sent as a bearer header on connect when non-empty.
    pub fn spawn(url: String, token: String, reconnect_delay_s: f64, max_queue_size: usize) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let events_dropped = Arc::new(AtomicU64::new(0));
        let queue_len = Arc::new(AtomicU64::new(0));

        let worker = SenderWorker {
            url,
            token,
            reconnect_delay_s,
            queue: Mutex::new(PriorityQueue::new(max_queue_size)),
            circuit: Mutex::new(CircuitBreaker::new()),
            suppress_until_ms: AtomicI64::new(0),
            events_dropped: events_dropped.clone(),
            queue_len: queue_len.clone(),
        };
        tokio::spawn(worker.run(rx));

        Self { tx, events_dropped, max_queue_size, queue_len }
    }

    pub fn queue_len(&self) -> usize {
        self.queue_len.load(Ordering::Relaxed) as usize
    }
}

#[async_trait]
impl Sender for WebSocketSender {
    async fn send(&self, event: SenseEvent, priority: Priority) -> bool {
        if self.queue_len.load(Ordering::Relaxed) as usize >= self.max_queue_size {
            self.events_dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        let queued = QueuedEvent { priority, ts_ms: event.ts_ms, payload: event, attempts: 0 };
        self.tx.send(queued).is_ok()
    }
}

struct SenderWorker {
    url: String,
    token: String,
    reconnect_delay_s: f64,
    queue: Mutex<PriorityQueue>,
    circuit: Mutex<CircuitBreaker>,
    /// Backpressure deadline from the relay's last ack; sends are held
    /// back (re-enqueued) until this timestamp passes.
    suppress_until_ms: AtomicI64,
    events_dropped: Arc<AtomicU64>,
    queue_len: Arc<AtomicU64>,
}

impl SenderWorker {
    async fn run(self, mut rx: mpsc::UnboundedReceiver<QueuedEvent>) {
        let this = Arc::new(self);
        let mut delay_s = this.reconnect_delay_s.max(0.1);

        loop {
            // Drain any newly enqueued events into the priority queue first.
            while let Ok(event) = rx.try_recv() {
                let mut queue = this.queue.lock().await;
                if queue.push(event) {
                    this.queue_len.fetch_add(1, Ordering::Relaxed);
                } else {
                    this.events_dropped.fetch_add(1, Ordering::Relaxed);
                }
            }

            let now = now_ms();
            if this.circuit.lock().await.is_open(now) {
                tokio::time::sleep(Duration::from_secs(5)).await;
                continue;
            }

            match this.connect_and_drain(&mut rx).await {
                Ok(()) => {
                    delay_s = this.reconnect_delay_s.max(0.1);
                }
                Err(err) => {
                    warn!(?err, "websocket connection error");
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs_f64(delay_s)) => {}
                event = rx.recv() => {
                    if let Some(event) = event {
                        let mut queue = this.queue.lock().await;
                        queue.push(event);
                    }
                }
            }
            delay_s = (delay_s * 2.0).min(MAX_RECONNECT_DELAY_S);
        }
    }

    async fn connect_and_drain(&self, rx: &mut mpsc::UnboundedReceiver<QueuedEvent>) -> anyhow::Result<()> {
        info!(url = %self.url, "connecting to relay");
        let mut request = self.url.clone().into_client_request()?;
        if !self.token.is_empty() {
            request.headers_mut().insert(
                "Authorization",
                format!("Bearer {}", self.token).parse()?,
            );
        }
        let (ws, _) = connect_async(request).await?;
        info!("relay connected");
        let (mut write, mut read) = ws.split();

        loop {
            // Pull anything newly enqueued without blocking.
            while let Ok(event) = rx.try_recv() {
                let mut queue = self.queue.lock().await;
                if queue.push(event) {
                    self.queue_len.fetch_add(1, Ordering::Relaxed);
                } else {
                    self.events_dropped.fetch_add(1, Ordering::Relaxed);
                }
            }

            let suppress_until = self.suppress_until_ms.load(Ordering::Relaxed);
            if suppress_until > now_ms() {
                tokio::time::sleep(Duration::from_millis(50)).await;
                continue;
            }

            let next = { self.queue.lock().await.pop() };
            let Some(mut event) = next else {
                tokio::select! {
                    maybe = rx.recv() => {
                        match maybe {
                            Some(event) => {
                                let mut queue = self.queue.lock().await;
                                if queue.push(event) {
                                    self.queue_len.fetch_add(1, Ordering::Relaxed);
                                } else {
                                    self.events_dropped.fetch_add(1, Ordering::Relaxed);
                                }
                            }
                            None => return Ok(()),
                        }
                    }
                    incoming = read.next() => {
                        if incoming.is_none() {
                            anyhow::bail!("relay closed connection");
                        }
                    }
                }
                continue;
            };
            self.queue_len.fetch_sub(1, Ordering::Relaxed);

            let body = encode_event(&event.payload);
            if write.send(Message::Text(body)).await.is_err() {
                anyhow::bail!("relay write failed");
            }

            let ack = timeout(ACK_TIMEOUT, read.next()).await;
            match ack {
                Ok(Some(Ok(Message::Text(text)))) => {
                    self.circuit.lock().await.record_success();
                    if let Ok(parsed) = serde_json::from_str::<Value>(&text) {
                        if let Some(ms) = parsed.get("backpressure").and_then(Value::as_i64) {
                            if ms > 0 {
                                self.suppress_until_ms.store(now_ms() + ms, Ordering::Relaxed);
                            }
                        }
                    }
                }
                Ok(Some(Ok(_))) => {
                    self.circuit.lock().await.record_success();
                }
                Ok(Some(Err(err))) => {
                    warn!(?err, "relay ack read error");
                    self.requeue_or_drop(&mut event).await;
                }
                Ok(None) => anyhow::bail!("relay closed during ack wait"),
                Err(_) => {
                    // Ack timeout counts as OK (fire-and-forget fallback).
                    debug!("ack timeout, treating send as delivered");
                }
            }
        }
    }

    async fn requeue_or_drop(&self, event: &mut QueuedEvent) {
        let now = now_ms();
        let tripped = self.circuit.lock().await.record_failure(now);
        if tripped {
            warn!("circuit breaker tripped");
        }

        event.attempts += 1;
        if event.attempts >= MAX_ATTEMPTS {
            self.events_dropped.fetch_add(1, Ordering::Relaxed);
            return;
        }

        let lowered = lower_priority(event.priority);
        let requeued = QueuedEvent {
            priority: lowered,
            ts_ms: event.ts_ms,
            payload: event.payload.clone(),
            attempts: event.attempts,
        };
        let mut queue = self.queue.lock().await;
        if queue.push(requeued) {
            self.queue_len.fetch_add(1, Ordering::Relaxed);
        } else {
            self.events_dropped.fetch_add(1, Ordering::Relaxed);
        }
    }
}

fn lower_priority(priority: Priority) -> Priority {
    match priority {
        Priority::Urgent => Priority::High,
        Priority::High => Priority::Normal,
        Priority::Normal => Priority::Normal,
    }
}

fn encode_event(event: &SenseEvent) -> String {
    serde_json::to_string(event).unwrap_or_else(|_| json!({}).to_string())
}

fn now_ms() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lower_priority_steps_down_one_rank_and_floors_at_normal() {
        assert_eq!(lower_priority(Priority::Urgent), Priority::High);
        assert_eq!(lower_priority(Priority::High), Priority::Normal);
        assert_eq!(lower_priority(Priority::Normal), Priority::Normal);
    }

    #[test]
    fn encode_event_produces_valid_json() {
        let event = SenseEvent::context(0, sense_gate::SenseMeta::default());
        let body = encode_event(&event);
        let parsed: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(parsed["type"], "context");
    }
}
