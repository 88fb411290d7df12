//! Unified egress: a `Sender` trait with two back-ends (WebSocket priority
//! queue, HTTP single-flight fallback) sharing one wire schema and one
//! byte-budget image encoder.

pub mod circuit;
pub mod http;
pub mod image_payload;
pub mod queue;
pub mod websocket;

use async_trait::async_trait;

use sense_gate::{Priority, SenseEvent};

pub use http::HttpSender;
pub use websocket::WebSocketSender;

/// Common contract both transports satisfy: `send` never blocks the
/// caller on network I/O beyond a bounded ack/timeout window, and always
/// resolves to whether the event is considered delivered.
#[async_trait]
pub trait Sender: Send + Sync {
    async fn send(&self, event: SenseEvent, priority: Priority) -> bool;
}

/// Picks a transport per `sense_config::RelaySection::use_websocket` and
/// exposes it behind the shared trait object.
pub enum RelaySender {
    WebSocket(WebSocketSender),
    Http(HttpSender),
}

impl RelaySender {
    pub fn websocket(url: String, token: String, reconnect_delay_s: f64, max_queue_size: usize) -> Self {
        Self::WebSocket(WebSocketSender::spawn(url, token, reconnect_delay_s, max_queue_size))
    }

    pub fn http(url: String) -> Self {
        Self::Http(HttpSender::new(url))
    }
}

#[async_trait]
impl Sender for RelaySender {
    async fn send(&self, event: SenseEvent, priority: Priority) -> bool {
        match self {
            Self::WebSocket(sender) => sender.send(event, priority).await,
            Self::Http(sender) => sender.send(event, priority).await,
        }
    }
}
