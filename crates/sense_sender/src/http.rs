//! HTTP fallback transport: a single POST per event, one in flight at a
//! time, with a bounded P50/P95 latency histogram logged every 60s.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::warn;

use sense_gate::{Priority, SenseEvent};

use crate::Sender;

const POST_TIMEOUT: Duration = Duration::from_secs(5);
const LATENCY_CAP: usize = 500;

/// POSTs events to `<url>/sense`. While a request is outstanding, new sends
/// are refused (and counted `skipped`) rather than queued — this transport
/// has no background worker of its own.
pub struct HttpSender {
    client: reqwest::Client,
    url: String,
    in_flight: AtomicBool,
    latencies: Mutex<VecDeque<f64>>,
    pub skipped: AtomicU64,
    pub failures: AtomicU64,
}

impl HttpSender {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: base_url.into().trim_end_matches('/').to_string(),
            in_flight: AtomicBool::new(false),
            latencies: Mutex::new(VecDeque::with_capacity(LATENCY_CAP)),
            skipped: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    async fn record_latency(&self, ms: f64) {
        let mut latencies = self.latencies.lock().await;
        if latencies.len() >= LATENCY_CAP {
            latencies.pop_front();
        }
        latencies.push_back(ms);
    }

    /// P50/P95 over whatever latency samples are currently buffered.
    pub async fn percentiles(&self) -> Option<(f64, f64)> {
        let latencies = self.latencies.lock().await;
        if latencies.is_empty() {
            return None;
        }
        let mut sorted: Vec<f64> = latencies.iter().copied().collect();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let p50 = sorted[sorted.len() / 2];
        let p95_idx = (((sorted.len() as f64) * 0.95) as usize).min(sorted.len() - 1);
        let p95 = sorted[p95_idx];
        Some((p50, p95))
    }
}

#[async_trait]
impl Sender for HttpSender {
    /// HTTP ignores priority — there is no queue to order, only an
    /// in-flight guard.
    async fn send(&self, event: SenseEvent, _priority: Priority) -> bool {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            self.skipped.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        let start = Instant::now();
        let result = self
            .client
            .post(format!("{}/sense", self.url))
            .json(&event)
            .timeout(POST_TIMEOUT)
            .send()
            .await;

        self.in_flight.store(false, Ordering::SeqCst);
        self.record_latency(start.elapsed().as_secs_f64() * 1000.0).await;

        match result {
            Ok(resp) if resp.status().is_success() => true,
            Ok(resp) => {
                warn!(status = %resp.status(), "relay returned non-success status");
                self.failures.fetch_add(1, Ordering::Relaxed);
                false
            }
            Err(err) => {
                warn!(?err, "relay POST failed");
                self.failures.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }
}
