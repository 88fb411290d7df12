//! In-process counters snapshotted into the `/profiling/sense` POST every
//! 60s.

use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::{json, Value};

#[derive(Default)]
pub struct LatencyAvg {
    total_ms: f64,
    count: u64,
}

impl LatencyAvg {
    pub fn record(&mut self, ms: f64) {
        self.total_ms += ms;
        self.count += 1;
    }

    pub fn avg_ms(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.total_ms / self.count as f64
        }
    }
}

#[derive(Default)]
pub struct Stats {
    pub captures_ok: u64,
    pub captures_fail: u64,
    pub events_sent: u64,
    pub events_failed: u64,
    pub events_gated: u64,
    pub ocr_errors: u64,
    pub ocr_cache_hits: u64,
    pub ocr_cache_misses: u64,
    pub detect_avg: LatencyAvg,
    pub ocr_avg: LatencyAvg,
    pub send_avg: LatencyAvg,
    started_at_ms: i64,
}

impl Stats {
    pub fn new(now_ms: i64) -> Self {
        Self {
            started_at_ms: now_ms,
            ..Default::default()
        }
    }

    pub fn uptime_s(&self, now_ms: i64) -> f64 {
        (now_ms - self.started_at_ms).max(0) as f64 / 1000.0
    }

    pub fn ocr_cache_hit_rate(&self) -> f64 {
        let total = self.ocr_cache_hits + self.ocr_cache_misses;
        if total == 0 {
            0.0
        } else {
            self.ocr_cache_hits as f64 / total as f64
        }
    }

    pub fn phash_rejection_rate(&self, phash_rejected: u64, ssim_calls: u64) -> f64 {
        let total = phash_rejected + ssim_calls;
        if total == 0 {
            0.0
        } else {
            phash_rejected as f64 / total as f64
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn snapshot(
        &self,
        now_ms: i64,
        phash_rejected: u64,
        ssim_calls: u64,
        tokens_saved: u64,
        stable_regions: usize,
    ) -> Value {
        json!({
            "rssMb": read_rss_mb(),
            "uptimeS": self.uptime_s(now_ms),
            "ts": now_ms,
            "extra": {
                "capturesOk": self.captures_ok,
                "capturesFail": self.captures_fail,
                "eventsSent": self.events_sent,
                "eventsFailed": self.events_failed,
                "eventsGated": self.events_gated,
                "ocrErrors": self.ocr_errors,
                "detectAvgMs": self.detect_avg.avg_ms(),
                "ocrAvgMs": self.ocr_avg.avg_ms(),
                "sendAvgMs": self.send_avg.avg_ms(),
                "phashRejectionRate": self.phash_rejection_rate(phash_rejected, ssim_calls),
                "ocrCacheHitRate": self.ocr_cache_hit_rate(),
                "tokensSaved": tokens_saved,
                "stableRegions": stable_regions,
            }
        })
    }
}

/// Linux-only RSS read via `/proc/self/statm`; returns 0.0 anywhere that
/// file doesn't exist rather than failing the profiling POST.
fn read_rss_mb() -> f64 {
    std::fs::read_to_string("/proc/self/statm")
        .ok()
        .and_then(|contents| contents.split_whitespace().nth(1).map(str::to_string))
        .and_then(|pages| pages.parse::<f64>().ok())
        .map(|pages| pages * 4096.0 / (1024.0 * 1024.0))
        .unwrap_or(0.0)
}

pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latency_avg_starts_at_zero_and_accumulates() {
        let mut avg = LatencyAvg::default();
        assert_eq!(avg.avg_ms(), 0.0);
        avg.record(10.0);
        avg.record(20.0);
        assert_eq!(avg.avg_ms(), 15.0);
    }

    #[test]
    fn uptime_grows_with_elapsed_time() {
        let stats = Stats::new(1_000);
        assert_eq!(stats.uptime_s(3_500), 2.5);
    }

    #[test]
    fn ocr_cache_hit_rate_is_zero_with_no_samples() {
        let stats = Stats::new(0);
        assert_eq!(stats.ocr_cache_hit_rate(), 0.0);
    }

    #[test]
    fn ocr_cache_hit_rate_reflects_hits_over_total() {
        let mut stats = Stats::new(0);
        stats.ocr_cache_hits = 3;
        stats.ocr_cache_misses = 1;
        assert_eq!(stats.ocr_cache_hit_rate(), 0.75);
    }

    #[test]
    fn phash_rejection_rate_divides_rejected_by_total_frames_seen() {
        let stats = Stats::new(0);
        assert_eq!(stats.phash_rejection_rate(5, 15), 0.25);
    }
}
