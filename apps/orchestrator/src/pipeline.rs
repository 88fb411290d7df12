//! The tick loop: wires capture, change detection, region tracking, OCR,
//! the semantic layer, the decision gate, and egress into one per-frame
//! pass, plus the periodic profiling POST.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use image::{DynamicImage, GenericImageView};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use sense_capture::app_detector::{self, AppDetector};
use sense_capture::change_detection::{ChangeDetector, Contour, DEFAULT_SSIM_THRESHOLD, SENSITIVE_SSIM_THRESHOLD};
use sense_capture::platform::{CaptureSource, MonitorSource, WindowSource};
use sense_capture::region_tracker::RegionTracker;
use sense_capture::roi_extractor::RoiExtractor;
use sense_capture::text_filter::{self, TextFilterConfig};
use sense_capture::window_capture::WindowFilters;
use sense_capture::{downscale, extract_browser_url};

use sense_config::{control, AppConfig};

use sense_ocr::cache::{HashMethod, OcrCache};
use sense_ocr::engine;
use sense_ocr::pending::LazyOcrStore;
use sense_ocr::{OcrContext, OcrEngine, OcrPayload};

use sense_semantic::context::ContextBuilder;
use sense_semantic::privacy::redact_sensitive;
use sense_semantic::ActivityType;

use sense_gate::{DecisionGate, GateConfig, Priority, SenseMeta};

use sense_sender::image_payload::{package_full_frame, package_roi};
use sense_sender::{RelaySender, Sender};

use crate::stats::{now_ms, Stats};

/// Window after an app/window change during which the SSIM threshold stays
/// lowered, to catch the burst of legitimate change a context switch causes.
const SENSITIVE_WINDOW_MS: i64 = 10_000;
const STATS_INTERVAL_MS: i64 = 60_000;
const LAZY_STORE_CAPACITY: usize = 64;
/// At most this many OCR calls run concurrently against one frame's ROIs.
const MAX_OCR_WORKERS: usize = 4;

pub struct Orchestrator {
    config: AppConfig,
    control_path: PathBuf,

    capture: Box<dyn CaptureSource>,
    app_detector: Box<dyn AppDetector>,

    change_detector: ChangeDetector,
    region_tracker: RegionTracker,
    roi_extractor: RoiExtractor,
    text_filter_cfg: TextFilterConfig,

    ocr_engine: Arc<dyn OcrEngine>,
    ocr_cache: Arc<tokio::sync::Mutex<OcrCache>>,
    ocr_pool: Arc<tokio::sync::Semaphore>,
    lazy_store: LazyOcrStore,

    context_builder: ContextBuilder,
    gate: DecisionGate,
    sender: Arc<RelaySender>,
    profiling_client: reqwest::Client,

    stats: Stats,
    last_app: String,
    last_window: String,
    last_app_change_ms: i64,
    last_stats_emit_ms: i64,
}

impl Orchestrator {
    pub async fn new(config: AppConfig, control_path: PathBuf) -> Result<Self> {
        let capture: Box<dyn CaptureSource> = match config.capture.mode.as_str() {
            "window" => Box::new(WindowSource::new(config.capture.target, None, WindowFilters::new(&[], &[])).await?),
            _ => Box::new(MonitorSource::for_monitor_id(config.capture.target).await?),
        };

        let change_detector = ChangeDetector::with_params(
            config.detection.ssim_threshold,
            config.detection.min_area,
            config.detection.phash_threshold,
            config.detection.use_fast_gate,
        );
        let region_tracker = RegionTracker::new(
            config.regions.grid_size,
            config.regions.stability_threshold_s,
            config.regions.stability_min_samples,
        );
        let roi_extractor = RoiExtractor::new(config.detection.roi_padding);
        let text_filter_cfg = TextFilterConfig {
            enabled: config.text_detection.enabled,
            threshold: config.text_detection.threshold,
            min_size: config.text_detection.min_size,
        };

        let ocr_engine: Arc<dyn OcrEngine> = if config.ocr.enabled {
            Arc::from(engine::build(&config.ocr.backend))
        } else {
            Arc::new(engine::NoopOcr)
        };
        let ocr_cache = Arc::new(tokio::sync::Mutex::new(OcrCache::new(
            config.ocr.cache_size,
            HashMethod::parse(&config.ocr.cache_method),
        )));
        let ocr_pool = Arc::new(tokio::sync::Semaphore::new(MAX_OCR_WORKERS));
        let lazy_store = LazyOcrStore::new(LAZY_STORE_CAPACITY);

        let context_builder = ContextBuilder::new(config.semantic.max_history);
        let gate = DecisionGate::new(GateConfig {
            min_ocr_chars: config.gate.min_ocr_chars,
            major_change_threshold: config.gate.major_change_threshold,
            cooldown_ms: config.gate.cooldown_ms as i64,
            adaptive_cooldown_ms: config.gate.adaptive_cooldown_ms as i64,
            context_cooldown_ms: config.gate.context_cooldown_ms as i64,
        });

        let sender = if config.relay.use_websocket {
            RelaySender::websocket(
                format!("{}/ws", config.relay.url.trim_end_matches('/')),
                config.relay.token.clone(),
                config.relay.ws_reconnect_delay,
                config.relay.max_queue_size,
            )
        } else {
            RelaySender::http(config.relay.url.clone())
        };

        let now = now_ms();
        Ok(Self {
            config,
            control_path,
            capture,
            app_detector: app_detector::default_detector(),
            change_detector,
            region_tracker,
            roi_extractor,
            text_filter_cfg,
            ocr_engine,
            ocr_cache,
            ocr_pool,
            lazy_store,
            context_builder,
            gate,
            sender: Arc::new(sender),
            profiling_client: reqwest::Client::new(),
            stats: Stats::new(now),
            last_app: String::new(),
            last_window: String::new(),
            last_app_change_ms: 0,
            last_stats_emit_ms: now,
        })
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.config.capture.fps.max(0.1))
    }

    /// Runs the loop until ctrl-c. Tick failures are logged and skipped
    /// rather than ending the process — a single bad frame shouldn't kill
    /// a long-lived background pipeline.
    pub async fn run(mut self) -> Result<()> {
        let mut ticker = tokio::time::interval(self.tick_interval());
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(err) = self.tick().await {
                        warn!(?err, "tick failed");
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("shutdown signal received");
                    break;
                }
            }
        }
        Ok(())
    }

    pub async fn tick(&mut self) -> Result<()> {
        let now = now_ms();

        if !control::is_enabled(&self.control_path) {
            debug!("control file disabled, skipping tick");
            return Ok(());
        }

        let app_info = match self.app_detector.detect().await {
            Ok(info) => info,
            Err(err) => {
                warn!(?err, "app detection failed");
                None
            }
        };
        let app = app_info.as_ref().map(|a| a.app_name.clone()).unwrap_or_default();
        let window = app_info.as_ref().map(|a| a.window_title.clone()).unwrap_or_default();
        let app_changed = !self.last_app.is_empty() && app != self.last_app;
        let window_changed = !self.last_window.is_empty() && window != self.last_window;

        if let Some(info) = &app_info {
            if let Some(url) = extract_browser_url(true, &info.app_name, &info.window_title) {
                debug!(url, "browser url extracted from window title");
            }
        }

        if app_changed || window_changed {
            self.change_detector.set_threshold(SENSITIVE_SSIM_THRESHOLD);
            self.last_app_change_ms = now;
        } else if now - self.last_app_change_ms >= SENSITIVE_WINDOW_MS {
            self.change_detector.set_threshold(DEFAULT_SSIM_THRESHOLD);
        }

        let frame = match self.capture.capture().await {
            Ok(frame) => {
                self.stats.captures_ok += 1;
                frame
            }
            Err(err) => {
                self.stats.captures_fail += 1;
                warn!(?err, "capture failed");
                return Ok(());
            }
        };
        let scaled = downscale(&frame.image, self.config.capture.scale);

        let detect_start = Instant::now();
        let change = self.change_detector.evaluate(&scaled);
        self.stats.detect_avg.record(detect_start.elapsed().as_secs_f64() * 1000.0);

        let is_ready = self.gate.is_ready(app_changed, window_changed, now);

        let mut ocr_payload = OcrPayload::empty();
        let mut first_roi_bbox: Option<(u32, u32, u32, u32)> = None;

        if let Some(change_result) = &change {
            let contours = self.refine_contours(&scaled, change_result, now);
            let rois = self.roi_extractor.extract((scaled.width(), scaled.height()), &contours);

            let mut text_region_bboxes = Vec::new();
            for roi in &rois {
                let found = text_filter::find_text_regions(&scaled, roi.bbox, &self.text_filter_cfg);
                text_region_bboxes.extend(found.into_iter().map(|r| r.bbox));
            }
            first_roi_bbox = text_region_bboxes.first().copied();

            self.lazy_store.add_frame(scaled.clone(), text_region_bboxes.clone(), now);

            if is_ready && self.config.ocr.enabled {
                let ctx = OcrContext {
                    window_name: window.clone(),
                    app_name: app.clone(),
                    is_focused: true,
                    languages: self.config.ocr.languages.clone(),
                };
                ocr_payload = self.run_ocr(&scaled, &text_region_bboxes, &ctx, self.config.ocr.max_regions).await;
            }
        }

        let redacted_text = redact_sensitive(&ocr_payload.text);
        let gate_ocr = OcrPayload {
            text: redacted_text.clone(),
            ..ocr_payload
        };

        let semantic = self.context_builder.add_event(
            &redacted_text,
            &app,
            &window,
            change.as_ref().map(|c| c.ssim_score).unwrap_or(1.0),
            app_changed,
            window_changed,
        );

        let meta = SenseMeta {
            ssim: change.as_ref().map(|c| c.ssim_score).unwrap_or(1.0),
            app: app.clone(),
            window_title: window.clone(),
            screen: frame.monitor_id,
        };

        let decision = self.gate.classify(now, change.as_ref(), &gate_ocr, app_changed, window_changed, meta);

        if let Some(mut event) = decision {
            self.attach_image_payload(&mut event, &scaled, first_roi_bbox);

            let priority = if semantic.has_error || app_changed || window_changed {
                Priority::Urgent
            } else if matches!(semantic.activity, ActivityType::Typing) {
                Priority::High
            } else {
                Priority::Normal
            };

            let send_start = Instant::now();
            let delivered = self.sender.send(event, priority).await;
            self.stats.send_avg.record(send_start.elapsed().as_secs_f64() * 1000.0);
            if delivered {
                self.stats.events_sent += 1;
            } else {
                self.stats.events_failed += 1;
            }
        } else {
            self.stats.events_gated += 1;
        }

        self.last_app = app;
        self.last_window = window;

        self.maybe_emit_stats(now);
        Ok(())
    }

    /// Times `iterations` bare captures, no downstream processing.
    pub async fn profile_capture(&mut self, iterations: usize) -> Result<Value> {
        let mut samples = Vec::with_capacity(iterations);
        for _ in 0..iterations {
            let start = Instant::now();
            self.capture.capture().await?;
            samples.push(start.elapsed().as_secs_f64() * 1000.0);
        }
        Ok(summarize("capture", &samples))
    }

    /// Times `iterations` captures through change detection, reporting how
    /// many registered a change.
    pub async fn profile_detection(&mut self, iterations: usize) -> Result<Value> {
        let mut samples = Vec::with_capacity(iterations);
        let mut changes = 0usize;
        for _ in 0..iterations {
            let frame = self.capture.capture().await?;
            let scaled = downscale(&frame.image, self.config.capture.scale);
            let start = Instant::now();
            let result = self.change_detector.evaluate(&scaled);
            samples.push(start.elapsed().as_secs_f64() * 1000.0);
            if result.is_some() {
                changes += 1;
            }
        }
        let mut summary = summarize("detection", &samples);
        summary["changesDetected"] = json!(changes);
        Ok(summary)
    }

    /// Times `iterations` OCR passes over whatever ROI the most recent
    /// change produced, falling back to the full frame when nothing changed.
    pub async fn profile_ocr(&mut self, iterations: usize) -> Result<Value> {
        let ctx = OcrContext {
            window_name: self.last_window.clone(),
            app_name: self.last_app.clone(),
            is_focused: true,
            languages: self.config.ocr.languages.clone(),
        };

        let frame = self.capture.capture().await?;
        let scaled = downscale(&frame.image, self.config.capture.scale);
        let change = self.change_detector.evaluate(&scaled);
        let roi_image = match &change {
            Some(result) if !result.contours.is_empty() => {
                let rois = self.roi_extractor.extract((scaled.width(), scaled.height()), &result.contours);
                rois.first().map(|r| {
                    let (x, y, w, h) = r.bbox;
                    scaled.crop_imm(x, y, w, h)
                })
            }
            _ => None,
        }
        .unwrap_or_else(|| scaled.clone());

        let mut samples = Vec::with_capacity(iterations);
        let mut errors = 0u64;
        for _ in 0..iterations {
            let start = Instant::now();
            let bytes = encode_png(&roi_image);
            let errored = self.ocr_engine.recognize(&bytes, &ctx).await.is_err();
            samples.push(start.elapsed().as_secs_f64() * 1000.0);
            if errored {
                errors += 1;
            }
        }
        let mut summary = summarize("ocr", &samples);
        summary["errors"] = json!(errors);
        Ok(summary)
    }

    /// Times `iterations` full ticks end to end.
    pub async fn profile_e2e(&mut self, iterations: usize) -> Result<Value> {
        let mut samples = Vec::with_capacity(iterations);
        for _ in 0..iterations {
            let start = Instant::now();
            self.tick().await?;
            samples.push(start.elapsed().as_secs_f64() * 1000.0);
        }
        let mut summary = summarize("e2e", &samples);
        summary["stats"] = self.stats.snapshot(
            now_ms(),
            self.change_detector.phash_rejected,
            self.change_detector.ssim_calls,
            self.context_builder.total_tokens_saved,
            self.region_tracker.stable_region_count(),
        );
        Ok(summary)
    }

    /// Feeds the change detector's contours through the region tracker so
    /// cells already deemed stable are skipped; falls back to the raw
    /// contours when that skip-cache empties the candidate set entirely.
    fn refine_contours(
        &mut self,
        scaled: &DynamicImage,
        change_result: &sense_capture::change_detection::ChangeResult,
        now: i64,
    ) -> Vec<Contour> {
        let region_changed = self.region_tracker.analyze(scaled, true, now);
        let region_bboxes = self.region_tracker.merge_adjacent_regions(&region_changed);
        if region_bboxes.is_empty() {
            change_result.contours.clone()
        } else {
            region_bboxes
                .into_iter()
                .map(|bbox| Contour { area: bbox.2 * bbox.3, bbox })
                .collect()
        }
    }

    /// OCRs up to `max_regions` surviving text ROIs of this tick's frame
    /// through a bounded worker pool, then keeps the single result with the
    /// longest text — ties broken by extraction order, so repeated runs over
    /// the same frame pick the same region.
    async fn run_ocr(
        &mut self,
        frame: &DynamicImage,
        regions: &[(u32, u32, u32, u32)],
        ctx: &OcrContext,
        max_regions: usize,
    ) -> OcrPayload {
        let mut tasks = tokio::task::JoinSet::new();
        let mut attempted = 0u64;

        for (index, &(x, y, w, h)) in regions.iter().take(max_regions).enumerate() {
            if w == 0 || h == 0 || x + w > frame.width() || y + h > frame.height() {
                continue;
            }
            attempted += 1;
            let crop = DynamicImage::ImageRgba8(frame.view(x, y, w, h).to_image());
            let cache = self.ocr_cache.clone();
            let engine = self.ocr_engine.clone();
            let pool = self.ocr_pool.clone();
            let ctx = ctx.clone();
            tasks.spawn(async move {
                let _permit = pool.acquire_owned().await.ok();
                let (payload, miss, errored) = ocr_region(&cache, engine.as_ref(), &ctx, &crop).await;
                (index, payload, miss, errored)
            });
        }

        let mut results: Vec<(usize, OcrPayload)> = Vec::new();
        let mut misses = 0u64;
        let mut errors = 0u64;
        while let Some(joined) = tasks.join_next().await {
            if let Ok((index, payload, miss, errored)) = joined {
                if miss {
                    misses += 1;
                }
                if errored {
                    errors += 1;
                }
                if !payload.text.is_empty() {
                    results.push((index, payload));
                }
            }
        }

        self.stats.ocr_cache_misses += misses;
        self.stats.ocr_cache_hits += attempted.saturating_sub(misses);
        self.stats.ocr_errors += errors;

        // Longest text wins; ties favor the lower extraction index so the
        // pick doesn't depend on worker scheduling order.
        let best = results
            .into_iter()
            .max_by_key(|(index, payload)| (payload.text.chars().count(), std::cmp::Reverse(*index)));

        match best {
            Some((_, payload)) => payload,
            None => OcrPayload::empty(),
        }
    }

    fn attach_image_payload(
        &self,
        event: &mut sense_gate::SenseEvent,
        scaled: &DynamicImage,
        first_roi_bbox: Option<(u32, u32, u32, u32)>,
    ) {
        if !self.config.relay.send_thumbnails {
            return;
        }
        match event.event_type {
            sense_gate::SenseEventType::Context => {
                event.diff = Some(package_full_frame(scaled, self.config.relay.max_image_kb, 384));
            }
            sense_gate::SenseEventType::Text | sense_gate::SenseEventType::Visual => {
                if let Some(bbox) = first_roi_bbox {
                    let (x, y, w, h) = bbox;
                    if w > 0 && h > 0 && x + w <= scaled.width() && y + h <= scaled.height() {
                        let cropped = scaled.crop_imm(x, y, w, h);
                        event.roi = Some(package_roi(&cropped, bbox, self.config.relay.max_image_kb));
                    }
                }
            }
        }
    }

    fn maybe_emit_stats(&mut self, now: i64) {
        if now - self.last_stats_emit_ms < STATS_INTERVAL_MS {
            return;
        }
        self.last_stats_emit_ms = now;

        let snapshot = self.stats.snapshot(
            now,
            self.change_detector.phash_rejected,
            self.change_detector.ssim_calls,
            self.context_builder.total_tokens_saved,
            self.region_tracker.stable_region_count(),
        );
        let url = format!("{}/profiling/sense", self.config.relay.url.trim_end_matches('/'));
        let client = self.profiling_client.clone();
        tokio::spawn(async move {
            if let Err(err) = client
                .post(url)
                .json(&snapshot)
                .timeout(Duration::from_secs(5))
                .send()
                .await
            {
                warn!(?err, "profiling snapshot POST failed");
            }
        });
    }
}

/// One ROI's worth of cache-then-engine OCR: checks the fingerprint under
/// the cache's mutex, releases it before awaiting the engine on a miss (so
/// sibling worker-pool tasks aren't blocked on this ROI's OCR latency), then
/// re-acquires briefly to store the result. Returns `(payload, was_miss,
/// was_error)`.
async fn ocr_region(
    cache: &tokio::sync::Mutex<OcrCache>,
    engine: &dyn OcrEngine,
    ctx: &OcrContext,
    image: &DynamicImage,
) -> (OcrPayload, bool, bool) {
    let key = {
        let cache = cache.lock().await;
        cache.fingerprint(image)
    };
    if let Some(hit) = {
        let mut cache = cache.lock().await;
        cache.get(&key)
    } {
        return (hit, false, false);
    }

    let bytes = encode_png(image);
    let (payload, errored) = match engine.recognize(&bytes, ctx).await {
        Ok(payload) => (payload, false),
        Err(err) => {
            warn!(?err, "ocr engine failed");
            (OcrPayload::empty(), true)
        }
    };

    {
        let mut cache = cache.lock().await;
        cache.put(key, payload.clone());
    }
    (payload, true, errored)
}

fn summarize(stage: &str, samples_ms: &[f64]) -> Value {
    let n = samples_ms.len();
    if n == 0 {
        return json!({ "stage": stage, "iterations": 0 });
    }
    let sum: f64 = samples_ms.iter().sum();
    let min = samples_ms.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = samples_ms.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    json!({
        "stage": stage,
        "iterations": n,
        "avgMs": sum / n as f64,
        "minMs": min,
        "maxMs": max,
    })
}

fn encode_png(image: &DynamicImage) -> Vec<u8> {
    let mut buf = Vec::new();
    let mut cursor = std::io::Cursor::new(&mut buf);
    if image.write_to(&mut cursor, image::ImageFormat::Png).is_err() {
        warn!("failed to encode image for ocr");
    }
    buf
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgba};

    struct AlwaysEmptyOcr;

    #[async_trait::async_trait]
    impl OcrEngine for AlwaysEmptyOcr {
        async fn recognize(&self, _image_bytes: &[u8], _context: &OcrContext) -> anyhow::Result<OcrPayload> {
            Ok(OcrPayload::new("found text", 90.0))
        }
        fn name(&self) -> &'static str {
            "test"
        }
    }

    fn solid(width: u32, height: u32, value: u8) -> DynamicImage {
        DynamicImage::ImageRgba8(ImageBuffer::<Rgba<u8>, _>::from_pixel(width, height, Rgba([value, value, value, 255])))
    }

    #[test]
    fn ocr_region_returns_payload_on_success_and_caches_it() {
        let engine = AlwaysEmptyOcr;
        let ctx = OcrContext::default();
        let cache = tokio::sync::Mutex::new(OcrCache::new(16, HashMethod::Content));
        let image = solid(10, 10, 1);
        let rt = tokio::runtime::Runtime::new().unwrap();

        let (payload, was_miss, errored) =
            rt.block_on(async { ocr_region(&cache, &engine, &ctx, &image).await });
        assert!(was_miss);
        assert!(!errored);
        assert_eq!(payload.text, "found text");

        let (cached, was_miss, errored) =
            rt.block_on(async { ocr_region(&cache, &engine, &ctx, &image).await });
        assert!(!was_miss);
        assert!(!errored);
        assert_eq!(cached.text, "found text");
    }
}
