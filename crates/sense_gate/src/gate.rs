//! Decides which changes are worth sending, and at what cost: adaptive
//! cooldown, a context-change bypass, fuzzy dedup against recently sent
//! text, and a couple of OCR-garbage heuristics.

use std::collections::VecDeque;

use similar::TextDiff;

use sense_capture::change_detection::ChangeResult;
use sense_ocr::OcrPayload;

use crate::types::{SenseEvent, SenseEventType, SenseMeta};

pub const DEFAULT_MIN_OCR_CHARS: usize = 20;
pub const DEFAULT_MAJOR_CHANGE_THRESHOLD: f32 = 0.85;
pub const DEFAULT_COOLDOWN_MS: i64 = 5000;
pub const DEFAULT_ADAPTIVE_COOLDOWN_MS: i64 = 2000;
pub const DEFAULT_CONTEXT_COOLDOWN_MS: i64 = 10_000;
const RECENT_APP_CHANGE_WINDOW_MS: i64 = 10_000;
const DEDUP_SIMILARITY_THRESHOLD: f32 = 0.7;
const RECENT_TEXTS_CAPACITY: usize = 5;

#[derive(Debug, Clone)]
pub struct GateConfig {
    pub min_ocr_chars: usize,
    pub major_change_threshold: f32,
    pub cooldown_ms: i64,
    pub adaptive_cooldown_ms: i64,
    pub context_cooldown_ms: i64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            min_ocr_chars: DEFAULT_MIN_OCR_CHARS,
            major_change_threshold: DEFAULT_MAJOR_CHANGE_THRESHOLD,
            cooldown_ms: DEFAULT_COOLDOWN_MS,
            adaptive_cooldown_ms: DEFAULT_ADAPTIVE_COOLDOWN_MS,
            context_cooldown_ms: DEFAULT_CONTEXT_COOLDOWN_MS,
        }
    }
}

pub struct DecisionGate {
    cfg: GateConfig,
    last_send_ts: i64,
    last_context_ts: i64,
    last_app_change_ts: i64,
    recent_texts: VecDeque<String>,
    last_sent_text: Option<String>,
}

impl DecisionGate {
    pub fn new(cfg: GateConfig) -> Self {
        Self {
            cfg,
            last_send_ts: 0,
            last_context_ts: 0,
            last_app_change_ts: 0,
            recent_texts: VecDeque::with_capacity(RECENT_TEXTS_CAPACITY),
            last_sent_text: None,
        }
    }

    fn cooldown_for(&self, now_ms: i64) -> i64 {
        if now_ms - self.last_app_change_ts < RECENT_APP_CHANGE_WINDOW_MS {
            self.cfg.adaptive_cooldown_ms
        } else {
            self.cfg.cooldown_ms
        }
    }

    /// True if either flag is set, or the adaptive cooldown since the last
    /// send has elapsed.
    pub fn is_ready(&self, app_changed: bool, window_changed: bool, now_ms: i64) -> bool {
        app_changed || window_changed || now_ms - self.last_send_ts >= self.cooldown_for(now_ms)
    }

    pub fn classify(
        &mut self,
        now_ms: i64,
        change: Option<&ChangeResult>,
        ocr: &OcrPayload,
        app_changed: bool,
        window_changed: bool,
        meta: SenseMeta,
    ) -> Option<SenseEvent> {
        if (app_changed || window_changed) && now_ms - self.last_context_ts >= self.cfg.context_cooldown_ms {
            self.last_context_ts = now_ms;
            self.last_send_ts = now_ms;
            self.last_app_change_ts = now_ms;
            return Some(SenseEvent::context(now_ms, meta));
        }

        if now_ms - self.last_send_ts < self.cooldown_for(now_ms) {
            return None;
        }

        let change = change?;

        if ocr.text.chars().count() >= self.cfg.min_ocr_chars {
            if self.is_duplicate(&ocr.text) || !ocr_quality_ok(&ocr.text) {
                return None;
            }
            self.push_recent(ocr.text.clone());
            self.last_sent_text = Some(ocr.text.clone());
            self.last_send_ts = now_ms;
            return Some(SenseEvent {
                event_type: SenseEventType::Text,
                ts_ms: now_ms,
                ocr: ocr.text.clone(),
                roi: None,
                diff: None,
                meta: SenseMeta { ssim: change.ssim_score, ..meta },
            });
        }

        if change.ssim_score < self.cfg.major_change_threshold {
            self.last_send_ts = now_ms;
            return Some(SenseEvent {
                event_type: SenseEventType::Visual,
                ts_ms: now_ms,
                ocr: ocr.text.clone(),
                roi: None,
                diff: None,
                meta: SenseMeta { ssim: change.ssim_score, ..meta },
            });
        }

        None
    }

    fn is_duplicate(&self, text: &str) -> bool {
        if self.last_sent_text.as_deref() == Some(text) {
            return true;
        }
        self.recent_texts
            .iter()
            .any(|prev| TextDiff::from_chars(prev, text).ratio() > DEDUP_SIMILARITY_THRESHOLD)
    }

    fn push_recent(&mut self, text: String) {
        if self.recent_texts.len() >= RECENT_TEXTS_CAPACITY {
            self.recent_texts.pop_front();
        }
        self.recent_texts.push_back(text);
    }
}

/// Rejects garbage OCR: more than half single-character tokens, or fewer
/// than half of the non-space characters alphanumeric.
fn ocr_quality_ok(text: &str) -> bool {
    let tokens: Vec<&str> = text.split_whitespace().collect();
    if tokens.is_empty() {
        return false;
    }

    let single_char = tokens.iter().filter(|t| t.chars().count() == 1).count();
    if single_char as f32 / tokens.len() as f32 > 0.5 {
        return false;
    }

    let non_space: Vec<char> = text.chars().filter(|c| !c.is_whitespace()).collect();
    if non_space.is_empty() {
        return true;
    }
    let alnum = non_space.iter().filter(|c| c.is_alphanumeric()).count();
    alnum as f32 / non_space.len() as f32 >= 0.5
}

#[cfg(test)]
mod tests {
    use super::*;

    fn change(ssim: f32) -> ChangeResult {
        ChangeResult {
            ssim_score: ssim,
            hamming_distance: None,
            contours: Vec::new(),
            bbox: (0, 0, 10, 10),
        }
    }

    fn ocr(text: &str) -> OcrPayload {
        OcrPayload::new(text, 90.0)
    }

    #[test]
    fn app_change_emits_a_context_event_bypassing_cooldown() {
        let mut gate = DecisionGate::new(GateConfig::default());
        let event = gate
            .classify(0, None, &ocr(""), true, false, SenseMeta::default())
            .expect("context event");
        assert_eq!(event.event_type, SenseEventType::Context);
    }

    #[test]
    fn repeated_context_within_context_cooldown_is_suppressed() {
        let mut gate = DecisionGate::new(GateConfig::default());
        gate.classify(0, None, &ocr(""), true, false, SenseMeta::default());
        let second = gate.classify(500, None, &ocr(""), true, false, SenseMeta::default());
        assert!(second.is_none());
    }

    #[test]
    fn no_change_result_yields_no_event_once_past_cooldown() {
        let mut gate = DecisionGate::new(GateConfig::default());
        let event = gate.classify(20_000, None, &ocr(""), false, false, SenseMeta::default());
        assert!(event.is_none());
    }

    #[test]
    fn sufficient_ocr_text_emits_a_text_event() {
        let mut gate = DecisionGate::new(GateConfig::default());
        let change = change(0.95);
        let text = "This is a perfectly normal sentence with real words.";
        let event = gate
            .classify(20_000, Some(&change), &ocr(text), false, false, SenseMeta::default())
            .expect("text event");
        assert_eq!(event.event_type, SenseEventType::Text);
        assert_eq!(event.ocr, text);
    }

    #[test]
    fn identical_text_sent_twice_is_rejected_as_duplicate() {
        let mut gate = DecisionGate::new(GateConfig::default());
        let change = change(0.95);
        let text = "This is a perfectly normal sentence with real words.";
        gate.classify(20_000, Some(&change), &ocr(text), false, false, SenseMeta::default());
        let second = gate.classify(40_000, Some(&change), &ocr(text), false, false, SenseMeta::default());
        assert!(second.is_none());
    }

    #[test]
    fn garbage_ocr_with_mostly_single_char_tokens_is_rejected() {
        let mut gate = DecisionGate::new(GateConfig::default());
        let change = change(0.95);
        let garbage = "a b c d e f g h i j k l";
        let event = gate.classify(20_000, Some(&change), &ocr(garbage), false, false, SenseMeta::default());
        assert!(event.is_none());
    }

    #[test]
    fn large_ssim_drop_with_no_ocr_text_emits_a_visual_event() {
        let mut gate = DecisionGate::new(GateConfig::default());
        let change = change(0.5);
        let event = gate
            .classify(20_000, Some(&change), &ocr(""), false, false, SenseMeta::default())
            .expect("visual event");
        assert_eq!(event.event_type, SenseEventType::Visual);
    }

    #[test]
    fn small_ssim_drop_with_no_ocr_text_emits_nothing() {
        let mut gate = DecisionGate::new(GateConfig::default());
        let change = change(0.99);
        let event = gate.classify(20_000, Some(&change), &ocr(""), false, false, SenseMeta::default());
        assert!(event.is_none());
    }

    #[test]
    fn is_ready_uses_the_adaptive_cooldown_soon_after_an_app_change() {
        let mut gate = DecisionGate::new(GateConfig::default());
        gate.classify(0, None, &ocr(""), true, false, SenseMeta::default());
        // 2500ms later: past the adaptive cooldown (2000ms) but nowhere
        // near the default 5000ms cooldown.
        assert!(gate.is_ready(false, false, 2500));
    }
}
