//! Builds structured, token-efficient semantic state from raw OCR text, then
//! keeps a bounded rolling history of it for the gate and the agent to query.

use std::collections::VecDeque;
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::{json, Value};

use crate::activity::{ActivityClassifier, ActivitySignals, ActivityType};
use crate::delta::{DeltaEncoder, DeltaKind, TextDelta};

const DEFAULT_MAX_HISTORY: usize = 30;
const DEFAULT_QUERY_LIMIT: usize = 10;

#[derive(Debug, Clone)]
pub struct SemanticState {
    pub app: String,
    pub window: String,
    pub activity: ActivityType,
    pub activity_duration_s: f64,
    pub text_deltas: Vec<TextDelta>,
    pub visible_summary: String,
    pub cursor_line: Option<usize>,
    pub has_error: bool,
    pub has_unsaved: bool,
    pub ts_ms: i64,
    pub token_estimate: usize,
}

fn now_ms() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as i64
}

/// Combines activity classification, delta encoding, and summarization into
/// a single `SemanticState` per tick.
pub struct SemanticBuilder {
    classifier: ActivityClassifier,
    delta_encoder: DeltaEncoder,
}

impl Default for SemanticBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SemanticBuilder {
    pub fn new() -> Self {
        Self {
            classifier: ActivityClassifier::new(),
            delta_encoder: DeltaEncoder::default(),
        }
    }

    pub fn build(
        &mut self,
        ocr_text: &str,
        app: &str,
        window: &str,
        ssim: f32,
        app_changed: bool,
        window_changed: bool,
    ) -> SemanticState {
        let change_rate = if ssim < 1.0 { (1.0 - ssim) as f64 * 10.0 } else { 0.0 };
        let change_size = if self.delta_encoder.last_text_len() > 0 {
            (ocr_text.len() as i64 - self.delta_encoder.last_text_len() as i64).unsigned_abs() as usize
        } else {
            ocr_text.len()
        };

        let signals = ActivitySignals {
            change_rate,
            change_size,
            vertical_motion: 0.0,
            horizontal_motion: 0.0,
            app_changed,
            window_changed,
            url_changed: false,
            duration_s: self.classifier.get_duration(),
            ocr_contains_error: ActivityClassifier::detect_error_content(ocr_text),
            ocr_contains_loading: ActivityClassifier::detect_loading_content(ocr_text),
        };

        let activity = self.classifier.classify(&signals, ocr_text);
        let deltas = self.delta_encoder.encode(ocr_text);

        let has_error = signals.ocr_contains_error;
        let window_lower = window.to_lowercase();
        let has_unsaved = window.contains('*') || window_lower.contains("unsaved") || window_lower.contains("modified");
        let visible_summary = create_summary(&deltas);

        let mut total_chars = app.len() + window.len() + visible_summary.len();
        for d in &deltas {
            total_chars += d.content.len() + d.context.len() + d.location.len();
        }
        let token_estimate = total_chars / 4 + 50;

        SemanticState {
            app: app.to_string(),
            window: window.to_string(),
            activity,
            activity_duration_s: self.classifier.get_duration(),
            text_deltas: deltas,
            visible_summary,
            cursor_line: None,
            has_error,
            has_unsaved,
            ts_ms: now_ms(),
            token_estimate,
        }
    }

    /// Restarts delta encoding from a fresh "initial" state. Called on app
    /// change so stale line history from the previous app never leaks in.
    pub fn reset(&mut self) {
        self.delta_encoder.reset();
    }
}

fn create_summary(deltas: &[TextDelta]) -> String {
    if deltas.is_empty() {
        return String::new();
    }
    if deltas.len() == 1 && deltas[0].kind == DeltaKind::Initial {
        return deltas[0].content.clone();
    }

    deltas
        .iter()
        .take(3)
        .filter_map(|d| {
            let prefix = match d.kind {
                DeltaKind::Add => "+",
                DeltaKind::Remove => "-",
                DeltaKind::Modify => "~",
                DeltaKind::Initial => return None,
            };
            Some(format!("{prefix} {}", truncate_chars(&d.content, 50)))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn truncate_chars(text: &str, max_len: usize) -> String {
    text.chars().take(max_len).collect()
}

#[derive(Debug, Clone)]
pub struct ContextSnapshot {
    pub state: SemanticState,
    pub ts_ms: i64,
    pub id: u64,
}

#[derive(Debug, Clone)]
pub struct ContextQuery {
    pub since_ts_ms: Option<i64>,
    pub limit: usize,
    pub include_deltas: bool,
    pub include_summary: bool,
    pub compact: bool,
}

impl Default for ContextQuery {
    fn default() -> Self {
        Self {
            since_ts_ms: None,
            limit: DEFAULT_QUERY_LIMIT,
            include_deltas: true,
            include_summary: true,
            compact: false,
        }
    }
}

/// Rolling history of semantic states with a query surface for the agent.
/// Owns the `SemanticBuilder` outright so a reset can never be issued from
/// two places at once.
pub struct ContextBuilder {
    max_history: usize,
    builder: SemanticBuilder,
    history: VecDeque<ContextSnapshot>,
    next_id: u64,
    pub total_snapshots: u64,
    pub total_tokens_saved: u64,
}

impl Default for ContextBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_HISTORY)
    }
}

impl ContextBuilder {
    pub fn new(max_history: usize) -> Self {
        Self {
            max_history: max_history.max(1),
            builder: SemanticBuilder::new(),
            history: VecDeque::new(),
            next_id: 1,
            total_snapshots: 0,
            total_tokens_saved: 0,
        }
    }

    pub fn add_event(
        &mut self,
        ocr_text: &str,
        app: &str,
        window: &str,
        ssim: f32,
        app_changed: bool,
        window_changed: bool,
    ) -> SemanticState {
        if app_changed {
            self.builder.reset();
        }

        let state = self.builder.build(ocr_text, app, window, ssim, app_changed, window_changed);

        let snapshot = ContextSnapshot {
            state: state.clone(),
            ts_ms: state.ts_ms,
            id: self.next_id,
        };
        self.next_id += 1;
        self.history.push_back(snapshot);
        while self.history.len() > self.max_history {
            self.history.pop_front();
        }
        self.total_snapshots += 1;

        let raw_tokens = ocr_text.len() / 4;
        self.total_tokens_saved += raw_tokens.saturating_sub(state.token_estimate) as u64;

        state
    }

    pub fn query(&self, params: &ContextQuery) -> Value {
        let now = now_ms();
        let mut snapshots: Vec<&ContextSnapshot> = match params.since_ts_ms {
            Some(since) => self.history.iter().filter(|s| s.ts_ms >= since).collect(),
            None => self.history.iter().collect(),
        };
        if snapshots.len() > params.limit {
            let drop = snapshots.len() - params.limit;
            snapshots.drain(0..drop);
        }

        if params.compact {
            build_compact(&snapshots, now)
        } else {
            build_full(&snapshots, params, now)
        }
    }

    pub fn get_latest(&self) -> Option<&SemanticState> {
        self.history.back().map(|s| &s.state)
    }

    pub fn get_activity_summary(&self, window_s: f64) -> Value {
        let now = now_ms();
        let cutoff = now - (window_s * 1000.0) as i64;

        let mut counts: std::collections::BTreeMap<&'static str, u64> = std::collections::BTreeMap::new();
        for snap in &self.history {
            if snap.ts_ms < cutoff {
                continue;
            }
            *counts.entry(snap.state.activity.as_str()).or_insert(0) += 1;
        }
        let total: u64 = counts.values().sum();

        let breakdown: Value = if total > 0 {
            counts
                .into_iter()
                .map(|(k, v)| {
                    let pct = (v as f64 / total as f64 * 100.0).round();
                    (k.to_string(), json!({ "count": v, "pct": format!("{pct}%") }))
                })
                .collect::<serde_json::Map<_, _>>()
                .into()
        } else {
            json!({})
        };

        json!({
            "window_s": window_s,
            "total_events": total,
            "breakdown": breakdown,
        })
    }

    pub fn get_app_history(&self, limit: usize) -> Vec<Value> {
        let mut entries = Vec::new();
        let mut last_app = String::new();
        let mut last_ts = 0i64;

        for snap in &self.history {
            if snap.state.app != last_app {
                if !last_app.is_empty() {
                    entries.push(json!({
                        "app": last_app,
                        "ts": last_ts,
                        "duration_s": ((snap.ts_ms - last_ts) as f64 / 1000.0 * 10.0).round() / 10.0,
                    }));
                }
                last_app = snap.state.app.clone();
                last_ts = snap.ts_ms;
            }
        }

        if !last_app.is_empty() {
            let now = now_ms();
            entries.push(json!({
                "app": last_app,
                "ts": last_ts,
                "duration_s": ((now - last_ts) as f64 / 1000.0 * 10.0).round() / 10.0,
            }));
        }

        let start = entries.len().saturating_sub(limit);
        entries.split_off(start)
    }

    pub fn get_stats(&self) -> Value {
        json!({
            "total_snapshots": self.total_snapshots,
            "history_size": self.history.len(),
            "max_history": self.max_history,
            "total_tokens_saved": self.total_tokens_saved,
        })
    }

    pub fn clear(&mut self) {
        self.history.clear();
        self.builder.reset();
    }
}

fn empty_context(now: i64) -> Value {
    json!({
        "context": {
            "app": "unknown",
            "window": "",
            "activity": "unknown",
            "activity_duration_s": 0,
        },
        "events": [],
        "visible": {},
        "meta": {
            "ts": now,
            "event_count": 0,
            "token_estimate": 0,
        },
    })
}

fn build_full(snapshots: &[&ContextSnapshot], params: &ContextQuery, now: i64) -> Value {
    let Some(latest_snap) = snapshots.last() else {
        return empty_context(now);
    };
    let latest = &latest_snap.state;

    let events: Vec<Value> = snapshots
        .iter()
        .map(|snap| {
            let mut event = json!({
                "id": snap.id,
                "ago_s": ((now - snap.ts_ms) as f64 / 1000.0 * 10.0).round() / 10.0,
                "activity": snap.state.activity.as_str(),
            });
            if params.include_deltas && !snap.state.text_deltas.is_empty() {
                let changes: Vec<Value> = snap
                    .state
                    .text_deltas
                    .iter()
                    .take(5)
                    .map(|d| json!({ "type": d.kind.as_str(), "location": d.location, "delta": d.content }))
                    .collect();
                event["changes"] = json!(changes);
            }
            if snap.state.has_error {
                event["has_error"] = json!(true);
            }
            event
        })
        .collect();

    let mut result = json!({
        "context": {
            "app": latest.app,
            "window": latest.window,
            "activity": latest.activity.as_str(),
            "activity_duration_s": (latest.activity_duration_s * 10.0).round() / 10.0,
        },
        "events": events,
        "visible": {},
        "meta": {
            "ts": now,
            "event_count": snapshots.len(),
            "token_estimate": snapshots.iter().map(|s| s.state.token_estimate).sum::<usize>(),
        },
    });

    if params.include_summary && !latest.visible_summary.is_empty() {
        result["visible"]["summary"] = json!(latest.visible_summary);
    }
    if latest.has_error {
        result["visible"]["has_error"] = json!(true);
    }
    if latest.has_unsaved {
        result["visible"]["has_unsaved"] = json!(true);
    }

    result
}

fn build_compact(snapshots: &[&ContextSnapshot], now: i64) -> Value {
    let Some(latest_snap) = snapshots.last() else {
        return empty_context(now);
    };
    let latest = &latest_snap.state;

    let mut all_changes = Vec::new();
    for snap in snapshots.iter().rev().take(5).rev() {
        for d in snap.state.text_deltas.iter().take(3) {
            all_changes.push(format!("{}: {}", d.kind.as_str(), truncate_chars(&d.content, 50)));
        }
    }
    let recent: Vec<String> = all_changes.into_iter().rev().take(5).rev().collect();

    json!({
        "app": latest.app,
        "activity": latest.activity.as_str(),
        "duration_s": latest.activity_duration_s.round(),
        "changes": if recent.is_empty() { Value::Null } else { json!(recent) },
        "error": if latest.has_error { json!(true) } else { Value::Null },
        "ts": now,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_event_produces_an_initial_delta_and_nonzero_token_estimate() {
        let mut ctx = ContextBuilder::new(5);
        let state = ctx.add_event("Hello world", "Editor", "file.rs", 1.0, false, false);
        assert_eq!(state.text_deltas.len(), 1);
        assert_eq!(state.text_deltas[0].kind, DeltaKind::Initial);
        assert!(state.token_estimate > 0);
    }

    #[test]
    fn app_change_resets_the_delta_encoder_to_initial_again() {
        let mut ctx = ContextBuilder::new(5);
        ctx.add_event("one", "AppA", "win", 1.0, false, false);
        let second = ctx.add_event("two", "AppB", "win", 1.0, true, false);
        assert_eq!(second.activity, ActivityType::Navigation);
        assert_eq!(second.text_deltas[0].kind, DeltaKind::Initial);
    }

    #[test]
    fn history_is_bounded_to_max_history() {
        let mut ctx = ContextBuilder::new(3);
        for i in 0..10 {
            ctx.add_event(&format!("text {i}"), "App", "win", 1.0, false, false);
        }
        assert_eq!(ctx.get_stats()["history_size"], 3);
    }

    #[test]
    fn query_on_empty_history_returns_the_empty_context_shape() {
        let ctx = ContextBuilder::new(5);
        let result = ctx.query(&ContextQuery::default());
        assert_eq!(result["context"]["app"], "unknown");
        assert_eq!(result["meta"]["event_count"], 0);
    }

    #[test]
    fn unsaved_marker_in_window_title_sets_has_unsaved() {
        let mut ctx = ContextBuilder::new(5);
        let state = ctx.add_event("text", "Editor", "file.rs *", 1.0, false, false);
        assert!(state.has_unsaved);
    }

    #[test]
    fn compact_query_returns_a_flat_shape() {
        let mut ctx = ContextBuilder::new(5);
        ctx.add_event("hello", "App", "win", 1.0, false, false);
        let params = ContextQuery { compact: true, ..Default::default() };
        let result = ctx.query(&params);
        assert!(result.get("context").is_none());
        assert_eq!(result["app"], "App");
    }
}
