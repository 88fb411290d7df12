//! Layered JSON configuration for the sense pipeline.
//!
//! Defaults are baked into the binary; a user-supplied JSON file is deep
//! merged on top of them (user wins, unknown keys preserved for forward
//! compatibility) rather than replacing a section wholesale.

pub mod control;

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CaptureSection {
    pub mode: String,
    pub target: u32,
    pub fps: f64,
    pub scale: f64,
}

impl Default for CaptureSection {
    fn default() -> Self {
        Self {
            mode: "screen".into(),
            target: 0,
            fps: 10.0,
            scale: 0.5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DetectionSection {
    pub ssim_threshold: f32,
    pub min_area: u32,
    pub roi_padding: u32,
    pub phash_threshold: u32,
    pub use_fast_gate: bool,
}

impl Default for DetectionSection {
    fn default() -> Self {
        Self {
            ssim_threshold: 0.92,
            min_area: 100,
            roi_padding: 20,
            phash_threshold: 5,
            use_fast_gate: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct OcrSection {
    pub enabled: bool,
    pub backend: String,
    pub languages: Vec<String>,
    pub lang: String,
    pub psm: u32,
    pub min_confidence: f32,
    pub cache_size: usize,
    pub cache_method: String,
    /// Upper bound on text regions OCR'd per tick — the "small worker pool"
    /// the orchestrator budgets against.
    pub max_regions: usize,
}

impl Default for OcrSection {
    fn default() -> Self {
        Self {
            enabled: true,
            backend: "auto".into(),
            languages: vec!["en".into()],
            lang: "eng".into(),
            psm: 11,
            min_confidence: 50.0,
            cache_size: 1000,
            cache_method: "content".into(),
            max_regions: 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GateSection {
    pub min_ocr_chars: usize,
    pub major_change_threshold: f32,
    pub cooldown_ms: u64,
    pub adaptive_cooldown_ms: u64,
    pub context_cooldown_ms: u64,
}

impl Default for GateSection {
    fn default() -> Self {
        Self {
            min_ocr_chars: 20,
            major_change_threshold: 0.85,
            cooldown_ms: 5000,
            adaptive_cooldown_ms: 2000,
            context_cooldown_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RelaySection {
    pub url: String,
    pub send_thumbnails: bool,
    pub max_image_kb: u64,
    pub use_websocket: bool,
    pub ws_reconnect_delay: f64,
    pub max_queue_size: usize,
    /// Auth token for the WebSocket handshake. Not part of the original
    /// JSON schema; read from an env var fallback (`SENSE_RELAY_TOKEN`)
    /// so secrets never need to live in the config file on disk.
    #[serde(skip)]
    pub token: String,
}

impl Default for RelaySection {
    fn default() -> Self {
        Self {
            url: "http://localhost:9500".into(),
            send_thumbnails: true,
            max_image_kb: 500,
            use_websocket: false,
            ws_reconnect_delay: 1.0,
            max_queue_size: 100,
            token: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RegionsSection {
    pub grid_size: usize,
    pub stability_threshold_s: f64,
    pub stability_min_samples: u32,
}

impl Default for RegionsSection {
    fn default() -> Self {
        Self {
            grid_size: 16,
            stability_threshold_s: 30.0,
            stability_min_samples: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TextDetectionSection {
    pub enabled: bool,
    pub threshold: f32,
    pub min_size: (u32, u32),
}

impl Default for TextDetectionSection {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: 0.4,
            min_size: (32, 16),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SemanticSection {
    pub enabled: bool,
    pub max_history: usize,
    pub context_lines: usize,
    pub max_deltas_per_event: usize,
}

impl Default for SemanticSection {
    fn default() -> Self {
        Self {
            enabled: true,
            max_history: 30,
            context_lines: 1,
            max_deltas_per_event: 5,
        }
    }
}

/// The merged, strongly typed configuration consumed by every crate.
///
/// `extra` keeps any JSON the user supplied under a section this struct
/// doesn't model, so a config file written against a future section layout
/// round-trips without losing data.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AppConfig {
    pub capture: CaptureSection,
    pub detection: DetectionSection,
    pub ocr: OcrSection,
    pub gate: GateSection,
    pub relay: RelaySection,
    pub regions: RegionsSection,
    pub text_detection: TextDetectionSection,
    pub semantic: SemanticSection,
    #[serde(flatten)]
    pub extra: Value,
}

impl AppConfig {
    /// Loads defaults, then deep-merges a user override file on top if one
    /// is given and exists. A missing path is not an error (defaults apply);
    /// a malformed file falls back to defaults with a warning, per the
    /// recoverable-config-failure policy.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let defaults = default_value();

        let merged = match path {
            Some(path) if path.exists() => match fs::read_to_string(path) {
                Ok(raw) => match serde_json::from_str::<Value>(&raw) {
                    Ok(user) => deep_merge(defaults, user),
                    Err(err) => {
                        warn!(?path, "malformed config JSON ({err}), falling back to defaults");
                        defaults
                    }
                },
                Err(err) => {
                    warn!(?path, "failed to read config file ({err}), falling back to defaults");
                    defaults
                }
            },
            Some(path) => {
                warn!(?path, "config path does not exist, using defaults");
                defaults
            }
            None => defaults,
        };

        let mut cfg: AppConfig =
            serde_json::from_value(merged).context("decoding merged configuration")?;
        cfg.relay.token = std::env::var("SENSE_RELAY_TOKEN").unwrap_or_default();
        Ok(cfg)
    }

    /// Convenience constructor for tests and CLI defaults.
    pub fn defaults() -> Self {
        Self::default()
    }
}

fn default_value() -> Value {
    serde_json::to_value(AppConfig::default()).expect("AppConfig defaults always serialize")
}

/// Recursively merges `overlay` onto `base`; overlay's scalars and array
/// values win, objects are merged key-by-key, and any key present only in
/// `overlay` is preserved (forward compatibility for unknown sections).
fn deep_merge(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(mut base_map), Value::Object(overlay_map)) => {
            for (key, overlay_val) in overlay_map {
                let merged = match base_map.remove(&key) {
                    Some(base_val) => deep_merge(base_val, overlay_val),
                    None => overlay_val,
                };
                base_map.insert(key, merged);
            }
            Value::Object(base_map)
        }
        (_, overlay) => overlay,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_round_trip() {
        let cfg = AppConfig::load(None).unwrap();
        assert_eq!(cfg.detection.ssim_threshold, 0.92);
        assert_eq!(cfg.regions.grid_size, 16);
    }

    #[test]
    fn user_override_merges_one_field_without_disturbing_siblings() {
        let base = default_value();
        let overlay = serde_json::json!({ "detection": { "ssimThreshold": 0.8 } });
        let merged = deep_merge(base, overlay);
        let cfg: AppConfig = serde_json::from_value(merged).unwrap();
        assert_eq!(cfg.detection.ssim_threshold, 0.8);
        assert_eq!(cfg.detection.min_area, 100);
    }

    #[test]
    fn unknown_section_is_preserved() {
        let base = default_value();
        let overlay = serde_json::json!({ "futureSection": { "flag": true } });
        let merged = deep_merge(base, overlay);
        assert_eq!(merged["futureSection"]["flag"], serde_json::json!(true));
    }
}
