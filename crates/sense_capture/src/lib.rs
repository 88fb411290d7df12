//! Capture pipeline: monitor/window capture, multi-stage change detection,
//! region stability tracking, and text-likelihood pre-filtering.
//!
//! This crate only produces frames and describes what changed in them; the
//! orchestrator owns the tick loop, OCR dispatch, and egress.

pub mod app_detector;
pub mod change_detection;
pub mod monitor;
pub mod platform;
pub mod region_tracker;
pub mod roi_extractor;
pub mod text_filter;
pub mod window_capture;

use std::time::{SystemTime, UNIX_EPOCH};

use image::{imageops::FilterType, DynamicImage};
use once_cell::sync::Lazy;
use regex::Regex;

/// A single captured frame plus when it was taken.
#[derive(Clone)]
pub struct Frame {
    pub image: DynamicImage,
    pub captured_at_ms: i64,
    pub monitor_id: u32,
}

pub(crate) fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

/// Captures a whole monitor frame.
pub async fn capture_monitor_frame(monitor: &monitor::SafeMonitor) -> anyhow::Result<Frame> {
    let image = monitor.capture_image().await?;
    Ok(Frame {
        image,
        captured_at_ms: now_ms(),
        monitor_id: monitor.id(),
    })
}

/// Downscales a captured frame by `scale` (e.g. 0.5 halves both edges).
/// The orchestrator keeps one reduced copy per tick and runs every
/// downstream stage against it.
pub fn downscale(image: &DynamicImage, scale: f64) -> DynamicImage {
    if !(0.0..1.0).contains(&scale) {
        return image.clone();
    }
    let width = ((image.width() as f64) * scale).round().max(1.0) as u32;
    let height = ((image.height() as f64) * scale).round().max(1.0) as u32;
    image.resize_exact(width, height, FilterType::Triangle)
}

static URL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"https?://\S+").unwrap());

/// Pulls a URL out of a browser window's title bar, when the focused
/// window belongs to a recognized browser.
pub fn extract_browser_url(is_focused: bool, app_name: &str, window_title: &str) -> Option<String> {
    if !is_focused {
        return None;
    }

    let app = app_name.to_lowercase();
    let is_browser = [
        "chrome", "edge", "firefox", "brave", "opera", "vivaldi", "arc",
    ]
    .iter()
    .any(|needle| app.contains(needle));
    if !is_browser {
        return None;
    }

    let m = URL_RE.find(window_title)?;
    let mut url = m.as_str().to_string();
    while let Some(last) = url.chars().last() {
        if ",.;)]}>\"'".contains(last) {
            url.pop();
        } else {
            break;
        }
    }
    if url.is_empty() {
        None
    } else {
        Some(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn browser_url_is_extracted_and_trimmed() {
        let url = extract_browser_url(true, "Google Chrome", "Example – https://example.com/page).");
        assert_eq!(url.as_deref(), Some("https://example.com/page"));
    }

    #[test]
    fn non_browser_app_never_yields_a_url() {
        let url = extract_browser_url(true, "Notes", "https://example.com in a note");
        assert!(url.is_none());
    }

    #[test]
    fn unfocused_window_is_ignored() {
        let url = extract_browser_url(false, "Google Chrome", "https://example.com");
        assert!(url.is_none());
    }

    #[test]
    fn downscale_halves_dimensions() {
        let image = DynamicImage::new_rgba8(100, 50);
        let scaled = downscale(&image, 0.5);
        assert_eq!(scaled.width(), 50);
        assert_eq!(scaled.height(), 25);
    }
}
