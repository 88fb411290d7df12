//! Activity classification: maps per-tick signals into a closed set of
//! user-activity states via a fixed decision ladder.

use std::time::Instant;

use once_cell::sync::Lazy;
use regex::Regex;

static ERROR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(error|exception|failed|failure|crash|denied|unauthorized|timeout|cannot|unable|invalid|warning)\b").unwrap()
});

static LOADING_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(loading|please wait|processing|connecting|syncing|uploading|downloading)\b").unwrap()
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActivityType {
    Typing,
    Scrolling,
    Navigation,
    Reading,
    Error,
    Loading,
    Idle,
    Unknown,
}

impl ActivityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityType::Typing => "typing",
            ActivityType::Scrolling => "scrolling",
            ActivityType::Navigation => "navigation",
            ActivityType::Reading => "reading",
            ActivityType::Error => "error",
            ActivityType::Loading => "loading",
            ActivityType::Idle => "idle",
            ActivityType::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ActivitySignals {
    pub change_rate: f64,
    pub change_size: usize,
    pub vertical_motion: f64,
    pub horizontal_motion: f64,
    pub app_changed: bool,
    pub window_changed: bool,
    pub url_changed: bool,
    pub duration_s: f64,
    pub ocr_contains_error: bool,
    pub ocr_contains_loading: bool,
}

pub struct ActivityClassifier {
    last_activity: ActivityType,
    activity_start: Instant,
}

impl Default for ActivityClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl ActivityClassifier {
    pub fn new() -> Self {
        Self {
            last_activity: ActivityType::Unknown,
            activity_start: Instant::now(),
        }
    }

    pub fn detect_error_content(text: &str) -> bool {
        ERROR_RE.is_match(text)
    }

    pub fn detect_loading_content(text: &str) -> bool {
        LOADING_RE.is_match(text)
    }

    /// First match wins. Anything not covered by the ladder keeps whatever
    /// activity was last classified (or `Unknown` before the first call).
    pub fn classify(&mut self, signals: &ActivitySignals, ocr_text: &str) -> ActivityType {
        let activity = if signals.app_changed || signals.window_changed || signals.url_changed {
            ActivityType::Navigation
        } else if signals.ocr_contains_error || Self::detect_error_content(ocr_text) {
            ActivityType::Error
        } else if signals.ocr_contains_loading || Self::detect_loading_content(ocr_text) {
            ActivityType::Loading
        } else if signals.change_rate > 2.0 && signals.change_size < 100 {
            ActivityType::Typing
        } else if signals.vertical_motion > 50.0 {
            ActivityType::Scrolling
        } else if signals.change_rate < 0.5 && signals.duration_s > 5.0 {
            ActivityType::Reading
        } else if signals.change_rate < 0.1 && signals.duration_s > 30.0 {
            ActivityType::Idle
        } else {
            return self.last_activity;
        };

        self.update_state(activity);
        activity
    }

    fn update_state(&mut self, activity: ActivityType) {
        if activity != self.last_activity {
            self.activity_start = Instant::now();
        }
        self.last_activity = activity;
    }

    pub fn get_duration(&self) -> f64 {
        self.activity_start.elapsed().as_secs_f64()
    }

    pub fn last_activity(&self) -> ActivityType {
        self.last_activity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signals() -> ActivitySignals {
        ActivitySignals::default()
    }

    #[test]
    fn app_change_wins_over_every_other_signal() {
        let mut classifier = ActivityClassifier::new();
        let mut s = signals();
        s.app_changed = true;
        s.change_rate = 10.0; // would otherwise read as typing
        assert_eq!(classifier.classify(&s, ""), ActivityType::Navigation);
    }

    #[test]
    fn error_keyword_in_ocr_text_is_detected_even_without_the_flag() {
        let mut classifier = ActivityClassifier::new();
        let s = signals();
        assert_eq!(classifier.classify(&s, "Connection FAILED: unauthorized"), ActivityType::Error);
    }

    #[test]
    fn frequent_small_changes_classify_as_typing() {
        let mut classifier = ActivityClassifier::new();
        let mut s = signals();
        s.change_rate = 3.0;
        s.change_size = 40;
        assert_eq!(classifier.classify(&s, ""), ActivityType::Typing);
    }

    #[test]
    fn unmatched_signals_fall_back_to_the_previous_activity() {
        let mut classifier = ActivityClassifier::new();
        let mut typing = signals();
        typing.change_rate = 3.0;
        typing.change_size = 10;
        assert_eq!(classifier.classify(&typing, ""), ActivityType::Typing);

        let ambiguous = signals(); // matches no rule
        assert_eq!(classifier.classify(&ambiguous, ""), ActivityType::Typing);
    }
}
