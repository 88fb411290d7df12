//! OCR abstraction layer.
//!
//! The core pipeline never talks to a concrete OCR backend directly — it is
//! polymorphic over the `OcrEngine` capability, with concrete backends
//! selected once at startup. This keeps backend failures (timeouts, missing
//! native libraries) at the edge instead of leaking backend-specific error
//! types into the cache, the lazy store, or the orchestrator.

pub mod cache;
pub mod engine;
pub mod pending;

use anyhow::Result;
use async_trait::async_trait;

/// OCR text output: the text itself, a confidence score in `[0, 100]`, and
/// the token count used by the gate's quality heuristics.
#[derive(Debug, Clone, PartialEq)]
pub struct OcrPayload {
    pub text: String,
    pub confidence: f32,
    pub word_count: usize,
}

impl OcrPayload {
    pub fn empty() -> Self {
        Self {
            text: String::new(),
            confidence: 0.0,
            word_count: 0,
        }
    }

    pub fn new(text: impl Into<String>, confidence: f32) -> Self {
        let text = text.into();
        let word_count = text.split_whitespace().count();
        Self {
            text,
            confidence,
            word_count,
        }
    }
}

/// Metadata about the window/surface being processed.
#[derive(Debug, Clone, Default)]
pub struct OcrContext {
    pub window_name: String,
    pub app_name: String,
    pub is_focused: bool,
    pub languages: Vec<String>,
}

/// Capability all OCR backends must implement. Selected once at startup
/// (see `engine::build`); the rest of the pipeline never matches on which
/// concrete backend is live.
#[async_trait]
pub trait OcrEngine: Send + Sync {
    async fn recognize(&self, image_bytes: &[u8], context: &OcrContext) -> Result<OcrPayload>;

    fn name(&self) -> &'static str;
}
