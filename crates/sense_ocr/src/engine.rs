//! Concrete `OcrEngine` backends, tagged and selected once at startup from
//! `sense_config`'s `ocr.backend` string (`"auto"`, `"windows"`, `"stub"`).

use anyhow::Result;
use async_trait::async_trait;

use crate::{OcrContext, OcrEngine, OcrPayload};

/// Always returns empty text. Used when no capable native backend is
/// available on the current platform, or when OCR is disabled in config —
/// the orchestrator still gets a well-formed `OcrPayload` back rather than
/// special-casing "no engine" at every call site.
pub struct NoopOcr;

#[async_trait]
impl OcrEngine for NoopOcr {
    async fn recognize(&self, _image_bytes: &[u8], _context: &OcrContext) -> Result<OcrPayload> {
        Ok(OcrPayload::empty())
    }

    fn name(&self) -> &'static str {
        "noop"
    }
}

/// Picks a concrete backend for the configured name. `"auto"` resolves to
/// the best backend available on this platform (Windows-native where
/// compiled for Windows, otherwise the no-op stub until a Tesseract/cloud
/// backend is wired in).
pub fn build(name: &str) -> Box<dyn OcrEngine> {
    match name {
        #[cfg(target_os = "windows")]
        "windows" | "auto" => Box::new(windows_backend::WindowsOcr),
        #[cfg(not(target_os = "windows"))]
        "auto" => Box::new(NoopOcr),
        _ => Box::new(NoopOcr),
    }
}

#[cfg(target_os = "windows")]
mod windows_backend {
    use super::*;

    /// Placeholder for a `Windows.Media.Ocr`-backed engine. Bridging to the
    /// real WinRT API is future work; this keeps the tagged-variant shape
    /// the capability set expects so `build("windows")` has something to
    /// return on this platform today.
    pub struct WindowsOcr;

    #[async_trait]
    impl OcrEngine for WindowsOcr {
        async fn recognize(&self, _image_bytes: &[u8], context: &OcrContext) -> Result<OcrPayload> {
            Ok(OcrPayload::new(format!("[stub ocr for {}]", context.window_name), 0.0))
        }

        fn name(&self) -> &'static str {
            "windows-ocr"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn noop_backend_returns_empty_payload() {
        let engine = NoopOcr;
        let ctx = OcrContext::default();
        let payload = engine.recognize(&[], &ctx).await.unwrap();
        assert_eq!(payload.text, "");
        assert_eq!(payload.word_count, 0);
    }
}
