//! Lazy OCR store: defers OCR until a consumer actually asks for context.
//!
//! Frames that survive change detection are recorded here without running
//! OCR. Only when `getLatestOcr`/`getOcrForContext` is called do the
//! regions go through the cache (and, on a cache miss, the engine). This
//! keeps the common "nobody asked for context yet" path cheap.

use image::{DynamicImage, GenericImageView};

use crate::cache::OcrCache;
use crate::OcrPayload;

pub struct PendingFrame {
    pub frame: DynamicImage,
    pub regions: Vec<(u32, u32, u32, u32)>,
    pub ts_ms: i64,
}

/// A bounded FIFO of frames awaiting OCR. `max_pending` caps memory use;
/// the oldest frame is dropped first when the bound is exceeded.
pub struct LazyOcrStore {
    max_pending: usize,
    pending: Vec<PendingFrame>,
    pub frames_stored: u64,
    pub frames_ocred: u64,
}

impl LazyOcrStore {
    pub fn new(max_pending: usize) -> Self {
        Self {
            max_pending: max_pending.max(1),
            pending: Vec::new(),
            frames_stored: 0,
            frames_ocred: 0,
        }
    }

    pub fn add_frame(&mut self, frame: DynamicImage, regions: Vec<(u32, u32, u32, u32)>, ts_ms: i64) {
        self.frames_stored += 1;
        self.pending.push(PendingFrame { frame, regions, ts_ms });
        while self.pending.len() > self.max_pending {
            self.pending.remove(0);
        }
    }

    /// Combined OCR of the most recent pending frame's first `max_regions`
    /// regions, each routed through `cache`. Regions are OCR'd in
    /// extraction order, so ties on text length resolve deterministically
    /// in the orchestrator rather than depending on worker completion
    /// order.
    pub fn get_latest_ocr<F>(&mut self, cache: &mut OcrCache, max_regions: usize, mut ocr_fn: F) -> OcrPayload
    where
        F: FnMut(&DynamicImage) -> OcrPayload,
    {
        let Some(entry) = self.pending.last() else {
            return OcrPayload::empty();
        };

        let mut texts = Vec::new();
        let mut total_conf = 0f32;
        let mut total_words = 0usize;

        for &(x, y, w, h) in entry.regions.iter().take(max_regions) {
            if w == 0 || h == 0 || x + w > entry.frame.width() || y + h > entry.frame.height() {
                continue;
            }
            let crop = entry.frame.view(x, y, w, h).to_image();
            let cropped = DynamicImage::ImageRgba8(crop);
            let result = cache.get_or_compute(&cropped, |img| ocr_fn(img));
            self.frames_ocred += 1;

            if !result.text.is_empty() {
                total_conf += result.confidence;
                total_words += result.word_count;
                texts.push(result.text);
            }
        }

        let n = texts.len();
        OcrPayload {
            text: texts.join("\n"),
            confidence: if n > 0 { total_conf / n as f32 } else { 0.0 },
            word_count: total_words,
        }
    }

    /// OCR results for every pending frame newer than `since_ts_ms`.
    pub fn get_ocr_for_context<F>(&mut self, cache: &mut OcrCache, since_ts_ms: i64, mut ocr_fn: F) -> Vec<OcrPayload>
    where
        F: FnMut(&DynamicImage) -> OcrPayload,
    {
        let mut results = Vec::new();
        let entries: Vec<(DynamicImage, Vec<(u32, u32, u32, u32)>)> = self
            .pending
            .iter()
            .filter(|p| p.ts_ms >= since_ts_ms)
            .map(|p| (p.frame.clone(), p.regions.clone()))
            .collect();

        for (frame, regions) in entries {
            for (x, y, w, h) in regions {
                if w == 0 || h == 0 || x + w > frame.width() || y + h > frame.height() {
                    continue;
                }
                let crop = DynamicImage::ImageRgba8(frame.view(x, y, w, h).to_image());
                let result = cache.get_or_compute(&crop, |img| ocr_fn(img));
                self.frames_ocred += 1;
                if !result.text.is_empty() {
                    results.push(result);
                }
            }
        }

        results
    }

    pub fn clear_old(&mut self, older_than_ms: i64) -> usize {
        let before = self.pending.len();
        self.pending.retain(|p| p.ts_ms >= older_than_ms);
        before - self.pending.len()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::HashMethod;
    use image::{ImageBuffer, Rgba};

    fn solid(width: u32, height: u32, value: u8) -> DynamicImage {
        DynamicImage::ImageRgba8(ImageBuffer::<Rgba<u8>, _>::from_pixel(width, height, Rgba([value, value, value, 255])))
    }

    #[test]
    fn overflowing_the_bound_drops_the_oldest_frame() {
        let mut store = LazyOcrStore::new(2);
        store.add_frame(solid(10, 10, 1), vec![], 0);
        store.add_frame(solid(10, 10, 2), vec![], 1);
        store.add_frame(solid(10, 10, 3), vec![], 2);
        assert_eq!(store.len(), 2);
        assert_eq!(store.pending[0].ts_ms, 1);
    }

    #[test]
    fn latest_ocr_is_empty_when_store_is_empty() {
        let mut store = LazyOcrStore::new(4);
        let mut cache = OcrCache::new(10, HashMethod::Content);
        let result = store.get_latest_ocr(&mut cache, 3, |_| OcrPayload::new("x", 90.0));
        assert!(result.text.is_empty());
    }

    #[test]
    fn latest_ocr_joins_region_text_and_routes_through_cache() {
        let mut store = LazyOcrStore::new(4);
        let frame = solid(100, 100, 7);
        store.add_frame(frame, vec![(0, 0, 20, 20), (40, 40, 20, 20)], 0);

        let mut cache = OcrCache::new(10, HashMethod::Content);
        let calls = std::cell::Cell::new(0);
        let result = store.get_latest_ocr(&mut cache, 2, |_| {
            calls.set(calls.get() + 1);
            OcrPayload::new("hi", 80.0)
        });

        assert_eq!(result.text, "hi\nhi");
        // Both regions have identical solid-color content, so they share a
        // fingerprint: the ocr_fn only actually runs once.
        assert_eq!(calls.get(), 1);
    }
}
