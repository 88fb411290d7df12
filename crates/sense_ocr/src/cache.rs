//! Content-addressed OCR result cache. Skips re-running OCR on a region
//! that looks the same as one already seen, fingerprinted either with a
//! coarse perceptual hash ("content") or an exact pixel hash ("pixel").

use std::collections::HashMap;

use image::{imageops::FilterType, DynamicImage};
use md5::{Digest, Md5};

use crate::OcrPayload;

const CONTENT_SAMPLE: u32 = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashMethod {
    Content,
    Pixel,
}

impl HashMethod {
    pub fn parse(name: &str) -> Self {
        match name {
            "pixel" => HashMethod::Pixel,
            _ => HashMethod::Content,
        }
    }
}

struct Entry {
    payload: OcrPayload,
    last_used: u64,
}

/// A bounded LRU keyed by image fingerprint. Eviction picks the entry with
/// the oldest `last_used` tick rather than maintaining a separate ordered
/// list; fine at the default bound of 1000 entries.
pub struct OcrCache {
    max_size: usize,
    method: HashMethod,
    entries: HashMap<String, Entry>,
    clock: u64,
}

impl OcrCache {
    pub fn new(max_size: usize, method: HashMethod) -> Self {
        Self {
            max_size: max_size.max(1),
            method,
            entries: HashMap::new(),
            clock: 0,
        }
    }

    pub fn fingerprint(&self, image: &DynamicImage) -> String {
        match self.method {
            HashMethod::Content => content_hash(image),
            HashMethod::Pixel => pixel_hash(image),
        }
    }

    pub fn get(&mut self, key: &str) -> Option<OcrPayload> {
        self.clock += 1;
        let clock = self.clock;
        self.entries.get_mut(key).map(|entry| {
            entry.last_used = clock;
            entry.payload.clone()
        })
    }

    pub fn put(&mut self, key: String, payload: OcrPayload) {
        self.clock += 1;
        let clock = self.clock;
        if self.entries.len() >= self.max_size && !self.entries.contains_key(&key) {
            self.evict_oldest();
        }
        self.entries.insert(
            key,
            Entry {
                payload,
                last_used: clock,
            },
        );
    }

    fn evict_oldest(&mut self) {
        if let Some(oldest) = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.last_used)
            .map(|(key, _)| key.clone())
        {
            self.entries.remove(&oldest);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The sole integration point higher layers should use: on a cache hit
    /// `ocr_fn` is never invoked; on a miss it runs exactly once and the
    /// result is stored before being returned.
    pub fn get_or_compute<F>(&mut self, image: &DynamicImage, ocr_fn: F) -> OcrPayload
    where
        F: FnOnce(&DynamicImage) -> OcrPayload,
    {
        let key = self.fingerprint(image);
        if let Some(hit) = self.get(&key) {
            return hit;
        }
        let result = ocr_fn(image);
        self.put(key, result.clone());
        result
    }
}

fn content_hash(image: &DynamicImage) -> String {
    let small = image
        .resize_exact(CONTENT_SAMPLE, CONTENT_SAMPLE, FilterType::Triangle)
        .to_luma8();
    let mean = small.iter().map(|&p| p as u32).sum::<u32>() / (CONTENT_SAMPLE * CONTENT_SAMPLE);

    let mut packed = vec![0u8; ((CONTENT_SAMPLE * CONTENT_SAMPLE) as usize).div_ceil(8)];
    for (i, &p) in small.iter().enumerate() {
        if p as u32 > mean {
            packed[i / 8] |= 1 << (i % 8);
        }
    }

    hex_prefix(&Md5::digest(&packed), 16)
}

fn pixel_hash(image: &DynamicImage) -> String {
    hex_prefix(&Md5::digest(image.to_rgba8().as_raw()), 32)
}

fn hex_prefix(digest: &[u8], hex_len: usize) -> String {
    digest
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<String>()
        .chars()
        .take(hex_len)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgba};

    fn payload(text: &str) -> OcrPayload {
        OcrPayload::new(text, 90.0)
    }

    fn solid(value: u8) -> DynamicImage {
        DynamicImage::ImageRgba8(ImageBuffer::<Rgba<u8>, _>::from_pixel(40, 40, Rgba([value, value, value, 255])))
    }

    #[test]
    fn identical_images_share_a_content_fingerprint() {
        let cache = OcrCache::new(10, HashMethod::Content);
        assert_eq!(cache.fingerprint(&solid(100)), cache.fingerprint(&solid(100)));
    }

    #[test]
    fn pixel_method_distinguishes_near_identical_images() {
        let cache = OcrCache::new(10, HashMethod::Pixel);
        assert_ne!(cache.fingerprint(&solid(100)), cache.fingerprint(&solid(101)));
    }

    #[test]
    fn eviction_drops_the_least_recently_used_entry() {
        let mut cache = OcrCache::new(2, HashMethod::Content);
        cache.put("a".into(), payload("a"));
        cache.put("b".into(), payload("b"));
        cache.get("a"); // bump "a" ahead of "b"
        cache.put("c".into(), payload("c"));

        assert!(cache.get("a").is_some());
        assert!(cache.get("b").is_none());
        assert!(cache.get("c").is_some());
    }

    #[test]
    fn get_or_compute_invokes_ocr_fn_at_most_once_per_fingerprint() {
        let mut cache = OcrCache::new(10, HashMethod::Content);
        let calls = std::cell::Cell::new(0);
        let first = cache.get_or_compute(&solid(42), |_| {
            calls.set(calls.get() + 1);
            payload("hello")
        });
        let second = cache.get_or_compute(&solid(42), |_| {
            calls.set(calls.get() + 1);
            payload("should not run")
        });
        assert_eq!(calls.get(), 1);
        assert_eq!(first, second);
    }
}
