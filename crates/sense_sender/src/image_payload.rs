//! Byte-budget JPEG encoding for event payloads: try quality 85 first (it
//! usually fits), binary-search `[20, 80]` for the largest quality that
//! clears the budget, and fall back to quality 20 unconditionally rather
//! than ever emitting nothing.

use std::io::Cursor;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView};

use sense_gate::ImagePayload;

const HIGH_QUALITY: u8 = 85;
const SEARCH_LO: u8 = 20;
const SEARCH_HI: u8 = 80;
const LAST_RESORT_QUALITY: u8 = 20;

/// Encodes `image` to base64 JPEG under `max_kb`. Converts RGBA to RGB
/// first (JPEG has no alpha channel) and optionally downscales by Lanczos
/// so the longest edge doesn't exceed `max_px`.
pub fn encode_jpeg_base64(image: &DynamicImage, max_kb: u64, max_px: Option<u32>) -> String {
    let mut image = image.clone();

    if let Some(max_px) = max_px {
        let longest = image.width().max(image.height());
        if longest > max_px && longest > 0 {
            let ratio = max_px as f64 / longest as f64;
            let w = ((image.width() as f64) * ratio).round().max(1.0) as u32;
            let h = ((image.height() as f64) * ratio).round().max(1.0) as u32;
            image = image.resize(w, h, FilterType::Lanczos3);
        }
    }

    let rgb = DynamicImage::ImageRgb8(image.to_rgb8());
    let max_bytes = max_kb * 1024;

    if let Some(bytes) = encode_at_quality(&rgb, HIGH_QUALITY) {
        if bytes.len() as u64 <= max_bytes {
            return BASE64.encode(bytes);
        }
    }

    let mut best: Option<Vec<u8>> = None;
    let (mut lo, mut hi) = (SEARCH_LO as i32, SEARCH_HI as i32);
    while lo <= hi {
        let mid = lo + (hi - lo) / 2;
        let fits = encode_at_quality(&rgb, mid as u8).filter(|bytes| bytes.len() as u64 <= max_bytes);
        match fits {
            Some(bytes) => {
                best = Some(bytes);
                lo = mid + 1;
            }
            None => hi = mid - 1,
        }
    }

    let bytes = best.unwrap_or_else(|| encode_at_quality(&rgb, LAST_RESORT_QUALITY).unwrap_or_default());
    BASE64.encode(bytes)
}

fn encode_at_quality(image: &DynamicImage, quality: u8) -> Option<Vec<u8>> {
    let mut buf = Vec::new();
    let encoder = JpegEncoder::new_with_quality(Cursor::new(&mut buf), quality);
    let (width, height) = image.dimensions();
    encoder
        .write_image(image.to_rgb8().as_raw(), width, height, image::ColorType::Rgb8)
        .ok()?;
    Some(buf)
}

/// Packages a full-frame thumbnail for `context` events.
pub fn package_full_frame(frame: &DynamicImage, max_kb: u64, max_px: u32) -> ImagePayload {
    let (w, h) = frame.dimensions();
    ImagePayload {
        data: encode_jpeg_base64(frame, max_kb, Some(max_px)),
        bbox: (0, 0, w, h),
        thumb: true,
    }
}

/// Packages a cropped ROI for `text`/`visual` events.
pub fn package_roi(roi: &DynamicImage, bbox: (u32, u32, u32, u32), max_kb: u64) -> ImagePayload {
    ImagePayload {
        data: encode_jpeg_base64(roi, max_kb, Some(384)),
        bbox,
        thumb: true,
    }
}

/// Packages a diff mask image, at full resolution (no thumbnail downscale).
pub fn package_diff(diff: &DynamicImage, max_kb: u64) -> ImagePayload {
    let (w, h) = diff.dimensions();
    ImagePayload {
        data: encode_jpeg_base64(diff, max_kb, None),
        bbox: (0, 0, w, h),
        thumb: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgba};

    fn noisy(width: u32, height: u32) -> DynamicImage {
        let mut buf = ImageBuffer::<Rgba<u8>, _>::new(width, height);
        for y in 0..height {
            for x in 0..width {
                let v = ((x * 37 + y * 91) % 256) as u8;
                buf.put_pixel(x, y, Rgba([v, 255 - v, v / 2, 255]));
            }
        }
        DynamicImage::ImageRgba8(buf)
    }

    #[test]
    fn encoded_payload_respects_the_byte_budget() {
        let image = noisy(800, 600);
        let encoded = encode_jpeg_base64(&image, 10, None);
        let raw_len = BASE64.decode(&encoded).unwrap().len();
        // Allow a little slack: the binary search is over JPEG quality, not
        // bytes directly, so the closest-fit result may land a hair under.
        assert!(raw_len <= 11 * 1024, "expected <= ~10KB, got {raw_len} bytes");
    }

    #[test]
    fn downscaling_by_max_px_shrinks_dimensions() {
        let image = noisy(1000, 500);
        let mut resized = image.clone();
        let ratio = 384.0 / 1000.0;
        resized = resized.resize(
            (1000.0 * ratio) as u32,
            (500.0 * ratio) as u32,
            FilterType::Lanczos3,
        );
        assert!(resized.width() <= 384);
    }

    #[test]
    fn rgba_input_encodes_without_error() {
        let image = noisy(64, 64);
        let encoded = encode_jpeg_base64(&image, 500, Some(384));
        assert!(!encoded.is_empty());
    }

    #[test]
    fn full_frame_package_covers_the_whole_image() {
        let image = noisy(200, 100);
        let payload = package_full_frame(&image, 200, 384);
        assert_eq!(payload.bbox, (0, 0, 200, 100));
        assert!(payload.thumb);
    }
}
