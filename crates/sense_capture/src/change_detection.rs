//! Multi-stage change detection: a perceptual-hash fast gate, SSIM
//! verification, and connected-component contour extraction.
//!
//! The three stages exist to keep the common case (a static screen) cheap:
//! stage 1 rejects near-duplicate frames for a few hundred integer
//! comparisons, stage 2 only runs the SSIM map when stage 1 didn't reject,
//! and stage 3 (labeling) only runs when stage 2 found enough dissimilarity.

use image::{imageops::FilterType, DynamicImage, GrayImage};
use tracing::trace;

pub const DEFAULT_SSIM_THRESHOLD: f32 = 0.92;
pub const SENSITIVE_SSIM_THRESHOLD: f32 = 0.85;
pub const DEFAULT_MIN_AREA: u32 = 100;
pub const DEFAULT_PHASH_THRESHOLD: u32 = 5;

const PHASH_SAMPLE: u32 = 32; // DCT input edge
const PHASH_LOW_FREQ: u32 = 8; // low-frequency block edge kept -> 64 bits
const SSIM_BLOCK: u32 = 4; // contour-map block edge, in pixels
const SSIM_C1: f64 = 0.01 * 255.0 * 0.01 * 255.0;
const SSIM_C2: f64 = 0.03 * 255.0 * 0.03 * 255.0;
const CONTOUR_BINARIZE_CUTOFF: f32 = 30.0 / 255.0;

#[derive(Debug, Clone)]
pub struct Contour {
    pub area: u32,
    pub bbox: (u32, u32, u32, u32),
}

#[derive(Debug, Clone)]
pub struct ChangeResult {
    pub ssim_score: f32,
    pub hamming_distance: Option<u32>,
    pub contours: Vec<Contour>,
    pub bbox: (u32, u32, u32, u32),
}

/// Tracks the previous accepted key frame (grayscale pixels + perceptual
/// hash) and the tunable thresholds used to gate subsequent frames.
pub struct ChangeDetector {
    prev_gray: Option<GrayImage>,
    prev_phash: Option<u64>,
    threshold: f32,
    min_area: u32,
    phash_threshold: u32,
    use_fast_gate: bool,
    pub ssim_calls: u64,
    pub phash_rejected: u64,
}

impl Default for ChangeDetector {
    fn default() -> Self {
        Self {
            prev_gray: None,
            prev_phash: None,
            threshold: DEFAULT_SSIM_THRESHOLD,
            min_area: DEFAULT_MIN_AREA,
            phash_threshold: DEFAULT_PHASH_THRESHOLD,
            use_fast_gate: true,
            ssim_calls: 0,
            phash_rejected: 0,
        }
    }
}

impl ChangeDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_params(threshold: f32, min_area: u32, phash_threshold: u32, use_fast_gate: bool) -> Self {
        Self {
            threshold,
            min_area,
            phash_threshold,
            use_fast_gate,
            ..Self::default()
        }
    }

    /// The orchestrator mutates this on app change (sensitive) and restores
    /// it ten seconds later (stable).
    pub fn set_threshold(&mut self, threshold: f32) {
        self.threshold = threshold;
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Returns `None` for "no change" under any of: first-frame bootstrap,
    /// resolution reset, fast-gate rejection, SSIM above threshold, or no
    /// contour surviving the minimum-area filter.
    pub fn evaluate(&mut self, image: &DynamicImage) -> Option<ChangeResult> {
        let gray = image.to_luma8();

        let phash = if self.use_fast_gate {
            Some(perceptual_hash(&gray))
        } else {
            None
        };

        if let (Some(hash), Some(prev_hash)) = (phash, self.prev_phash) {
            let distance = (hash ^ prev_hash).count_ones();
            if distance < self.phash_threshold {
                self.phash_rejected += 1;
                trace!(distance, "fast gate rejected frame");
                return None;
            }
        }

        let Some(prev_gray) = &self.prev_gray else {
            self.prev_gray = Some(gray);
            self.prev_phash = phash;
            return None;
        };

        if prev_gray.dimensions() != gray.dimensions() {
            trace!("resolution changed, resetting change detector state");
            self.prev_gray = Some(gray);
            self.prev_phash = phash;
            return None;
        }

        self.ssim_calls += 1;
        let (ssim_score, map, blocks_x, blocks_y) = compute_ssim_map(prev_gray, &gray);

        if ssim_score >= self.threshold {
            return None;
        }

        let contours = extract_contours(&map, blocks_x, blocks_y, self.min_area);
        if contours.is_empty() {
            return None;
        }

        let bbox = merge_bbox(&contours);

        let hamming_distance = match (phash, self.prev_phash) {
            (Some(h), Some(p)) => Some((h ^ p).count_ones()),
            _ => None,
        };

        // Key-frame update happens only now, on acceptance (stage 3 passed).
        self.prev_gray = Some(gray);
        self.prev_phash = phash;

        Some(ChangeResult {
            ssim_score,
            hamming_distance,
            contours,
            bbox,
        })
    }
}

/// 64-bit DCT-based perceptual hash (an 8x8 low-frequency block from a
/// 32x32 DCT). Bits are set where a coefficient exceeds the block median.
fn perceptual_hash(gray: &GrayImage) -> u64 {
    let small = image::DynamicImage::ImageLuma8(gray.clone())
        .resize_exact(PHASH_SAMPLE, PHASH_SAMPLE, FilterType::Triangle)
        .to_luma8();

    let pixels: Vec<f64> = small.iter().map(|&p| p as f64).collect();
    let coeffs = dct2d(&pixels, PHASH_SAMPLE as usize);

    let mut low_freq = Vec::with_capacity((PHASH_LOW_FREQ * PHASH_LOW_FREQ) as usize);
    for y in 0..PHASH_LOW_FREQ as usize {
        for x in 0..PHASH_LOW_FREQ as usize {
            low_freq.push(coeffs[y * PHASH_SAMPLE as usize + x]);
        }
    }

    let mut sorted = low_freq.clone();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let median = sorted[sorted.len() / 2];

    let mut hash: u64 = 0;
    for (i, &coef) in low_freq.iter().enumerate() {
        if coef > median {
            hash |= 1 << i;
        }
    }
    hash
}

/// Separable 2D DCT-II over an `n x n` row-major buffer.
fn dct2d(pixels: &[f64], n: usize) -> Vec<f64> {
    let mut rows = vec![0.0; n * n];
    for y in 0..n {
        let row = &pixels[y * n..(y + 1) * n];
        let transformed = dct1d(row);
        rows[y * n..(y + 1) * n].copy_from_slice(&transformed);
    }

    let mut out = vec![0.0; n * n];
    for x in 0..n {
        let col: Vec<f64> = (0..n).map(|y| rows[y * n + x]).collect();
        let transformed = dct1d(&col);
        for (y, v) in transformed.into_iter().enumerate() {
            out[y * n + x] = v;
        }
    }
    out
}

fn dct1d(input: &[f64]) -> Vec<f64> {
    let n = input.len();
    let mut output = vec![0.0; n];
    for k in 0..n {
        let mut sum = 0.0;
        for (i, &x) in input.iter().enumerate() {
            sum += x * ((std::f64::consts::PI / n as f64) * (i as f64 + 0.5) * k as f64).cos();
        }
        output[k] = sum;
    }
    output
}

/// Non-overlapping block SSIM map. Returns (global mean score, per-block
/// scores row-major, block columns, block rows).
fn compute_ssim_map(previous: &GrayImage, current: &GrayImage) -> (f32, Vec<f32>, u32, u32) {
    let (width, height) = current.dimensions();
    let blocks_x = (width / SSIM_BLOCK).max(1);
    let blocks_y = (height / SSIM_BLOCK).max(1);
    let mut map = vec![1.0f32; (blocks_x * blocks_y) as usize];

    for by in 0..blocks_y {
        for bx in 0..blocks_x {
            let x0 = bx * SSIM_BLOCK;
            let y0 = by * SSIM_BLOCK;
            let x1 = (x0 + SSIM_BLOCK).min(width);
            let y1 = (y0 + SSIM_BLOCK).min(height);

            let mut cur = Vec::new();
            let mut prev = Vec::new();
            for y in y0..y1 {
                for x in x0..x1 {
                    cur.push(current.get_pixel(x, y)[0] as f64);
                    prev.push(previous.get_pixel(x, y)[0] as f64);
                }
            }

            map[(by * blocks_x + bx) as usize] = block_ssim(&cur, &prev);
        }
    }

    let mean = map.iter().sum::<f32>() / map.len() as f32;
    (mean, map, blocks_x, blocks_y)
}

fn block_ssim(current: &[f64], previous: &[f64]) -> f32 {
    let n = current.len() as f64;
    if n == 0.0 {
        return 1.0;
    }

    let mean_c = current.iter().sum::<f64>() / n;
    let mean_p = previous.iter().sum::<f64>() / n;

    let var_c = current.iter().map(|v| (v - mean_c).powi(2)).sum::<f64>() / n;
    let var_p = previous.iter().map(|v| (v - mean_p).powi(2)).sum::<f64>() / n;

    let cov = current
        .iter()
        .zip(previous.iter())
        .map(|(c, p)| (c - mean_c) * (p - mean_p))
        .sum::<f64>()
        / n;

    let numerator = (2.0 * mean_c * mean_p + SSIM_C1) * (2.0 * cov + SSIM_C2);
    let denominator = (mean_c.powi(2) + mean_p.powi(2) + SSIM_C1) * (var_c + var_p + SSIM_C2);

    if denominator.abs() < f64::EPSILON {
        1.0
    } else {
        (numerator / denominator).clamp(-1.0, 1.0) as f32
    }
}

/// Binarizes `(1 - ssim) * 255` at cutoff 30, labels 4-connected components
/// over the block grid, and keeps those whose pixel-space area clears
/// `min_area`.
fn extract_contours(map: &[f32], blocks_x: u32, blocks_y: u32, min_area: u32) -> Vec<Contour> {
    let changed: Vec<bool> = map.iter().map(|&s| (1.0 - s) > CONTOUR_BINARIZE_CUTOFF).collect();
    let mut visited = vec![false; changed.len()];
    let mut contours = Vec::new();

    for start in 0..changed.len() {
        if !changed[start] || visited[start] {
            continue;
        }

        let mut stack = vec![start];
        let mut group = Vec::new();
        visited[start] = true;
        while let Some(idx) = stack.pop() {
            group.push(idx);
            let row = idx as u32 / blocks_x;
            let col = idx as u32 % blocks_x;

            let mut push_if_changed = |nr: i64, nc: i64, stack: &mut Vec<usize>| {
                if nr < 0 || nc < 0 || nr as u32 >= blocks_y || nc as u32 >= blocks_x {
                    return;
                }
                let nidx = (nr as u32 * blocks_x + nc as u32) as usize;
                if changed[nidx] && !visited[nidx] {
                    visited[nidx] = true;
                    stack.push(nidx);
                }
            };
            push_if_changed(row as i64 - 1, col as i64, &mut stack);
            push_if_changed(row as i64 + 1, col as i64, &mut stack);
            push_if_changed(row as i64, col as i64 - 1, &mut stack);
            push_if_changed(row as i64, col as i64 + 1, &mut stack);
        }

        let min_row = group.iter().map(|&i| i as u32 / blocks_x).min().unwrap();
        let max_row = group.iter().map(|&i| i as u32 / blocks_x).max().unwrap();
        let min_col = group.iter().map(|&i| i as u32 % blocks_x).min().unwrap();
        let max_col = group.iter().map(|&i| i as u32 % blocks_x).max().unwrap();

        let x = min_col * SSIM_BLOCK;
        let y = min_row * SSIM_BLOCK;
        let w = (max_col - min_col + 1) * SSIM_BLOCK;
        let h = (max_row - min_row + 1) * SSIM_BLOCK;
        let area = group.len() as u32 * SSIM_BLOCK * SSIM_BLOCK;

        if area >= min_area {
            contours.push(Contour {
                area,
                bbox: (x, y, w, h),
            });
        }
    }

    contours
}

fn merge_bbox(contours: &[Contour]) -> (u32, u32, u32, u32) {
    let min_x = contours.iter().map(|c| c.bbox.0).min().unwrap_or(0);
    let min_y = contours.iter().map(|c| c.bbox.1).min().unwrap_or(0);
    let max_x = contours.iter().map(|c| c.bbox.0 + c.bbox.2).max().unwrap_or(0);
    let max_y = contours.iter().map(|c| c.bbox.1 + c.bbox.3).max().unwrap_or(0);
    (min_x, min_y, max_x - min_x, max_y - min_y)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Luma, Rgba};

    fn solid(width: u32, height: u32, value: u8) -> DynamicImage {
        let buf = ImageBuffer::<Luma<u8>, _>::from_pixel(width, height, Luma([value]));
        DynamicImage::ImageLuma8(buf)
    }

    fn half_changed(width: u32, height: u32) -> DynamicImage {
        let mut buf = ImageBuffer::<Rgba<u8>, _>::from_pixel(width, height, Rgba([40, 40, 40, 255]));
        for y in 0..height {
            for x in (width / 2)..width {
                buf.put_pixel(x, y, Rgba([220, 220, 220, 255]));
            }
        }
        DynamicImage::ImageRgba8(buf)
    }

    #[test]
    fn first_frame_is_never_a_change() {
        let mut det = ChangeDetector::new();
        assert!(det.evaluate(&solid(64, 64, 10)).is_none());
    }

    #[test]
    fn identical_frames_yield_no_change() {
        let mut det = ChangeDetector::new();
        let frame = solid(64, 64, 10);
        det.evaluate(&frame);
        assert!(det.evaluate(&frame).is_none());
        assert!(det.evaluate(&frame).is_none());
    }

    #[test]
    fn large_visual_change_is_detected_with_contours() {
        let mut det = ChangeDetector::new();
        det.evaluate(&solid(64, 64, 10));
        let result = det.evaluate(&half_changed(64, 64));
        let result = result.expect("half the frame changing should register");
        assert!(result.ssim_score < DEFAULT_SSIM_THRESHOLD);
        assert!(!result.contours.is_empty());
    }

    #[test]
    fn resolution_change_resets_state_without_emitting_change() {
        let mut det = ChangeDetector::new();
        det.evaluate(&solid(64, 64, 10));
        assert!(det.evaluate(&solid(32, 32, 200)).is_none());
    }

    #[test]
    fn threshold_is_mutable_for_adaptive_sensitivity() {
        let mut det = ChangeDetector::new();
        det.set_threshold(SENSITIVE_SSIM_THRESHOLD);
        assert_eq!(det.threshold(), SENSITIVE_SSIM_THRESHOLD);
    }
}
