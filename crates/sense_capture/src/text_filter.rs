//! Text-likelihood pre-filtering: scores coarse grid blocks on how much
//! they look like text (edge density, contrast, horizontal pattern) so the
//! OCR pool skips regions unlikely to contain anything readable.

use image::{DynamicImage, GenericImageView, GrayImage};

const BLOCK_SIZE: u32 = 16;
const EDGE_WEIGHT: f32 = 0.4;
const CONTRAST_WEIGHT: f32 = 0.4;
const PATTERN_WEIGHT: f32 = 0.2;

#[derive(Debug, Clone)]
pub struct TextRegion {
    pub bbox: (u32, u32, u32, u32),
    pub score: f32,
}

#[derive(Debug, Clone)]
pub struct TextFilterConfig {
    pub enabled: bool,
    pub threshold: f32,
    pub min_size: (u32, u32),
}

impl Default for TextFilterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: 0.4,
            min_size: (32, 16),
        }
    }
}

/// Finds likely-text regions within `bbox` of `image`. Falls back to the
/// top two blocks by area when nothing clears the threshold, so a caller
/// never gets an empty result for a region that was worth cropping at all.
pub fn find_text_regions(image: &DynamicImage, bbox: (u32, u32, u32, u32), cfg: &TextFilterConfig) -> Vec<TextRegion> {
    if !cfg.enabled {
        return vec![TextRegion { bbox, score: 1.0 }];
    }

    let (bx, by, bw, bh) = bbox;
    if bw == 0 || bh == 0 {
        return Vec::new();
    }

    let cropped = image.view(bx, by, bw, bh).to_image();
    let gray = DynamicImage::ImageRgba8(cropped).to_luma8();

    let cols = (bw / BLOCK_SIZE).max(1);
    let rows = (bh / BLOCK_SIZE).max(1);
    let cell_w = (bw / cols).max(1);
    let cell_h = (bh / rows).max(1);

    let mut scores = vec![0f32; (cols * rows) as usize];
    let mut mask = vec![false; (cols * rows) as usize];

    for row in 0..rows {
        for col in 0..cols {
            let x0 = col * cell_w;
            let y0 = row * cell_h;
            let x1 = (x0 + cell_w).min(gray.width());
            let y1 = (y0 + cell_h).min(gray.height());
            if x0 >= x1 || y0 >= y1 {
                continue;
            }

            let block = gray.view(x0, y0, x1 - x0, y1 - y0).to_image();
            let score = text_likelihood(&block);
            let idx = (row * cols + col) as usize;
            scores[idx] = score;
            mask[idx] = score >= cfg.threshold;
        }
    }

    let mut regions = merge_marked_blocks(&mask, &scores, cols, rows, cell_w, cell_h, bx, by)
        .into_iter()
        .filter(|r| r.bbox.2 >= cfg.min_size.0 && r.bbox.3 >= cfg.min_size.1)
        .collect::<Vec<_>>();

    if regions.is_empty() {
        regions = top_two_by_area(&scores, cols, rows, cell_w, cell_h, bx, by);
    }

    regions
}

fn text_likelihood(block: &GrayImage) -> f32 {
    let edge = edge_density(block);
    let contrast = contrast_score(block);
    let pattern = horizontal_pattern_score(block);
    (EDGE_WEIGHT * edge + CONTRAST_WEIGHT * contrast + PATTERN_WEIGHT * pattern).clamp(0.0, 1.0)
}

/// Mean absolute vertical gradient (row-to-row delta), normalized to 0-255
/// and banded: below 0.02 is a uniform area, above 0.4 is noise/image, and
/// the score peaks around 0.1-0.2 where letter baselines typically fall.
fn edge_density(block: &GrayImage) -> f32 {
    let (w, h) = block.dimensions();
    if h < 2 {
        return 0.0;
    }
    let mut total = 0f32;
    let mut count = 0u32;
    for y in 0..(h - 1) {
        for x in 0..w {
            let a = block.get_pixel(x, y)[0] as i32;
            let b = block.get_pixel(x, y + 1)[0] as i32;
            total += (a - b).abs() as f32;
            count += 1;
        }
    }
    if count == 0 {
        return 0.0;
    }
    let edge_strength = total / count as f32 / 255.0;
    if edge_strength < 0.02 {
        0.0
    } else if edge_strength > 0.4 {
        (1.0 - (edge_strength - 0.4) * 2.0).max(0.0)
    } else {
        (edge_strength * 5.0).min(1.0)
    }
}

/// Distance between the two tallest bins of a 16-bin grayscale histogram,
/// normalized by the bin count. Text is usually bimodal (dark on light or
/// vice versa); the second peak is required to carry real mass or the
/// score is halved.
fn contrast_score(block: &GrayImage) -> f32 {
    let total = block.len() as f32;
    if total == 0.0 {
        return 0.0;
    }
    let mut hist = [0u32; 16];
    for &p in block.iter() {
        hist[(p as usize * 16 / 256).min(15)] += 1;
    }
    let mut bins: Vec<usize> = (0..16).collect();
    bins.sort_by(|&a, &b| hist[b].cmp(&hist[a]));
    let peak1 = bins[0];
    let peak2 = bins[1];

    let mut score = (peak1 as i32 - peak2 as i32).unsigned_abs() as f32 / 15.0;
    if hist[peak2] as f32 / total < 0.05 {
        score *= 0.5;
    }
    score.clamp(0.0, 1.0)
}

/// Variance of per-row means. Text lines alternate high/low brightness row
/// to row; a flat or gradient region has little row-to-row variance while
/// photo noise has far too much.
fn horizontal_pattern_score(block: &GrayImage) -> f32 {
    let (w, h) = block.dimensions();
    if w == 0 || h == 0 {
        return 0.0;
    }
    let row_means: Vec<f32> = (0..h)
        .map(|y| (0..w).map(|x| block.get_pixel(x, y)[0] as f32).sum::<f32>() / w as f32)
        .collect();
    let mean = row_means.iter().sum::<f32>() / row_means.len() as f32;
    let variance = row_means.iter().map(|&m| (m - mean).powi(2)).sum::<f32>() / row_means.len() as f32;

    if variance < 10.0 {
        0.0
    } else if variance > 5000.0 {
        0.5
    } else {
        (variance / 1000.0).min(1.0)
    }
}

#[allow(clippy::too_many_arguments)]
fn merge_marked_blocks(
    mask: &[bool],
    scores: &[f32],
    cols: u32,
    rows: u32,
    cell_w: u32,
    cell_h: u32,
    offset_x: u32,
    offset_y: u32,
) -> Vec<TextRegion> {
    let mut visited = vec![false; mask.len()];
    let mut regions = Vec::new();

    for start in 0..mask.len() {
        if !mask[start] || visited[start] {
            continue;
        }

        let mut stack = vec![start];
        let mut group = Vec::new();
        visited[start] = true;
        while let Some(idx) = stack.pop() {
            group.push(idx);
            let row = idx as u32 / cols;
            let col = idx as u32 % cols;

            let mut push = |r: i64, c: i64, stack: &mut Vec<usize>| {
                if r < 0 || c < 0 || r as u32 >= rows || c as u32 >= cols {
                    return;
                }
                let nidx = (r as u32 * cols + c as u32) as usize;
                if mask[nidx] && !visited[nidx] {
                    visited[nidx] = true;
                    stack.push(nidx);
                }
            };
            push(row as i64 - 1, col as i64, &mut stack);
            push(row as i64 + 1, col as i64, &mut stack);
            push(row as i64, col as i64 - 1, &mut stack);
            push(row as i64, col as i64 + 1, &mut stack);
        }

        let min_row = group.iter().map(|&i| i as u32 / cols).min().unwrap();
        let max_row = group.iter().map(|&i| i as u32 / cols).max().unwrap();
        let min_col = group.iter().map(|&i| i as u32 % cols).min().unwrap();
        let max_col = group.iter().map(|&i| i as u32 % cols).max().unwrap();
        let avg_score = group.iter().map(|&i| scores[i]).sum::<f32>() / group.len() as f32;

        regions.push(TextRegion {
            bbox: (
                offset_x + min_col * cell_w,
                offset_y + min_row * cell_h,
                (max_col - min_col + 1) * cell_w,
                (max_row - min_row + 1) * cell_h,
            ),
            score: avg_score,
        });
    }

    regions
}

#[allow(clippy::too_many_arguments)]
fn top_two_by_area(
    scores: &[f32],
    cols: u32,
    rows: u32,
    cell_w: u32,
    cell_h: u32,
    offset_x: u32,
    offset_y: u32,
) -> Vec<TextRegion> {
    let mut indexed: Vec<(usize, f32)> = scores.iter().copied().enumerate().collect();
    indexed.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap());
    indexed
        .into_iter()
        .take(2)
        .map(|(idx, score)| {
            let row = idx as u32 / cols;
            let col = idx as u32 % cols;
            TextRegion {
                bbox: (offset_x + col * cell_w, offset_y + row * cell_h, cell_w, cell_h),
                score,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgba};

    fn checkerboard(width: u32, height: u32) -> DynamicImage {
        let mut buf = ImageBuffer::<Rgba<u8>, _>::new(width, height);
        for y in 0..height {
            for x in 0..width {
                let v = if (x / 2 + y / 2) % 2 == 0 { 10 } else { 240 };
                buf.put_pixel(x, y, Rgba([v, v, v, 255]));
            }
        }
        DynamicImage::ImageRgba8(buf)
    }

    fn flat(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageRgba8(ImageBuffer::from_pixel(width, height, Rgba([128, 128, 128, 255])))
    }

    #[test]
    fn disabled_filter_returns_whole_bbox() {
        let cfg = TextFilterConfig {
            enabled: false,
            ..Default::default()
        };
        let img = flat(64, 64);
        let regions = find_text_regions(&img, (0, 0, 64, 64), &cfg);
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].bbox, (0, 0, 64, 64));
    }

    #[test]
    fn high_contrast_pattern_scores_above_threshold() {
        let cfg = TextFilterConfig::default();
        let img = checkerboard(64, 64);
        let regions = find_text_regions(&img, (0, 0, 64, 64), &cfg);
        assert!(!regions.is_empty());
    }

    #[test]
    fn flat_region_falls_back_to_top_two_blocks() {
        let cfg = TextFilterConfig {
            min_size: (1, 1),
            ..Default::default()
        };
        let img = flat(64, 64);
        let regions = find_text_regions(&img, (0, 0, 64, 64), &cfg);
        assert_eq!(regions.len(), 2);
    }
}
