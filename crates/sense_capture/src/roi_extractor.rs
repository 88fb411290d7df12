//! Turns change-detector contours into cropped, padded, and merged regions
//! of interest ready to hand to OCR.

use crate::change_detection::Contour;

pub const DEFAULT_PADDING: u32 = 20;

#[derive(Debug, Clone)]
pub struct Roi {
    pub bbox: (u32, u32, u32, u32),
}

pub struct RoiExtractor {
    padding: u32,
}

impl RoiExtractor {
    pub fn new(padding: u32) -> Self {
        Self { padding }
    }

    /// Pads each contour's bounding box, clamps it to the frame, merges any
    /// boxes that end up overlapping after padding, and orders the result
    /// by area descending so callers that only want the most promising
    /// region can just take the first one.
    pub fn extract(&self, frame_dims: (u32, u32), contours: &[Contour]) -> Vec<Roi> {
        let (width, height) = frame_dims;
        let padded: Vec<(u32, u32, u32, u32)> = contours
            .iter()
            .map(|c| pad_and_clamp(c.bbox, self.padding, width, height))
            .collect();

        let mut merged = merge_overlapping(padded);
        merged.sort_by_key(|&(_, _, w, h)| std::cmp::Reverse(w as u64 * h as u64));
        merged.into_iter().map(|bbox| Roi { bbox }).collect()
    }
}

fn pad_and_clamp(
    bbox: (u32, u32, u32, u32),
    padding: u32,
    width: u32,
    height: u32,
) -> (u32, u32, u32, u32) {
    let (x, y, w, h) = bbox;
    let x0 = x.saturating_sub(padding);
    let y0 = y.saturating_sub(padding);
    let x1 = (x + w + padding).min(width);
    let y1 = (y + h + padding).min(height);
    (x0, y0, x1.saturating_sub(x0), y1.saturating_sub(y0))
}

fn overlaps(a: (u32, u32, u32, u32), b: (u32, u32, u32, u32)) -> bool {
    let (ax, ay, aw, ah) = a;
    let (bx, by, bw, bh) = b;
    ax < bx + bw && bx < ax + aw && ay < by + bh && by < ay + ah
}

fn union(a: (u32, u32, u32, u32), b: (u32, u32, u32, u32)) -> (u32, u32, u32, u32) {
    let x0 = a.0.min(b.0);
    let y0 = a.1.min(b.1);
    let x1 = (a.0 + a.2).max(b.0 + b.2);
    let y1 = (a.1 + a.3).max(b.1 + b.3);
    (x0, y0, x1 - x0, y1 - y0)
}

fn merge_overlapping(mut boxes: Vec<(u32, u32, u32, u32)>) -> Vec<(u32, u32, u32, u32)> {
    let mut merged = true;
    while merged {
        merged = false;
        'outer: for i in 0..boxes.len() {
            for j in (i + 1)..boxes.len() {
                if overlaps(boxes[i], boxes[j]) {
                    let combined = union(boxes[i], boxes[j]);
                    boxes[i] = combined;
                    boxes.remove(j);
                    merged = true;
                    break 'outer;
                }
            }
        }
    }
    boxes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn padding_clamps_to_frame_bounds() {
        let extractor = RoiExtractor::new(20);
        let contours = vec![Contour {
            area: 100,
            bbox: (0, 0, 10, 10),
        }];
        let rois = extractor.extract((100, 100), &contours);
        assert_eq!(rois.len(), 1);
        assert_eq!(rois[0].bbox.0, 0);
        assert_eq!(rois[0].bbox.1, 0);
    }

    #[test]
    fn overlapping_padded_boxes_are_merged() {
        let extractor = RoiExtractor::new(20);
        let contours = vec![
            Contour {
                area: 100,
                bbox: (0, 0, 10, 10),
            },
            Contour {
                area: 100,
                bbox: (15, 0, 10, 10),
            },
        ];
        let rois = extractor.extract((200, 200), &contours);
        assert_eq!(rois.len(), 1);
    }

    #[test]
    fn distant_boxes_stay_separate() {
        let extractor = RoiExtractor::new(5);
        let contours = vec![
            Contour {
                area: 100,
                bbox: (0, 0, 10, 10),
            },
            Contour {
                area: 100,
                bbox: (150, 150, 10, 10),
            },
        ];
        let rois = extractor.extract((200, 200), &contours);
        assert_eq!(rois.len(), 2);
    }
}
