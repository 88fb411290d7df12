//! Grid-based region stability tracking.
//!
//! The frame is divided into a fixed grid of cells. Each cell carries a
//! cheap perceptual hash, a stability score, and the timestamp of its last
//! change. Cells that haven't changed in a while are promoted to "stable"
//! and can be skipped by a caller that wants to deprioritize known-static
//! UI (toolbars, status bars) when scanning for regions worth re-OCRing.

use image::{imageops::FilterType, DynamicImage, GenericImageView, GrayImage};

const HASH_SIZE: u32 = 4; // avg-hash edge -> 16 bits
const STABILITY_STEP_UP: f32 = 0.1;
const STABILITY_STEP_DOWN: f32 = 0.2;
const STABILITY_THRESHOLD: f32 = 0.5;

#[derive(Clone)]
struct CellState {
    hash: Option<u16>,
    mean: Option<f32>,
    std_dev: Option<f32>,
    last_change_ms: i64,
    change_count: u32,
    stability: f32,
}

impl CellState {
    fn new(now_ms: i64) -> Self {
        Self {
            hash: None,
            mean: None,
            std_dev: None,
            last_change_ms: now_ms,
            change_count: 0,
            stability: 0.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChangedRegion {
    pub index: usize,
    pub row: usize,
    pub col: usize,
    pub bbox: (u32, u32, u32, u32),
    pub is_stable: bool,
}

/// Tracks per-cell stability across calls to `analyze`. The grid resolution
/// is fixed at construction; a frame whose dimensions change is treated as
/// a brand-new surface and the whole grid is cleared (stability scores
/// measured against the old geometry don't mean anything against the new
/// one).
pub struct RegionTracker {
    grid_size: usize,
    stability_threshold_ms: i64,
    stability_min_samples: u32,
    cells: Vec<CellState>,
    frame_dims: Option<(u32, u32)>,
    cell_w: u32,
    cell_h: u32,
    pub total_analyses: u64,
    pub stable_regions_skipped: u64,
}

impl RegionTracker {
    pub fn new(grid_size: usize, stability_threshold_s: f64, stability_min_samples: u32) -> Self {
        let grid_size = grid_size.max(1);
        Self {
            grid_size,
            stability_threshold_ms: (stability_threshold_s * 1000.0) as i64,
            stability_min_samples,
            cells: (0..grid_size * grid_size).map(|_| CellState::new(0)).collect(),
            frame_dims: None,
            cell_w: 0,
            cell_h: 0,
            total_analyses: 0,
            stable_regions_skipped: 0,
        }
    }

    /// Changing the grid resolution invalidates all accumulated state.
    pub fn set_grid_size(&mut self, grid_size: usize) {
        let grid_size = grid_size.max(1);
        if grid_size != self.grid_size {
            self.grid_size = grid_size;
            self.reset();
        }
    }

    pub fn reset(&mut self) {
        self.cells = (0..self.grid_size * self.grid_size).map(|_| CellState::new(0)).collect();
        self.frame_dims = None;
    }

    /// Returns the cells that changed this tick. A cell already deemed
    /// stable is omitted when `skip_stable` is set, matching the
    /// skip-cache contract the orchestrator uses to avoid re-processing
    /// known-static UI.
    pub fn analyze(&mut self, image: &DynamicImage, skip_stable: bool, now_ms: i64) -> Vec<ChangedRegion> {
        self.total_analyses += 1;
        let (width, height) = image.dimensions();

        if self.frame_dims != Some((width, height)) {
            self.reset();
            self.frame_dims = Some((width, height));
        }

        let gray = image.to_luma8();
        self.cell_w = (width / self.grid_size as u32).max(1);
        self.cell_h = (height / self.grid_size as u32).max(1);

        let mut changed = Vec::new();

        for row in 0..self.grid_size {
            for col in 0..self.grid_size {
                let x0 = col as u32 * self.cell_w;
                let y0 = row as u32 * self.cell_h;
                let x1 = (x0 + self.cell_w).min(width);
                let y1 = (y0 + self.cell_h).min(height);
                if x0 >= x1 || y0 >= y1 {
                    continue;
                }

                let cell_img = gray.view(x0, y0, x1 - x0, y1 - y0).to_image();
                let idx = row * self.grid_size + col;

                // New cell: register baseline and move on, nothing to compare yet.
                if self.cells[idx].hash.is_none() && self.cells[idx].mean.is_none() {
                    self.cells[idx].last_change_ms = now_ms;
                    record_signature(&mut self.cells[idx], &cell_img);
                    continue;
                }

                let state = &mut self.cells[idx];
                let is_same = signature_matches(state, &cell_img);
                record_signature(state, &cell_img);

                if !is_same {
                    state.last_change_ms = now_ms;
                    state.change_count += 1;
                    state.stability = (state.stability - STABILITY_STEP_DOWN).max(0.0);

                    let is_stable = state.stability > STABILITY_THRESHOLD;
                    if is_stable && skip_stable {
                        self.stable_regions_skipped += 1;
                        continue;
                    }

                    changed.push(ChangedRegion {
                        index: idx,
                        row,
                        col,
                        bbox: (x0, y0, self.cell_w, self.cell_h),
                        is_stable,
                    });
                } else if now_ms - state.last_change_ms >= self.stability_threshold_ms
                    && state.change_count >= self.stability_min_samples
                {
                    state.stability = (state.stability + STABILITY_STEP_UP).min(1.0);
                }
            }
        }

        changed
    }

    /// Flood-fills 4-connected neighborhoods over the changed cell indices
    /// and returns the merged pixel bounding box for each connected group.
    pub fn merge_adjacent_regions(&self, regions: &[ChangedRegion]) -> Vec<(u32, u32, u32, u32)> {
        if regions.is_empty() {
            return Vec::new();
        }

        let changed_indices: std::collections::HashSet<usize> = regions.iter().map(|r| r.index).collect();
        let mut visited = std::collections::HashSet::new();
        let mut merged = Vec::new();

        for region in regions {
            if visited.contains(&region.index) {
                continue;
            }

            let mut stack = vec![region.index];
            let mut group = Vec::new();
            visited.insert(region.index);
            while let Some(idx) = stack.pop() {
                group.push(idx);
                let row = idx / self.grid_size;
                let col = idx % self.grid_size;

                let mut push = |r: i64, c: i64, stack: &mut Vec<usize>| {
                    if r < 0 || c < 0 || r as usize >= self.grid_size || c as usize >= self.grid_size {
                        return;
                    }
                    let nidx = r as usize * self.grid_size + c as usize;
                    if changed_indices.contains(&nidx) && !visited.contains(&nidx) {
                        visited.insert(nidx);
                        stack.push(nidx);
                    }
                };
                push(row as i64 - 1, col as i64, &mut stack);
                push(row as i64 + 1, col as i64, &mut stack);
                push(row as i64, col as i64 - 1, &mut stack);
                push(row as i64, col as i64 + 1, &mut stack);
            }

            let min_row = group.iter().map(|&i| i / self.grid_size).min().unwrap();
            let max_row = group.iter().map(|&i| i / self.grid_size).max().unwrap();
            let min_col = group.iter().map(|&i| i % self.grid_size).min().unwrap();
            let max_col = group.iter().map(|&i| i % self.grid_size).max().unwrap();

            merged.push((
                min_col as u32 * self.cell_w,
                min_row as u32 * self.cell_h,
                (max_col - min_col + 1) as u32 * self.cell_w,
                (max_row - min_row + 1) as u32 * self.cell_h,
            ));
        }

        merged
    }

    pub fn dynamic_region_count(&self) -> usize {
        self.cells.iter().filter(|c| c.stability <= STABILITY_THRESHOLD).count()
    }

    pub fn stable_region_count(&self) -> usize {
        self.cells.iter().filter(|c| c.stability > STABILITY_THRESHOLD).count()
    }
}

fn record_signature(state: &mut CellState, cell: &GrayImage) {
    if cell.width() >= HASH_SIZE && cell.height() >= HASH_SIZE {
        state.hash = Some(avg_hash(cell));
    } else {
        let (mean, std_dev) = mean_std(cell);
        state.mean = Some(mean);
        state.std_dev = Some(std_dev);
    }
}

fn signature_matches(state: &CellState, cell: &GrayImage) -> bool {
    if cell.width() >= HASH_SIZE && cell.height() >= HASH_SIZE {
        let hash = avg_hash(cell);
        state.hash.map(|prev| hash == prev).unwrap_or(false)
    } else {
        let (mean, std_dev) = mean_std(cell);
        match (state.mean, state.std_dev) {
            (Some(prev_mean), Some(prev_std)) => (mean - prev_mean).abs() < 3.0 && (std_dev - prev_std).abs() < 3.0,
            _ => false,
        }
    }
}

fn avg_hash(cell: &GrayImage) -> u16 {
    let small = DynamicImage::ImageLuma8(cell.clone())
        .resize_exact(HASH_SIZE, HASH_SIZE, FilterType::Triangle)
        .to_luma8();
    let mean = small.iter().map(|&p| p as u32).sum::<u32>() / (HASH_SIZE * HASH_SIZE);
    let mut hash: u16 = 0;
    for (i, &p) in small.iter().enumerate() {
        if p as u32 > mean {
            hash |= 1 << i;
        }
    }
    hash
}

fn mean_std(cell: &GrayImage) -> (f32, f32) {
    let n = cell.len() as f32;
    if n == 0.0 {
        return (0.0, 0.0);
    }
    let mean = cell.iter().map(|&p| p as f32).sum::<f32>() / n;
    let variance = cell.iter().map(|&p| (p as f32 - mean).powi(2)).sum::<f32>() / n;
    (mean, variance.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Luma};

    fn solid(width: u32, height: u32, value: u8) -> DynamicImage {
        DynamicImage::ImageLuma8(ImageBuffer::<Luma<u8>, _>::from_pixel(width, height, Luma([value])))
    }

    #[test]
    fn new_cells_emit_no_change_on_first_sighting() {
        let mut tracker = RegionTracker::new(4, 30.0, 5);
        let regions = tracker.analyze(&solid(64, 64, 128), true, 0);
        assert!(regions.is_empty());
    }

    #[test]
    fn a_changing_cell_is_reported_until_it_accumulates_stability() {
        let mut tracker = RegionTracker::new(2, 30.0, 2);
        tracker.analyze(&solid(64, 64, 10), true, 0);
        // Repeated churn keeps stability at (or near) zero, so changes keep
        // being reported rather than silently skipped.
        let mut last = Vec::new();
        for (i, value) in [50u8, 10, 50, 10].into_iter().enumerate() {
            last = tracker.analyze(&solid(64, 64, value), true, (i as i64 + 1) * 1000);
        }
        assert!(!last.is_empty());
    }

    #[test]
    fn unchanged_cell_becomes_stable_after_threshold_and_samples() {
        let mut tracker = RegionTracker::new(2, 5.0, 2);
        tracker.analyze(&solid(64, 64, 10), true, 0);
        // Two changes to accumulate change_count, then long stretches of no change.
        tracker.analyze(&solid(64, 64, 200), true, 1_000);
        tracker.analyze(&solid(64, 64, 10), true, 2_000);
        // Now hold steady well past the stability threshold.
        tracker.analyze(&solid(64, 64, 10), true, 10_000);
        assert!(tracker.stable_region_count() > 0);
    }

    #[test]
    fn stable_cells_are_skipped_when_skip_stable_is_set() {
        let mut tracker = RegionTracker::new(2, 5.0, 1);
        tracker.analyze(&solid(64, 64, 10), true, 0);
        tracker.analyze(&solid(64, 64, 200), true, 1_000);
        tracker.analyze(&solid(64, 64, 10), true, 2_000);
        tracker.analyze(&solid(64, 64, 10), true, 10_000);
        assert!(tracker.stable_region_count() > 0);

        // A later change in a now-stable cell is hidden from the caller...
        let changed = tracker.analyze(&solid(64, 64, 250), true, 11_000);
        assert!(changed.is_empty());
        // ...but visible when the caller asks not to skip stable regions.
        let changed = tracker.analyze(&solid(64, 64, 10), false, 12_000);
        assert!(!changed.is_empty());
    }

    #[test]
    fn resolution_change_clears_the_grid() {
        let mut tracker = RegionTracker::new(4, 5.0, 1);
        for i in 0..6 {
            tracker.analyze(&solid(64, 64, 128), true, i * 1000);
        }
        assert!(tracker.stable_region_count() + tracker.dynamic_region_count() > 0);
        tracker.analyze(&solid(32, 32, 10), true, 7_000);
        // A brand new grid has no stable cells yet — everything just got registered.
        assert_eq!(tracker.stable_region_count(), 0);
    }

    #[test]
    fn merge_adjacent_regions_flood_fills_4_connected_cells() {
        let tracker = RegionTracker::new(4, 30.0, 5);
        let regions = vec![
            ChangedRegion { index: 0, row: 0, col: 0, bbox: (0, 0, 16, 16), is_stable: false },
            ChangedRegion { index: 1, row: 0, col: 1, bbox: (16, 0, 16, 16), is_stable: false },
            ChangedRegion { index: 15, row: 3, col: 3, bbox: (48, 48, 16, 16), is_stable: false },
        ];
        let merged = tracker.merge_adjacent_regions(&regions);
        assert_eq!(merged.len(), 2);
    }
}
