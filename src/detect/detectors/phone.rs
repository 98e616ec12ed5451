use anyhow::Result;

use super::stats::luminance_grid;
use crate::detect::{Detector, RawDetection, Region};
use crate::frame::Frame;

const GRID_COLS: usize = 16;
const GRID_ROWS: usize = 12;

/// Phone-usage heuristic: a compact, very dark, low-texture patch held in
/// the frame (screens read as flat dark slabs at surveillance exposure).
pub struct PhoneDetector {
    /// Cells at or below this mean luminance count as slab cells.
    dark_ceiling: f32,
    /// Slab cells at which confidence reaches 1.0.
    saturation_cells: usize,
}

impl PhoneDetector {
    pub fn new() -> Self {
        Self {
            dark_ceiling: 16.0,
            saturation_cells: 3,
        }
    }
}

impl Default for PhoneDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl Detector for PhoneDetector {
    fn name(&self) -> &'static str {
        "phone"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<RawDetection>> {
        let grid = luminance_grid(frame, GRID_COLS, GRID_ROWS);

        let mut slab_cells = 0usize;
        let (mut min_col, mut min_row) = (usize::MAX, usize::MAX);
        let (mut max_col, mut max_row) = (0usize, 0usize);
        for row in 0..GRID_ROWS {
            for col in 0..GRID_COLS {
                let (mean, variance) = grid.cell(col, row);
                if mean <= self.dark_ceiling && variance < 50.0 {
                    slab_cells += 1;
                    min_col = min_col.min(col);
                    min_row = min_row.min(row);
                    max_col = max_col.max(col);
                    max_row = max_row.max(row);
                }
            }
        }

        if slab_cells == 0 {
            return Ok(vec![]);
        }

        let confidence = (slab_cells as f32 / self.saturation_cells as f32).min(1.0);
        let region = Region::new(
            min_col as f32 / GRID_COLS as f32,
            min_row as f32 / GRID_ROWS as f32,
            (max_col - min_col + 1) as f32 / GRID_COLS as f32,
            (max_row - min_row + 1) as f32 / GRID_ROWS as f32,
        );
        Ok(vec![RawDetection::new(self.name(), confidence).with_region(region)])
    }
}
