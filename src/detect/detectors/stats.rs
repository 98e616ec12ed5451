//! Shared per-cell luminance statistics for the reference detectors.

use crate::frame::Frame;

/// Per-cell mean and variance of luminance over a coarse grid.
pub(crate) struct CellGrid {
    pub cols: usize,
    pub rows: usize,
    pub mean: Vec<f32>,
    pub variance: Vec<f32>,
}

impl CellGrid {
    pub fn cell(&self, col: usize, row: usize) -> (f32, f32) {
        let i = row * self.cols + col;
        (self.mean[i], self.variance[i])
    }
}

/// Compute the grid. Cells on the right/bottom edge absorb the remainder
/// pixels so every pixel is counted exactly once.
pub(crate) fn luminance_grid(frame: &Frame, cols: usize, rows: usize) -> CellGrid {
    let width = frame.width() as usize;
    let height = frame.height() as usize;
    let pixels = frame.pixels();

    let mut sum = vec![0.0f64; cols * rows];
    let mut sum_sq = vec![0.0f64; cols * rows];
    let mut count = vec![0u32; cols * rows];

    for y in 0..height {
        let row = (y * rows / height).min(rows - 1);
        for x in 0..width {
            let col = (x * cols / width).min(cols - 1);
            let i = (y * width + x) * 3;
            let luma = 0.299 * pixels[i] as f64
                + 0.587 * pixels[i + 1] as f64
                + 0.114 * pixels[i + 2] as f64;
            let cell = row * cols + col;
            sum[cell] += luma;
            sum_sq[cell] += luma * luma;
            count[cell] += 1;
        }
    }

    let mut mean = vec![0.0f32; cols * rows];
    let mut variance = vec![0.0f32; cols * rows];
    for cell in 0..cols * rows {
        if count[cell] == 0 {
            continue;
        }
        let n = count[cell] as f64;
        let m = sum[cell] / n;
        mean[cell] = m as f32;
        variance[cell] = ((sum_sq[cell] / n) - m * m).max(0.0) as f32;
    }

    CellGrid {
        cols,
        rows,
        mean,
        variance,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_frame_has_zero_variance() {
        let frame = Frame::new(1, 100, 8, 8, vec![100u8; 8 * 8 * 3]);
        let grid = luminance_grid(&frame, 4, 4);
        for row in 0..4 {
            for col in 0..4 {
                let (mean, variance) = grid.cell(col, row);
                assert!((mean - 100.0).abs() < 0.5);
                assert!(variance < 0.5);
            }
        }
    }

    #[test]
    fn bright_quadrant_is_visible_in_means() {
        let mut pixels = vec![0u8; 8 * 8 * 3];
        // Top-left 4x4 pixels bright.
        for y in 0..4 {
            for x in 0..4 {
                let i = (y * 8 + x) * 3;
                pixels[i] = 255;
                pixels[i + 1] = 255;
                pixels[i + 2] = 255;
            }
        }
        let frame = Frame::new(1, 100, 8, 8, pixels);
        let grid = luminance_grid(&frame, 2, 2);
        assert!(grid.cell(0, 0).0 > 200.0);
        assert!(grid.cell(1, 1).0 < 10.0);
    }
}
