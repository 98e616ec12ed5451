use anyhow::Result;

use super::stats::luminance_grid;
use crate::detect::{Detector, RawDetection, Region};
use crate::frame::Frame;

const GRID_COLS: usize = 16;
const GRID_ROWS: usize = 12;

/// Hands-in-pockets posture heuristic.
///
/// A stand-in for a pose model: looks at the hip band (lower middle of the
/// frame) for person-bright cells whose interior is flat. Visible hands add
/// texture at the hip line; tucked hands leave the silhouette smooth.
pub struct HandsInPocketsDetector {
    /// Cells at or above this mean luminance count as person mass.
    bright_floor: f32,
    /// Within-cell variance at which "smooth" confidence reaches zero.
    texture_ceiling: f32,
}

impl HandsInPocketsDetector {
    pub fn new() -> Self {
        Self {
            bright_floor: 120.0,
            texture_ceiling: 400.0,
        }
    }
}

impl Default for HandsInPocketsDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl Detector for HandsInPocketsDetector {
    fn name(&self) -> &'static str {
        "hands_in_pockets"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<RawDetection>> {
        let grid = luminance_grid(frame, GRID_COLS, GRID_ROWS);

        // Hip band: rows 7..10 of 12 (roughly 0.58..0.83 of frame height).
        // Cells straddling the silhouette edge carry huge variance, so the
        // posture score comes from the flattest person cell, not the mean.
        let band_rows = 7..10usize;
        let mut person_cells = 0usize;
        let mut min_texture = f32::MAX;
        for row in band_rows.clone() {
            for col in 0..GRID_COLS {
                let (mean, variance) = grid.cell(col, row);
                if mean >= self.bright_floor {
                    person_cells += 1;
                    min_texture = min_texture.min(variance);
                }
            }
        }

        // Nobody in the band: no posture to classify.
        if person_cells == 0 {
            return Ok(vec![]);
        }

        let smoothness = 1.0 - (min_texture / self.texture_ceiling).min(1.0);
        if smoothness <= 0.0 {
            return Ok(vec![]);
        }

        let region = Region::new(
            0.0,
            band_rows.start as f32 / GRID_ROWS as f32,
            1.0,
            band_rows.len() as f32 / GRID_ROWS as f32,
        );
        Ok(vec![
            RawDetection::new(self.name(), smoothness).with_region(region)
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_with_band(texture: bool) -> Frame {
        let (width, height) = (64usize, 48usize);
        let mut pixels = vec![20u8; width * height * 3];
        // Person mass filling grid rows 7..10 and columns 2..14 exactly.
        for y in 28..40 {
            for x in 8..56 {
                let i = (y * width + x) * 3;
                let v = if texture && x % 2 == 0 { 255 } else { 180 };
                pixels[i] = v;
                pixels[i + 1] = v;
                pixels[i + 2] = v;
            }
        }
        Frame::new(1, 100, width as u32, height as u32, pixels)
    }

    #[test]
    fn empty_scene_yields_nothing() {
        let mut detector = HandsInPocketsDetector::new();
        let frame = Frame::new(1, 100, 64, 48, vec![20u8; 64 * 48 * 3]);
        assert!(detector.detect(&frame).unwrap().is_empty());
    }

    #[test]
    fn smooth_silhouette_scores_higher_than_textured() {
        let mut detector = HandsInPocketsDetector::new();
        let smooth = detector.detect(&frame_with_band(false)).unwrap();
        let textured = detector.detect(&frame_with_band(true)).unwrap();
        let smooth_conf = smooth.first().map(|d| d.confidence).unwrap_or(0.0);
        let textured_conf = textured.first().map(|d| d.confidence).unwrap_or(0.0);
        assert!(smooth_conf > 0.5);
        assert!(smooth_conf > textured_conf);
    }
}
