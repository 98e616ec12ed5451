use anyhow::Result;

use crate::detect::{Detector, RawDetection, Region};
use crate::frame::Frame;

/// Fire presence heuristic: fraction of warm, red-dominant pixels.
///
/// Confidence saturates once warm pixels cover `warm_saturation` of the
/// frame, and the reported region is the bounding box of the warm mass.
pub struct FireDetector {
    /// Warm-pixel fraction at which confidence reaches 1.0.
    warm_saturation: f32,
}

impl FireDetector {
    pub fn new() -> Self {
        Self {
            warm_saturation: 0.02,
        }
    }
}

impl Default for FireDetector {
    fn default() -> Self {
        Self::new()
    }
}

fn is_warm(r: u8, g: u8, b: u8) -> bool {
    r >= 180 && r as i32 >= g as i32 + 50 && g >= b
}

impl Detector for FireDetector {
    fn name(&self) -> &'static str {
        "fire"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<RawDetection>> {
        let width = frame.width() as usize;
        let height = frame.height() as usize;
        let pixels = frame.pixels();

        let mut warm = 0usize;
        let (mut min_x, mut min_y) = (usize::MAX, usize::MAX);
        let (mut max_x, mut max_y) = (0usize, 0usize);

        for y in 0..height {
            for x in 0..width {
                let i = (y * width + x) * 3;
                if is_warm(pixels[i], pixels[i + 1], pixels[i + 2]) {
                    warm += 1;
                    min_x = min_x.min(x);
                    min_y = min_y.min(y);
                    max_x = max_x.max(x);
                    max_y = max_y.max(y);
                }
            }
        }

        if warm == 0 {
            return Ok(vec![]);
        }

        let fraction = warm as f32 / (width * height) as f32;
        let confidence = (fraction / self.warm_saturation).min(1.0);
        let region = Region::new(
            min_x as f32 / width as f32,
            min_y as f32 / height as f32,
            (max_x - min_x + 1) as f32 / width as f32,
            (max_y - min_y + 1) as f32 / height as f32,
        );
        Ok(vec![RawDetection::new(self.name(), confidence).with_region(region)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat_frame(rgb: [u8; 3]) -> Frame {
        let mut pixels = Vec::with_capacity(32 * 32 * 3);
        for _ in 0..32 * 32 {
            pixels.extend_from_slice(&rgb);
        }
        Frame::new(1, 100, 32, 32, pixels)
    }

    #[test]
    fn dark_frame_yields_nothing() {
        let mut detector = FireDetector::new();
        let detections = detector.detect(&flat_frame([20, 20, 20])).unwrap();
        assert!(detections.is_empty());
    }

    #[test]
    fn warm_frame_saturates_confidence() {
        let mut detector = FireDetector::new();
        let detections = detector.detect(&flat_frame([230, 120, 30])).unwrap();
        assert_eq!(detections.len(), 1);
        assert!((detections[0].confidence - 1.0).abs() < f32::EPSILON);
        assert!(detections[0].region.is_some());
    }

    #[test]
    fn cool_bright_frame_is_not_fire() {
        let mut detector = FireDetector::new();
        // Bright but blue-dominant: a sky, not a flame.
        let detections = detector.detect(&flat_frame([120, 160, 230])).unwrap();
        assert!(detections.is_empty());
    }
}
