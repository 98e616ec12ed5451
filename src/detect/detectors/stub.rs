use anyhow::Result;
use sha2::{Digest, Sha256};

use crate::detect::{Detector, RawDetection};
use crate::frame::Frame;

/// Stub detector for wiring tests. Hashes pixel content and reports
/// "motion" whenever consecutive frames differ, with a fixed confidence.
pub struct StubDetector {
    last_hash: Option<[u8; 32]>,
    confidence: f32,
}

impl StubDetector {
    pub fn new() -> Self {
        Self {
            last_hash: None,
            confidence: 0.85,
        }
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence;
        self
    }
}

impl Default for StubDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl Detector for StubDetector {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<RawDetection>> {
        let current_hash: [u8; 32] = Sha256::digest(frame.pixels()).into();

        let changed = match self.last_hash {
            Some(prev) => prev != current_hash,
            None => false,
        };
        self.last_hash = Some(current_hash);

        if changed {
            Ok(vec![RawDetection::new(self.name(), self.confidence)])
        } else {
            Ok(vec![])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(seq: u64, fill: u8) -> Frame {
        Frame::new(seq, seq * 100, 4, 4, vec![fill; 48])
    }

    #[test]
    fn reports_motion_on_content_change() {
        let mut detector = StubDetector::new();

        // First frame: nothing to compare against.
        assert!(detector.detect(&frame(1, 10)).unwrap().is_empty());
        // Changed content: motion.
        assert_eq!(detector.detect(&frame(2, 20)).unwrap().len(), 1);
        // Same content: still.
        assert!(detector.detect(&frame(3, 20)).unwrap().is_empty());
    }
}
