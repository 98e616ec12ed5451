/// Raw per-frame signal produced by a detector.
///
/// Ephemeral: consumed by the confirmation machines as soon as the frame's
/// fan-out joins, and not retained afterwards.
#[derive(Clone, Debug)]
pub struct RawDetection {
    /// Identifier of the detector that produced this signal.
    pub detector: String,
    /// Confidence in [0, 1].
    pub confidence: f32,
    /// Spatial extent (normalized 0..1 coordinates), when known.
    pub region: Option<Region>,
    /// Tracked subject id for per-subject detectors (e.g. a person track).
    pub subject: Option<String>,
}

impl RawDetection {
    pub fn new(detector: &str, confidence: f32) -> Self {
        Self {
            detector: detector.to_string(),
            confidence,
            region: None,
            subject: None,
        }
    }

    pub fn with_region(mut self, region: Region) -> Self {
        self.region = Some(region);
        self
    }

    pub fn with_subject(mut self, subject: &str) -> Self {
        self.subject = Some(subject.to_string());
        self
    }
}

/// Axis-aligned box in normalized 0..1 coordinates.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Region {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

impl Region {
    pub fn new(x: f32, y: f32, w: f32, h: f32) -> Self {
        Self { x, y, w, h }
    }

    pub fn center(&self) -> (f32, f32) {
        (self.x + self.w / 2.0, self.y + self.h / 2.0)
    }
}
