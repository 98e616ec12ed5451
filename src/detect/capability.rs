use std::time::Duration;

use anyhow::{bail, Result};

use crate::detect::result::RawDetection;
use crate::frame::Frame;

/// Detector capability trait.
///
/// This is the uniform contract every concrete detector implements. The
/// orchestrator depends only on this interface; model loading, frame
/// preprocessing and the actual classification logic live entirely behind
/// it.
///
/// Contract:
/// - `detect` must not mutate the frame (the type offers no way to).
/// - A detector is invoked with at most one outstanding call; it never has
///   to be re-entrant across frames.
/// - A call that exceeds the slot's configured timeout is abandoned and its
///   eventual result discarded.
/// - Errors are single failed invocations, never a stream abort.
pub trait Detector: Send {
    /// Stable detector name, used in logs.
    fn name(&self) -> &'static str;

    /// Run detection on one frame, returning zero or more raw detections.
    fn detect(&mut self, frame: &Frame) -> Result<Vec<RawDetection>>;

    /// Optional warm-up hook, called once on the slot worker before the
    /// first frame.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Per-detector configuration, recognized at registration time.
///
/// Invalid values are rejected when the detector is registered, before the
/// pipeline starts; they are never a runtime condition.
#[derive(Clone, Debug)]
pub struct DetectorConfig {
    /// A detection counts as positive iff `confidence >= confidence_threshold`.
    pub confidence_threshold: f32,
    /// Consecutive positive frames required before Started is emitted.
    pub min_consecutive_positive: u32,
    /// Consecutive negative/missing frames required before a confirmed
    /// event is retracted with Ended.
    pub min_consecutive_negative: u32,
    /// Refractory period after Ended during which the same (detector,
    /// subject) cannot start a new event instance. Measured in frame
    /// timestamps, not wall clock.
    pub cooldown: Duration,
    /// Per-invocation deadline; a slower call is abandoned and counted as
    /// a failure.
    pub timeout: Duration,
    /// Instantiate one confirmation state machine per reported subject id
    /// instead of a single machine for the detector.
    pub per_subject: bool,
    /// Minimum interval between Ongoing emissions while an event is live.
    /// `None` emits on every confirmed-positive frame.
    pub ongoing_interval: Option<Duration>,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        // Asymmetric thresholds: a not-yet-confirmed event is cheap to
        // retract, a confirmed one is expensive to retract.
        Self {
            confidence_threshold: 0.5,
            min_consecutive_positive: 3,
            min_consecutive_negative: 5,
            cooldown: Duration::from_secs(10),
            timeout: Duration::from_millis(500),
            per_subject: false,
            ongoing_interval: None,
        }
    }
}

impl DetectorConfig {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            bail!(
                "confidence_threshold must be within [0, 1], got {}",
                self.confidence_threshold
            );
        }
        if self.min_consecutive_positive == 0 {
            bail!("min_consecutive_positive must be at least 1");
        }
        if self.min_consecutive_negative == 0 {
            bail!("min_consecutive_negative must be at least 1");
        }
        if self.timeout.is_zero() {
            bail!("timeout must be greater than zero");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        DetectorConfig::default().validate().unwrap();
    }

    #[test]
    fn rejects_out_of_range_threshold() {
        let cfg = DetectorConfig {
            confidence_threshold: 1.5,
            ..DetectorConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_zero_runs_and_timeout() {
        let cfg = DetectorConfig {
            min_consecutive_positive: 0,
            ..DetectorConfig::default()
        };
        assert!(cfg.validate().is_err());

        let cfg = DetectorConfig {
            min_consecutive_negative: 0,
            ..DetectorConfig::default()
        };
        assert!(cfg.validate().is_err());

        let cfg = DetectorConfig {
            timeout: Duration::ZERO,
            ..DetectorConfig::default()
        };
        assert!(cfg.validate().is_err());
    }
}
