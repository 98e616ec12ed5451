use anyhow::{bail, Context, Result};

use crate::detect::capability::{Detector, DetectorConfig};

/// One registered detector, ready to be handed to the orchestrator.
pub struct DetectorRegistration {
    pub id: String,
    pub detector: Box<dyn Detector>,
    pub config: DetectorConfig,
}

/// Ordered registry of detectors.
///
/// Registration order is dispatch order, which keeps the per-frame join
/// and state-machine advancement deterministic. All configuration errors
/// (bad thresholds, duplicate or malformed ids) are rejected here, before
/// the pipeline starts.
#[derive(Default)]
pub struct DetectorRegistry {
    entries: Vec<DetectorRegistration>,
}

impl DetectorRegistry {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Register a detector under a unique id.
    pub fn register(
        &mut self,
        id: &str,
        detector: Box<dyn Detector>,
        config: DetectorConfig,
    ) -> Result<()> {
        crate::validate_detector_id(id)?;
        if self.entries.iter().any(|entry| entry.id == id) {
            bail!("detector '{}' already registered", id);
        }
        config
            .validate()
            .with_context(|| format!("invalid configuration for detector '{}'", id))?;
        self.entries.push(DetectorRegistration {
            id: id.to_string(),
            detector,
            config,
        });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Registered ids, in dispatch order.
    pub fn ids(&self) -> Vec<String> {
        self.entries.iter().map(|entry| entry.id.clone()).collect()
    }

    pub(crate) fn into_entries(self) -> Vec<DetectorRegistration> {
        self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::result::RawDetection;
    use crate::frame::Frame;

    struct NullDetector;

    impl Detector for NullDetector {
        fn name(&self) -> &'static str {
            "null"
        }

        fn detect(&mut self, _frame: &Frame) -> Result<Vec<RawDetection>> {
            Ok(vec![])
        }
    }

    #[test]
    fn registers_in_order() {
        let mut registry = DetectorRegistry::new();
        registry
            .register("fire", Box::new(NullDetector), DetectorConfig::default())
            .unwrap();
        registry
            .register("phone", Box::new(NullDetector), DetectorConfig::default())
            .unwrap();
        assert_eq!(registry.ids(), vec!["fire", "phone"]);
    }

    #[test]
    fn rejects_duplicate_id() {
        let mut registry = DetectorRegistry::new();
        registry
            .register("fire", Box::new(NullDetector), DetectorConfig::default())
            .unwrap();
        let err = registry
            .register("fire", Box::new(NullDetector), DetectorConfig::default())
            .unwrap_err();
        assert!(err.to_string().contains("already registered"));
    }

    #[test]
    fn rejects_malformed_id() {
        let mut registry = DetectorRegistry::new();
        assert!(registry
            .register("Fire!", Box::new(NullDetector), DetectorConfig::default())
            .is_err());
    }

    #[test]
    fn rejects_invalid_config() {
        let mut registry = DetectorRegistry::new();
        let cfg = DetectorConfig {
            confidence_threshold: -0.1,
            ..DetectorConfig::default()
        };
        assert!(registry.register("fire", Box::new(NullDetector), cfg).is_err());
    }
}
