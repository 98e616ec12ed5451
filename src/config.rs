use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use crate::detect::DetectorConfig;
use crate::ingest::SourceConfig;
use crate::pipeline::EngineConfig;

const DEFAULT_SOURCE_URL: &str = "stub://front_camera";
const DEFAULT_TARGET_FPS: u32 = 10;
const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;
const DEFAULT_ONGOING_INTERVAL_MS: u64 = 1_000;

/// The detectors vigild knows how to construct, in dispatch order.
pub const KNOWN_DETECTORS: [&str; 4] = ["fire", "phone", "hands_in_pockets", "people_counter"];

#[derive(Debug, Deserialize, Default)]
struct VigildConfigFile {
    source: Option<SourceConfigFile>,
    engine: Option<EngineConfigFile>,
    detectors: Option<HashMap<String, DetectorConfigFile>>,
}

#[derive(Debug, Deserialize, Default)]
struct SourceConfigFile {
    url: Option<String>,
    target_fps: Option<u32>,
    width: Option<u32>,
    height: Option<u32>,
    total_frames: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct EngineConfigFile {
    frame_deadline_ms: Option<u64>,
    max_pending_frames: Option<usize>,
    failure_threshold: Option<u32>,
    slot_retry_secs: Option<u64>,
    state_idle_sweep_secs: Option<u64>,
    health_log_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    enabled: Option<bool>,
    confidence_threshold: Option<f32>,
    min_consecutive_positive: Option<u32>,
    min_consecutive_negative: Option<u32>,
    cooldown_ms: Option<u64>,
    timeout_ms: Option<u64>,
    per_subject: Option<bool>,
    ongoing_interval_ms: Option<u64>,
}

/// One detector as the daemon will register it.
#[derive(Clone, Debug)]
pub struct DetectorSettings {
    pub id: String,
    pub enabled: bool,
    pub config: DetectorConfig,
}

/// Full daemon configuration: JSON file named by `VIGIL_CONFIG`, then
/// environment overrides, then validation. Bad values never survive into
/// the running pipeline.
#[derive(Clone, Debug)]
pub struct VigildConfig {
    pub source: SourceConfig,
    pub engine: EngineConfig,
    pub detectors: Vec<DetectorSettings>,
}

impl VigildConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("VIGIL_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => read_config_file(Path::new(path))?,
            None => VigildConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg)?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: VigildConfigFile) -> Result<Self> {
        let source_file = file.source.unwrap_or_default();
        let source = SourceConfig {
            url: source_file
                .url
                .unwrap_or_else(|| DEFAULT_SOURCE_URL.to_string()),
            target_fps: source_file.target_fps.unwrap_or(DEFAULT_TARGET_FPS),
            width: source_file.width.unwrap_or(DEFAULT_WIDTH),
            height: source_file.height.unwrap_or(DEFAULT_HEIGHT),
            total_frames: source_file.total_frames,
        };

        let engine_file = file.engine.unwrap_or_default();
        let defaults = EngineConfig::default();
        let engine = EngineConfig {
            frame_deadline: engine_file
                .frame_deadline_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.frame_deadline),
            max_pending_frames: engine_file
                .max_pending_frames
                .unwrap_or(defaults.max_pending_frames),
            failure_threshold: engine_file
                .failure_threshold
                .unwrap_or(defaults.failure_threshold),
            // 0 disables automatic retry; absent means the 30s default.
            slot_retry_after: match engine_file.slot_retry_secs {
                None => Some(Duration::from_secs(30)),
                Some(0) => None,
                Some(secs) => Some(Duration::from_secs(secs)),
            },
            state_idle_sweep: engine_file
                .state_idle_sweep_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.state_idle_sweep),
            health_log_interval: engine_file
                .health_log_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.health_log_interval),
            source_pace: None,
        };

        let mut overrides = file.detectors.unwrap_or_default();
        let mut detectors = Vec::with_capacity(KNOWN_DETECTORS.len());
        for id in KNOWN_DETECTORS {
            let file_cfg = overrides.remove(id).unwrap_or_default();
            detectors.push(merge_detector(id, file_cfg));
        }
        if let Some(unknown) = overrides.keys().next() {
            return Err(anyhow!("unknown detector '{}' in config", unknown));
        }

        Ok(Self {
            source,
            engine,
            detectors,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(url) = std::env::var("VIGIL_SOURCE_URL") {
            if !url.trim().is_empty() {
                self.source.url = url;
            }
        }
        if let Ok(fps) = std::env::var("VIGIL_TARGET_FPS") {
            let fps: u32 = fps
                .parse()
                .map_err(|_| anyhow!("VIGIL_TARGET_FPS must be an integer"))?;
            self.source.target_fps = fps;
        }
        if let Ok(deadline) = std::env::var("VIGIL_FRAME_DEADLINE_MS") {
            let ms: u64 = deadline
                .parse()
                .map_err(|_| anyhow!("VIGIL_FRAME_DEADLINE_MS must be an integer"))?;
            self.engine.frame_deadline = Duration::from_millis(ms);
        }
        if let Ok(pending) = std::env::var("VIGIL_MAX_PENDING_FRAMES") {
            let n: usize = pending
                .parse()
                .map_err(|_| anyhow!("VIGIL_MAX_PENDING_FRAMES must be an integer"))?;
            self.engine.max_pending_frames = n;
        }
        if let Ok(threshold) = std::env::var("VIGIL_FAILURE_THRESHOLD") {
            let n: u32 = threshold
                .parse()
                .map_err(|_| anyhow!("VIGIL_FAILURE_THRESHOLD must be an integer"))?;
            self.engine.failure_threshold = n;
        }
        if let Ok(retry) = std::env::var("VIGIL_SLOT_RETRY_SECS") {
            let secs: u64 = retry
                .parse()
                .map_err(|_| anyhow!("VIGIL_SLOT_RETRY_SECS must be an integer"))?;
            self.engine.slot_retry_after = if secs == 0 {
                None
            } else {
                Some(Duration::from_secs(secs))
            };
        }
        if let Ok(list) = std::env::var("VIGIL_DETECTORS") {
            let enabled = split_csv(&list);
            if !enabled.is_empty() {
                for unknown in enabled
                    .iter()
                    .filter(|id| !KNOWN_DETECTORS.contains(&id.as_str()))
                {
                    return Err(anyhow!("unknown detector '{}' in VIGIL_DETECTORS", unknown));
                }
                for det in &mut self.detectors {
                    det.enabled = enabled.iter().any(|id| id == &det.id);
                }
            }
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        if self.source.target_fps == 0 {
            return Err(anyhow!("target_fps must be at least 1"));
        }
        self.engine.validate()?;
        for det in &self.detectors {
            crate::validate_detector_id(&det.id)?;
            det.config
                .validate()
                .map_err(|e| anyhow!("detector '{}': {}", det.id, e))?;
        }
        if !self.detectors.iter().any(|det| det.enabled) {
            return Err(anyhow!("no detectors enabled"));
        }
        Ok(())
    }

    /// Detectors the daemon should register, in dispatch order.
    pub fn enabled_detectors(&self) -> impl Iterator<Item = &DetectorSettings> {
        self.detectors.iter().filter(|det| det.enabled)
    }
}

fn merge_detector(id: &str, file: DetectorConfigFile) -> DetectorSettings {
    let defaults = detector_defaults(id);
    let config = DetectorConfig {
        confidence_threshold: file
            .confidence_threshold
            .unwrap_or(defaults.confidence_threshold),
        min_consecutive_positive: file
            .min_consecutive_positive
            .unwrap_or(defaults.min_consecutive_positive),
        min_consecutive_negative: file
            .min_consecutive_negative
            .unwrap_or(defaults.min_consecutive_negative),
        cooldown: file
            .cooldown_ms
            .map(Duration::from_millis)
            .unwrap_or(defaults.cooldown),
        timeout: file
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(defaults.timeout),
        per_subject: file.per_subject.unwrap_or(defaults.per_subject),
        ongoing_interval: file
            .ongoing_interval_ms
            .map(|ms| {
                if ms == 0 {
                    None
                } else {
                    Some(Duration::from_millis(ms))
                }
            })
            .unwrap_or(defaults.ongoing_interval),
    };
    DetectorSettings {
        id: id.to_string(),
        enabled: file.enabled.unwrap_or(true),
        config,
    }
}

/// Daemon defaults per detector. Slow-burning events (fire) confirm fast
/// and clear slowly; posture events need longer evidence; person tracks
/// recycle quickly.
fn detector_defaults(id: &str) -> DetectorConfig {
    let base = DetectorConfig {
        ongoing_interval: Some(Duration::from_millis(DEFAULT_ONGOING_INTERVAL_MS)),
        ..DetectorConfig::default()
    };
    match id {
        "fire" => DetectorConfig {
            min_consecutive_positive: 3,
            min_consecutive_negative: 5,
            cooldown: Duration::from_secs(10),
            ..base
        },
        "phone" => DetectorConfig {
            min_consecutive_positive: 4,
            min_consecutive_negative: 6,
            cooldown: Duration::from_secs(15),
            ..base
        },
        "hands_in_pockets" => DetectorConfig {
            confidence_threshold: 0.6,
            min_consecutive_positive: 5,
            min_consecutive_negative: 5,
            cooldown: Duration::from_secs(20),
            ..base
        },
        "people_counter" => DetectorConfig {
            min_consecutive_positive: 3,
            min_consecutive_negative: 4,
            cooldown: Duration::from_secs(5),
            per_subject: true,
            ..base
        },
        _ => base,
    }
}

fn read_config_file(path: &Path) -> Result<VigildConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}
