//! Vigil event engine.
//!
//! This crate turns a live or recorded video stream into stable,
//! debounced, timestamped events by orchestrating a configurable set of
//! independent detectors (fire, phone usage, hands-in-pockets posture,
//! people counting) under a uniform contract.
//!
//! # Architecture
//!
//! Frames flow `FrameSource -> Orchestrator -> DetectorSlot fan-out ->
//! ConfirmationMachine -> EventSink`:
//!
//! - `ingest`: frame sources. Synthetic scripted scenes for demos and
//!   tests, local files behind the `ingest-file-ffmpeg` feature.
//! - `detect`: the `Detector` capability contract, per-detector
//!   configuration, the validating registry, and the reference heuristic
//!   detectors.
//! - `pipeline`: the orchestration core. One worker thread per detector
//!   slot with per-call timeouts and failure isolation; per-(detector,
//!   subject) temporal confirmation machines that debounce flicker into
//!   Started/Ongoing/Ended transitions; backpressure that sheds the oldest
//!   buffered frame and degrades it to a missing observation.
//! - `events`: confirmed events, slot diagnostics and the non-blocking
//!   sink boundary.
//! - `config`: daemon configuration (JSON file + environment overrides).
//!
//! Detector failures are silent at the event level and loud at the
//! diagnostic level: a broken detector never fabricates or retracts an
//! event, but its slot emits an explicit disabled notification.

use anyhow::{bail, Result};
use std::sync::OnceLock;

pub mod config;
pub mod detect;
pub mod events;
pub mod frame;
pub mod ingest;
pub mod pipeline;

pub use config::{DetectorSettings, VigildConfig, KNOWN_DETECTORS};
pub use detect::detectors::{
    detector_for_id, FireDetector, HandsInPocketsDetector, PeopleCounter, PhoneDetector,
    StubDetector,
};
pub use detect::{Detector, DetectorConfig, DetectorRegistry, RawDetection, Region};
pub use events::{ChannelSink, ConfirmedEvent, EventKind, EventSink, LogSink, SinkMessage, SlotStatus};
pub use frame::{Frame, SharedFrame};
pub use ingest::{source_for_url, FrameSource, SourceConfig, SourceStats, SyntheticSource};
pub use pipeline::{
    ControlHandle, DetectorReport, EngineConfig, Orchestrator, Phase, RunSummary, StateSnapshot,
};

/// Validate a detector identifier: lowercase alphanumeric with
/// underscores, starting with a letter, at most 64 characters.
pub fn validate_detector_id(id: &str) -> Result<()> {
    static DETECTOR_ID_RE: OnceLock<regex::Regex> = OnceLock::new();
    let re = DETECTOR_ID_RE
        .get_or_init(|| regex::Regex::new(r"^[a-z][a-z0-9_]{0,63}$").unwrap());
    if !re.is_match(id) {
        bail!(
            "invalid detector id '{}' (expected lowercase [a-z][a-z0-9_], max 64 chars)",
            id
        );
    }
    Ok(())
}
