//! vigild - Vigil event engine daemon
//!
//! This daemon:
//! 1. Ingests frames from the configured source (synthetic or file)
//! 2. Fans each frame out to the enabled detectors with per-call timeouts
//! 3. Debounces raw detections into confirmed Started/Ongoing/Ended events
//! 4. Sheds load under backpressure instead of growing an unbounded queue
//! 5. Writes confirmed events and slot diagnostics to the process log

use anyhow::{anyhow, Result};
use std::time::Duration;

use vigil_engine::detect::detectors::detector_for_id;
use vigil_engine::{
    source_for_url, DetectorRegistry, LogSink, Orchestrator, VigildConfig,
};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut cfg = VigildConfig::load()?;
    // Synthetic sources produce frames instantly; pace them to the
    // configured rate so confirmation windows mean what they say.
    if cfg.source.url.starts_with("stub://") {
        cfg.engine.source_pace = Some(Duration::from_millis(
            1000 / u64::from(cfg.source.target_fps.max(1)),
        ));
    }

    let mut registry = DetectorRegistry::new();
    for det in cfg.enabled_detectors() {
        let detector = detector_for_id(&det.id)
            .ok_or_else(|| anyhow!("unknown detector '{}'", det.id))?;
        registry.register(&det.id, detector, det.config.clone())?;
    }

    log::info!(
        "vigild starting: source={} fps={} detectors={:?}",
        cfg.source.url,
        cfg.source.target_fps,
        registry.ids()
    );

    let source = source_for_url(&cfg.source)?;
    let mut orchestrator = Orchestrator::new(registry, cfg.engine.clone(), Box::new(LogSink))?;

    let handle = orchestrator.control_handle();
    ctrlc::set_handler(move || {
        log::info!("ctrl-c received, shutting down");
        handle.shutdown();
    })
    .map_err(|e| anyhow!("failed to install ctrl-c handler: {}", e))?;

    let summary = orchestrator.run(source)?;
    log::info!(
        "run complete: frames={} dropped={} events={} slot_disables={} avg_dispatch_ms={:.1}",
        summary.frames_processed,
        summary.frames_dropped,
        summary.events_emitted,
        summary.slot_disables,
        summary.avg_dispatch_ms
    );
    Ok(())
}
