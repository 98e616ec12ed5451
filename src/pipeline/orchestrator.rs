//! Orchestrator: the scheduling core.
//!
//! Per frame: fan out to every enabled slot, join within the frame
//! deadline, advance each detector's confirmation machines on a single
//! thread, forward the emitted batch to the sink in timestamp order, then
//! sweep idle states. Frames arrive through a bounded queue fed by a pump
//! thread; when processing falls behind, the oldest not-yet-dispatched
//! frame is shed and degraded to a missing observation for every enabled
//! detector, so run counters decay instead of stalling.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use serde::Serialize;

use crate::detect::DetectorRegistry;
use crate::events::{ConfirmedEvent, EventSink, SinkMessage, SlotStatus};
use crate::frame::{Frame, SharedFrame};
use crate::ingest::FrameSource;
use crate::pipeline::confirm::{ConfirmationMachine, StateSnapshot};
use crate::pipeline::slot::{DetectorSlot, SlotOutcome};

/// How long the loop blocks on an empty frame queue before servicing the
/// control channel again.
const CONTROL_POLL: Duration = Duration::from_millis(20);

/// How many dispatch latencies the rolling average keeps.
const LATENCY_WINDOW: usize = 64;

/// Engine-wide orchestration settings.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Global ceiling on the per-frame join deadline. The effective
    /// deadline is the slowest enabled slot timeout, capped by this.
    pub frame_deadline: Duration,
    /// Buffered, not-yet-dispatched frames beyond this are shed oldest
    /// first.
    pub max_pending_frames: usize,
    /// Consecutive failures (errors, timeouts, busy skips) that disable a
    /// slot.
    pub failure_threshold: u32,
    /// Re-enable a disabled slot after this long, if set. Operator action
    /// through the control handle works regardless.
    pub slot_retry_after: Option<Duration>,
    /// Reclaim confirmation states that sat in Idle this long.
    pub state_idle_sweep: Duration,
    /// Cadence of the health log line.
    pub health_log_interval: Duration,
    /// Artificial pacing for the source pump (used with synthetic or file
    /// sources; live sources pace themselves).
    pub source_pace: Option<Duration>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            frame_deadline: Duration::from_secs(1),
            max_pending_frames: 4,
            failure_threshold: 5,
            slot_retry_after: None,
            state_idle_sweep: Duration::from_secs(30),
            health_log_interval: Duration::from_secs(5),
            source_pace: None,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.frame_deadline.is_zero() {
            bail!("frame_deadline must be greater than zero");
        }
        if self.max_pending_frames == 0 {
            bail!("max_pending_frames must be at least 1");
        }
        if self.failure_threshold == 0 {
            bail!("failure_threshold must be at least 1");
        }
        Ok(())
    }
}

/// Per-detector health report for the control surface.
#[derive(Clone, Debug, Serialize)]
pub struct DetectorReport {
    pub detector: String,
    pub enabled: bool,
    pub consecutive_failures: u32,
    pub states: Vec<StateSnapshot>,
}

enum ControlRequest {
    SetEnabled {
        detector: String,
        enabled: bool,
        reply: Sender<Result<bool>>,
    },
    Query {
        reply: Sender<Vec<DetectorReport>>,
    },
    Shutdown,
}

/// Cloneable handle for runtime control: enable/disable a named detector,
/// query confirmation state. Requests are serviced between frames.
#[derive(Clone)]
pub struct ControlHandle {
    tx: Sender<ControlRequest>,
}

impl ControlHandle {
    /// Returns true when the call actually changed the slot state.
    pub fn set_enabled(&self, detector: &str, enabled: bool) -> Result<bool> {
        let (reply_tx, reply_rx) = bounded(1);
        self.tx
            .send(ControlRequest::SetEnabled {
                detector: detector.to_string(),
                enabled,
                reply: reply_tx,
            })
            .map_err(|_| anyhow::anyhow!("orchestrator gone"))?;
        reply_rx
            .recv()
            .map_err(|_| anyhow::anyhow!("orchestrator gone"))?
    }

    pub fn enable(&self, detector: &str) -> Result<bool> {
        self.set_enabled(detector, true)
    }

    pub fn disable(&self, detector: &str) -> Result<bool> {
        self.set_enabled(detector, false)
    }

    pub fn query(&self) -> Result<Vec<DetectorReport>> {
        let (reply_tx, reply_rx) = bounded(1);
        self.tx
            .send(ControlRequest::Query { reply: reply_tx })
            .map_err(|_| anyhow::anyhow!("orchestrator gone"))?;
        reply_rx
            .recv()
            .map_err(|_| anyhow::anyhow!("orchestrator gone"))
    }

    /// Ask the run loop to finish after the current frame. Fire-and-forget.
    pub fn shutdown(&self) {
        let _ = self.tx.send(ControlRequest::Shutdown);
    }
}

/// Counters accumulated over one run.
#[derive(Clone, Debug, Default, Serialize)]
pub struct RunSummary {
    pub frames_processed: u64,
    pub frames_dropped: u64,
    /// Frames discarded for violating sequence monotonicity.
    pub frames_out_of_order: u64,
    pub events_emitted: u64,
    pub slot_disables: u64,
    pub avg_dispatch_ms: f64,
}

struct LatencyWindow {
    samples: VecDeque<Duration>,
}

impl LatencyWindow {
    fn new() -> Self {
        Self {
            samples: VecDeque::with_capacity(LATENCY_WINDOW),
        }
    }

    fn push(&mut self, sample: Duration) {
        if self.samples.len() == LATENCY_WINDOW {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    fn avg_ms(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let total: Duration = self.samples.iter().sum();
        total.as_secs_f64() * 1000.0 / self.samples.len() as f64
    }
}

enum SourceMsg {
    Frame(Frame),
    Exhausted,
    Failed(anyhow::Error),
}

/// The scheduling core. Owns the slots, the confirmation machines and the
/// sink; everything it mutates is touched from the loop thread only.
pub struct Orchestrator {
    slots: Vec<DetectorSlot>,
    machines: Vec<ConfirmationMachine>,
    sink: Box<dyn EventSink>,
    config: EngineConfig,
    control_tx: Sender<ControlRequest>,
    control_rx: Receiver<ControlRequest>,
    summary: RunSummary,
    latency: LatencyWindow,
    last_seq: Option<u64>,
    last_ts_ms: u64,
    last_health_log: Instant,
    shutdown_requested: bool,
}

impl Orchestrator {
    /// Build the pipeline from a populated registry. Spawns one worker
    /// thread per detector. Rejected configurations never reach here; an
    /// empty registry is rejected now.
    pub fn new(
        registry: DetectorRegistry,
        config: EngineConfig,
        sink: Box<dyn EventSink>,
    ) -> Result<Self> {
        config.validate()?;
        if registry.is_empty() {
            bail!("no detectors registered");
        }

        let idle_sweep_ms = config.state_idle_sweep.as_millis() as u64;
        let mut slots = Vec::new();
        let mut machines = Vec::new();
        for entry in registry.into_entries() {
            machines.push(ConfirmationMachine::new(
                &entry.id,
                entry.config.clone(),
                idle_sweep_ms,
            ));
            slots.push(DetectorSlot::spawn(&entry.id, entry.detector, entry.config)?);
        }

        let (control_tx, control_rx) = unbounded();
        Ok(Self {
            slots,
            machines,
            sink,
            config,
            control_tx,
            control_rx,
            summary: RunSummary::default(),
            latency: LatencyWindow::new(),
            last_seq: None,
            last_ts_ms: 0,
            last_health_log: Instant::now(),
            shutdown_requested: false,
        })
    }

    pub fn control_handle(&self) -> ControlHandle {
        ControlHandle {
            tx: self.control_tx.clone(),
        }
    }

    pub fn summary(&self) -> RunSummary {
        let mut summary = self.summary.clone();
        summary.avg_dispatch_ms = self.latency.avg_ms();
        summary
    }

    /// Drive the pipeline from a frame source until it is exhausted.
    ///
    /// Source exhaustion ends the run cleanly with a summary; a source
    /// error is fatal and surfaces as `Err`, distinct from per-detector
    /// failures, which never terminate the run.
    pub fn run(&mut self, mut source: Box<dyn FrameSource>) -> Result<RunSummary> {
        source.connect().context("frame source connect failed")?;

        let (frame_tx, frame_rx) = bounded::<SourceMsg>(self.config.max_pending_frames * 2);
        let pace = self.config.source_pace;
        let pump = std::thread::Builder::new()
            .name("frame-pump".to_string())
            .spawn(move || loop {
                match source.next_frame() {
                    Ok(Some(frame)) => {
                        if frame_tx.send(SourceMsg::Frame(frame)).is_err() {
                            break;
                        }
                        if let Some(pace) = pace {
                            std::thread::sleep(pace);
                        }
                    }
                    Ok(None) => {
                        let _ = frame_tx.send(SourceMsg::Exhausted);
                        break;
                    }
                    Err(err) => {
                        let _ = frame_tx.send(SourceMsg::Failed(err));
                        break;
                    }
                }
            })
            .context("failed to spawn frame pump")?;

        let mut buffer: VecDeque<Frame> = VecDeque::new();
        let mut exhausted = false;

        loop {
            self.handle_control();
            if self.shutdown_requested {
                log::info!("shutdown requested, ending run");
                break;
            }

            // Pull everything currently queued without blocking.
            loop {
                match frame_rx.try_recv() {
                    Ok(SourceMsg::Frame(frame)) => buffer.push_back(frame),
                    Ok(SourceMsg::Exhausted) => exhausted = true,
                    Ok(SourceMsg::Failed(err)) => {
                        return Err(err.context("frame source failed"));
                    }
                    Err(_) => break,
                }
            }

            // Shed load: drop the oldest not-yet-dispatched frames.
            while buffer.len() > self.config.max_pending_frames {
                if let Some(frame) = buffer.pop_front() {
                    self.drop_frame(&frame);
                }
            }

            if let Some(frame) = buffer.pop_front() {
                self.process_frame(frame);
                continue;
            }
            if exhausted {
                break;
            }

            // Nothing buffered: block briefly so control stays responsive.
            match frame_rx.recv_timeout(CONTROL_POLL) {
                Ok(SourceMsg::Frame(frame)) => buffer.push_back(frame),
                Ok(SourceMsg::Exhausted) => exhausted = true,
                Ok(SourceMsg::Failed(err)) => return Err(err.context("frame source failed")),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => exhausted = true,
            }
        }

        // Disconnect the queue first: a pump blocked on a full channel (or
        // still pacing an endless source) exits on its next send.
        drop(frame_rx);
        let _ = pump.join();
        log::info!("run complete");
        Ok(self.summary())
    }

    /// Advance the pipeline by one frame. The run loop calls this; it is
    /// public so embedders and tests can drive the pipeline directly.
    pub fn process_frame(&mut self, frame: Frame) {
        let started = Instant::now();
        let seq = frame.seq();
        let ts_ms = frame.ts_ms();

        // Sources guarantee strictly increasing sequence numbers; anything
        // else would reorder detector streams, so it is discarded loudly.
        if let Some(last) = self.last_seq {
            if seq <= last {
                log::warn!("frame {} out of order (last was {}), discarding", seq, last);
                self.summary.frames_out_of_order += 1;
                return;
            }
        }
        self.last_seq = Some(seq);
        self.last_ts_ms = ts_ms;

        self.maybe_retry_slots();

        let frame: SharedFrame = SharedFrame::new(frame);
        let mut dispatched = vec![false; self.slots.len()];
        let mut slowest = Duration::ZERO;
        for (i, slot) in self.slots.iter_mut().enumerate() {
            if !slot.is_enabled() {
                continue;
            }
            slowest = slowest.max(slot.config().timeout);
            dispatched[i] = slot.dispatch(&frame);
        }
        let frame_deadline = started + slowest.min(self.config.frame_deadline);

        // Join, then advance the machines single-threaded so counter
        // updates never interleave.
        let mut batch: Vec<ConfirmedEvent> = Vec::new();
        for i in 0..self.slots.len() {
            if !self.slots[i].is_enabled() {
                continue;
            }
            let outcome = if dispatched[i] {
                self.slots[i].collect(seq, frame_deadline)
            } else {
                SlotOutcome::Busy
            };
            match outcome {
                SlotOutcome::Detections(detections) => {
                    self.slots[i].record_success();
                    self.machines[i].observe(ts_ms, seq, &detections, &mut batch);
                }
                SlotOutcome::Failed | SlotOutcome::TimedOut | SlotOutcome::Busy => {
                    if self.slots[i].record_failure(self.config.failure_threshold) {
                        self.notify_slot_status(i, false, "consecutive failure threshold reached");
                    }
                    self.machines[i].observe_missing(ts_ms, seq, &mut batch);
                }
                SlotOutcome::Disabled => {}
            }
        }

        self.forward(batch);
        for machine in &mut self.machines {
            machine.sweep(ts_ms);
        }

        self.summary.frames_processed += 1;
        self.latency.push(started.elapsed());
        self.maybe_log_health();
    }

    /// Account a frame shed under backpressure: every enabled detector's
    /// machines see a missing observation, so confirmation decays exactly
    /// as it would on an explicit negative.
    fn drop_frame(&mut self, frame: &Frame) {
        let seq = frame.seq();
        let ts_ms = frame.ts_ms();
        if let Some(last) = self.last_seq {
            if seq <= last {
                self.summary.frames_out_of_order += 1;
                return;
            }
        }
        self.last_seq = Some(seq);
        self.last_ts_ms = ts_ms;
        log::debug!("backpressure: dropping frame {} undispatched", seq);

        let mut batch: Vec<ConfirmedEvent> = Vec::new();
        for i in 0..self.slots.len() {
            if !self.slots[i].is_enabled() {
                continue;
            }
            self.machines[i].observe_missing(ts_ms, seq, &mut batch);
        }
        self.forward(batch);
        self.summary.frames_dropped += 1;
    }

    /// Deliver a frame's emissions in timestamp order. The sort is stable
    /// and a machine emits at most one event per frame, so per-(detector,
    /// subject) ordering is preserved.
    fn forward(&mut self, mut batch: Vec<ConfirmedEvent>) {
        batch.sort_by_key(|ev| ev.event_ts_ms());
        self.summary.events_emitted += batch.len() as u64;
        for ev in batch {
            self.sink.deliver(SinkMessage::Event(ev));
        }
    }

    fn maybe_retry_slots(&mut self) {
        let Some(retry_after) = self.config.slot_retry_after else {
            return;
        };
        for i in 0..self.slots.len() {
            if self.slots[i].retry_due(retry_after) {
                self.slots[i].set_enabled(true);
                self.notify_slot_status(i, true, "retry interval elapsed");
            }
        }
    }

    fn notify_slot_status(&mut self, slot_index: usize, enabled: bool, reason: &str) {
        let notice = SlotStatus {
            detector: self.slots[slot_index].id().to_string(),
            enabled,
            reason: reason.to_string(),
            ts_ms: self.last_ts_ms,
        };
        if enabled {
            log::info!("detector {} re-enabled ({})", notice.detector, reason);
        } else {
            log::warn!("detector {} disabled ({})", notice.detector, reason);
            self.summary.slot_disables += 1;
        }
        self.sink.deliver(SinkMessage::Status(notice));
    }

    /// Service the control channel: enable/disable by name, state queries.
    pub fn handle_control(&mut self) {
        while let Ok(request) = self.control_rx.try_recv() {
            match request {
                ControlRequest::SetEnabled {
                    detector,
                    enabled,
                    reply,
                } => {
                    let result = match self.slots.iter().position(|slot| slot.id() == detector) {
                        Some(i) => {
                            let changed = self.slots[i].set_enabled(enabled);
                            if changed {
                                self.notify_slot_status(i, enabled, "operator request");
                            }
                            Ok(changed)
                        }
                        None => Err(anyhow::anyhow!("unknown detector '{}'", detector)),
                    };
                    let _ = reply.send(result);
                }
                ControlRequest::Shutdown => {
                    self.shutdown_requested = true;
                }
                ControlRequest::Query { reply } => {
                    let reports = self
                        .slots
                        .iter()
                        .zip(&self.machines)
                        .map(|(slot, machine)| DetectorReport {
                            detector: slot.id().to_string(),
                            enabled: slot.is_enabled(),
                            consecutive_failures: slot.consecutive_failures(),
                            states: machine.snapshot(),
                        })
                        .collect();
                    let _ = reply.send(reports);
                }
            }
        }
    }

    fn maybe_log_health(&mut self) {
        if self.last_health_log.elapsed() < self.config.health_log_interval {
            return;
        }
        self.last_health_log = Instant::now();
        let live_states: usize = self.machines.iter().map(|m| m.live_states()).sum();
        let disabled: Vec<&str> = self
            .slots
            .iter()
            .filter(|slot| !slot.is_enabled())
            .map(|slot| slot.id())
            .collect();
        log::info!(
            "health frames={} dropped={} events={} avg_dispatch_ms={:.1} live_states={} disabled={:?}",
            self.summary.frames_processed,
            self.summary.frames_dropped,
            self.summary.events_emitted,
            self.latency.avg_ms(),
            live_states,
            disabled
        );
    }
}
