//! Detector slots: per-detector runtime isolation.
//!
//! Each slot owns a dedicated worker thread holding the detector instance.
//! The orchestrator talks to the worker over a pair of bounded(1) channels,
//! which is what makes the invariants cheap to enforce: at most one
//! invocation is ever outstanding, a timed-out invocation is abandoned by
//! simply leaving its reply undrained, and a panicking detector takes down
//! nothing but its own call.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};

use crate::detect::{Detector, DetectorConfig, RawDetection};
use crate::frame::SharedFrame;

/// Outcome of one slot invocation for one frame.
pub(crate) enum SlotOutcome {
    /// The detector answered within the deadline (possibly with zero
    /// detections).
    Detections(Vec<RawDetection>),
    /// The invocation returned an error or the detector panicked.
    Failed,
    /// The invocation exceeded its deadline and was abandoned.
    TimedOut,
    /// A previously abandoned invocation is still running, so nothing was
    /// dispatched for this frame.
    Busy,
    /// The slot is disabled; nothing was dispatched.
    Disabled,
}

struct Job {
    seq: u64,
    frame: SharedFrame,
}

struct Reply {
    seq: u64,
    result: Result<Vec<RawDetection>>,
}

/// Runtime wrapper around one registered detector.
///
/// Owned and mutated exclusively by the orchestrator's dispatch loop; the
/// worker thread only ever sees jobs and replies.
pub(crate) struct DetectorSlot {
    id: String,
    config: DetectorConfig,
    enabled: bool,
    consecutive_failures: u32,
    disabled_at: Option<Instant>,
    /// Sequence number of the in-flight invocation, if any.
    outstanding: Option<u64>,
    dispatched_at: Option<Instant>,
    job_tx: Sender<Job>,
    reply_rx: Receiver<Reply>,
}

impl DetectorSlot {
    /// Spawn the worker thread and wire the channels.
    ///
    /// The worker exits when the job channel disconnects (slot dropped).
    /// It is deliberately not joined: a detector wedged inside `detect`
    /// would block shutdown forever, and an abandoned invocation finishing
    /// into a disconnected channel is exactly the contract.
    pub fn spawn(id: &str, mut detector: Box<dyn Detector>, config: DetectorConfig) -> Result<Self> {
        let (job_tx, job_rx) = bounded::<Job>(1);
        let (reply_tx, reply_rx) = bounded::<Reply>(1);
        let worker_id = id.to_string();
        // The handle is dropped on purpose: the worker is detached.
        let _worker = std::thread::Builder::new()
            .name(format!("slot-{}", id))
            .spawn(move || {
                if let Err(err) = detector.warm_up() {
                    log::warn!("detector {}: warm-up failed: {}", worker_id, err);
                }
                while let Ok(job) = job_rx.recv() {
                    let result = catch_unwind(AssertUnwindSafe(|| detector.detect(&job.frame)))
                        .unwrap_or_else(|_| Err(anyhow!("detector panicked")));
                    if reply_tx.send(Reply { seq: job.seq, result }).is_err() {
                        break;
                    }
                }
            })
            .with_context(|| format!("failed to spawn worker for detector '{}'", id))?;

        Ok(Self {
            id: id.to_string(),
            config,
            enabled: true,
            consecutive_failures: 0,
            disabled_at: None,
            outstanding: None,
            dispatched_at: None,
            job_tx,
            reply_rx,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Discard the reply of an abandoned invocation, if it has landed.
    fn drain_stale(&mut self) {
        if let Some(stale) = self.outstanding {
            if let Ok(reply) = self.reply_rx.try_recv() {
                debug_assert_eq!(reply.seq, stale);
                log::debug!(
                    "detector {}: discarding abandoned result for frame {}",
                    self.id,
                    reply.seq
                );
                self.outstanding = None;
                self.dispatched_at = None;
            }
        }
    }

    /// Dispatch a frame to the worker. Returns false when nothing was sent
    /// (slot disabled, worker still busy with an abandoned call, or worker
    /// gone).
    pub fn dispatch(&mut self, frame: &SharedFrame) -> bool {
        if !self.enabled {
            return false;
        }
        self.drain_stale();
        if self.outstanding.is_some() {
            return false;
        }
        let seq = frame.seq();
        if self
            .job_tx
            .try_send(Job {
                seq,
                frame: Arc::clone(frame),
            })
            .is_err()
        {
            log::error!("detector {}: worker unavailable", self.id);
            return false;
        }
        self.outstanding = Some(seq);
        self.dispatched_at = Some(Instant::now());
        true
    }

    /// Wait for the result of the invocation dispatched for `seq`, up to
    /// the earlier of the slot timeout and the overall frame deadline.
    pub fn collect(&mut self, seq: u64, frame_deadline: Instant) -> SlotOutcome {
        if !self.enabled {
            return SlotOutcome::Disabled;
        }
        match self.outstanding {
            Some(outstanding) if outstanding == seq => {}
            _ => return SlotOutcome::Busy,
        }
        let dispatched_at = self.dispatched_at.unwrap_or_else(Instant::now);
        let deadline = (dispatched_at + self.config.timeout).min(frame_deadline);
        let timeout = deadline.saturating_duration_since(Instant::now());
        match self.reply_rx.recv_timeout(timeout) {
            Ok(reply) => {
                debug_assert_eq!(reply.seq, seq);
                self.outstanding = None;
                self.dispatched_at = None;
                match reply.result {
                    Ok(detections) => SlotOutcome::Detections(detections),
                    Err(err) => {
                        log::warn!("detector {} failed on frame {}: {}", self.id, seq, err);
                        SlotOutcome::Failed
                    }
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                // Abandon: the worker keeps running, its reply is drained
                // and discarded later. The frame is never retried.
                log::warn!(
                    "detector {} timed out on frame {} (> {:?})",
                    self.id,
                    seq,
                    self.config.timeout
                );
                SlotOutcome::TimedOut
            }
            Err(RecvTimeoutError::Disconnected) => {
                log::error!("detector {}: worker exited", self.id);
                self.outstanding = None;
                self.dispatched_at = None;
                SlotOutcome::Failed
            }
        }
    }

    /// Reset the failure run after a successful invocation.
    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
    }

    /// Record a failed, timed-out or skipped invocation. Returns true when
    /// this failure crossed the disable threshold (the caller emits the
    /// one diagnostic notification).
    pub fn record_failure(&mut self, threshold: u32) -> bool {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        if self.enabled && self.consecutive_failures >= threshold {
            self.enabled = false;
            self.disabled_at = Some(Instant::now());
            return true;
        }
        false
    }

    /// Flip the enabled flag. Returns true when the state actually changed.
    pub fn set_enabled(&mut self, enabled: bool) -> bool {
        if self.enabled == enabled {
            return false;
        }
        self.enabled = enabled;
        if enabled {
            self.consecutive_failures = 0;
            self.disabled_at = None;
        } else {
            self.disabled_at = Some(Instant::now());
        }
        true
    }

    /// Whether a disabled slot has sat out its retry interval.
    pub fn retry_due(&self, retry_after: Duration) -> bool {
        match (self.enabled, self.disabled_at) {
            (false, Some(at)) => at.elapsed() >= retry_after,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Frame;
    use anyhow::bail;

    struct ScriptedDetector {
        confidence: f32,
    }

    impl Detector for ScriptedDetector {
        fn name(&self) -> &'static str {
            "scripted"
        }

        fn detect(&mut self, _frame: &Frame) -> Result<Vec<RawDetection>> {
            Ok(vec![RawDetection::new("scripted", self.confidence)])
        }
    }

    struct FailingDetector;

    impl Detector for FailingDetector {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn detect(&mut self, _frame: &Frame) -> Result<Vec<RawDetection>> {
            bail!("inference backend unavailable")
        }
    }

    struct SlowDetector {
        delay: Duration,
    }

    impl Detector for SlowDetector {
        fn name(&self) -> &'static str {
            "slow"
        }

        fn detect(&mut self, _frame: &Frame) -> Result<Vec<RawDetection>> {
            std::thread::sleep(self.delay);
            Ok(vec![])
        }
    }

    struct PanickingDetector;

    impl Detector for PanickingDetector {
        fn name(&self) -> &'static str {
            "panicking"
        }

        fn detect(&mut self, _frame: &Frame) -> Result<Vec<RawDetection>> {
            panic!("model tensor shape mismatch")
        }
    }

    fn frame(seq: u64) -> SharedFrame {
        Arc::new(Frame::new(seq, seq * 100, 4, 4, vec![0u8; 48]))
    }

    fn far_deadline() -> Instant {
        Instant::now() + Duration::from_secs(5)
    }

    #[test]
    fn dispatch_and_collect_round_trip() {
        let mut slot = DetectorSlot::spawn(
            "fire",
            Box::new(ScriptedDetector { confidence: 0.8 }),
            DetectorConfig::default(),
        )
        .unwrap();
        let f = frame(1);
        assert!(slot.dispatch(&f));
        match slot.collect(1, far_deadline()) {
            SlotOutcome::Detections(dets) => {
                assert_eq!(dets.len(), 1);
                assert!((dets[0].confidence - 0.8).abs() < f32::EPSILON);
            }
            _ => panic!("expected detections"),
        }
        assert_eq!(slot.consecutive_failures(), 0);
    }

    #[test]
    fn error_is_a_failed_invocation_not_an_abort() {
        let mut slot = DetectorSlot::spawn(
            "failing",
            Box::new(FailingDetector),
            DetectorConfig::default(),
        )
        .unwrap();
        let f = frame(1);
        assert!(slot.dispatch(&f));
        assert!(matches!(slot.collect(1, far_deadline()), SlotOutcome::Failed));

        // The slot keeps working for the next frame.
        let f = frame(2);
        assert!(slot.dispatch(&f));
        assert!(matches!(slot.collect(2, far_deadline()), SlotOutcome::Failed));
    }

    #[test]
    fn panic_is_contained_as_failure() {
        let mut slot = DetectorSlot::spawn(
            "panicking",
            Box::new(PanickingDetector),
            DetectorConfig::default(),
        )
        .unwrap();
        let f = frame(1);
        assert!(slot.dispatch(&f));
        assert!(matches!(slot.collect(1, far_deadline()), SlotOutcome::Failed));

        // Worker survived the panic and accepts further work.
        let f = frame(2);
        assert!(slot.dispatch(&f));
        assert!(matches!(slot.collect(2, far_deadline()), SlotOutcome::Failed));
    }

    #[test]
    fn slow_invocation_times_out_then_slot_recovers() {
        let config = DetectorConfig {
            timeout: Duration::from_millis(30),
            ..DetectorConfig::default()
        };
        let mut slot = DetectorSlot::spawn(
            "slow",
            Box::new(SlowDetector {
                delay: Duration::from_millis(150),
            }),
            config,
        )
        .unwrap();

        let f = frame(1);
        assert!(slot.dispatch(&f));
        assert!(matches!(slot.collect(1, far_deadline()), SlotOutcome::TimedOut));

        // While the abandoned call still runs, new frames are not
        // dispatched.
        let f = frame(2);
        assert!(!slot.dispatch(&f));

        // Once the worker finishes, the stale reply is discarded and the
        // slot dispatches again.
        std::thread::sleep(Duration::from_millis(200));
        let f = frame(3);
        assert!(slot.dispatch(&f));
    }

    #[test]
    fn failure_threshold_disables_slot() {
        let mut slot = DetectorSlot::spawn(
            "failing",
            Box::new(FailingDetector),
            DetectorConfig::default(),
        )
        .unwrap();

        assert!(!slot.record_failure(3));
        assert!(!slot.record_failure(3));
        assert!(slot.record_failure(3), "third failure crosses threshold");
        assert!(!slot.is_enabled());
        // Further failures do not re-report the transition.
        assert!(!slot.record_failure(3));

        let f = frame(1);
        assert!(!slot.dispatch(&f), "disabled slot dispatches nothing");

        assert!(slot.set_enabled(true));
        assert_eq!(slot.consecutive_failures(), 0);
        assert!(slot.dispatch(&f));
    }

    #[test]
    fn success_resets_failure_run() {
        let mut slot = DetectorSlot::spawn(
            "fire",
            Box::new(ScriptedDetector { confidence: 0.9 }),
            DetectorConfig::default(),
        )
        .unwrap();
        slot.record_failure(5);
        slot.record_failure(5);
        slot.record_success();
        assert_eq!(slot.consecutive_failures(), 0);
    }
}
