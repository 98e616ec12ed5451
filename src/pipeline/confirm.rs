//! Temporal confirmation state machines.
//!
//! One `ConfirmationMachine` exists per detector; machines for per-subject
//! detectors keep an arena of states keyed by subject id. Each state walks
//! `Idle -> Pending -> Confirmed -> Cooling -> Idle`, converting
//! flicker-prone per-frame signals into Started/Ongoing/Ended transitions.
//!
//! The thresholds are asymmetric on purpose: a Pending run collapses on a
//! single negative frame (false starts are cheap to retract), while a
//! Confirmed event survives `min_consecutive_negative - 1` negatives
//! (transient occlusion must not flap a live event).
//!
//! All timing here runs on frame timestamps. Machines are mutated from a
//! single thread per frame; they hold no synchronization.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;

use crate::detect::{DetectorConfig, RawDetection};
use crate::events::{ConfirmedEvent, EventKind};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Pending,
    Confirmed,
    Cooling,
}

#[derive(Clone, Debug)]
struct SubjectState {
    phase: Phase,
    positive_run: u32,
    negative_run: u32,
    /// First frame of the current positive run (Pending entry). Becomes
    /// the event's start boundary on confirmation.
    run_started_ts: u64,
    /// First frame of the current negative run. Becomes the event's end
    /// boundary when the run reaches the clearing threshold.
    negative_run_started_ts: u64,
    /// Start boundary of the live confirmed event.
    started_ts: u64,
    peak_confidence: f32,
    last_positive_ts: u64,
    phase_entered_ts: u64,
    last_ongoing_ts: Option<u64>,
}

impl SubjectState {
    fn new(ts_ms: u64) -> Self {
        Self {
            phase: Phase::Idle,
            positive_run: 0,
            negative_run: 0,
            run_started_ts: ts_ms,
            negative_run_started_ts: ts_ms,
            started_ts: ts_ms,
            peak_confidence: 0.0,
            last_positive_ts: ts_ms,
            phase_entered_ts: ts_ms,
            last_ongoing_ts: None,
        }
    }
}

/// Introspection record for the control surface.
#[derive(Clone, Debug, Serialize)]
pub struct StateSnapshot {
    pub subject: Option<String>,
    pub phase: Phase,
    pub positive_run: u32,
    pub negative_run: u32,
    pub peak_confidence: f32,
    pub phase_entered_ts: u64,
    pub last_positive_ts: u64,
}

/// Per-detector confirmation machine with a lazily populated state arena.
pub struct ConfirmationMachine {
    detector: String,
    config: DetectorConfig,
    idle_sweep_ms: u64,
    states: HashMap<Option<String>, SubjectState>,
}

impl ConfirmationMachine {
    pub fn new(detector: &str, config: DetectorConfig, idle_sweep_ms: u64) -> Self {
        Self {
            detector: detector.to_string(),
            config,
            idle_sweep_ms,
            states: HashMap::new(),
        }
    }

    pub fn detector(&self) -> &str {
        &self.detector
    }

    /// Feed one frame's raw detections. Empty input is a negative
    /// observation for every live state.
    pub fn observe(
        &mut self,
        ts_ms: u64,
        frame_seq: u64,
        detections: &[RawDetection],
        out: &mut Vec<ConfirmedEvent>,
    ) {
        if self.config.per_subject {
            // Highest confidence per subject; subject-less detections from
            // a per-subject detector carry no track identity and are
            // dropped here.
            let mut by_subject: BTreeMap<String, f32> = BTreeMap::new();
            for det in detections {
                match &det.subject {
                    Some(subject) => {
                        let entry = by_subject.entry(subject.clone()).or_insert(0.0);
                        if det.confidence > *entry {
                            *entry = det.confidence;
                        }
                    }
                    None => log::debug!(
                        "detector {}: dropping subject-less detection (per_subject)",
                        self.detector
                    ),
                }
            }

            let mut unobserved: Vec<Option<String>> = self
                .states
                .keys()
                .filter(|key| match key {
                    Some(subject) => !by_subject.contains_key(subject),
                    None => true,
                })
                .cloned()
                .collect();
            unobserved.sort();

            for (subject, confidence) in by_subject {
                let positive = confidence >= self.config.confidence_threshold;
                self.observe_one(Some(subject), ts_ms, frame_seq, positive, confidence, out);
            }
            for key in unobserved {
                self.observe_one(key, ts_ms, frame_seq, false, 0.0, out);
            }
        } else {
            let best = detections
                .iter()
                .map(|det| det.confidence)
                .fold(0.0f32, f32::max);
            let positive = best >= self.config.confidence_threshold && !detections.is_empty();
            self.observe_one(None, ts_ms, frame_seq, positive, best, out);
        }
    }

    /// Feed a missing observation (timeout, failed invocation, dropped
    /// frame). Degrades run counters exactly like an explicit negative.
    pub fn observe_missing(&mut self, ts_ms: u64, frame_seq: u64, out: &mut Vec<ConfirmedEvent>) {
        let mut keys: Vec<Option<String>> = self.states.keys().cloned().collect();
        keys.sort();
        for key in keys {
            self.observe_one(key, ts_ms, frame_seq, false, 0.0, out);
        }
    }

    fn observe_one(
        &mut self,
        key: Option<String>,
        ts_ms: u64,
        frame_seq: u64,
        positive: bool,
        confidence: f32,
        out: &mut Vec<ConfirmedEvent>,
    ) {
        if !self.states.contains_key(&key) {
            // States are created lazily on the first positive observation;
            // a negative for an unseen subject is a no-op.
            if !positive {
                return;
            }
            self.states.insert(key.clone(), SubjectState::new(ts_ms));
        }

        let cooldown_ms = self.config.cooldown.as_millis() as u64;
        let min_positive = self.config.min_consecutive_positive;
        let min_negative = self.config.min_consecutive_negative;
        let ongoing_interval_ms = self
            .config
            .ongoing_interval
            .map(|interval| interval.as_millis() as u64);

        let state = self.states.get_mut(&key).expect("state just ensured");

        // Resolve an elapsed refractory period before applying the
        // observation, so the frame that outlives the cooldown can open a
        // fresh cycle.
        if state.phase == Phase::Cooling
            && ts_ms >= state.phase_entered_ts.saturating_add(cooldown_ms)
        {
            state.phase = Phase::Idle;
            state.phase_entered_ts = ts_ms;
        }

        match (state.phase, positive) {
            (Phase::Idle, true) | (Phase::Pending, true) => {
                if state.phase == Phase::Idle {
                    state.phase = Phase::Pending;
                    state.phase_entered_ts = ts_ms;
                    state.positive_run = 1;
                    state.run_started_ts = ts_ms;
                    state.peak_confidence = confidence;
                } else {
                    state.positive_run += 1;
                    state.peak_confidence = state.peak_confidence.max(confidence);
                }
                state.last_positive_ts = ts_ms;
                if state.positive_run >= min_positive {
                    state.phase = Phase::Confirmed;
                    state.phase_entered_ts = ts_ms;
                    state.started_ts = state.run_started_ts;
                    state.negative_run = 0;
                    state.last_ongoing_ts = Some(ts_ms);
                    out.push(ConfirmedEvent {
                        detector: self.detector.clone(),
                        subject: key.clone(),
                        kind: EventKind::Started,
                        start_ts_ms: state.started_ts,
                        end_ts_ms: None,
                        peak_confidence: state.peak_confidence,
                        frame_seq,
                        frame_ts_ms: ts_ms,
                    });
                }
            }
            (Phase::Idle, false) => {}
            (Phase::Pending, false) => {
                // Pending is not debounced: one gap retracts the run.
                state.phase = Phase::Idle;
                state.phase_entered_ts = ts_ms;
                state.positive_run = 0;
            }
            (Phase::Confirmed, true) => {
                state.negative_run = 0;
                state.peak_confidence = state.peak_confidence.max(confidence);
                state.last_positive_ts = ts_ms;
                let due = match (ongoing_interval_ms, state.last_ongoing_ts) {
                    (None, _) => true,
                    (Some(interval), Some(last)) => ts_ms >= last.saturating_add(interval),
                    (Some(_), None) => true,
                };
                if due {
                    state.last_ongoing_ts = Some(ts_ms);
                    out.push(ConfirmedEvent {
                        detector: self.detector.clone(),
                        subject: key.clone(),
                        kind: EventKind::Ongoing,
                        start_ts_ms: state.started_ts,
                        end_ts_ms: None,
                        peak_confidence: state.peak_confidence,
                        frame_seq,
                        frame_ts_ms: ts_ms,
                    });
                }
            }
            (Phase::Confirmed, false) => {
                if state.negative_run == 0 {
                    state.negative_run_started_ts = ts_ms;
                }
                state.negative_run += 1;
                if state.negative_run >= min_negative {
                    // The event ended where the negative run began, not
                    // where the debounce threshold was crossed.
                    out.push(ConfirmedEvent {
                        detector: self.detector.clone(),
                        subject: key.clone(),
                        kind: EventKind::Ended,
                        start_ts_ms: state.started_ts,
                        end_ts_ms: Some(state.negative_run_started_ts),
                        peak_confidence: state.peak_confidence,
                        frame_seq,
                        frame_ts_ms: ts_ms,
                    });
                    state.phase = Phase::Cooling;
                    state.phase_entered_ts = ts_ms;
                    state.positive_run = 0;
                    state.negative_run = 0;
                }
            }
            // Refractory period: borderline re-triggers are ignored until
            // the cooldown elapses.
            (Phase::Cooling, _) => {}
        }
    }

    /// Reclaim states that have sat in Idle for the configured duration.
    /// Elapsed cooldowns resolve to Idle first so retired subjects do not
    /// linger in Cooling forever.
    pub fn sweep(&mut self, ts_ms: u64) {
        let cooldown_ms = self.config.cooldown.as_millis() as u64;
        for state in self.states.values_mut() {
            if state.phase == Phase::Cooling
                && ts_ms >= state.phase_entered_ts.saturating_add(cooldown_ms)
            {
                state.phase = Phase::Idle;
                state.phase_entered_ts = state.phase_entered_ts.saturating_add(cooldown_ms);
            }
        }
        let idle_sweep_ms = self.idle_sweep_ms;
        self.states.retain(|_, state| {
            !(state.phase == Phase::Idle
                && ts_ms.saturating_sub(state.phase_entered_ts) >= idle_sweep_ms)
        });
    }

    /// Current live states, for health/debug introspection.
    pub fn snapshot(&self) -> Vec<StateSnapshot> {
        let mut keys: Vec<Option<String>> = self.states.keys().cloned().collect();
        keys.sort();
        keys.into_iter()
            .map(|key| {
                let state = &self.states[&key];
                StateSnapshot {
                    subject: key,
                    phase: state.phase,
                    positive_run: state.positive_run,
                    negative_run: state.negative_run,
                    peak_confidence: state.peak_confidence,
                    phase_entered_ts: state.phase_entered_ts,
                    last_positive_ts: state.last_positive_ts,
                }
            })
            .collect()
    }

    pub fn live_states(&self) -> usize {
        self.states.len()
    }
}
