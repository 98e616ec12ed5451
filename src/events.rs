//! Confirmed events and the sink boundary.
//!
//! The orchestrator emits two kinds of messages: `ConfirmedEvent` records
//! on the event channel and `SlotStatus` diagnostics on the control
//! channel. Keeping them separate is what lets a consumer tell "no fire
//! detected" from "fire detector is broken".
//!
//! Delivery is best-effort: sinks must not block the orchestrator. A slow
//! consumer gets dropped messages, never a stalled pipeline.

use crossbeam_channel::{Sender, TrySendError};
use serde::Serialize;

/// Lifecycle of a confirmed event instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Started,
    Ongoing,
    Ended,
}

/// A debounced, timestamped event transition. Immutable once emitted.
#[derive(Clone, Debug, Serialize)]
pub struct ConfirmedEvent {
    pub detector: String,
    pub subject: Option<String>,
    pub kind: EventKind,
    /// First frame of the positive run that confirmed this instance.
    pub start_ts_ms: u64,
    /// First frame of the negative run that retracted it; set only on Ended.
    pub end_ts_ms: Option<u64>,
    /// Highest confidence observed during the confirmed span so far.
    pub peak_confidence: f32,
    /// Sequence number of the frame whose processing emitted this record.
    pub frame_seq: u64,
    /// Timestamp of that frame.
    pub frame_ts_ms: u64,
}

impl ConfirmedEvent {
    /// Representative timestamp used when ordering a batch for delivery:
    /// the reconstructed boundary for Started/Ended, the triggering frame
    /// for Ongoing.
    pub fn event_ts_ms(&self) -> u64 {
        match self.kind {
            EventKind::Started => self.start_ts_ms,
            EventKind::Ongoing => self.frame_ts_ms,
            EventKind::Ended => self.end_ts_ms.unwrap_or(self.frame_ts_ms),
        }
    }
}

/// Diagnostic slot transition. Not a `ConfirmedEvent`: it travels on the
/// sink's control channel so downstream consumers know a detector has gone
/// dark (or come back) without confusing that with event activity.
#[derive(Clone, Debug, Serialize)]
pub struct SlotStatus {
    pub detector: String,
    pub enabled: bool,
    pub reason: String,
    pub ts_ms: u64,
}

/// Everything the orchestrator hands to a sink.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkMessage {
    Event(ConfirmedEvent),
    Status(SlotStatus),
}

/// Event sink boundary.
///
/// Implementations must be non-blocking or apply their own buffering; the
/// orchestrator calls `deliver` from its loop thread and never waits.
pub trait EventSink: Send {
    fn deliver(&mut self, msg: SinkMessage);
}

/// Sink that writes messages to the process log.
#[derive(Default)]
pub struct LogSink;

impl EventSink for LogSink {
    fn deliver(&mut self, msg: SinkMessage) {
        match msg {
            SinkMessage::Event(ev) => log::info!(
                "event {:?} detector={} subject={} start_ts={} end_ts={:?} peak={:.2} frame={}",
                ev.kind,
                ev.detector,
                ev.subject.as_deref().unwrap_or("-"),
                ev.start_ts_ms,
                ev.end_ts_ms,
                ev.peak_confidence,
                ev.frame_seq
            ),
            SinkMessage::Status(st) => log::warn!(
                "slot {} -> {} ({}) ts={}",
                st.detector,
                if st.enabled { "enabled" } else { "disabled" },
                st.reason,
                st.ts_ms
            ),
        }
    }
}

/// Sink backed by a channel. `try_send` keeps a lagging consumer from
/// stalling the orchestrator; overflow is counted and dropped.
pub struct ChannelSink {
    tx: Sender<SinkMessage>,
    dropped: u64,
}

impl ChannelSink {
    pub fn new(tx: Sender<SinkMessage>) -> Self {
        Self { tx, dropped: 0 }
    }

    /// Messages discarded because the consumer lagged or went away.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

impl EventSink for ChannelSink {
    fn deliver(&mut self, msg: SinkMessage) {
        match self.tx.try_send(msg) {
            Ok(()) => {}
            Err(TrySendError::Full(msg)) => {
                self.dropped += 1;
                log::warn!("event sink full, dropping {:?}", msg);
            }
            Err(TrySendError::Disconnected(_)) => {
                self.dropped += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_sink_drops_on_full_without_blocking() {
        let (tx, rx) = crossbeam_channel::bounded(1);
        let mut sink = ChannelSink::new(tx);
        let ev = ConfirmedEvent {
            detector: "fire".to_string(),
            subject: None,
            kind: EventKind::Started,
            start_ts_ms: 100,
            end_ts_ms: None,
            peak_confidence: 0.9,
            frame_seq: 3,
            frame_ts_ms: 300,
        };
        sink.deliver(SinkMessage::Event(ev.clone()));
        sink.deliver(SinkMessage::Event(ev));
        assert_eq!(sink.dropped(), 1);
        assert_eq!(rx.len(), 1);
    }

    #[test]
    fn event_serializes_with_snake_case_kind() {
        let ev = ConfirmedEvent {
            detector: "fire".to_string(),
            subject: None,
            kind: EventKind::Ended,
            start_ts_ms: 100,
            end_ts_ms: Some(400),
            peak_confidence: 0.8,
            frame_seq: 9,
            frame_ts_ms: 900,
        };
        let json = serde_json::to_string(&ev).unwrap();
        assert!(json.contains("\"kind\":\"ended\""));
        assert!(json.contains("\"end_ts_ms\":400"));
    }
}
