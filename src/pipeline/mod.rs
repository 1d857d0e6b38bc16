//! Session orchestration: the outbound streamer, the inbound dispatcher and the
//! [`VoiceSession`] controller that ties them to a capture device and a sink.

pub mod controller;
pub mod inbound;
pub mod outbound;

pub use controller::VoiceSession;
pub use inbound::{InboundDispatcher, InboundStats};
pub use outbound::{OutboundStats, OutboundStreamer};

use crate::error::{FailureKind, RealtimeError};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::trace;

/// Which user controls are currently actionable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlState {
    pub start_enabled: bool,
    pub stop_enabled: bool,
}

impl ControlState {
    pub const IDLE: Self = Self {
        start_enabled: true,
        stop_enabled: false,
    };
    pub const ACTIVE: Self = Self {
        start_enabled: false,
        stop_enabled: true,
    };
}

impl Default for ControlState {
    fn default() -> Self {
        Self::IDLE
    }
}

/// User-visible notifications emitted by a [`VoiceSession`].
#[derive(Debug, Clone, PartialEq)]
pub enum StatusEvent {
    Controls(ControlState),
    /// Final transcript of what the user said.
    Transcript(String),
    /// Incremental reply text.
    TextDelta(String),
    /// A reply utterance was decoded and queued for playback.
    UtteranceQueued { duration: Duration },
    Failed { kind: FailureKind, message: String },
}

/// Sending half of the status stream. Sends never fail; a dropped receiver
/// just means nobody is listening.
#[derive(Debug, Clone)]
pub(crate) struct StatusReporter {
    tx: mpsc::UnboundedSender<StatusEvent>,
}

impl StatusReporter {
    pub(crate) fn new() -> (Self, mpsc::UnboundedReceiver<StatusEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub(crate) fn send(&self, event: StatusEvent) {
        if self.tx.send(event).is_err() {
            trace!("[Status] No status subscriber; event discarded.");
        }
    }

    pub(crate) fn controls(&self, state: ControlState) {
        self.send(StatusEvent::Controls(state));
    }

    pub(crate) fn failed(&self, error: &RealtimeError) {
        self.send(StatusEvent::Failed {
            kind: error.kind(),
            message: error.to_string(),
        });
    }
}

/// Flags one running session shares between the controller, the capture
/// callback and the inbound loop.
#[derive(Debug, Clone)]
pub(crate) struct SessionLink {
    /// Capture is feeding frames. Cleared by `stop` or when the service closes.
    attached: Arc<AtomicBool>,
    ended: Arc<AtomicBool>,
}

impl SessionLink {
    pub(crate) fn new() -> Self {
        Self {
            attached: Arc::new(AtomicBool::new(true)),
            ended: Arc::new(AtomicBool::new(false)),
        }
    }

    pub(crate) fn attached_flag(&self) -> Arc<AtomicBool> {
        self.attached.clone()
    }

    /// Local teardown: capture stops and a later close is not a failure.
    pub(crate) fn detach(&self) {
        self.attached.store(false, Ordering::Release);
    }

    /// Records that the transport closed. Returns `true` when nobody asked
    /// for it, i.e. the session was lost.
    pub(crate) fn mark_ended(&self) -> bool {
        self.ended.store(true, Ordering::Release);
        self.attached.swap(false, Ordering::AcqRel)
    }

    pub(crate) fn has_ended(&self) -> bool {
        self.ended.load(Ordering::Acquire)
    }
}
