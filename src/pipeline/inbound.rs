use super::{ControlState, SessionLink, StatusEvent, StatusReporter};
use crate::audio::{AudioSink, PlaybackScheduler, UtteranceBuffer, WaveformDecoder};
use crate::error::FailureKind;
use crate::types::SessionEvent;
use std::ops::ControlFlow;
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InboundStats {
    pub utterances_played: u64,
    pub utterances_dropped: u64,
    pub service_errors: u64,
}

/// Single consumer of the session's event stream. Owns the utterance buffer
/// and the playback scheduler outright.
pub struct InboundDispatcher<K: AudioSink> {
    buffer: UtteranceBuffer,
    scheduler: PlaybackScheduler<K>,
    status: StatusReporter,
    link: SessionLink,
    service_errors: u64,
    closed: bool,
}

impl<K: AudioSink> InboundDispatcher<K> {
    pub(crate) fn new(
        decoder: Box<dyn WaveformDecoder>,
        sink: K,
        status: StatusReporter,
        link: SessionLink,
    ) -> Self {
        Self {
            buffer: UtteranceBuffer::new(),
            scheduler: PlaybackScheduler::new(decoder, sink),
            status,
            link,
            service_errors: 0,
            closed: false,
        }
    }

    pub fn buffer(&self) -> &UtteranceBuffer {
        &self.buffer
    }

    pub fn stats(&self) -> InboundStats {
        InboundStats {
            utterances_played: self.scheduler.played(),
            utterances_dropped: self.scheduler.dropped(),
            service_errors: self.service_errors,
        }
    }

    /// Applies one event. Breaks once the session has closed.
    pub fn handle(&mut self, event: SessionEvent) -> ControlFlow<()> {
        match event {
            SessionEvent::Transcription(text) => {
                debug!("[Inbound] Transcript: {}", text);
                self.status.send(StatusEvent::Transcript(text));
            }
            SessionEvent::TextDelta(delta) => {
                self.status.send(StatusEvent::TextDelta(delta));
            }
            SessionEvent::AudioFragment(fragment) => {
                trace!("[Inbound] Audio fragment of {} byte(s).", fragment.len());
                self.buffer.push(fragment);
            }
            SessionEvent::Completion => self.complete_utterance(),
            SessionEvent::ServiceError(message) => {
                self.service_errors += 1;
                error!("[Inbound] Service reported an error: {}", message);
                self.status.send(StatusEvent::Failed {
                    kind: FailureKind::Other,
                    message,
                });
            }
            SessionEvent::Closed => {
                self.session_closed();
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    fn session_closed(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if self.buffer.fragment_count() > 0 {
            let discarded = self.buffer.clear();
            warn!(
                "[Inbound] Session closed with {} byte(s) of unfinished reply; discarding.",
                discarded
            );
        }
        if self.link.mark_ended() {
            error!("[Inbound] Session closed by the service.");
            self.status.send(StatusEvent::Failed {
                kind: FailureKind::Connection,
                message: "session closed by the service".to_string(),
            });
            self.status.controls(ControlState::IDLE);
        } else {
            info!("[Inbound] Session closed.");
        }
    }

    fn complete_utterance(&mut self) {
        let Some(bytes) = self.buffer.flush() else {
            debug!("[Inbound] Completion with no buffered audio.");
            return;
        };
        match self.scheduler.play(bytes) {
            Ok(Some(duration)) => self.status.send(StatusEvent::UtteranceQueued { duration }),
            Ok(None) => {}
            Err(e) => self.status.failed(&e),
        }
    }

    /// Consumes events until `Closed` arrives or the stream ends. Either way
    /// the session is marked ended; if that was not requested locally, a
    /// connection failure and idle controls are reported.
    pub async fn run(mut self, mut events: mpsc::Receiver<SessionEvent>) -> InboundStats {
        info!("[Inbound] Event loop started.");
        while let Some(event) = events.recv().await {
            if self.handle(event).is_break() {
                break;
            }
        }
        self.session_closed();
        let stats = self.stats();
        info!(
            "[Inbound] Event loop finished: {} played, {} dropped.",
            stats.utterances_played, stats.utterances_dropped
        );
        stats
    }
}
