use super::inbound::{InboundDispatcher, InboundStats};
use super::outbound::{OutboundStats, OutboundStreamer};
use super::{ControlState, SessionLink, StatusReporter};
use crate::audio::{AudioSink, CaptureDevice, FrameSink, ReplyFormat};
use crate::client::{Connected, SessionConnector, SessionProvisioner, SessionTransport};
use crate::error::RealtimeError;
use crate::pipeline::StatusEvent;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Resources held for the lifetime of one running session.
struct ActiveSession<T: SessionTransport> {
    transport: Arc<T>,
    link: SessionLink,
    frames_dropped: Arc<AtomicU64>,
    outbound: JoinHandle<OutboundStats>,
    inbound: JoinHandle<InboundStats>,
}

/// Owns everything one voice conversation needs and exposes the start/stop
/// controls.
///
/// At most one session is active at a time. Status updates (control state,
/// transcripts, failures) are delivered on the receiver returned by
/// [`VoiceSession::new`].
pub struct VoiceSession<P, C, D, K>
where
    P: SessionProvisioner,
    C: SessionConnector,
    D: CaptureDevice,
    K: AudioSink + Clone,
{
    provisioner: P,
    connector: C,
    device: D,
    sink: K,
    reply_format: ReplyFormat,
    status: StatusReporter,
    controls: ControlState,
    active: Option<ActiveSession<C::Transport>>,
}

impl<P, C, D, K> VoiceSession<P, C, D, K>
where
    P: SessionProvisioner,
    C: SessionConnector,
    D: CaptureDevice,
    K: AudioSink + Clone,
{
    pub fn new(
        provisioner: P,
        connector: C,
        device: D,
        sink: K,
        reply_format: ReplyFormat,
    ) -> (Self, mpsc::UnboundedReceiver<StatusEvent>) {
        let (status, status_rx) = StatusReporter::new();
        let session = Self {
            provisioner,
            connector,
            device,
            sink,
            reply_format,
            status,
            controls: ControlState::IDLE,
            active: None,
        };
        (session, status_rx)
    }

    pub fn controls(&self) -> ControlState {
        if self.session_ended() {
            return ControlState::IDLE;
        }
        self.controls
    }

    /// `false` once the service has closed the session, even before
    /// [`VoiceSession::reap_ended_session`] has run.
    pub fn is_running(&self) -> bool {
        self.active.as_ref().is_some_and(|active| !active.link.has_ended())
    }

    fn session_ended(&self) -> bool {
        self.active.as_ref().is_some_and(|active| active.link.has_ended())
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    /// Frames the capture callback discarded because the previous one was
    /// still being sent. Zero when idle.
    pub fn frames_dropped(&self) -> u64 {
        self.active
            .as_ref()
            .map(|active| active.frames_dropped.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    fn set_controls(&mut self, state: ControlState) {
        self.controls = state;
        self.status.controls(state);
    }

    fn abort_start(&mut self, err: RealtimeError) -> Result<(), RealtimeError> {
        error!("[VoiceSession] Start failed: {}", err);
        self.status.failed(&err);
        self.set_controls(ControlState::IDLE);
        Err(err)
    }

    /// Provisions and connects a session, then starts capturing.
    ///
    /// Capture never begins unless the transport is connected. If the
    /// microphone cannot be claimed the transport is closed again and no
    /// audio is ever sent.
    pub async fn start(&mut self) -> Result<(), RealtimeError> {
        self.reap_ended_session();
        if self.active.is_some() {
            return Err(RealtimeError::InvalidState(
                "a session is already running".to_string(),
            ));
        }
        info!("[VoiceSession] Starting session.");
        self.set_controls(ControlState::ACTIVE);

        let config = match self.provisioner.create_session().await {
            Ok(config) => config,
            Err(e) => return self.abort_start(e),
        };
        let Connected { transport, events } = match self.connector.connect(&config).await {
            Ok(connected) => connected,
            Err(e) => return self.abort_start(e),
        };

        let link = SessionLink::new();
        let dispatcher = InboundDispatcher::new(
            self.reply_format.decoder(),
            self.sink.clone(),
            self.status.clone(),
            link.clone(),
        );
        let inbound = tokio::spawn(dispatcher.run(events));

        let (frames_tx, frames_rx) = mpsc::channel(1);
        let frame_sink = match self.device.format().and_then(|(rate, channels)| {
            FrameSink::new(frames_tx, link.attached_flag(), rate, channels)
        }) {
            Ok(sink) => sink,
            Err(e) => {
                link.detach();
                transport.close();
                return self.abort_start(e);
            }
        };
        let frames_dropped = frame_sink.dropped_counter();

        if let Err(e) = self.device.acquire(frame_sink) {
            link.detach();
            transport.close();
            return self.abort_start(e);
        }

        let outbound = tokio::spawn(
            OutboundStreamer::new(transport.clone(), self.status.clone()).run(frames_rx),
        );

        self.active = Some(ActiveSession {
            transport,
            link,
            frames_dropped,
            outbound,
            inbound,
        });
        info!("[VoiceSession] Session running; capturing audio.");
        Ok(())
    }

    /// Ends the running session. Calling it again, or while idle, does
    /// nothing. Replies already queued for playback keep playing.
    pub fn stop(&mut self) {
        let Some(active) = self.active.take() else {
            debug!("[VoiceSession] Stop requested while idle.");
            return;
        };
        info!("[VoiceSession] Stopping session.");
        active.link.detach();
        let already_ended = active.link.has_ended();
        self.tear_down(active);
        if already_ended {
            // Idle controls were already reported when the service closed.
            self.controls = ControlState::IDLE;
        } else {
            self.set_controls(ControlState::IDLE);
        }
        info!("[VoiceSession] Session stopped.");
    }

    /// Releases what a session the service has closed still holds: the
    /// capture device, the outbound task and the transport. Capture stops
    /// feeding frames as soon as the close arrives; this returns the device
    /// itself. Returns `true` if there was such a session.
    ///
    /// Callers observing [`StatusEvent::Failed`] with a connection kind
    /// should call this. [`VoiceSession::start`] and [`VoiceSession::stop`]
    /// also do.
    pub fn reap_ended_session(&mut self) -> bool {
        if !self.session_ended() {
            return false;
        }
        let Some(active) = self.active.take() else {
            return false;
        };
        info!("[VoiceSession] Session was closed by the service; releasing resources.");
        self.tear_down(active);
        self.controls = ControlState::IDLE;
        true
    }

    fn tear_down(&mut self, active: ActiveSession<C::Transport>) {
        self.device.release();
        active.outbound.abort();
        active.transport.close();

        let dropped = active.frames_dropped.load(Ordering::Relaxed);
        if dropped > 0 {
            warn!(
                "[VoiceSession] {} frame(s) were dropped while the streamer was busy.",
                dropped
            );
        }
        if active.inbound.is_finished() {
            debug!("[VoiceSession] Inbound loop had already finished.");
        }
    }
}

impl<P, C, D, K> Drop for VoiceSession<P, C, D, K>
where
    P: SessionProvisioner,
    C: SessionConnector,
    D: CaptureDevice,
    K: AudioSink + Clone,
{
    fn drop(&mut self) {
        if self.active.is_some() {
            warn!("[VoiceSession] Dropped while running. Stopping.");
            self.stop();
        }
    }
}
