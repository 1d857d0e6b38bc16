use crate::audio::EncodedFrame;
use crate::error::RealtimeError;
use crate::types::{SessionConfig, SessionEvent};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Outbound half of an established realtime session.
pub trait SessionTransport: Send + Sync + 'static {
    /// Hands one encoded frame to the transport. Fire-and-forget: success
    /// means the frame was accepted for sending, not that it was received.
    ///
    /// Fails with [`RealtimeError::NotReady`] when the session is not
    /// connected, and with [`RealtimeError::Transmission`] when an earlier
    /// frame is still waiting for the socket. Either way the frame is lost.
    fn send_audio(&self, frame: EncodedFrame) -> Result<(), RealtimeError>;

    /// Tears the session down. Safe to call more than once.
    fn close(&self);

    fn is_connected(&self) -> bool;
}

/// An established session: the transport plus its single inbound event stream.
pub struct Connected<T: SessionTransport> {
    pub transport: Arc<T>,
    pub events: mpsc::Receiver<SessionEvent>,
}

/// Establishes sessions.
pub trait SessionConnector {
    type Transport: SessionTransport;

    /// Resolves once the session is fully connected, or fails with a
    /// connection error.
    fn connect(
        &self,
        config: &SessionConfig,
    ) -> impl Future<Output = Result<Connected<Self::Transport>, RealtimeError>> + Send;
}
