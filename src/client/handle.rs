use crate::audio::EncodedFrame;
use crate::error::RealtimeError;
use crate::types::ClientEvent;
use base64::Engine as _;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use super::transport::SessionTransport;

/// Handle to a connected realtime session.
///
/// Outbound messages are queued to the socket task; the handle never touches
/// the socket itself.
pub struct RealtimeClient {
    pub(crate) shutdown_tx: Mutex<Option<oneshot::Sender<()>>>,
    pub(crate) outgoing_sender: mpsc::Sender<ClientEvent>,
    pub(crate) connected: Arc<AtomicBool>,
}

impl RealtimeClient {
    pub(crate) fn new(
        shutdown_tx: oneshot::Sender<()>,
        outgoing_sender: mpsc::Sender<ClientEvent>,
        connected: Arc<AtomicBool>,
    ) -> Self {
        Self {
            shutdown_tx: Mutex::new(Some(shutdown_tx)),
            outgoing_sender,
            connected,
        }
    }

    fn enqueue(&self, event: ClientEvent) -> Result<(), RealtimeError> {
        if !self.connected.load(Ordering::Acquire) {
            debug!("[ClientHandle] Cannot send message: session is not connected.");
            return Err(RealtimeError::NotReady);
        }
        match self.outgoing_sender.try_send(event) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("[ClientHandle] Outgoing queue full; message not sent.");
                Err(RealtimeError::Transmission(
                    "outgoing queue to the session is full".to_string(),
                ))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                error!("[ClientHandle] Failed to send message to socket task: Channel closed.");
                self.connected.store(false, Ordering::Release);
                Err(RealtimeError::NotReady)
            }
        }
    }
}

impl SessionTransport for RealtimeClient {
    fn send_audio(&self, frame: EncodedFrame) -> Result<(), RealtimeError> {
        if frame.is_empty() {
            return Ok(());
        }
        let audio = base64::engine::general_purpose::STANDARD.encode(frame.to_le_bytes());
        self.enqueue(ClientEvent::InputAudioBufferAppend { audio })
    }

    fn close(&self) {
        let mut guard = self
            .shutdown_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(tx) = guard.take() {
            info!("[ClientHandle] Close requested.");
            if tx.send(()).is_err() {
                info!("[ClientHandle] Shutdown signal failed: socket task already gone.");
            } else {
                info!("[ClientHandle] Shutdown signal sent to socket task.");
            }
        }
        self.connected.store(false, Ordering::Release);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }
}

impl Drop for RealtimeClient {
    fn drop(&mut self) {
        let still_open = self
            .shutdown_tx
            .get_mut()
            .map(|tx| tx.is_some())
            .unwrap_or(false);
        if still_open {
            warn!("[ClientHandle] Dropped without explicit close(). Signalling shutdown.");
            self.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::pcm::encode_samples;
    use crate::client::OUTGOING_QUEUE_CAPACITY;
    use crate::test_utils::init_test_logger;
    use crate::types::SessionUpdate;

    fn setup_test_client(
        capacity: usize,
    ) -> (RealtimeClient, mpsc::Receiver<ClientEvent>, oneshot::Receiver<()>) {
        let (outgoing_tx, outgoing_rx) = mpsc::channel(capacity);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let client = RealtimeClient::new(shutdown_tx, outgoing_tx, Arc::new(AtomicBool::new(true)));
        (client, outgoing_rx, shutdown_rx)
    }

    #[test]
    fn test_send_audio_queues_base64_le_pcm() {
        init_test_logger();
        let (client, mut rx, _shutdown) = setup_test_client(4);
        client
            .send_audio(encode_samples(&[1.0, -1.0, 0.0]))
            .unwrap();

        match rx.try_recv().unwrap() {
            ClientEvent::InputAudioBufferAppend { audio } => {
                let bytes = base64::engine::general_purpose::STANDARD
                    .decode(audio)
                    .unwrap();
                assert_eq!(bytes, vec![0xFF, 0x7F, 0x01, 0x80, 0x00, 0x00]);
            }
            other => panic!("Unexpected payload: {:?}", other),
        }
    }

    #[test]
    fn test_send_audio_before_connected_is_not_ready() {
        init_test_logger();
        let (client, mut rx, _shutdown) = setup_test_client(4);
        client.connected.store(false, Ordering::Release);
        let result = client.send_audio(encode_samples(&[0.1; 8]));
        assert!(matches!(result, Err(RealtimeError::NotReady)));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_full_queue_is_a_transmission_error() {
        init_test_logger();
        let (client, _rx, _shutdown) = setup_test_client(1);
        client.send_audio(encode_samples(&[0.1; 8])).unwrap();
        let result = client.send_audio(encode_samples(&[0.2; 8]));
        assert!(matches!(result, Err(RealtimeError::Transmission(_))));
    }

    #[test]
    fn test_at_most_one_frame_waits_behind_session_update() {
        init_test_logger();
        let (client, mut rx, _shutdown) = setup_test_client(OUTGOING_QUEUE_CAPACITY);
        client
            .outgoing_sender
            .try_send(ClientEvent::SessionUpdate {
                session: SessionUpdate::default(),
            })
            .unwrap();

        client.send_audio(encode_samples(&[0.1; 8])).unwrap();
        let refused = client.send_audio(encode_samples(&[0.2; 8]));
        assert!(matches!(refused, Err(RealtimeError::Transmission(_))));

        // Once the socket task catches up, the next tick goes through.
        rx.try_recv().unwrap();
        rx.try_recv().unwrap();
        client.send_audio(encode_samples(&[0.3; 8])).unwrap();
    }

    #[test]
    fn test_closed_socket_task_marks_disconnected() {
        init_test_logger();
        let (client, rx, _shutdown) = setup_test_client(4);
        drop(rx);
        let result = client.send_audio(encode_samples(&[0.1; 8]));
        assert!(matches!(result, Err(RealtimeError::NotReady)));
        assert!(!client.is_connected());
    }

    #[test]
    fn test_close_is_idempotent_and_signals_once() {
        init_test_logger();
        let (client, _rx, mut shutdown_rx) = setup_test_client(4);
        client.close();
        client.close();
        assert!(!client.is_connected());
        assert!(shutdown_rx.try_recv().is_ok());
        let result = client.send_audio(encode_samples(&[0.1; 8]));
        assert!(matches!(result, Err(RealtimeError::NotReady)));
    }

    #[test]
    fn test_drop_signals_shutdown() {
        init_test_logger();
        let (client, _rx, mut shutdown_rx) = setup_test_client(4);
        drop(client);
        assert!(shutdown_rx.try_recv().is_ok());
    }
}
