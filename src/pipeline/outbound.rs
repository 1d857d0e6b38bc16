use super::StatusReporter;
use crate::audio::AudioFrame;
use crate::audio::pcm::encode_frame;
use crate::client::SessionTransport;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutboundStats {
    pub frames_sent: u64,
    pub frames_lost: u64,
}

/// Drains captured frames, encodes them and hands them to the transport in
/// capture order. A frame the transport refuses is lost; there is no retry.
pub struct OutboundStreamer<T: SessionTransport> {
    transport: Arc<T>,
    status: StatusReporter,
}

impl<T: SessionTransport> OutboundStreamer<T> {
    pub(crate) fn new(transport: Arc<T>, status: StatusReporter) -> Self {
        Self { transport, status }
    }

    /// Runs until the frame channel closes.
    pub async fn run(self, mut frames: mpsc::Receiver<AudioFrame>) -> OutboundStats {
        let mut stats = OutboundStats::default();
        info!("[Outbound] Streaming started.");

        while let Some(frame) = frames.recv().await {
            let encoded = encode_frame(&frame);
            trace!("[Outbound] Sending frame of {} sample(s).", encoded.len());
            match self.transport.send_audio(encoded) {
                Ok(()) => stats.frames_sent += 1,
                Err(e) => {
                    stats.frames_lost += 1;
                    warn!(
                        "[Outbound] Frame lost ({} so far): {}",
                        stats.frames_lost, e
                    );
                    self.status.failed(&e);
                }
            }
        }

        debug!("[Outbound] Frame channel closed.");
        info!(
            "[Outbound] Streaming finished: {} sent, {} lost.",
            stats.frames_sent, stats.frames_lost
        );
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::EncodedFrame;
    use crate::error::{FailureKind, RealtimeError};
    use crate::pipeline::StatusEvent;
    use crate::test_utils::init_test_logger;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;
    use tokio::time::timeout;

    #[derive(Default)]
    struct RecordingTransport {
        sent: Mutex<Vec<EncodedFrame>>,
        refuse: AtomicBool,
    }

    impl SessionTransport for RecordingTransport {
        fn send_audio(&self, frame: EncodedFrame) -> Result<(), RealtimeError> {
            if self.refuse.load(Ordering::SeqCst) {
                return Err(RealtimeError::NotReady);
            }
            self.sent.lock().unwrap().push(frame);
            Ok(())
        }

        fn close(&self) {}

        fn is_connected(&self) -> bool {
            !self.refuse.load(Ordering::SeqCst)
        }
    }

    #[tokio::test]
    async fn test_frames_are_encoded_and_sent_in_order() {
        init_test_logger();
        let transport = Arc::new(RecordingTransport::default());
        let (status, _status_rx) = StatusReporter::new();
        let (tx, rx) = mpsc::channel(4);

        tx.send(AudioFrame::new(vec![1.0, -1.0])).await.unwrap();
        tx.send(AudioFrame::new(vec![0.0, 2.0])).await.unwrap();
        drop(tx);

        let stats = timeout(
            Duration::from_secs(1),
            OutboundStreamer::new(transport.clone(), status).run(rx),
        )
        .await
        .unwrap();

        assert_eq!(stats, OutboundStats { frames_sent: 2, frames_lost: 0 });
        let sent = transport.sent.lock().unwrap();
        assert_eq!(sent[0].samples(), &[32767, -32767]);
        assert_eq!(sent[1].samples(), &[0, 32767]);
    }

    #[tokio::test]
    async fn test_refused_frames_are_lost_and_reported() {
        init_test_logger();
        let transport = Arc::new(RecordingTransport::default());
        transport.refuse.store(true, Ordering::SeqCst);
        let (status, mut status_rx) = StatusReporter::new();
        let (tx, rx) = mpsc::channel(4);

        tx.send(AudioFrame::new(vec![0.1; 16])).await.unwrap();
        tx.send(AudioFrame::new(vec![0.2; 16])).await.unwrap();
        drop(tx);

        let stats = timeout(
            Duration::from_secs(1),
            OutboundStreamer::new(transport.clone(), status).run(rx),
        )
        .await
        .unwrap();

        assert_eq!(stats, OutboundStats { frames_sent: 0, frames_lost: 2 });
        assert!(transport.sent.lock().unwrap().is_empty());
        for _ in 0..2 {
            match status_rx.try_recv().unwrap() {
                StatusEvent::Failed { kind, .. } => assert_eq!(kind, FailureKind::Transmission),
                other => panic!("Unexpected status: {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_streaming_continues_after_a_lost_frame() {
        init_test_logger();
        let transport = Arc::new(RecordingTransport::default());
        let (status, _status_rx) = StatusReporter::new();
        let (tx, rx) = mpsc::channel(1);
        let task = tokio::spawn(OutboundStreamer::new(transport.clone(), status).run(rx));

        transport.refuse.store(true, Ordering::SeqCst);
        tx.send(AudioFrame::new(vec![0.3; 8])).await.unwrap();
        // The permit frees up once the streamer has taken the first frame.
        tx.reserve().await.unwrap().send(AudioFrame::new(vec![0.3; 8]));
        tokio::time::sleep(Duration::from_millis(20)).await;
        transport.refuse.store(false, Ordering::SeqCst);
        tx.send(AudioFrame::new(vec![0.4; 8])).await.unwrap();
        drop(tx);

        let stats = timeout(Duration::from_secs(1), task).await.unwrap().unwrap();
        assert_eq!(stats.frames_lost + stats.frames_sent, 3);
        assert!(stats.frames_lost >= 1);
        assert_eq!(transport.sent.lock().unwrap().last().unwrap().samples()[0], 13107);
    }
}
