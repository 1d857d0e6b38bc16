use super::OUTGOING_QUEUE_CAPACITY;
use super::connection::{open_socket, spawn_processing_task};
use super::handle::RealtimeClient;
use super::transport::{Connected, SessionConnector};
use crate::config::{ClientConfig, DEFAULT_EVENT_CAPACITY, DEFAULT_KEEPALIVE_SECS};
use crate::error::RealtimeError;
use crate::types::{ClientEvent, SessionConfig, SessionUpdate};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::info;
use url::Url;

pub struct RealtimeClientBuilder {
    pub(crate) config: SessionConfig,
    pub(crate) realtime_url: Url,
    pub(crate) keepalive_interval: Duration,
    pub(crate) event_capacity: usize,
}

impl RealtimeClientBuilder {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            realtime_url: ClientConfig::default().realtime_url,
            keepalive_interval: Duration::from_secs(DEFAULT_KEEPALIVE_SECS),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }

    /// Overrides the websocket endpoint (defaults to [`crate::config::DEFAULT_REALTIME_URL`]).
    pub fn realtime_url(mut self, url: Url) -> Self {
        self.realtime_url = url;
        self
    }

    /// Idle interval after which a ping is sent to keep the socket open.
    pub fn keepalive_interval(mut self, interval: Duration) -> Self {
        self.keepalive_interval = interval.max(Duration::from_millis(1));
        self
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }

    /// Opens the socket, queues the `session.update` describing the audio
    /// formats, and starts the socket task. The returned transport is ready
    /// to accept audio.
    pub async fn connect(self) -> Result<Connected<RealtimeClient>, RealtimeError> {
        let ws_stream = open_socket(&self.realtime_url, &self.config).await?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let (outgoing_sender, outgoing_receiver) = mpsc::channel(OUTGOING_QUEUE_CAPACITY);
        let (event_tx, event_rx) = mpsc::channel(self.event_capacity);
        let connected = Arc::new(AtomicBool::new(true));

        outgoing_sender
            .try_send(ClientEvent::SessionUpdate {
                session: SessionUpdate::from(&self.config),
            })
            .map_err(|e| RealtimeError::Internal(format!("Failed to queue session.update: {}", e)))?;

        spawn_processing_task(
            ws_stream,
            event_tx,
            outgoing_receiver,
            shutdown_rx,
            connected.clone(),
            self.keepalive_interval,
        );
        info!("[ClientBuilder] Session established for model {}.", self.config.model);

        Ok(Connected {
            transport: Arc::new(RealtimeClient::new(shutdown_tx, outgoing_sender, connected)),
            events: event_rx,
        })
    }
}

/// [`SessionConnector`] that opens real websocket sessions.
#[derive(Debug, Clone)]
pub struct RealtimeConnector {
    realtime_url: Url,
    keepalive_interval: Duration,
    event_capacity: usize,
}

impl RealtimeConnector {
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            realtime_url: config.realtime_url.clone(),
            keepalive_interval: config.keepalive_interval,
            event_capacity: config.event_capacity,
        }
    }
}

impl Default for RealtimeConnector {
    fn default() -> Self {
        Self::from_config(&ClientConfig::default())
    }
}

impl SessionConnector for RealtimeConnector {
    type Transport = RealtimeClient;

    fn connect(
        &self,
        config: &SessionConfig,
    ) -> impl Future<Output = Result<Connected<RealtimeClient>, RealtimeError>> + Send {
        let builder = RealtimeClientBuilder::new(config.clone())
            .realtime_url(self.realtime_url.clone())
            .keepalive_interval(self.keepalive_interval)
            .event_capacity(self.event_capacity);
        builder.connect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::pcm::encode_samples;
    use crate::client::transport::SessionTransport;
    use crate::test_utils::init_test_logger;
    use crate::types::SessionEvent;
    use futures_util::{SinkExt, StreamExt};
    use tokio::net::TcpListener;
    use tokio::time::timeout;
    use tokio_tungstenite::tungstenite::protocol::Message;

    fn test_session() -> SessionConfig {
        SessionConfig::new("ek_test", "gpt-4o-realtime-preview")
    }

    #[tokio::test]
    async fn test_connect_failure_is_a_connection_error() {
        init_test_logger();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let url = Url::parse(&format!("ws://{}/v1/realtime", addr)).unwrap();
        let result = RealtimeClientBuilder::new(test_session())
            .realtime_url(url)
            .connect()
            .await;
        assert!(matches!(result, Err(RealtimeError::Connection(_))));
    }

    #[tokio::test]
    async fn test_session_round_trip_against_local_server() {
        init_test_logger();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            let mut received = Vec::new();
            while received.len() < 2 {
                match ws.next().await {
                    Some(Ok(Message::Text(text))) => {
                        received.push(serde_json::from_str::<serde_json::Value>(text.as_str()).unwrap());
                    }
                    Some(Ok(_)) => {}
                    _ => break,
                }
            }
            ws.send(Message::Text(
                r#"{"type":"response.audio.delta","delta":"QUFB"}"#.to_string().into(),
            ))
            .await
            .unwrap();
            ws.send(Message::Text(r#"{"type":"response.audio.done"}"#.to_string().into()))
                .await
                .unwrap();
            ws.send(Message::Close(None)).await.unwrap();
            received
        });

        let url = Url::parse(&format!("ws://{}/v1/realtime", addr)).unwrap();
        let Connected { transport, mut events } = RealtimeClientBuilder::new(test_session())
            .realtime_url(url)
            .connect()
            .await
            .unwrap();
        assert!(transport.is_connected());
        transport.send_audio(encode_samples(&[0.5; 4])).unwrap();

        let first = timeout(Duration::from_secs(5), events.recv()).await.unwrap();
        assert_eq!(first, Some(SessionEvent::AudioFragment(b"AAA".to_vec())));
        let second = timeout(Duration::from_secs(5), events.recv()).await.unwrap();
        assert_eq!(second, Some(SessionEvent::Completion));
        let third = timeout(Duration::from_secs(5), events.recv()).await.unwrap();
        assert_eq!(third, Some(SessionEvent::Closed));
        assert!(!transport.is_connected());

        let received = timeout(Duration::from_secs(5), server).await.unwrap().unwrap();
        assert_eq!(received[0]["type"], "session.update");
        assert_eq!(received[0]["session"]["input_audio_format"], "pcm16");
        assert_eq!(received[1]["type"], "input_audio_buffer.append");
        assert!(received[1]["audio"].as_str().is_some());
    }
}
