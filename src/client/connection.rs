use crate::error::RealtimeError;
use crate::types::{ClientEvent, ServerEvent, SessionConfig, SessionEvent};
use base64::Engine as _;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderValue, header::AUTHORIZATION};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, error, info, trace, warn};
use url::Url;

use super::REALTIME_BETA_HEADER;

pub(crate) type RealtimeSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Performs the websocket handshake for `config.model`, authenticating with
/// the session's client secret.
pub(crate) async fn open_socket(
    realtime_url: &Url,
    config: &SessionConfig,
) -> Result<RealtimeSocket, RealtimeError> {
    // A second install attempt fails harmlessly once a provider is set.
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    let mut url = realtime_url.clone();
    url.query_pairs_mut().append_pair("model", &config.model);

    let mut request = url
        .as_str()
        .into_client_request()
        .map_err(|e| RealtimeError::Connection(format!("Invalid realtime URL '{}': {}", url, e)))?;
    let auth = HeaderValue::from_str(&format!("Bearer {}", config.client_secret))
        .map_err(|e| RealtimeError::Connection(format!("Client secret is not a valid header: {}", e)))?;
    request.headers_mut().insert(AUTHORIZATION, auth);
    request.headers_mut().insert(
        REALTIME_BETA_HEADER.0,
        HeaderValue::from_static(REALTIME_BETA_HEADER.1),
    );

    info!("[Connection] Connecting to {} (model {}).", realtime_url, config.model);
    let (ws_stream, response) = connect_async(request).await.map_err(|e| {
        error!("[Connection] Handshake failed: {}", e);
        RealtimeError::Connection(e.to_string())
    })?;
    info!(
        "[Connection] Connected. Handshake status: {}",
        response.status()
    );
    Ok(ws_stream)
}

/// Translates a service message into the core's event vocabulary.
pub(crate) fn map_server_event(event: ServerEvent) -> Option<SessionEvent> {
    match event {
        ServerEvent::SessionCreated {} => {
            debug!("[Connection] Session created.");
            None
        }
        ServerEvent::SessionUpdated {} => {
            debug!("[Connection] Session configuration acknowledged.");
            None
        }
        ServerEvent::InputTranscriptionCompleted { transcript } => {
            Some(SessionEvent::Transcription(transcript))
        }
        ServerEvent::TextDelta { delta } | ServerEvent::AudioTranscriptDelta { delta } => {
            Some(SessionEvent::TextDelta(delta))
        }
        ServerEvent::AudioDelta { delta } => {
            match base64::engine::general_purpose::STANDARD.decode(delta.as_bytes()) {
                Ok(bytes) => Some(SessionEvent::AudioFragment(bytes)),
                Err(e) => {
                    warn!("[Connection] Skipping audio delta with invalid base64: {}", e);
                    None
                }
            }
        }
        ServerEvent::AudioDone {} => Some(SessionEvent::Completion),
        ServerEvent::ResponseDone {} => {
            debug!("[Connection] Response done.");
            None
        }
        ServerEvent::Error { error } => Some(SessionEvent::ServiceError(error.message)),
        ServerEvent::Other => None,
    }
}

fn parse_text_message(text: &str) -> Option<SessionEvent> {
    match serde_json::from_str::<ServerEvent>(text) {
        Ok(event) => map_server_event(event),
        Err(e) => {
            warn!("[Connection] Ignoring unparsable server message: {}", e);
            None
        }
    }
}

async fn forward(event_tx: &mpsc::Sender<SessionEvent>, event: SessionEvent) {
    trace!("[Connection] Forwarding {:?}", event_kind(&event));
    if event_tx.send(event).await.is_err() {
        debug!("[Connection] Event receiver dropped; discarding event.");
    }
}

fn event_kind(event: &SessionEvent) -> &'static str {
    match event {
        SessionEvent::Transcription(_) => "transcription",
        SessionEvent::TextDelta(_) => "text",
        SessionEvent::AudioFragment(_) => "audio",
        SessionEvent::Completion => "done",
        SessionEvent::ServiceError(_) => "error",
        SessionEvent::Closed => "closed",
    }
}

/// Drives the socket until shutdown, the peer closes, or every client handle is gone.
pub(crate) fn spawn_processing_task(
    ws_stream: RealtimeSocket,
    event_tx: mpsc::Sender<SessionEvent>,
    mut outgoing_rx: mpsc::Receiver<ClientEvent>,
    mut shutdown_rx: oneshot::Receiver<()>,
    connected: Arc<AtomicBool>,
    keepalive_interval: Duration,
) {
    tokio::spawn(async move {
        let (mut ws_sink, mut ws_source) = ws_stream.split();
        let mut keepalive = tokio::time::interval_at(
            tokio::time::Instant::now() + keepalive_interval,
            keepalive_interval,
        );
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut pings_sent: u64 = 0;

        info!("[Connection] Processing task started.");
        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown_rx => {
                    info!("[Connection] Shutdown requested; closing socket.");
                    if let Err(e) = ws_sink.send(Message::Close(None)).await {
                        debug!("[Connection] Close frame not sent: {}", e);
                    }
                    break;
                }
                maybe_outgoing = outgoing_rx.recv() => {
                    let Some(outgoing) = maybe_outgoing else {
                        info!("[Connection] All client handles dropped; closing socket.");
                        let _ = ws_sink.send(Message::Close(None)).await;
                        break;
                    };
                    let json = match serde_json::to_string(&outgoing) {
                        Ok(json) => json,
                        Err(e) => {
                            error!("[Connection] Failed to serialize client event: {}", e);
                            continue;
                        }
                    };
                    if let Err(e) = ws_sink.send(Message::Text(json.into())).await {
                        error!("[Connection] Failed to send message: {}", e);
                        break;
                    }
                    keepalive.reset();
                }
                incoming = ws_source.next() => {
                    match incoming {
                        Some(Ok(Message::Text(text))) => {
                            if let Some(event) = parse_text_message(text.as_str()) {
                                forward(&event_tx, event).await;
                            }
                        }
                        Some(Ok(Message::Binary(bytes))) => {
                            forward(&event_tx, SessionEvent::AudioFragment(bytes.to_vec())).await;
                        }
                        Some(Ok(Message::Close(frame))) => {
                            info!("[Connection] Server closed the session: {:?}", frame);
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            error!("[Connection] Socket error: {}", e);
                            break;
                        }
                        None => {
                            info!("[Connection] Socket stream ended.");
                            break;
                        }
                    }
                }
                _ = keepalive.tick() => {
                    pings_sent += 1;
                    trace!("[Connection] Keepalive ping #{}.", pings_sent);
                    if let Err(e) = ws_sink.send(Message::Ping(Default::default())).await {
                        error!("[Connection] Keepalive ping failed: {}", e);
                        break;
                    }
                }
            }
        }

        connected.store(false, Ordering::Release);
        forward(&event_tx, SessionEvent::Closed).await;
        info!("[Connection] Processing task finished.");
    });
}
