use crate::config::ClientConfig;
use crate::error::RealtimeError;
use crate::types::SessionConfig;
use std::future::Future;
use tracing::{error, info};
use url::Url;

/// Obtains the per-session configuration (credential, model, voice) that a
/// session is opened with.
pub trait SessionProvisioner {
    fn create_session(&self) -> impl Future<Output = Result<SessionConfig, RealtimeError>> + Send;
}

/// Requests sessions from an HTTP backend with `POST {}`.
#[derive(Debug, Clone)]
pub struct HttpSessionProvisioner {
    http: reqwest::Client,
    endpoint: Url,
}

impl HttpSessionProvisioner {
    pub fn new(endpoint: Url) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint,
        }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(config.session_endpoint.clone())
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

impl SessionProvisioner for HttpSessionProvisioner {
    fn create_session(&self) -> impl Future<Output = Result<SessionConfig, RealtimeError>> + Send {
        let request = self
            .http
            .post(self.endpoint.clone())
            .json(&serde_json::json!({}));
        let endpoint = self.endpoint.clone();

        async move {
            info!("[Provisioner] Requesting session from {}.", endpoint);
            let response = request.send().await.map_err(|e| {
                error!("[Provisioner] Session request failed: {}", e);
                RealtimeError::Provisioning(format!("Session request to {} failed: {}", endpoint, e))
            })?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                error!("[Provisioner] Session endpoint returned {}.", status);
                return Err(RealtimeError::Provisioning(format!(
                    "Session endpoint returned {}: {}",
                    status, body
                )));
            }

            let config: SessionConfig = response.json().await.map_err(|e| {
                RealtimeError::Provisioning(format!("Failed to parse session response: {}", e))
            })?;
            info!(
                "[Provisioner] Session created for model {} (voice {}).",
                config.model, config.voice
            );
            Ok(config)
        }
    }
}

/// Hands out the same configuration every time. Useful when the credential is
/// obtained out of band.
#[derive(Debug, Clone)]
pub struct StaticProvisioner(pub SessionConfig);

impl SessionProvisioner for StaticProvisioner {
    fn create_session(&self) -> impl Future<Output = Result<SessionConfig, RealtimeError>> + Send {
        let config = self.0.clone();
        async move { Ok(config) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::init_test_logger;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serves exactly one HTTP request with the given status line and body.
    async fn serve_once(status: &'static str, body: &'static str) -> Url {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            loop {
                let n = stream.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&request).to_string();
                if let Some(header_end) = text.find("\r\n\r\n") {
                    let content_length = text[..header_end]
                        .lines()
                        .find_map(|line| {
                            let (name, value) = line.split_once(':')?;
                            name.eq_ignore_ascii_case("content-length")
                                .then(|| value.trim().parse::<usize>().ok())
                                .flatten()
                        })
                        .unwrap_or(0);
                    if request.len() >= header_end + 4 + content_length {
                        break;
                    }
                }
            }
            let response = format!(
                "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            stream.write_all(response.as_bytes()).await.unwrap();
            stream.shutdown().await.ok();
        });
        Url::parse(&format!("http://{}/create_session", addr)).unwrap()
    }

    #[tokio::test]
    async fn test_static_provisioner_returns_its_config() {
        let config = SessionConfig::new("ek_static", "model-a");
        let provisioner = StaticProvisioner(config.clone());
        assert_eq!(provisioner.create_session().await.unwrap(), config);
    }

    #[tokio::test]
    async fn test_http_provisioner_parses_session() {
        init_test_logger();
        let url = serve_once(
            "200 OK",
            r#"{"clientSecret":"ek_live","model":"gpt-4o-realtime-preview","voice":"verse"}"#,
        )
        .await;
        let config = HttpSessionProvisioner::new(url).create_session().await.unwrap();
        assert_eq!(config.client_secret, "ek_live");
        assert_eq!(config.voice, "verse");
    }

    #[tokio::test]
    async fn test_http_provisioner_rejects_error_status() {
        init_test_logger();
        let url = serve_once("500 Internal Server Error", r#"{"error":"boom"}"#).await;
        let result = HttpSessionProvisioner::new(url).create_session().await;
        assert!(matches!(result, Err(RealtimeError::Provisioning(_))));
    }

    #[tokio::test]
    async fn test_http_provisioner_rejects_malformed_body() {
        init_test_logger();
        let url = serve_once("200 OK", r#"{"model":"m"}"#).await;
        let result = HttpSessionProvisioner::new(url).create_session().await;
        assert!(matches!(result, Err(RealtimeError::Provisioning(_))));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_a_provisioning_error() {
        init_test_logger();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let url = Url::parse(&format!("http://{}/create_session", addr)).unwrap();
        let result = HttpSessionProvisioner::new(url).create_session().await;
        assert!(matches!(result, Err(RealtimeError::Provisioning(_))));
    }
}
