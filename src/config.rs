use crate::audio::decoder::ReplyFormat;
use crate::error::RealtimeError;
use std::time::Duration;
use url::Url;

pub const DEFAULT_SESSION_ENDPOINT: &str = "http://localhost:10000/create_session";
pub const DEFAULT_REALTIME_URL: &str = "wss://api.openai.com/v1/realtime";
pub const DEFAULT_KEEPALIVE_SECS: u64 = 25;
pub const DEFAULT_EVENT_CAPACITY: usize = 64;

/// Deployment settings for the client. Values that vary per session (model,
/// voice, instructions) come from [`crate::SessionConfig`] instead.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub session_endpoint: Url,
    pub realtime_url: Url,
    pub reply_format: ReplyFormat,
    pub keepalive_interval: Duration,
    pub event_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            session_endpoint: Url::parse(DEFAULT_SESSION_ENDPOINT)
                .expect("default session endpoint is a valid URL"),
            realtime_url: Url::parse(DEFAULT_REALTIME_URL)
                .expect("default realtime URL is a valid URL"),
            reply_format: ReplyFormat::default(),
            keepalive_interval: Duration::from_secs(DEFAULT_KEEPALIVE_SECS),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl ClientConfig {
    /// Reads overrides from `REALTIME_*` environment variables; unset
    /// variables keep their defaults.
    pub fn from_env() -> Result<Self, RealtimeError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Self, RealtimeError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup("REALTIME_SESSION_ENDPOINT") {
            config.session_endpoint = parse_url("REALTIME_SESSION_ENDPOINT", &raw)?;
        }
        if let Some(raw) = lookup("REALTIME_URL") {
            let url = parse_url("REALTIME_URL", &raw)?;
            if url.scheme() != "ws" && url.scheme() != "wss" {
                return Err(RealtimeError::Config(format!(
                    "REALTIME_URL must use ws:// or wss://, got '{}'",
                    raw
                )));
            }
            config.realtime_url = url;
        }
        if let Some(raw) = lookup("REALTIME_REPLY_FORMAT") {
            config.reply_format = raw.parse()?;
        }
        if let Some(raw) = lookup("REALTIME_KEEPALIVE_SECS") {
            let secs: u64 = raw.trim().parse().map_err(|_| {
                RealtimeError::Config(format!("REALTIME_KEEPALIVE_SECS is not a number: '{}'", raw))
            })?;
            if secs == 0 {
                return Err(RealtimeError::Config(
                    "REALTIME_KEEPALIVE_SECS must be greater than zero".to_string(),
                ));
            }
            config.keepalive_interval = Duration::from_secs(secs);
        }
        if let Some(raw) = lookup("REALTIME_EVENT_CAPACITY") {
            let capacity: usize = raw.trim().parse().map_err(|_| {
                RealtimeError::Config(format!("REALTIME_EVENT_CAPACITY is not a number: '{}'", raw))
            })?;
            if capacity == 0 {
                return Err(RealtimeError::Config(
                    "REALTIME_EVENT_CAPACITY must be greater than zero".to_string(),
                ));
            }
            config.event_capacity = capacity;
        }

        Ok(config)
    }
}

fn parse_url(key: &str, raw: &str) -> Result<Url, RealtimeError> {
    Url::parse(raw.trim())
        .map_err(|e| RealtimeError::Config(format!("{} is not a valid URL ('{}'): {}", key, raw, e)))
}
