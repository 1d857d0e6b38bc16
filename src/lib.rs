pub mod audio;
pub mod client;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod types;

pub use client::{RealtimeClient, RealtimeClientBuilder, RealtimeConnector};
pub use config::ClientConfig;
pub use error::{FailureKind, RealtimeError};
pub use pipeline::{ControlState, StatusEvent, VoiceSession};
pub use types::{Modality, SessionConfig, SessionEvent};
