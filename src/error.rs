use thiserror::Error;

/// Coarse classification of a [`RealtimeError`], used when reporting a failure
/// to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The session could not be provisioned or the transport could not be established.
    Connection,
    /// Outbound audio was handed to a transport that could not take it.
    Transmission,
    /// Reply audio could not be decoded.
    Decode,
    /// The microphone could not be claimed.
    Permission,
    Other,
}

#[derive(Error, Debug)]
pub enum RealtimeError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Session provisioning failed: {0}")]
    Provisioning(String),

    #[error("Transport is not connected")]
    NotReady,

    #[error("Failed to transmit audio: {0}")]
    Transmission(String),

    #[error("Failed to decode reply audio: {0}")]
    Decode(String),

    #[error("Microphone access denied: {0}")]
    PermissionDenied(String),

    #[error("Audio device error: {0}")]
    Device(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Audio resampling error: {0}")]
    AudioResampling(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl RealtimeError {
    pub fn kind(&self) -> FailureKind {
        match self {
            RealtimeError::Connection(_) | RealtimeError::Provisioning(_) => {
                FailureKind::Connection
            }
            RealtimeError::NotReady | RealtimeError::Transmission(_) => FailureKind::Transmission,
            RealtimeError::Decode(_) => FailureKind::Decode,
            RealtimeError::PermissionDenied(_) => FailureKind::Permission,
            RealtimeError::Device(_)
            | RealtimeError::Config(_)
            | RealtimeError::InvalidState(_)
            | RealtimeError::AudioResampling(_)
            | RealtimeError::Internal(_) => FailureKind::Other,
        }
    }
}
