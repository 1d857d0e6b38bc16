use serde::{Deserialize, Serialize};

/// Output modality enabled for a session.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    Text,
    Audio,
}

fn default_modalities() -> Vec<Modality> {
    vec![Modality::Text, Modality::Audio]
}

fn default_voice() -> String {
    "alloy".to_string()
}

/// Per-session configuration handed out by the session-creation endpoint.
///
/// Read-only for the lifetime of a session.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
    pub client_secret: String,
    pub model: String,
    #[serde(default = "default_modalities")]
    pub modalities: Vec<Modality>,
    #[serde(default = "default_voice")]
    pub voice: String,
    #[serde(default)]
    pub instructions: String,
}

impl SessionConfig {
    /// Config with the default voice and modalities.
    pub fn new(client_secret: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client_secret: client_secret.into(),
            model: model.into(),
            modalities: default_modalities(),
            voice: default_voice(),
            instructions: String::new(),
        }
    }
}

/// Events the session facade delivers to the core, in transport arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Final transcript of the user's speech.
    Transcription(String),
    /// Incremental reply text (or transcript of the reply audio).
    TextDelta(String),
    /// Raw reply audio bytes.
    AudioFragment(Vec<u8>),
    /// The current reply's audio is complete.
    Completion,
    /// The service reported an error on the session.
    ServiceError(String),
    /// The transport closed; no further events follow.
    Closed,
}

// --- Wire format ---

#[derive(Serialize, Debug, Clone, Default, PartialEq)]
pub struct InputAudioTranscription {
    pub model: String,
}

#[derive(Serialize, Debug, Clone, Default, PartialEq)]
pub struct SessionUpdate {
    pub modalities: Vec<Modality>,
    pub voice: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub instructions: String,
    pub input_audio_format: String,
    pub output_audio_format: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_transcription: Option<InputAudioTranscription>,
}

impl From<&SessionConfig> for SessionUpdate {
    fn from(config: &SessionConfig) -> Self {
        Self {
            modalities: config.modalities.clone(),
            voice: config.voice.clone(),
            instructions: config.instructions.clone(),
            input_audio_format: "pcm16".to_string(),
            output_audio_format: "pcm16".to_string(),
            input_audio_transcription: Some(InputAudioTranscription {
                model: "whisper-1".to_string(),
            }),
        }
    }
}

/// Messages sent from the client to the realtime service.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "type")]
pub enum ClientEvent {
    #[serde(rename = "session.update")]
    SessionUpdate { session: SessionUpdate },
    /// `audio` is base64 of 16-bit little-endian PCM.
    #[serde(rename = "input_audio_buffer.append")]
    InputAudioBufferAppend { audio: String },
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
pub struct ServiceErrorDetail {
    #[serde(default)]
    pub message: String,
    #[serde(default, rename = "type")]
    pub error_type: Option<String>,
}

/// Messages received from the realtime service. Unlisted event types are
/// collected into `Other` and ignored.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "session.created")]
    SessionCreated {},
    #[serde(rename = "session.updated")]
    SessionUpdated {},
    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    InputTranscriptionCompleted { transcript: String },
    #[serde(rename = "response.text.delta")]
    TextDelta { delta: String },
    #[serde(rename = "response.audio_transcript.delta")]
    AudioTranscriptDelta { delta: String },
    #[serde(rename = "response.audio.delta")]
    AudioDelta { delta: String },
    #[serde(rename = "response.audio.done")]
    AudioDone {},
    #[serde(rename = "response.done")]
    ResponseDone {},
    #[serde(rename = "error")]
    Error { error: ServiceErrorDetail },
    #[serde(other)]
    Other,
}
