use crate::audio::SampleBlock;
use crate::config::SessionConfig;
use crate::error::{EdgeError, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};

/// Messages sent to the realtime service
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    #[serde(rename = "session.update")]
    SessionUpdate { session: SessionConfig },
    #[serde(rename = "input_audio_buffer.append")]
    InputAudioAppend { audio: String },
}

impl ClientEvent {
    /// Append a PCM16 block to the service's input buffer
    pub fn audio(block: &SampleBlock) -> Self {
        ClientEvent::InputAudioAppend {
            audio: STANDARD.encode(block.to_le_bytes()),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Payload of a service `error` event
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ServiceError {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub code: Option<String>,
    pub message: Option<String>,
    pub event_id: Option<String>,
}

impl ServiceError {
    /// Errors after which the conversation cannot continue
    pub fn is_fatal(&self) -> bool {
        self.kind.as_deref() == Some("server_error")
            || matches!(
                self.code.as_deref(),
                Some("session_expired") | Some("invalid_api_key")
            )
    }
}

/// Inbound events the engine acts on; everything else is [`ServerEvent::Other`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    /// Base64 PCM16 at the transport rate
    AudioDelta { delta: String },
    ResponseDone,
    Error(ServiceError),
    TranscriptDelta { delta: String },
    Other(String),
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    delta: Option<String>,
    #[serde(default)]
    error: Option<ServiceError>,
}

impl ServerEvent {
    pub fn from_json(text: &str) -> Result<Self> {
        let envelope: Envelope = serde_json::from_str(text)?;

        let event = match envelope.kind.as_str() {
            "response.audio.delta" => ServerEvent::AudioDelta {
                delta: envelope.delta.ok_or_else(|| {
                    EdgeError::Protocol("response.audio.delta without delta".to_string())
                })?,
            },
            "response.audio_transcript.delta" => ServerEvent::TranscriptDelta {
                delta: envelope.delta.unwrap_or_default(),
            },
            "response.done" => ServerEvent::ResponseDone,
            "error" => ServerEvent::Error(envelope.error.unwrap_or_default()),
            _ => ServerEvent::Other(envelope.kind),
        };
        Ok(event)
    }

    pub fn kind(&self) -> &str {
        match self {
            ServerEvent::AudioDelta { .. } => "response.audio.delta",
            ServerEvent::ResponseDone => "response.done",
            ServerEvent::Error(_) => "error",
            ServerEvent::TranscriptDelta { .. } => "response.audio_transcript.delta",
            ServerEvent::Other(kind) => kind,
        }
    }
}

/// Decode an audio delta payload into samples at `sample_rate`
pub fn decode_audio(delta: &str, sample_rate: u32) -> Result<SampleBlock> {
    let bytes = STANDARD.decode(delta)?;
    Ok(SampleBlock::from_le_bytes(&bytes, sample_rate))
}
