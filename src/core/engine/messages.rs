//! Engine WebSocket wire event types.
//!
//! All events are JSON-encoded and tagged by a `type` field.
//!
//! Client events (sent to the engine):
//! - session.update - Session configuration handshake
//! - input_audio_buffer.append - Append audio to the input buffer
//! - input_audio_buffer.clear - Clear the input buffer
//! - conversation.item.create - Add an item to the conversation
//! - response.create - Generate a response
//! - response.cancel - Cancel the current response
//!
//! Server events (received from the engine):
//! - session.created - Session established
//! - session.updated - Session configuration acknowledged
//! - input_audio_buffer.speech_started / speech_stopped - Voice activity
//! - conversation.item.input_audio_transcription.completed - User transcript
//! - response.created - Response generation started
//! - response.audio.delta - Audio data chunk
//! - response.audio_transcript.delta / done - Assistant transcript
//! - response.done - Response complete
//! - error - Error occurred

use base64::prelude::*;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

// =============================================================================
// Client Events
// =============================================================================

/// Events sent to the engine.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    /// Session configuration handshake
    #[serde(rename = "session.update")]
    SessionUpdate { session: SessionConfig },

    /// Append audio to the input buffer (base64 PCM16)
    #[serde(rename = "input_audio_buffer.append")]
    InputAudioBufferAppend { audio: String },

    /// Clear the input buffer
    #[serde(rename = "input_audio_buffer.clear")]
    InputAudioBufferClear {},

    /// Add an item to the conversation
    #[serde(rename = "conversation.item.create")]
    ConversationItemCreate { item: ConversationItem },

    /// Request the engine to generate a response
    #[serde(rename = "response.create")]
    ResponseCreate {},

    /// Cancel the current response generation
    #[serde(rename = "response.cancel")]
    ResponseCancel {},
}

impl ClientEvent {
    /// Build an audio append event from raw PCM bytes.
    pub fn audio_append(audio: &[u8]) -> Self {
        ClientEvent::InputAudioBufferAppend {
            audio: BASE64_STANDARD.encode(audio),
        }
    }

    /// Build a user text message item.
    pub fn user_text(text: &str) -> Self {
        ClientEvent::ConversationItemCreate {
            item: ConversationItem {
                item_type: "message".to_string(),
                role: Some("user".to_string()),
                content: Some(vec![ContentPart {
                    content_type: "input_text".to_string(),
                    text: Some(text.to_string()),
                    image: None,
                }]),
            },
        }
    }

    /// Build a system text message item.
    pub fn system_text(text: &str) -> Self {
        ClientEvent::ConversationItemCreate {
            item: ConversationItem {
                item_type: "message".to_string(),
                role: Some("system".to_string()),
                content: Some(vec![ContentPart {
                    content_type: "input_text".to_string(),
                    text: Some(text.to_string()),
                    image: None,
                }]),
            },
        }
    }

    /// Build a user image item carrying one compressed frame (base64).
    pub fn user_image(image_b64: &str) -> Self {
        ClientEvent::ConversationItemCreate {
            item: ConversationItem {
                item_type: "message".to_string(),
                role: Some("user".to_string()),
                content: Some(vec![ContentPart {
                    content_type: "input_image".to_string(),
                    text: None,
                    image: Some(image_b64.to_string()),
                }]),
            },
        }
    }

    /// True for audio append events; these are the only events buffered
    /// across a reconnect cycle.
    pub fn is_audio_append(&self) -> bool {
        matches!(self, ClientEvent::InputAudioBufferAppend { .. })
    }
}

/// Session configuration for the engine handshake.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Response modalities (text, audio)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modalities: Option<Vec<String>>,

    /// Instruction text for the session
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,

    /// Voice for audio output
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,

    /// Input audio format
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_format: Option<String>,

    /// Output audio format
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_audio_format: Option<String>,

    /// Turn detection configuration
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turn_detection: Option<TurnDetection>,
}

/// Turn detection configuration.
///
/// The bridge drives response creation and barge-in itself, so both
/// `create_response` and `interrupt_response` are sent as false.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TurnDetection {
    /// Server-side VAD
    #[serde(rename = "server_vad")]
    ServerVad {
        /// Activation threshold
        #[serde(skip_serializing_if = "Option::is_none")]
        threshold: Option<f32>,
        /// Whether the engine auto-creates responses on turn end
        #[serde(skip_serializing_if = "Option::is_none")]
        create_response: Option<bool>,
        /// Whether the engine auto-interrupts output on speech
        #[serde(skip_serializing_if = "Option::is_none")]
        interrupt_response: Option<bool>,
    },
}

/// Conversation item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationItem {
    /// Item type (message)
    #[serde(rename = "type")]
    pub item_type: String,
    /// Item role (user, assistant, system)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Content parts
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<Vec<ContentPart>>,
}

/// Content part within a conversation item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentPart {
    /// Content type (input_text, input_image)
    #[serde(rename = "type")]
    pub content_type: String,
    /// Text content
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Image content (base64 encoded)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

// =============================================================================
// Server Events
// =============================================================================

/// Events received from the engine.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    /// Session established
    #[serde(rename = "session.created")]
    SessionCreated { session: SessionInfo },

    /// Session configuration acknowledged
    #[serde(rename = "session.updated")]
    SessionUpdated {},

    /// Speech detection started
    #[serde(rename = "input_audio_buffer.speech_started")]
    SpeechStarted {
        #[serde(default)]
        audio_start_ms: u64,
    },

    /// Speech detection stopped
    #[serde(rename = "input_audio_buffer.speech_stopped")]
    SpeechStopped {
        #[serde(default)]
        audio_end_ms: u64,
    },

    /// Finalized user transcript
    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    InputTranscriptionCompleted { transcript: String },

    /// Response generation started
    #[serde(rename = "response.created")]
    ResponseCreated { response: ResponseInfo },

    /// Audio data chunk (base64 PCM16)
    #[serde(rename = "response.audio.delta")]
    AudioDelta {
        response_id: String,
        delta: String,
    },

    /// Assistant transcript chunk
    #[serde(rename = "response.audio_transcript.delta")]
    TranscriptDelta {
        #[serde(default)]
        response_id: Option<String>,
        delta: String,
    },

    /// Assistant transcript complete
    #[serde(rename = "response.audio_transcript.done")]
    TranscriptDone {
        #[serde(default)]
        response_id: Option<String>,
        transcript: String,
    },

    /// Response complete
    #[serde(rename = "response.done")]
    ResponseDone { response: ResponseInfo },

    /// Error occurred
    #[serde(rename = "error")]
    Error { error: ErrorInfo },

    /// Any event type the bridge does not consume
    #[serde(other)]
    Unhandled,
}

/// Session metadata from the engine.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionInfo {
    pub id: String,
}

/// Response metadata from the engine.
#[derive(Debug, Clone, Deserialize)]
pub struct ResponseInfo {
    pub id: String,
    #[serde(default)]
    pub status: Option<String>,
}

/// Error details from the engine.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorInfo {
    #[serde(rename = "type", default)]
    pub error_type: String,
    pub message: String,
    /// Whether the error is fatal to the socket
    #[serde(default)]
    pub fatal: bool,
}

/// Decode a base64 audio delta payload.
pub fn decode_audio_delta(delta: &str) -> Option<Bytes> {
    match BASE64_STANDARD.decode(delta) {
        Ok(audio) => Some(Bytes::from(audio)),
        Err(e) => {
            tracing::error!("Failed to decode audio delta: {}", e);
            None
        }
    }
}
