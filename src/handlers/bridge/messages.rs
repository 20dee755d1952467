//! Client-facing WebSocket message types.
//!
//! JSON text messages tagged by a `type` field. Inbound audio is also
//! accepted as raw binary frames; outbound audio prefers binary frames with
//! the JSON `audio` message as a fallback for clients that cannot handle
//! binary.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::core::session::rules::PerceptionPacket;

/// Maximum allowed size for text messages (50 KB)
pub const MAX_TEXT_SIZE: usize = 50 * 1024;

/// Maximum allowed size for a base64 audio payload (2 MB)
pub const MAX_AUDIO_SIZE: usize = 2 * 1024 * 1024;

/// Maximum allowed size for a base64 frame payload (8 MB)
pub const MAX_FRAME_SIZE: usize = 8 * 1024 * 1024;

// =============================================================================
// Incoming Messages (Client -> Bridge)
// =============================================================================

/// Incoming WebSocket messages from the client device.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// PCM16 audio chunk (base64)
    #[serde(rename = "audio")]
    Audio {
        /// Base64 PCM payload
        audio: String,
    },

    /// Compressed video frame (base64); capture time is arrival time
    #[serde(rename = "frame")]
    Frame {
        /// Base64 image payload
        frame: String,
    },

    /// Interjection sensitivity (0.0 to 1.0)
    #[serde(rename = "sensitivity")]
    Sensitivity { value: f32 },

    /// Operating mode change
    #[serde(rename = "mode")]
    Mode { mode: String },

    /// Typed user message, treated as a finalized utterance
    #[serde(rename = "user_message")]
    UserMessage { text: String },

    /// Structured perception packet for the fast path
    #[serde(rename = "perception")]
    Perception(PerceptionPacket),
}

// =============================================================================
// Outgoing Messages (Bridge -> Client)
// =============================================================================

/// Outgoing WebSocket messages to the client device.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum RelayMessage {
    /// Session established and usable
    #[serde(rename = "session_ready")]
    SessionReady {
        /// Session ID
        session_id: String,
    },

    /// Finalized transcript line
    #[serde(rename = "transcript")]
    Transcript {
        /// Transcribed text
        text: String,
        /// Role (user or assistant)
        role: String,
    },

    /// PCM16 audio chunk to play (base64 JSON fallback)
    #[serde(rename = "audio")]
    Audio {
        /// Base64 PCM payload
        audio: String,
    },

    /// Error requiring user awareness
    #[serde(rename = "error")]
    Error {
        /// Error code (optional)
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<String>,
        /// Error message
        message: String,
    },

    /// Mute the client microphone
    #[serde(rename = "mute_mic")]
    MuteMic,

    /// Unmute the client microphone
    #[serde(rename = "unmute_mic")]
    UnmuteMic,

    /// Stop local audio playback immediately (barge-in)
    #[serde(rename = "stop_audio")]
    StopAudio,

    /// Capture and send a fresh video frame
    #[serde(rename = "request_frame")]
    RequestFrame,
}

// =============================================================================
// Message Routing
// =============================================================================

/// Routing envelope for the outbound sender task.
#[derive(Debug)]
pub enum MessageRoute {
    /// JSON text message
    Outgoing(RelayMessage),
    /// Binary audio data
    Audio(Bytes),
    /// Close the connection
    Close,
}

// =============================================================================
// Validation
// =============================================================================

/// Error type for message validation failures.
#[derive(Debug, Clone)]
pub enum ValidationError {
    /// Text content exceeds the maximum allowed size
    TextTooLarge { size: usize, max: usize },
    /// Audio payload exceeds the maximum allowed size
    AudioTooLarge { size: usize, max: usize },
    /// Frame payload exceeds the maximum allowed size
    FrameTooLarge { size: usize, max: usize },
    /// Sensitivity outside 0.0..=1.0
    SensitivityOutOfRange { value: f32 },
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TextTooLarge { size, max } => {
                write!(f, "Text too large: {} bytes (max: {} bytes)", size, max)
            }
            Self::AudioTooLarge { size, max } => {
                write!(f, "Audio too large: {} bytes (max: {} bytes)", size, max)
            }
            Self::FrameTooLarge { size, max } => {
                write!(f, "Frame too large: {} bytes (max: {} bytes)", size, max)
            }
            Self::SensitivityOutOfRange { value } => {
                write!(f, "Sensitivity out of range: {} (must be 0.0 to 1.0)", value)
            }
        }
    }
}

impl std::error::Error for ValidationError {}

impl ClientMessage {
    /// Validates message field sizes to prevent resource exhaustion attacks.
    pub fn validate_size(&self) -> Result<(), ValidationError> {
        match self {
            ClientMessage::Audio { audio } => {
                if audio.len() > MAX_AUDIO_SIZE {
                    return Err(ValidationError::AudioTooLarge {
                        size: audio.len(),
                        max: MAX_AUDIO_SIZE,
                    });
                }
            }
            ClientMessage::Frame { frame } => {
                if frame.len() > MAX_FRAME_SIZE {
                    return Err(ValidationError::FrameTooLarge {
                        size: frame.len(),
                        max: MAX_FRAME_SIZE,
                    });
                }
            }
            ClientMessage::UserMessage { text } => {
                if text.len() > MAX_TEXT_SIZE {
                    return Err(ValidationError::TextTooLarge {
                        size: text.len(),
                        max: MAX_TEXT_SIZE,
                    });
                }
            }
            ClientMessage::Sensitivity { value } => {
                if !(0.0..=1.0).contains(value) {
                    return Err(ValidationError::SensitivityOutOfRange { value: *value });
                }
            }
            ClientMessage::Mode { .. } | ClientMessage::Perception(_) => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audio_message_deserialization() {
        let json = r#"{"type": "audio", "audio": "AAEC"}"#;
        let msg: ClientMessage = serde_json::from_str(json).expect("Should deserialize");
        match msg {
            ClientMessage::Audio { audio } => assert_eq!(audio, "AAEC"),
            _ => panic!("Expected Audio variant"),
        }
    }

    #[test]
    fn test_perception_message_deserialization() {
        let json = r#"{
            "type": "perception",
            "transcript": "what is this",
            "signals": {"novelty_confidence": 0.8}
        }"#;
        let msg: ClientMessage = serde_json::from_str(json).expect("Should deserialize");
        match msg {
            ClientMessage::Perception(packet) => {
                assert_eq!(packet.transcript.as_deref(), Some("what is this"));
                assert_eq!(packet.novelty_confidence(), Some(0.8));
            }
            _ => panic!("Expected Perception variant"),
        }
    }

    #[test]
    fn test_mode_message_deserialization() {
        let json = r#"{"type": "mode", "mode": "driving"}"#;
        let msg: ClientMessage = serde_json::from_str(json).expect("Should deserialize");
        assert!(matches!(msg, ClientMessage::Mode { mode } if mode == "driving"));
    }

    #[test]
    fn test_session_ready_serialization() {
        let msg = RelayMessage::SessionReady {
            session_id: "sess_1".to_string(),
        };
        let json = serde_json::to_string(&msg).expect("Should serialize");
        assert!(json.contains(r#""type":"session_ready""#));
        assert!(json.contains(r#""session_id":"sess_1""#));
    }

    #[test]
    fn test_control_message_serialization() {
        let json = serde_json::to_string(&RelayMessage::MuteMic).expect("Should serialize");
        assert_eq!(json, r#"{"type":"mute_mic"}"#);

        let json = serde_json::to_string(&RelayMessage::StopAudio).expect("Should serialize");
        assert_eq!(json, r#"{"type":"stop_audio"}"#);

        let json = serde_json::to_string(&RelayMessage::RequestFrame).expect("Should serialize");
        assert_eq!(json, r#"{"type":"request_frame"}"#);
    }

    #[test]
    fn test_error_serialization_skips_empty_code() {
        let msg = RelayMessage::Error {
            code: None,
            message: "boom".to_string(),
        };
        let json = serde_json::to_string(&msg).expect("Should serialize");
        assert!(!json.contains("code"));
    }

    #[test]
    fn test_validation_text_exceeds_limit() {
        let msg = ClientMessage::UserMessage {
            text: "a".repeat(MAX_TEXT_SIZE + 1),
        };
        assert!(matches!(
            msg.validate_size(),
            Err(ValidationError::TextTooLarge { .. })
        ));
    }

    #[test]
    fn test_validation_sensitivity_range() {
        let msg = ClientMessage::Sensitivity { value: 1.5 };
        assert!(matches!(
            msg.validate_size(),
            Err(ValidationError::SensitivityOutOfRange { .. })
        ));

        let msg = ClientMessage::Sensitivity { value: 0.7 };
        assert!(msg.validate_size().is_ok());
    }

    #[test]
    fn test_validation_within_limits() {
        let msg = ClientMessage::UserMessage {
            text: "what do you see".to_string(),
        };
        assert!(msg.validate_size().is_ok());
    }
}
