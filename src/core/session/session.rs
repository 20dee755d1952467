//! Session-scoped data types: operating modes, conversation turns and
//! retained video frames.

use std::time::{Duration, Instant};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Maximum conversation turns retained in memory for context.
pub const TRANSCRIPT_HISTORY_LIMIT: usize = 64;

/// Operating context of a session.
///
/// The mode selects the rule set, the frame freshness window, the response
/// length ceiling and whether the visual context injector runs at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionMode {
    #[default]
    General,
    Driving,
    Cooking,
}

impl SessionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionMode::General => "general",
            SessionMode::Driving => "driving",
            SessionMode::Cooking => "cooking",
        }
    }

    /// Parse a mode name, falling back to the default for unknown values.
    pub fn from_str_or_default(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "general" => SessionMode::General,
            "driving" => SessionMode::Driving,
            "cooking" => SessionMode::Cooking,
            _ => SessionMode::default(),
        }
    }

    /// Maximum age of a video frame eligible for injection.
    pub fn freshness_window(&self) -> Duration {
        match self {
            // Road scenes go stale fast
            SessionMode::Driving => Duration::from_millis(1500),
            _ => Duration::from_millis(3000),
        }
    }

    /// Response word-count ceiling; looser when a visual description is
    /// expected.
    pub fn word_ceiling(&self, visual_expected: bool) -> usize {
        let base = match self {
            SessionMode::General => 60,
            SessionMode::Driving => 25,
            SessionMode::Cooking => 80,
        };
        if visual_expected { base * 2 } else { base }
    }

    /// Driving relies on a separate on-device perception path and bypasses
    /// the visual context injector entirely.
    pub fn uses_visual_injector(&self) -> bool {
        !matches!(self, SessionMode::Driving)
    }

    /// Scale on the minimum gap between proactive interjections. Driving
    /// interjects more eagerly; cooking tolerates fewer interruptions.
    pub fn interjection_gap_scale(&self) -> f32 {
        match self {
            SessionMode::General => 1.0,
            SessionMode::Driving => 0.5,
            SessionMode::Cooking => 1.5,
        }
    }
}

/// Speaker role in a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// One finalized utterance in the transcript history.
#[derive(Debug, Clone)]
pub struct ConversationTurn {
    pub role: Role,
    pub text: String,
    pub at: Instant,
}

impl ConversationTurn {
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
            at: Instant::now(),
        }
    }
}

/// The single retained video frame of a session. A newer frame replaces the
/// older one; frames are never queued.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    /// Compressed image bytes
    pub data: Bytes,
    pub captured_at: Instant,
}

impl VideoFrame {
    pub fn new(data: Bytes) -> Self {
        Self {
            data,
            captured_at: Instant::now(),
        }
    }

    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.captured_at)
    }

    pub fn is_fresh(&self, now: Instant, window: Duration) -> bool {
        self.age(now) <= window
    }
}
