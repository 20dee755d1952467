//! Proactive interjection scheduler.
//!
//! A per-session periodic timer evaluates whether to speak without user
//! prompting. Sensitivity is a 0.0–1.0 dial trading interjection frequency
//! against false-positive risk: it shortens the minimum gap between
//! interjections linearly from 30 s down to 3 s and lowers the confidence
//! threshold from 0.95 down to 0.60.
//!
//! The decision function is pure; the timer itself is owned by the session
//! event loop and dies with it.

use std::time::{Duration, Instant};

use super::session::VideoFrame;

/// Maximum age of a frame that can ground an interjection.
const MAX_FRAME_AGE: Duration = Duration::from_secs(5);

/// Gap between interjections at zero sensitivity.
const BASE_GAP: Duration = Duration::from_secs(30);

/// How much of the gap sensitivity can remove (30s -> 3s at max).
const GAP_SPAN: Duration = Duration::from_secs(27);

/// Confidence threshold at zero sensitivity.
const BASE_CONFIDENCE: f32 = 0.95;

/// How much of the threshold sensitivity can remove.
const CONFIDENCE_SPAN: f32 = 0.35;

/// Calibration curve applied to the raw novelty detector confidence.
///
/// The raw detector runs hot; a power curve pulls mid-range scores down
/// (raw 0.9 calibrates to ~0.84) while leaving the extremes in place.
pub fn calibrate(raw: f32) -> f32 {
    raw.clamp(0.0, 1.0).powf(1.6)
}

/// Minimum elapsed time since the last interjection for a given sensitivity.
pub fn min_gap(sensitivity: f32) -> Duration {
    let s = sensitivity.clamp(0.0, 1.0);
    BASE_GAP - GAP_SPAN.mul_f32(s)
}

/// Calibrated-confidence threshold for a given sensitivity.
pub fn confidence_threshold(sensitivity: f32) -> f32 {
    BASE_CONFIDENCE - CONFIDENCE_SPAN * sensitivity.clamp(0.0, 1.0)
}

/// Per-session interjection bookkeeping.
#[derive(Debug, Default)]
pub struct InterjectionState {
    last_interjection: Option<Instant>,
}

impl InterjectionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn note_interjection(&mut self, now: Instant) {
        self.last_interjection = Some(now);
    }

    /// Evaluate every gate for one scheduler tick. `gap_scale` is the
    /// mode-specific cadence scale applied to the minimum gap.
    #[allow(clippy::too_many_arguments)]
    pub fn should_interject(
        &self,
        sensitivity: f32,
        min_sensitivity: f32,
        gap_scale: f32,
        speech_active: bool,
        response_in_flight: bool,
        frame: Option<&VideoFrame>,
        calibrated_confidence: Option<f32>,
        now: Instant,
    ) -> bool {
        if speech_active || response_in_flight {
            return false;
        }
        if sensitivity < min_sensitivity {
            return false;
        }
        let Some(frame) = frame else {
            return false;
        };
        if frame.age(now) > MAX_FRAME_AGE {
            return false;
        }
        if let Some(last) = self.last_interjection
            && now.saturating_duration_since(last) < min_gap(sensitivity).mul_f32(gap_scale)
        {
            return false;
        }
        let Some(confidence) = calibrated_confidence else {
            return false;
        };
        confidence > confidence_threshold(sensitivity)
    }
}
