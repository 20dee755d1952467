//! Visual context injector.
//!
//! Decides whether a finalized user utterance needs a video frame attached
//! to the next engine turn, and whether the retained frame is fresh enough
//! to use. Triggered by the transcript, not by raw speech-stop: the text is
//! required to know whether visual context is needed at all, and injecting
//! speculatively wastes bandwidth and latency.

use std::time::Instant;

use once_cell::sync::Lazy;
use regex::RegexSet;

use super::session::{SessionMode, VideoFrame};

/// Intent classifier over a finalized transcript.
///
/// The default is a fixed pattern list; the trait keeps it a replaceable
/// strategy so a learned classifier can slot in without touching callers.
pub trait VisualIntent: Send + Sync {
    fn requires_frame(&self, transcript: &str) -> bool;
}

static VISUAL_REFERENCE_PATTERNS: Lazy<RegexSet> = Lazy::new(|| {
    RegexSet::new([
        r"(?i)\bwhat\s+(is|are|am i)\s+(this|that|these|those|it|holding|looking at)\b",
        r"(?i)\bwhat\s+do\s+you\s+see\b",
        r"(?i)\bcan\s+you\s+see\b",
        r"(?i)\blook\s+at\b",
        r"(?i)\bdescribe\b",
        r"(?i)\bread\s+(this|that|it)\b",
        r"(?i)\bin\s+front\s+of\s+me\b",
        r"(?i)\bon\s+the\s+(screen|table|counter|stove)\b",
        r"(?i)\bhow\s+does\s+(this|that|it)\s+look\b",
        r"(?i)\bis\s+(this|that|it)\s+(done|ready|ripe|burnt)\b",
    ])
    .expect("visual reference patterns must compile")
});

/// Fixed-pattern visual intent classifier.
#[derive(Debug, Default)]
pub struct PatternIntentClassifier;

impl VisualIntent for PatternIntentClassifier {
    fn requires_frame(&self, transcript: &str) -> bool {
        VISUAL_REFERENCE_PATTERNS.is_match(transcript)
    }
}

/// What to do about visual context for one user turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramePlan {
    /// No frame needed (no visual intent, or the mode bypasses injection)
    NotNeeded,
    /// The retained frame is fresh; inject it directly
    UseCurrent,
    /// The retained frame is stale or missing; request a fresh one and wait
    /// (bounded), then inject whatever is available
    RequestFresh,
}

/// Decide the frame plan for a finalized user utterance.
pub fn plan(
    mode: SessionMode,
    classifier: &dyn VisualIntent,
    transcript: &str,
    frame: Option<&VideoFrame>,
    now: Instant,
) -> FramePlan {
    if !mode.uses_visual_injector() {
        return FramePlan::NotNeeded;
    }
    if !classifier.requires_frame(transcript) {
        return FramePlan::NotNeeded;
    }
    match frame {
        Some(frame) if frame.is_fresh(now, mode.freshness_window()) => FramePlan::UseCurrent,
        _ => FramePlan::RequestFresh,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::time::Duration;

    fn frame_aged(ms: u64) -> VideoFrame {
        VideoFrame {
            data: Bytes::from_static(b"jpeg"),
            captured_at: Instant::now() - Duration::from_millis(ms),
        }
    }

    #[test]
    fn test_classifier_matches_visual_phrasings() {
        let classifier = PatternIntentClassifier;
        for transcript in [
            "what is this",
            "What do you see right now",
            "can you see the label",
            "look at the pan",
            "describe what's in front of me",
            "is it done yet",
        ] {
            assert!(classifier.requires_frame(transcript), "missed: {transcript}");
        }
    }

    #[test]
    fn test_classifier_ignores_non_visual() {
        let classifier = PatternIntentClassifier;
        for transcript in [
            "what's the weather tomorrow",
            "set a timer for ten minutes",
            "tell me a joke",
        ] {
            assert!(!classifier.requires_frame(transcript), "false positive: {transcript}");
        }
    }

    #[test]
    fn test_plan_fresh_frame_used_directly() {
        let classifier = PatternIntentClassifier;
        let frame = frame_aged(1000);
        let plan = plan(
            SessionMode::General,
            &classifier,
            "what is this",
            Some(&frame),
            Instant::now(),
        );
        assert_eq!(plan, FramePlan::UseCurrent);
    }

    #[test]
    fn test_plan_stale_frame_requests_fresh() {
        let classifier = PatternIntentClassifier;
        // 4500ms old against a 3000ms window
        let frame = frame_aged(4500);
        let plan = plan(
            SessionMode::General,
            &classifier,
            "what do you see",
            Some(&frame),
            Instant::now(),
        );
        assert_eq!(plan, FramePlan::RequestFresh);
    }

    #[test]
    fn test_plan_missing_frame_requests_fresh() {
        let classifier = PatternIntentClassifier;
        let plan = plan(
            SessionMode::Cooking,
            &classifier,
            "does this look ready",
            None,
            Instant::now(),
        );
        assert_eq!(plan, FramePlan::RequestFresh);
    }

    #[test]
    fn test_plan_no_visual_intent() {
        let classifier = PatternIntentClassifier;
        let frame = frame_aged(100);
        let plan = plan(
            SessionMode::General,
            &classifier,
            "set a timer",
            Some(&frame),
            Instant::now(),
        );
        assert_eq!(plan, FramePlan::NotNeeded);
    }

    #[test]
    fn test_plan_driving_mode_bypasses() {
        let classifier = PatternIntentClassifier;
        let frame = frame_aged(100);
        let plan = plan(
            SessionMode::Driving,
            &classifier,
            "what do you see",
            Some(&frame),
            Instant::now(),
        );
        assert_eq!(plan, FramePlan::NotNeeded);
    }
}
