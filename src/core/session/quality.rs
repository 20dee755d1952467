//! Response quality gate.
//!
//! Every candidate assistant utterance passes five ordered guards before its
//! transcript is surfaced to the client. Audio may already be streaming when
//! the verdict lands; the gate then suppresses the displayed transcript and
//! logging only. That asymmetry is intentional: buffering audio behind the
//! text verdict would tax every utterance to cover a rare rejection.
//!
//! Rejection never retries or regenerates; it withholds the transcript
//! surface event and logs the reason.

use std::collections::{HashSet, VecDeque};
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;
use regex::RegexSet;
use tracing::info;

use super::session::SessionMode;

/// Accepted responses retained for the duplication guard.
const HISTORY_LIMIT: usize = 5;

/// Minimum gap between accepted responses.
const MIN_RESPONSE_GAP: Duration = Duration::from_millis(1000);

/// Token-set similarity above which a response counts as a near-duplicate.
const DUPLICATE_THRESHOLD: f32 = 0.7;

static VISUAL_CLAIM_PATTERNS: Lazy<RegexSet> = Lazy::new(|| {
    RegexSet::new([
        r"(?i)\bi\s+(can\s+)?see\b",
        r"(?i)\bthat\s+looks\s+like\b",
        r"(?i)\bin\s+the\s+(image|picture|photo|frame|video)\b",
        r"(?i)\blooking\s+at\s+(the|your|it)\b",
        r"(?i)\bfrom\s+what\s+i\s+(can\s+)?see\b",
        r"(?i)\bi\s+notice\b",
    ])
    .expect("visual claim patterns must compile")
});

static BANNED_PHRASE_PATTERNS: Lazy<RegexSet> = Lazy::new(|| {
    RegexSet::new([
        r"(?i)\bhappy\s+to\s+help\b",
        r"(?i)\bgreat\s+question\b",
        r"(?i)\bglad\s+you\s+asked\b",
        r"(?i)^\s*(exactly|absolutely)!",
        r"(?i)\bas\s+an\s+ai\b",
    ])
    .expect("banned phrase patterns must compile")
});

/// Why a candidate response was rejected.
#[derive(Debug, Clone, PartialEq)]
pub enum Rejection {
    /// Visual claim with no visual context injected this turn
    HallucinatedVisualClaim,
    /// Sycophantic filler
    BannedPhrase,
    /// Word count over the mode ceiling
    TooLong { words: usize, limit: usize },
    /// Emitted too soon after the previous accepted response
    TooSoon { elapsed: Duration },
    /// Near-duplicate of a recent accepted response
    NearDuplicate { similarity: f32 },
}

impl Rejection {
    pub fn reason(&self) -> &'static str {
        match self {
            Rejection::HallucinatedVisualClaim => "hallucinated_visual_claim",
            Rejection::BannedPhrase => "banned_phrase",
            Rejection::TooLong { .. } => "too_long",
            Rejection::TooSoon { .. } => "rate_violation",
            Rejection::NearDuplicate { .. } => "near_duplicate",
        }
    }
}

#[derive(Debug)]
struct ResponseRecord {
    tokens: HashSet<String>,
}

/// Per-session response quality gate.
#[derive(Debug)]
pub struct QualityGate {
    history: VecDeque<ResponseRecord>,
    last_accepted_at: Option<Instant>,
}

impl Default for QualityGate {
    fn default() -> Self {
        Self::new()
    }
}

impl QualityGate {
    pub fn new() -> Self {
        Self {
            history: VecDeque::with_capacity(HISTORY_LIMIT),
            last_accepted_at: None,
        }
    }

    /// Check a candidate utterance; on acceptance it joins the dedup history
    /// and arms the rate guard.
    pub fn admit(
        &mut self,
        session_id: &str,
        text: &str,
        mode: SessionMode,
        visual_injected: bool,
        now: Instant,
    ) -> Result<(), Rejection> {
        let verdict = self.check(text, mode, visual_injected, now);
        match verdict {
            Ok(()) => {
                if self.history.len() >= HISTORY_LIMIT {
                    self.history.pop_front();
                }
                self.history.push_back(ResponseRecord {
                    tokens: tokenize(text),
                });
                self.last_accepted_at = Some(now);
                Ok(())
            }
            Err(rejection) => {
                info!(
                    session_id = %session_id,
                    reason = rejection.reason(),
                    "Response rejected by quality gate"
                );
                Err(rejection)
            }
        }
    }

    fn check(
        &self,
        text: &str,
        mode: SessionMode,
        visual_injected: bool,
        now: Instant,
    ) -> Result<(), Rejection> {
        if !visual_injected && VISUAL_CLAIM_PATTERNS.is_match(text) {
            return Err(Rejection::HallucinatedVisualClaim);
        }

        if BANNED_PHRASE_PATTERNS.is_match(text) {
            return Err(Rejection::BannedPhrase);
        }

        let words = text.split_whitespace().count();
        let limit = mode.word_ceiling(visual_injected);
        if words > limit {
            return Err(Rejection::TooLong { words, limit });
        }

        if let Some(last) = self.last_accepted_at {
            let elapsed = now.saturating_duration_since(last);
            if elapsed < MIN_RESPONSE_GAP {
                return Err(Rejection::TooSoon { elapsed });
            }
        }

        let tokens = tokenize(text);
        for record in &self.history {
            let similarity = jaccard(&tokens, &record.tokens);
            if similarity >= DUPLICATE_THRESHOLD {
                return Err(Rejection::NearDuplicate { similarity });
            }
        }

        Ok(())
    }
}

fn tokenize(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(|token| token.to_lowercase())
        .collect()
}

/// Token-set similarity: |intersection| / |union|.
fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f32 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.len() + b.len() - intersection;
    intersection as f32 / union as f32
}
