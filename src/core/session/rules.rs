//! Deterministic rule-evaluation fast path.
//!
//! Evaluates cheap rules against structured perception data so
//! latency-critical cases can be answered without an engine round trip.
//! Evaluation is pure synchronous code over the current packet; the only
//! state is per-rule cooldown timestamps.
//!
//! Rules are intentionally conservative: a false positive preempts genuine
//! reasoning, so thresholds sit high and general mode ships no local rules
//! at all.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use super::session::SessionMode;

/// Structured perception data from the client: the finalized transcript (if
/// this packet accompanies one) plus derived numeric signals for the active
/// mode.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PerceptionPacket {
    #[serde(default)]
    pub transcript: Option<String>,
    #[serde(default)]
    pub signals: HashMap<String, f64>,
}

impl PerceptionPacket {
    pub fn signal(&self, name: &str) -> Option<f64> {
        self.signals.get(name).copied()
    }

    /// Raw novelty detector confidence, consumed by the interjection
    /// scheduler after calibration.
    pub fn novelty_confidence(&self) -> Option<f32> {
        self.signal("novelty_confidence").map(|v| v as f32)
    }
}

/// Outcome of the fast path.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuleEvaluationResult {
    pub triggered: bool,
    pub skip_upstream: bool,
    pub response_text: Option<String>,
}

impl RuleEvaluationResult {
    fn none() -> Self {
        Self::default()
    }

    fn local(text: String) -> Self {
        Self {
            triggered: true,
            skip_upstream: true,
            response_text: Some(text),
        }
    }
}

struct Rule {
    name: &'static str,
    cooldown: Duration,
    check: fn(&PerceptionPacket) -> Option<String>,
}

fn forward_collision(packet: &PerceptionPacket) -> Option<String> {
    let risk = packet.signal("forward_collision_risk")?;
    (risk > 0.85).then(|| "Heads up, braking traffic just ahead.".to_string())
}

fn pedestrian_proximity(packet: &PerceptionPacket) -> Option<String> {
    let proximity = packet.signal("pedestrian_proximity")?;
    (proximity > 0.9).then(|| "Watch out, pedestrian on your right.".to_string())
}

fn timer_expired(packet: &PerceptionPacket) -> Option<String> {
    let expired = packet.signal("timer_expired")?;
    (expired >= 1.0).then(|| "Your timer just went off.".to_string())
}

const DRIVING_RULES: &[Rule] = &[
    Rule {
        name: "forward_collision",
        cooldown: Duration::from_secs(8),
        check: forward_collision,
    },
    Rule {
        name: "pedestrian_proximity",
        cooldown: Duration::from_secs(8),
        check: pedestrian_proximity,
    },
];

const COOKING_RULES: &[Rule] = &[Rule {
    name: "timer_expired",
    cooldown: Duration::from_secs(20),
    check: timer_expired,
}];

fn rules_for_mode(mode: SessionMode) -> &'static [Rule] {
    match mode {
        SessionMode::Driving => DRIVING_RULES,
        SessionMode::Cooking => COOKING_RULES,
        // The fast path never preempts genuine reasoning in general mode.
        SessionMode::General => &[],
    }
}

/// Per-session rule evaluator with cooldown tracking.
#[derive(Debug, Default)]
pub struct RuleEngine {
    last_fired: HashMap<&'static str, Instant>,
}

impl RuleEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Evaluate the ordered rule set for the mode against the packet.
    /// The first firing rule wins.
    pub fn evaluate(
        &mut self,
        mode: SessionMode,
        packet: &PerceptionPacket,
        now: Instant,
    ) -> RuleEvaluationResult {
        for rule in rules_for_mode(mode) {
            if let Some(fired_at) = self.last_fired.get(rule.name)
                && now.saturating_duration_since(*fired_at) < rule.cooldown
            {
                continue;
            }
            if let Some(text) = (rule.check)(packet) {
                tracing::debug!(rule = rule.name, "Fast-path rule fired");
                self.last_fired.insert(rule.name, now);
                return RuleEvaluationResult::local(text);
            }
        }
        RuleEvaluationResult::none()
    }
}
