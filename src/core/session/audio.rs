//! Inbound audio echo-suppression gate.
//!
//! Prevents the bridge from feeding the engine its own synthesized voice
//! picked up by the client's microphone. A chunk is forwarded only when the
//! engine is not speaking and enough wall-clock time has passed since both
//! the last outbound audio chunk and the last response end.
//!
//! Chunks failing the check are dropped, never queued; dropping a few
//! hundred milliseconds of user audio during the echo window beats an
//! echo-triggered response loop. The grace period is a tunable heuristic,
//! not a correctness guarantee, so suppression counts are tracked for
//! tuning.

use std::time::{Duration, Instant};

use tracing::info;

/// Outcome of the echo gate for one inbound chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateVerdict {
    /// Forward the chunk upstream
    Forward,
    /// Dropped: a response is currently streaming
    SuppressedSpeaking,
    /// Dropped: within the grace window after outbound audio
    SuppressedOutboundGrace,
    /// Dropped: within the grace window after a response ended
    SuppressedResponseEndGrace,
}

impl GateVerdict {
    pub fn is_forward(&self) -> bool {
        matches!(self, GateVerdict::Forward)
    }
}

/// Per-session echo suppression state.
#[derive(Debug)]
pub struct EchoGate {
    grace: Duration,
    upstream_speaking: bool,
    last_outbound_audio: Option<Instant>,
    last_response_end: Option<Instant>,
    forwarded: u64,
    suppressed_speaking: u64,
    suppressed_outbound: u64,
    suppressed_response_end: u64,
}

impl EchoGate {
    pub fn new(grace: Duration) -> Self {
        Self {
            grace,
            upstream_speaking: false,
            last_outbound_audio: None,
            last_response_end: None,
            forwarded: 0,
            suppressed_speaking: 0,
            suppressed_outbound: 0,
            suppressed_response_end: 0,
        }
    }

    /// Decide whether an inbound chunk arriving at `now` may go upstream.
    pub fn admit(&mut self, now: Instant) -> GateVerdict {
        if self.upstream_speaking {
            self.suppressed_speaking += 1;
            return GateVerdict::SuppressedSpeaking;
        }
        if let Some(at) = self.last_outbound_audio
            && now.saturating_duration_since(at) <= self.grace
        {
            self.suppressed_outbound += 1;
            return GateVerdict::SuppressedOutboundGrace;
        }
        if let Some(at) = self.last_response_end
            && now.saturating_duration_since(at) <= self.grace
        {
            self.suppressed_response_end += 1;
            return GateVerdict::SuppressedResponseEndGrace;
        }
        self.forwarded += 1;
        GateVerdict::Forward
    }

    /// A response started streaming toward the client.
    pub fn response_started(&mut self) {
        self.upstream_speaking = true;
    }

    /// A response finished; the grace window re-arms from its end.
    pub fn response_ended(&mut self, now: Instant) {
        self.upstream_speaking = false;
        self.last_response_end = Some(now);
    }

    /// An outbound audio chunk went to the client. Synthesized speech arrives
    /// in many chunks over seconds, so each one re-arms the grace window.
    pub fn note_outbound_audio(&mut self, now: Instant) {
        self.last_outbound_audio = Some(now);
    }

    /// Barge-in: the user is audibly speaking over the cancelled response,
    /// so every suppression tied to that response is cleared and their audio
    /// flows immediately.
    pub fn clear_for_barge_in(&mut self) {
        self.upstream_speaking = false;
        self.last_outbound_audio = None;
        self.last_response_end = None;
    }

    pub fn suppressed_total(&self) -> u64 {
        self.suppressed_speaking + self.suppressed_outbound + self.suppressed_response_end
    }

    /// Emit the suppression counters for grace-period tuning.
    pub fn log_summary(&self, session_id: &str) {
        info!(
            session_id = %session_id,
            forwarded = self.forwarded,
            suppressed_speaking = self.suppressed_speaking,
            suppressed_outbound_grace = self.suppressed_outbound,
            suppressed_response_end_grace = self.suppressed_response_end,
            "Echo gate summary"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GRACE: Duration = Duration::from_millis(2000);

    #[test]
    fn test_forwards_when_quiet() {
        let mut gate = EchoGate::new(GRACE);
        assert_eq!(gate.admit(Instant::now()), GateVerdict::Forward);
    }

    #[test]
    fn test_suppresses_while_speaking() {
        let mut gate = EchoGate::new(GRACE);
        gate.response_started();
        assert_eq!(gate.admit(Instant::now()), GateVerdict::SuppressedSpeaking);
        assert_eq!(gate.suppressed_total(), 1);
    }

    #[test]
    fn test_suppresses_within_outbound_grace() {
        let mut gate = EchoGate::new(GRACE);
        let t0 = Instant::now();
        gate.response_started();
        gate.note_outbound_audio(t0);
        gate.response_ended(t0);

        // 1.5s after the last outbound chunk: still inside the window
        assert_eq!(
            gate.admit(t0 + Duration::from_millis(1500)),
            GateVerdict::SuppressedOutboundGrace
        );
        // 2.5s after: clear of both windows
        assert_eq!(
            gate.admit(t0 + Duration::from_millis(2500)),
            GateVerdict::Forward
        );
    }

    #[test]
    fn test_outbound_audio_rearms_window() {
        let mut gate = EchoGate::new(GRACE);
        let t0 = Instant::now();
        gate.note_outbound_audio(t0);
        // Another chunk a second later pushes the window out
        gate.note_outbound_audio(t0 + Duration::from_millis(1000));

        assert!(!gate.admit(t0 + Duration::from_millis(2500)).is_forward());
        assert!(gate.admit(t0 + Duration::from_millis(3100)).is_forward());
    }

    #[test]
    fn test_response_end_grace() {
        let mut gate = EchoGate::new(GRACE);
        let t0 = Instant::now();
        gate.response_started();
        gate.response_ended(t0);

        assert_eq!(
            gate.admit(t0 + Duration::from_millis(1999)),
            GateVerdict::SuppressedResponseEndGrace
        );
        assert_eq!(
            gate.admit(t0 + Duration::from_millis(2001)),
            GateVerdict::Forward
        );
    }

    #[test]
    fn test_barge_in_clears_all_suppression() {
        let mut gate = EchoGate::new(GRACE);
        let t0 = Instant::now();
        gate.response_started();
        gate.note_outbound_audio(t0);

        assert!(!gate.admit(t0).is_forward());
        gate.clear_for_barge_in();
        assert!(gate.admit(t0).is_forward());
    }
}
