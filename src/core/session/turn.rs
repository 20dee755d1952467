//! Turn-taking state machine.
//!
//! Tracks whose turn it is and drives barge-in cancellation and microphone
//! mute/unmute signaling. Transitions return the actions the session loop
//! must apply; the machine itself performs no I/O, which keeps every
//! transition and its guard conditions visible and testable in one place.
//!
//! ```text
//! idle -> speech_detected -> responding -> speaking -> idle
//!                 ^______________________________|  (barge-in)
//! ```

use tracing::debug;

/// Current phase of the turn-taking cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnPhase {
    /// Nobody is speaking
    Idle,
    /// The engine detected user speech
    SpeechDetected,
    /// The engine is preparing a response; no audio yet
    Responding { response_id: String },
    /// Response audio is streaming to the client
    Speaking { response_id: String },
}

/// Inputs to the machine, in the order the session loop observes them.
#[derive(Debug, Clone)]
pub enum TurnEvent {
    SpeechStarted,
    SpeechStopped,
    ResponseCreated { response_id: String },
    AudioDelta { response_id: String },
    ResponseDone { response_id: String },
    UpstreamLost,
}

/// Side effects the session loop must apply after a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnAction {
    /// Cancel the in-flight engine response
    CancelResponse { response_id: String },
    /// Tell the client to stop local audio playback immediately
    StopClientAudio,
    /// Clear the engine's inbound audio buffer (handoff instant)
    ClearInboundAudio,
    /// Tell the client to mute its microphone
    MuteMic,
    /// Unmute after the configured delay, once buffered audio finishes
    ScheduleUnmute,
    /// Reset echo suppression tied to the cancelled response
    ClearEchoSuppression,
    /// Emit a short acknowledgment so the interruption feels graceful
    EmitBargeInAck,
}

/// Per-session turn-taking machine.
#[derive(Debug)]
pub struct TurnMachine {
    phase: TurnPhase,
    ack_on_barge_in: bool,
}

impl TurnMachine {
    pub fn new(ack_on_barge_in: bool) -> Self {
        Self {
            phase: TurnPhase::Idle,
            ack_on_barge_in,
        }
    }

    pub fn phase(&self) -> &TurnPhase {
        &self.phase
    }

    /// The response id currently in flight, if any.
    pub fn in_flight(&self) -> Option<&str> {
        match &self.phase {
            TurnPhase::Responding { response_id } | TurnPhase::Speaking { response_id } => {
                Some(response_id)
            }
            _ => None,
        }
    }

    /// Apply one event and return the actions it requires.
    pub fn on_event(&mut self, event: TurnEvent) -> Vec<TurnAction> {
        let actions = match (&self.phase, event) {
            // User speech while the assistant holds the turn: barge-in.
            // Cancellation, playback stop and echo reset form one atomic
            // decision; there is no partial-cancel state.
            (
                TurnPhase::Responding { response_id } | TurnPhase::Speaking { response_id },
                TurnEvent::SpeechStarted,
            ) => {
                let cancelled = response_id.clone();
                debug!(response_id = %cancelled, "Barge-in, cancelling in-flight response");
                self.phase = TurnPhase::SpeechDetected;
                let mut actions = vec![
                    TurnAction::CancelResponse {
                        response_id: cancelled,
                    },
                    TurnAction::StopClientAudio,
                    TurnAction::ClearEchoSuppression,
                ];
                if self.ack_on_barge_in {
                    actions.push(TurnAction::EmitBargeInAck);
                }
                actions
            }

            (_, TurnEvent::SpeechStarted) => {
                self.phase = TurnPhase::SpeechDetected;
                Vec::new()
            }

            (TurnPhase::SpeechDetected, TurnEvent::SpeechStopped) => {
                self.phase = TurnPhase::Idle;
                Vec::new()
            }
            (_, TurnEvent::SpeechStopped) => Vec::new(),

            // A new response while one is open should not happen with the
            // bridge driving creation, but the single in-flight invariant is
            // enforced regardless: close the old one first.
            (
                TurnPhase::Responding { response_id } | TurnPhase::Speaking { response_id },
                TurnEvent::ResponseCreated { response_id: new_id },
            ) => {
                let stale = response_id.clone();
                debug!(
                    stale = %stale,
                    new = %new_id,
                    "Response created while one in flight, cancelling stale"
                );
                self.phase = TurnPhase::Responding {
                    response_id: new_id,
                };
                vec![
                    TurnAction::CancelResponse { response_id: stale },
                    TurnAction::ClearInboundAudio,
                    TurnAction::MuteMic,
                ]
            }

            (_, TurnEvent::ResponseCreated { response_id }) => {
                self.phase = TurnPhase::Responding { response_id };
                vec![TurnAction::ClearInboundAudio, TurnAction::MuteMic]
            }

            (TurnPhase::Responding { response_id }, TurnEvent::AudioDelta { response_id: id })
                if *response_id == id =>
            {
                self.phase = TurnPhase::Speaking { response_id: id };
                Vec::new()
            }
            (_, TurnEvent::AudioDelta { .. }) => Vec::new(),

            (
                TurnPhase::Responding { response_id } | TurnPhase::Speaking { response_id },
                TurnEvent::ResponseDone { response_id: id },
            ) if *response_id == id => {
                self.phase = TurnPhase::Idle;
                vec![TurnAction::ScheduleUnmute]
            }
            (_, TurnEvent::ResponseDone { .. }) => Vec::new(),

            (_, TurnEvent::UpstreamLost) => {
                let was_speaking = self.in_flight().is_some();
                self.phase = TurnPhase::Idle;
                if was_speaking {
                    vec![TurnAction::StopClientAudio]
                } else {
                    Vec::new()
                }
            }
        };
        actions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine() -> TurnMachine {
        TurnMachine::new(false)
    }

    #[test]
    fn test_normal_turn_cycle() {
        let mut tm = machine();

        assert!(tm.on_event(TurnEvent::SpeechStarted).is_empty());
        assert_eq!(tm.phase(), &TurnPhase::SpeechDetected);

        let actions = tm.on_event(TurnEvent::ResponseCreated {
            response_id: "r1".to_string(),
        });
        assert_eq!(
            actions,
            vec![TurnAction::ClearInboundAudio, TurnAction::MuteMic]
        );

        assert!(
            tm.on_event(TurnEvent::AudioDelta {
                response_id: "r1".to_string(),
            })
            .is_empty()
        );
        assert_eq!(
            tm.phase(),
            &TurnPhase::Speaking {
                response_id: "r1".to_string()
            }
        );

        let actions = tm.on_event(TurnEvent::ResponseDone {
            response_id: "r1".to_string(),
        });
        assert_eq!(actions, vec![TurnAction::ScheduleUnmute]);
        assert_eq!(tm.phase(), &TurnPhase::Idle);
    }

    #[test]
    fn test_barge_in_cancels_in_flight() {
        let mut tm = machine();
        tm.on_event(TurnEvent::ResponseCreated {
            response_id: "r1".to_string(),
        });
        tm.on_event(TurnEvent::AudioDelta {
            response_id: "r1".to_string(),
        });

        let actions = tm.on_event(TurnEvent::SpeechStarted);
        assert_eq!(
            actions,
            vec![
                TurnAction::CancelResponse {
                    response_id: "r1".to_string()
                },
                TurnAction::StopClientAudio,
                TurnAction::ClearEchoSuppression,
            ]
        );
        assert_eq!(tm.phase(), &TurnPhase::SpeechDetected);
        assert!(tm.in_flight().is_none());
    }

    #[test]
    fn test_barge_in_during_responding() {
        let mut tm = machine();
        tm.on_event(TurnEvent::ResponseCreated {
            response_id: "r1".to_string(),
        });

        let actions = tm.on_event(TurnEvent::SpeechStarted);
        assert!(actions.contains(&TurnAction::CancelResponse {
            response_id: "r1".to_string()
        }));
    }

    #[test]
    fn test_barge_in_ack_when_enabled() {
        let mut tm = TurnMachine::new(true);
        tm.on_event(TurnEvent::ResponseCreated {
            response_id: "r1".to_string(),
        });
        let actions = tm.on_event(TurnEvent::SpeechStarted);
        assert!(actions.contains(&TurnAction::EmitBargeInAck));
    }

    #[test]
    fn test_single_in_flight_enforced() {
        let mut tm = machine();
        tm.on_event(TurnEvent::ResponseCreated {
            response_id: "r1".to_string(),
        });
        let actions = tm.on_event(TurnEvent::ResponseCreated {
            response_id: "r2".to_string(),
        });

        // The stale response is closed before the new one opens.
        assert_eq!(
            actions[0],
            TurnAction::CancelResponse {
                response_id: "r1".to_string()
            }
        );
        assert_eq!(tm.in_flight(), Some("r2"));
    }

    #[test]
    fn test_stale_response_done_ignored() {
        let mut tm = machine();
        tm.on_event(TurnEvent::ResponseCreated {
            response_id: "r2".to_string(),
        });
        // A done event for an already-cancelled response changes nothing.
        let actions = tm.on_event(TurnEvent::ResponseDone {
            response_id: "r1".to_string(),
        });
        assert!(actions.is_empty());
        assert_eq!(tm.in_flight(), Some("r2"));
    }

    #[test]
    fn test_upstream_lost_mid_speaking() {
        let mut tm = machine();
        tm.on_event(TurnEvent::ResponseCreated {
            response_id: "r1".to_string(),
        });
        tm.on_event(TurnEvent::AudioDelta {
            response_id: "r1".to_string(),
        });

        let actions = tm.on_event(TurnEvent::UpstreamLost);
        assert_eq!(actions, vec![TurnAction::StopClientAudio]);
        assert_eq!(tm.phase(), &TurnPhase::Idle);
    }

    #[test]
    fn test_speech_stop_returns_to_idle() {
        let mut tm = machine();
        tm.on_event(TurnEvent::SpeechStarted);
        tm.on_event(TurnEvent::SpeechStopped);
        assert_eq!(tm.phase(), &TurnPhase::Idle);
    }
}
