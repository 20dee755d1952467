//! Per-session event loop.
//!
//! One task per session owns all mutable session state and `select!`s over
//! the three sources of activity that touch it: client input, engine events
//! and the interjection timer. Mutual exclusion falls out of the single-task
//! design; nothing here is shared.
//!
//! The loop also owns every session-scoped deadline (mic unmute, frame
//! wait), so session teardown cancels them deterministically.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use base64::prelude::*;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::time::{Instant as TokioInstant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::core::engine::{
    ClientEvent, EngineClient, EngineConfig, EngineEvent, HeartbeatConfig, ReconnectConfig,
};
use crate::handlers::bridge::messages::{ClientMessage, MessageRoute, RelayMessage};
use crate::state::AppState;

use super::audio::EchoGate;
use super::interject::{InterjectionState, calibrate};
use super::quality::QualityGate;
use super::rules::{PerceptionPacket, RuleEngine};
use super::session::{
    ConversationTurn, Role, SessionMode, TRANSCRIPT_HISTORY_LIMIT, VideoFrame,
};
use super::turn::{TurnAction, TurnEvent, TurnMachine};
use super::visual::{FramePlan, PatternIntentClassifier, VisualIntent, plan};

/// Short acknowledgments rotated on barge-in when enabled.
const BARGE_IN_ACKS: &[&str] = &["Go ahead.", "Sure.", "Yes?"];

/// Inputs from the client connection, already framed by the handler.
#[derive(Debug)]
pub enum SessionInput {
    /// Parsed JSON message
    Message(ClientMessage),
    /// Raw binary audio frame
    Audio(Bytes),
}

/// All mutable state of one session, confined to its event-loop task.
struct SessionCtx {
    id: String,
    mode: SessionMode,
    sensitivity: f32,
    gate: EchoGate,
    turn: TurnMachine,
    rules: RuleEngine,
    quality: QualityGate,
    interject: InterjectionState,
    classifier: PatternIntentClassifier,
    transcript: VecDeque<ConversationTurn>,
    frame: Option<VideoFrame>,
    perception: Option<PerceptionPacket>,
    /// Whether visual context was injected for the response in flight;
    /// input to the hallucination guard, reset when the response ends
    visual_injected: bool,
    /// Audio deltas for this response id are discarded after a barge-in
    cancelled_response: Option<String>,
    speech_active: bool,
    unmute_at: Option<TokioInstant>,
    /// Deadline of a pending fresh-frame wait; the deferred user turn
    /// proceeds with whatever frame is available when it fires
    frame_wait: Option<TokioInstant>,
    ack_counter: usize,
}

/// Run one session to completion.
///
/// Exits when the cancellation token fires, the client input channel closes,
/// or the engine link fails terminally. The caller removes the session from
/// the store afterwards; destruction is idempotent.
pub async fn run_session(
    session_id: String,
    app_state: Arc<AppState>,
    mut input_rx: mpsc::Receiver<SessionInput>,
    out_tx: mpsc::Sender<MessageRoute>,
    cancel: CancellationToken,
) {
    let config = &app_state.config;

    let engine_config = EngineConfig {
        url: config.engine_url.clone(),
        api_key: config.engine_api_key.clone().unwrap_or_default(),
        voice: config.engine_voice.clone(),
        instructions: config.engine_instructions.clone(),
        turn_detection_threshold: 0.5,
        reconnect: ReconnectConfig {
            max_attempts: config.reconnect_max_attempts,
        },
        heartbeat: HeartbeatConfig {
            interval: std::time::Duration::from_secs(config.heartbeat_interval_secs),
            timeout: std::time::Duration::from_secs(config.heartbeat_timeout_secs),
        },
        audio_buffer_chunks: config.audio_buffer_chunks,
    };

    let (engine, mut engine_rx) = match EngineClient::connect(engine_config).await {
        Ok(connected) => connected,
        Err(e) => {
            error!(session_id = %session_id, "Failed to connect to engine: {}", e);
            let _ = out_tx
                .send(MessageRoute::Outgoing(RelayMessage::Error {
                    code: Some("engine_unavailable".to_string()),
                    message: format!("Failed to reach the conversation engine: {e}"),
                }))
                .await;
            let _ = out_tx.send(MessageRoute::Close).await;
            return;
        }
    };

    let _ = out_tx
        .send(MessageRoute::Outgoing(RelayMessage::SessionReady {
            session_id: session_id.clone(),
        }))
        .await;
    info!(session_id = %session_id, "Session ready");

    let mut ctx = SessionCtx {
        id: session_id.clone(),
        mode: SessionMode::default(),
        sensitivity: 0.5,
        gate: EchoGate::new(config.echo_grace()),
        turn: TurnMachine::new(config.bargein_ack),
        rules: RuleEngine::new(),
        quality: QualityGate::new(),
        interject: InterjectionState::new(),
        classifier: PatternIntentClassifier,
        transcript: VecDeque::new(),
        frame: None,
        perception: None,
        visual_injected: false,
        cancelled_response: None,
        speech_active: false,
        unmute_at: None,
        frame_wait: None,
        ack_counter: 0,
    };

    let mut interject_tick = tokio::time::interval_at(
        TokioInstant::now() + config.interject_tick(),
        config.interject_tick(),
    );
    interject_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let unmute_at = ctx.unmute_at;
        let frame_wait = ctx.frame_wait;

        tokio::select! {
            _ = cancel.cancelled() => {
                debug!(session_id = %ctx.id, "Session cancelled");
                break;
            }

            input = input_rx.recv() => match input {
                Some(input) => {
                    if !handle_client_input(&mut ctx, &app_state, &engine, &out_tx, input).await {
                        break;
                    }
                }
                None => {
                    debug!(session_id = %ctx.id, "Client input channel closed");
                    break;
                }
            },

            event = engine_rx.recv() => match event {
                Some(event) => {
                    if !handle_engine_event(&mut ctx, &app_state, &engine, &out_tx, event).await {
                        break;
                    }
                }
                None => {
                    warn!(session_id = %ctx.id, "Engine event stream ended");
                    break;
                }
            },

            _ = interject_tick.tick() => {
                maybe_interject(&mut ctx, &app_state, &engine).await;
            }

            _ = deadline(unmute_at) => {
                ctx.unmute_at = None;
                let _ = out_tx
                    .send(MessageRoute::Outgoing(RelayMessage::UnmuteMic))
                    .await;
            }

            _ = deadline(frame_wait) => {
                debug!(session_id = %ctx.id, "Frame wait timed out, proceeding with available frame");
                finish_frame_wait(&mut ctx, &engine).await;
            }
        }
    }

    ctx.gate.log_summary(&ctx.id);
    engine.shutdown();
    app_state.sessions.destroy(&ctx.id);
}

/// Resolves at the given deadline, or never when there is none.
async fn deadline(at: Option<TokioInstant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

async fn send_out(out_tx: &mpsc::Sender<MessageRoute>, message: RelayMessage) {
    let _ = out_tx.send(MessageRoute::Outgoing(message)).await;
}

fn push_turn(ctx: &mut SessionCtx, role: Role, text: &str) {
    if ctx.transcript.len() >= TRANSCRIPT_HISTORY_LIMIT {
        ctx.transcript.pop_front();
    }
    ctx.transcript.push_back(ConversationTurn::new(role, text));
}

/// Handle one message from the client connection. Returns false to end the
/// session.
async fn handle_client_input(
    ctx: &mut SessionCtx,
    app_state: &Arc<AppState>,
    engine: &EngineClient,
    out_tx: &mpsc::Sender<MessageRoute>,
    input: SessionInput,
) -> bool {
    match input {
        SessionInput::Audio(audio) => {
            forward_client_audio(ctx, engine, audio).await;
        }
        SessionInput::Message(ClientMessage::Audio { audio }) => {
            match BASE64_STANDARD.decode(&audio) {
                Ok(pcm) => forward_client_audio(ctx, engine, Bytes::from(pcm)).await,
                Err(e) => {
                    // Protocol error: drop the single message, session continues
                    warn!(session_id = %ctx.id, "Undecodable audio payload: {}", e);
                }
            }
        }
        SessionInput::Message(ClientMessage::Frame { frame }) => {
            match BASE64_STANDARD.decode(&frame) {
                Ok(image) => {
                    // At most one frame is retained; newer replaces older
                    ctx.frame = Some(VideoFrame::new(Bytes::from(image)));
                    if ctx.frame_wait.is_some() {
                        ctx.frame_wait = None;
                        finish_frame_wait_with_fresh(ctx, engine).await;
                    }
                }
                Err(e) => {
                    warn!(session_id = %ctx.id, "Undecodable frame payload: {}", e);
                }
            }
        }
        SessionInput::Message(ClientMessage::Sensitivity { value }) => {
            ctx.sensitivity = value.clamp(0.0, 1.0);
            debug!(session_id = %ctx.id, sensitivity = ctx.sensitivity, "Sensitivity updated");
        }
        SessionInput::Message(ClientMessage::Mode { mode }) => {
            ctx.mode = SessionMode::from_str_or_default(&mode);
            info!(session_id = %ctx.id, mode = ctx.mode.as_str(), "Mode updated");
        }
        SessionInput::Message(ClientMessage::UserMessage { text }) => {
            if let Err(e) = engine.send(ClientEvent::user_text(&text)).await {
                warn!(session_id = %ctx.id, "Failed to send user message upstream: {}", e);
            }
            handle_user_utterance(ctx, app_state, engine, out_tx, text).await;
        }
        SessionInput::Message(ClientMessage::Perception(packet)) => {
            let result = ctx
                .rules
                .evaluate(ctx.mode, &packet, Instant::now());
            ctx.perception = Some(packet);
            if result.triggered
                && result.skip_upstream
                && let Some(text) = result.response_text
            {
                emit_local_response(ctx, out_tx, text).await;
            }
        }
    }
    true
}

async fn forward_client_audio(ctx: &mut SessionCtx, engine: &EngineClient, audio: Bytes) {
    let verdict = ctx.gate.admit(Instant::now());
    if verdict.is_forward() {
        if let Err(e) = engine.send_audio(&audio).await {
            warn!(session_id = %ctx.id, "Failed to forward audio upstream: {}", e);
        }
    } else {
        // Dropped, not queued: there is no catch-up replay
        debug!(session_id = %ctx.id, ?verdict, "Audio chunk suppressed");
    }
}

/// Handle one event from the engine link. Returns false to end the session.
async fn handle_engine_event(
    ctx: &mut SessionCtx,
    app_state: &Arc<AppState>,
    engine: &EngineClient,
    out_tx: &mpsc::Sender<MessageRoute>,
    event: EngineEvent,
) -> bool {
    match event {
        EngineEvent::SpeechStarted => {
            ctx.speech_active = true;
            let actions = ctx.turn.on_event(TurnEvent::SpeechStarted);
            apply_turn_actions(ctx, app_state, engine, out_tx, actions).await;
        }
        EngineEvent::SpeechStopped => {
            ctx.speech_active = false;
            let actions = ctx.turn.on_event(TurnEvent::SpeechStopped);
            apply_turn_actions(ctx, app_state, engine, out_tx, actions).await;
        }
        EngineEvent::ResponseCreated { response_id } => {
            ctx.gate.response_started();
            let actions = ctx.turn.on_event(TurnEvent::ResponseCreated { response_id });
            apply_turn_actions(ctx, app_state, engine, out_tx, actions).await;
        }
        EngineEvent::AudioChunk { response_id, audio } => {
            // A barge-in cancellation is observed here before any further
            // audio for that response reaches the client.
            if ctx.cancelled_response.as_deref() == Some(response_id.as_str()) {
                debug!(session_id = %ctx.id, "Dropping audio for cancelled response");
                return true;
            }
            let actions = ctx.turn.on_event(TurnEvent::AudioDelta {
                response_id: response_id.clone(),
            });
            apply_turn_actions(ctx, app_state, engine, out_tx, actions).await;
            ctx.gate.note_outbound_audio(Instant::now());
            let _ = out_tx.send(MessageRoute::Audio(audio)).await;
        }
        EngineEvent::AssistantTranscript { text } => {
            match ctx.quality.admit(
                &ctx.id,
                &text,
                ctx.mode,
                ctx.visual_injected,
                Instant::now(),
            ) {
                Ok(()) => {
                    push_turn(ctx, Role::Assistant, &text);
                    send_out(
                        out_tx,
                        RelayMessage::Transcript {
                            text,
                            role: Role::Assistant.to_string(),
                        },
                    )
                    .await;
                }
                Err(_) => {
                    // Silent suppression of the transcript surface only; the
                    // audio may already have played.
                }
            }
        }
        EngineEvent::UserTranscript { text } => {
            send_out(
                out_tx,
                RelayMessage::Transcript {
                    text: text.clone(),
                    role: Role::User.to_string(),
                },
            )
            .await;
            handle_user_utterance(ctx, app_state, engine, out_tx, text).await;
        }
        EngineEvent::ResponseDone { response_id } => {
            if ctx.cancelled_response.as_deref() == Some(response_id.as_str()) {
                // The barge-in already reset playback and echo state; the
                // cancelled response's end must not re-arm the grace window
                // against the user who is speaking right now.
                ctx.cancelled_response = None;
            } else {
                ctx.gate.response_ended(Instant::now());
            }
            ctx.visual_injected = false;
            let actions = ctx.turn.on_event(TurnEvent::ResponseDone { response_id });
            apply_turn_actions(ctx, app_state, engine, out_tx, actions).await;
        }
        EngineEvent::EngineError { message, fatal } => {
            send_out(
                out_tx,
                RelayMessage::Error {
                    code: Some("engine_error".to_string()),
                    message,
                },
            )
            .await;
            if fatal {
                return false;
            }
        }
        EngineEvent::Reconnecting { attempt } => {
            info!(session_id = %ctx.id, attempt, "Engine link reconnecting");
        }
        EngineEvent::Reconnected { attempt } => {
            info!(session_id = %ctx.id, attempt, "Engine link restored");
        }
        EngineEvent::ConnectionLost { attempts } => {
            let actions = ctx.turn.on_event(TurnEvent::UpstreamLost);
            apply_turn_actions(ctx, app_state, engine, out_tx, actions).await;
            send_out(
                out_tx,
                RelayMessage::Error {
                    code: Some("connection_lost".to_string()),
                    message: format!(
                        "Connection to the engine lost after {attempts} reconnection attempts"
                    ),
                },
            )
            .await;
            let _ = out_tx.send(MessageRoute::Close).await;
            return false;
        }
    }
    true
}

async fn apply_turn_actions(
    ctx: &mut SessionCtx,
    app_state: &Arc<AppState>,
    engine: &EngineClient,
    out_tx: &mpsc::Sender<MessageRoute>,
    actions: Vec<TurnAction>,
) {
    for action in actions {
        match action {
            TurnAction::CancelResponse { response_id } => {
                ctx.cancelled_response = Some(response_id);
                if let Err(e) = engine.send(ClientEvent::ResponseCancel {}).await {
                    warn!(session_id = %ctx.id, "Failed to cancel response: {}", e);
                }
            }
            TurnAction::StopClientAudio => {
                send_out(out_tx, RelayMessage::StopAudio).await;
            }
            TurnAction::ClearInboundAudio => {
                if let Err(e) = engine.send(ClientEvent::InputAudioBufferClear {}).await {
                    warn!(session_id = %ctx.id, "Failed to clear inbound audio: {}", e);
                }
            }
            TurnAction::MuteMic => {
                send_out(out_tx, RelayMessage::MuteMic).await;
            }
            TurnAction::ScheduleUnmute => {
                ctx.unmute_at = Some(TokioInstant::now() + app_state.config.unmute_delay());
            }
            TurnAction::ClearEchoSuppression => {
                ctx.gate.clear_for_barge_in();
            }
            TurnAction::EmitBargeInAck => {
                let ack = BARGE_IN_ACKS[ctx.ack_counter % BARGE_IN_ACKS.len()];
                ctx.ack_counter += 1;
                send_out(
                    out_tx,
                    RelayMessage::Transcript {
                        text: ack.to_string(),
                        role: Role::Assistant.to_string(),
                    },
                )
                .await;
            }
        }
    }
}

/// A finalized user utterance: run the fast path, then decide visual
/// context, then create the engine response.
async fn handle_user_utterance(
    ctx: &mut SessionCtx,
    app_state: &Arc<AppState>,
    engine: &EngineClient,
    out_tx: &mpsc::Sender<MessageRoute>,
    text: String,
) {
    push_turn(ctx, Role::User, &text);

    // Fast path: deterministic rules over the current perception data plus
    // this transcript, answered locally without an engine round trip.
    let packet = PerceptionPacket {
        transcript: Some(text.clone()),
        signals: ctx
            .perception
            .as_ref()
            .map(|p| p.signals.clone())
            .unwrap_or_default(),
    };
    let result = ctx.rules.evaluate(ctx.mode, &packet, Instant::now());
    if result.triggered && result.skip_upstream {
        if let Some(response) = result.response_text {
            emit_local_response(ctx, out_tx, response).await;
        }
        return;
    }

    match plan(
        ctx.mode,
        &ctx.classifier as &dyn VisualIntent,
        &text,
        ctx.frame.as_ref(),
        Instant::now(),
    ) {
        FramePlan::NotNeeded => {
            create_response(ctx, engine, false).await;
        }
        FramePlan::UseCurrent => {
            inject_current_frame(ctx, engine).await;
            create_response(ctx, engine, true).await;
        }
        FramePlan::RequestFresh => {
            send_out(out_tx, RelayMessage::RequestFrame).await;
            ctx.frame_wait =
                Some(TokioInstant::now() + app_state.config.frame_wait());
        }
    }
}

/// The frame wait resolved with a fresh frame in hand.
async fn finish_frame_wait_with_fresh(ctx: &mut SessionCtx, engine: &EngineClient) {
    inject_current_frame(ctx, engine).await;
    create_response(ctx, engine, true).await;
}

/// The frame wait timed out: proceed with whatever frame is available
/// (stale-but-present) rather than blocking the turn.
async fn finish_frame_wait(ctx: &mut SessionCtx, engine: &EngineClient) {
    ctx.frame_wait = None;
    let injected = ctx.frame.is_some();
    if injected {
        inject_current_frame(ctx, engine).await;
    }
    create_response(ctx, engine, injected).await;
}

async fn inject_current_frame(ctx: &mut SessionCtx, engine: &EngineClient) {
    if let Some(frame) = &ctx.frame {
        let encoded = BASE64_STANDARD.encode(&frame.data);
        if let Err(e) = engine.send(ClientEvent::user_image(&encoded)).await {
            warn!(session_id = %ctx.id, "Failed to inject frame: {}", e);
        }
    }
}

async fn create_response(ctx: &mut SessionCtx, engine: &EngineClient, visual_injected: bool) {
    ctx.visual_injected = visual_injected;
    if let Err(e) = engine.send(ClientEvent::ResponseCreate {}).await {
        warn!(session_id = %ctx.id, "Failed to create response: {}", e);
    }
}

/// Fast-path response: synthesized locally, surfaced through the same
/// quality-gated transcript path as engine responses.
async fn emit_local_response(
    ctx: &mut SessionCtx,
    out_tx: &mpsc::Sender<MessageRoute>,
    text: String,
) {
    if ctx
        .quality
        .admit(&ctx.id, &text, ctx.mode, false, Instant::now())
        .is_ok()
    {
        push_turn(ctx, Role::Assistant, &text);
        send_out(
            out_tx,
            RelayMessage::Transcript {
                text,
                role: Role::Assistant.to_string(),
            },
        )
        .await;
    }
}

/// One interjection timer tick: speak proactively when every gate allows it.
async fn maybe_interject(ctx: &mut SessionCtx, app_state: &Arc<AppState>, engine: &EngineClient) {
    let now = Instant::now();
    let calibrated = ctx
        .perception
        .as_ref()
        .and_then(|p| p.novelty_confidence())
        .map(calibrate);

    let should = ctx.interject.should_interject(
        ctx.sensitivity,
        app_state.config.interject_min_sensitivity,
        ctx.mode.interjection_gap_scale(),
        ctx.speech_active,
        ctx.turn.in_flight().is_some(),
        ctx.frame.as_ref(),
        calibrated,
        now,
    );
    if !should {
        return;
    }

    info!(session_id = %ctx.id, "Interjecting proactively");
    inject_current_frame(ctx, engine).await;
    if let Err(e) = engine
        .send(ClientEvent::system_text(
            "The user has not spoken. Offer one short, helpful remark about what you currently see.",
        ))
        .await
    {
        warn!(session_id = %ctx.id, "Failed to send interjection prompt: {}", e);
        return;
    }
    create_response(ctx, engine, true).await;
    ctx.interject.note_interjection(now);
}
