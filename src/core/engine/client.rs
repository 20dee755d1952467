//! Engine WebSocket client.
//!
//! Owns the outbound connection to the upstream conversational engine:
//! dialing, the session-configuration handshake, heartbeat liveness,
//! reconnection with exponential backoff, and buffering of outbound audio
//! across drops.
//!
//! The client exposes a command channel for sending [`ClientEvent`]s and an
//! event channel delivering [`EngineEvent`]s. The session event loop consumes
//! the event channel; every state transition lives there, not in callbacks.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::config::{
    ConnectionState, ENGINE_AUDIO_FORMAT, EngineConfig, HANDSHAKE_TIMEOUT,
};
use super::messages::{ClientEvent, ServerEvent, SessionConfig, TurnDetection, decode_audio_delta};
use super::{EngineError, EngineResult};

/// Channel capacity for outbound engine commands.
const CMD_CHANNEL_CAPACITY: usize = 256;

/// Channel capacity for inbound engine events (audio-heavy).
const EVENT_CHANNEL_CAPACITY: usize = 1024;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Events surfaced to the session loop from the engine link.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// The engine started generating a response
    ResponseCreated { response_id: String },
    /// A synthesized audio chunk for the client
    AudioChunk { response_id: String, audio: Bytes },
    /// A finalized assistant utterance transcript
    AssistantTranscript { text: String },
    /// A finalized user utterance transcript
    UserTranscript { text: String },
    /// The engine detected the start of user speech
    SpeechStarted,
    /// The engine detected the end of user speech
    SpeechStopped,
    /// The engine finished a response
    ResponseDone { response_id: String },
    /// The engine reported an error event
    EngineError { message: String, fatal: bool },
    /// A reconnection attempt is about to be made
    Reconnecting { attempt: u32 },
    /// Reconnection succeeded
    Reconnected { attempt: u32 },
    /// All reconnection attempts are exhausted; the link is dead
    ConnectionLost { attempts: u32 },
}

/// Handle to a live engine connection.
///
/// Dropping the handle (or cancelling [`EngineClient::shutdown`]) tears down
/// the I/O task and closes the socket.
pub struct EngineClient {
    cmd_tx: mpsc::Sender<ClientEvent>,
    state: Arc<parking_lot::RwLock<ConnectionState>>,
    shutdown: CancellationToken,
}

impl EngineClient {
    /// Connect to the engine, complete the session handshake and spawn the
    /// I/O task. Returns the client handle and the engine event stream.
    pub async fn connect(
        config: EngineConfig,
    ) -> EngineResult<(Self, mpsc::Receiver<EngineEvent>)> {
        if config.url.is_empty() {
            return Err(EngineError::InvalidConfiguration(
                "engine URL is required".to_string(),
            ));
        }

        let state = Arc::new(parking_lot::RwLock::new(ConnectionState::Connecting));
        let ws = establish(&config).await?;
        *state.write() = ConnectionState::Connected;

        let (cmd_tx, cmd_rx) = mpsc::channel(CMD_CHANNEL_CAPACITY);
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let shutdown = CancellationToken::new();

        tokio::spawn(run_io(
            ws,
            config,
            cmd_rx,
            event_tx,
            state.clone(),
            shutdown.clone(),
        ));

        Ok((
            Self {
                cmd_tx,
                state,
                shutdown,
            },
            event_rx,
        ))
    }

    /// Send an event to the engine.
    pub async fn send(&self, event: ClientEvent) -> EngineResult<()> {
        self.cmd_tx
            .send(event)
            .await
            .map_err(|_| EngineError::NotConnected)
    }

    /// Send a raw PCM16 audio chunk to the engine's input buffer.
    pub async fn send_audio(&self, audio: &[u8]) -> EngineResult<()> {
        self.send(ClientEvent::audio_append(audio)).await
    }

    /// Current connection state of the link.
    pub fn connection_state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Intentionally disconnect; suppresses reconnection.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

impl Drop for EngineClient {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Build the WebSocket upgrade request with authentication headers.
fn build_request(config: &EngineConfig) -> EngineResult<http::Request<()>> {
    let url = url::Url::parse(&config.url)
        .map_err(|e| EngineError::InvalidConfiguration(format!("engine URL: {e}")))?;
    match url.scheme() {
        "ws" | "wss" => {}
        other => {
            return Err(EngineError::InvalidConfiguration(format!(
                "engine URL scheme must be ws or wss, got {other}"
            )));
        }
    }
    let host = url
        .host_str()
        .ok_or_else(|| EngineError::InvalidConfiguration("engine URL has no host".to_string()))?;
    let host = match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };

    let mut builder = http::Request::builder()
        .uri(config.url.as_str())
        .header(
            "Sec-WebSocket-Key",
            tungstenite::handshake::client::generate_key(),
        )
        .header("Sec-WebSocket-Version", "13")
        .header("Connection", "Upgrade")
        .header("Upgrade", "websocket")
        .header("Host", host);

    if !config.api_key.is_empty() {
        builder = builder.header("Authorization", format!("Bearer {}", config.api_key));
    }

    builder
        .body(())
        .map_err(|e| EngineError::ConnectionFailed(e.to_string()))
}

/// Build the handshake session configuration.
///
/// The bridge owns response creation and barge-in, so the engine's automatic
/// turn handling is disabled.
fn build_session_config(config: &EngineConfig) -> SessionConfig {
    SessionConfig {
        modalities: Some(vec!["text".to_string(), "audio".to_string()]),
        instructions: config.instructions.clone(),
        voice: config.voice.clone(),
        input_audio_format: Some(ENGINE_AUDIO_FORMAT.to_string()),
        output_audio_format: Some(ENGINE_AUDIO_FORMAT.to_string()),
        turn_detection: Some(TurnDetection::ServerVad {
            threshold: Some(config.turn_detection_threshold),
            create_response: Some(false),
            interrupt_response: Some(false),
        }),
    }
}

/// Dial the engine and complete the session handshake.
async fn establish(config: &EngineConfig) -> EngineResult<WsStream> {
    let request = build_request(config)?;
    let (mut ws, _response) = tokio_tungstenite::connect_async(request)
        .await
        .map_err(|e| EngineError::ConnectionFailed(e.to_string()))?;

    let handshake = ClientEvent::SessionUpdate {
        session: build_session_config(config),
    };
    let json = serde_json::to_string(&handshake)
        .map_err(|e| EngineError::Serialization(e.to_string()))?;
    ws.send(Message::Text(json.into()))
        .await
        .map_err(|e| EngineError::WebSocket(e.to_string()))?;

    // The session is not usable until the engine acknowledges it; the wait
    // is bounded so a wedged engine cannot hang session setup.
    tokio::time::timeout(HANDSHAKE_TIMEOUT, wait_for_session_created(&mut ws))
        .await
        .map_err(|_| EngineError::Timeout("waiting for session.created".to_string()))??;

    Ok(ws)
}

async fn wait_for_session_created(ws: &mut WsStream) -> EngineResult<()> {
    while let Some(msg) = ws.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                if let Ok(ServerEvent::SessionCreated { session }) =
                    serde_json::from_str::<ServerEvent>(&text)
                {
                    info!("Engine session created: {}", session.id);
                    return Ok(());
                }
            }
            Ok(_) => {}
            Err(e) => return Err(EngineError::WebSocket(e.to_string())),
        }
    }
    Err(EngineError::Handshake(
        "socket closed before session.created".to_string(),
    ))
}

/// Map a wire event to the session-facing event, if it carries one.
fn map_server_event(event: ServerEvent) -> Option<EngineEvent> {
    match event {
        ServerEvent::ResponseCreated { response } => Some(EngineEvent::ResponseCreated {
            response_id: response.id,
        }),
        ServerEvent::AudioDelta { response_id, delta } => decode_audio_delta(&delta)
            .map(|audio| EngineEvent::AudioChunk { response_id, audio }),
        ServerEvent::TranscriptDone { transcript, .. } => Some(EngineEvent::AssistantTranscript {
            text: transcript,
        }),
        ServerEvent::InputTranscriptionCompleted { transcript } => {
            Some(EngineEvent::UserTranscript { text: transcript })
        }
        ServerEvent::SpeechStarted { .. } => Some(EngineEvent::SpeechStarted),
        ServerEvent::SpeechStopped { .. } => Some(EngineEvent::SpeechStopped),
        ServerEvent::ResponseDone { response } => Some(EngineEvent::ResponseDone {
            response_id: response.id,
        }),
        ServerEvent::Error { error } => Some(EngineEvent::EngineError {
            message: format!("{}: {}", error.error_type, error.message),
            fatal: error.fatal,
        }),
        // Partial transcripts are not surfaced; the quality gate judges the
        // finalized text only.
        ServerEvent::TranscriptDelta { .. } => None,
        ServerEvent::SessionCreated { .. } | ServerEvent::SessionUpdated {} => None,
        ServerEvent::Unhandled => None,
    }
}

fn push_bounded(buffer: &mut VecDeque<ClientEvent>, event: ClientEvent, capacity: usize) {
    if buffer.len() >= capacity {
        buffer.pop_front();
    }
    buffer.push_back(event);
}

async fn send_event(
    sink: &mut SplitSink<WsStream, Message>,
    event: &ClientEvent,
) -> Result<(), ()> {
    let json = match serde_json::to_string(event) {
        Ok(json) => json,
        Err(e) => {
            error!("Failed to serialize engine event: {}", e);
            return Ok(());
        }
    };
    sink.send(Message::Text(json.into())).await.map_err(|e| {
        error!("Failed to send engine event: {}", e);
    })
}

/// Connection I/O task: pumps commands and events while connected, then runs
/// the reconnect cycle on loss. Exits on shutdown, terminal failure, or when
/// either channel endpoint disappears.
async fn run_io(
    ws: WsStream,
    config: EngineConfig,
    mut cmd_rx: mpsc::Receiver<ClientEvent>,
    event_tx: mpsc::Sender<EngineEvent>,
    state: Arc<parking_lot::RwLock<ConnectionState>>,
    shutdown: CancellationToken,
) {
    let (mut sink, mut stream) = ws.split();

    // Audio buffered while the link is down, flushed in arrival order.
    let mut buffered: VecDeque<ClientEvent> = VecDeque::new();
    let mut attempt: u32 = 0;

    'outer: loop {
        *state.write() = ConnectionState::Connected;

        // Flush audio buffered across the drop, oldest first.
        let mut flush_failed = false;
        while let Some(event) = buffered.pop_front() {
            if send_event(&mut sink, &event).await.is_err() {
                buffered.push_front(event);
                flush_failed = true;
                break;
            }
        }

        let mut heartbeat = tokio::time::interval(config.heartbeat.interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_pong = Instant::now();

        if !flush_failed {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        let _ = sink.send(Message::Close(None)).await;
                        *state.write() = ConnectionState::Disconnected;
                        info!("Engine connection closed (shutdown)");
                        break 'outer;
                    }
                    _ = heartbeat.tick() => {
                        if last_pong.elapsed() > config.heartbeat.timeout {
                            warn!(
                                "No engine pong for {:?}, forcing reconnect",
                                last_pong.elapsed()
                            );
                            break;
                        }
                        if sink.send(Message::Ping(Bytes::new())).await.is_err() {
                            break;
                        }
                    }
                    cmd = cmd_rx.recv() => match cmd {
                        Some(event) => {
                            if send_event(&mut sink, &event).await.is_err() {
                                if event.is_audio_append() {
                                    push_bounded(&mut buffered, event, config.audio_buffer_chunks);
                                }
                                break;
                            }
                        }
                        None => {
                            let _ = sink.send(Message::Close(None)).await;
                            *state.write() = ConnectionState::Disconnected;
                            break 'outer;
                        }
                    },
                    msg = stream.next() => match msg {
                        Some(Ok(Message::Text(text))) => {
                            match serde_json::from_str::<ServerEvent>(&text) {
                                Ok(event) => {
                                    if let Some(mapped) = map_server_event(event)
                                        && event_tx.send(mapped).await.is_err()
                                    {
                                        break 'outer;
                                    }
                                }
                                Err(e) => {
                                    warn!("Failed to parse engine event: {} - {}", e, text);
                                }
                            }
                        }
                        Some(Ok(Message::Ping(data))) => {
                            let _ = sink.send(Message::Pong(data)).await;
                        }
                        Some(Ok(Message::Pong(_))) => {
                            last_pong = Instant::now();
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            info!("Engine closed the connection");
                            break;
                        }
                        Some(Err(e)) => {
                            error!("Engine WebSocket error: {}", e);
                            break;
                        }
                        Some(Ok(_)) => {}
                    }
                }
            }
        }

        // Connection lost - run the backoff reconnect cycle.
        *state.write() = ConnectionState::Reconnecting;
        loop {
            attempt += 1;
            if !config.reconnect.should_retry(attempt) {
                let attempts = attempt - 1;
                error!(
                    "Engine connection lost after {} reconnection attempts",
                    attempts
                );
                *state.write() = ConnectionState::Failed;
                let _ = event_tx.send(EngineEvent::ConnectionLost { attempts }).await;
                break 'outer;
            }

            let delay = config.reconnect.calculate_delay(attempt);
            info!(
                "Reconnecting to engine, attempt {}/{} in {:?}",
                attempt, config.reconnect.max_attempts, delay
            );
            let _ = event_tx.send(EngineEvent::Reconnecting { attempt }).await;

            // While waiting, keep draining commands so the session loop never
            // blocks: audio is buffered (bounded, oldest dropped), everything
            // else is dropped.
            let sleep = tokio::time::sleep(delay);
            tokio::pin!(sleep);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        *state.write() = ConnectionState::Disconnected;
                        break 'outer;
                    }
                    _ = &mut sleep => break,
                    cmd = cmd_rx.recv() => match cmd {
                        Some(event) if event.is_audio_append() => {
                            push_bounded(&mut buffered, event, config.audio_buffer_chunks);
                        }
                        Some(_) => {
                            debug!("Dropping non-audio engine command while reconnecting");
                        }
                        None => {
                            *state.write() = ConnectionState::Disconnected;
                            break 'outer;
                        }
                    }
                }
            }

            match establish(&config).await {
                Ok(new_ws) => {
                    info!("Reconnected to engine on attempt {}", attempt);
                    let (new_sink, new_stream) = new_ws.split();
                    sink = new_sink;
                    stream = new_stream;
                    let _ = event_tx.send(EngineEvent::Reconnected { attempt }).await;
                    attempt = 0;
                    break;
                }
                Err(e) => {
                    warn!("Reconnection attempt {} failed: {}", attempt, e);
                }
            }
        }
    }

    debug!("Engine I/O task ended");
}
