//! Core voice session state machine
//!
//! Owns the session phase and everything derived from the room: transcript,
//! tool status, audio level. All mutation happens on the task running
//! `VoiceSession::run`, so every read-then-write of the phase is
//! serialized. Network work is delegated to the transport driver through
//! `TransportCommand`s and never awaited here.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::config::Credentials;
use crate::context::ActivationContext;
use crate::events::SessionEvent;
use crate::transport::{
    AudioLevels, ConnectOptions, ConnectionState, TrackKind, TransportCommand, TransportError,
    TransportEvent,
};

use super::phase::Phase;
use super::tool::ToolStatus;
use super::transcript::{Role, Transcript, TranscriptItem};

/// Data-channel topics
pub mod topics {
    pub const TRANSCRIPT: &str = "transcript";
    pub const PARTIAL_TRANSCRIPT: &str = "partial_transcript";
    pub const FINAL_TRANSCRIPT: &str = "final_transcript";
    pub const ASSISTANT_RESPONSE: &str = "assistant_response";
    pub const USER_TRANSCRIPT: &str = "user_transcript";
    pub const TOOL_STATUS: &str = "tool_status";
    pub const TOOL_DONE: &str = "tool_done";
    /// Outbound activation context
    pub const CONTEXT: &str = "context";
}

/// Requests from the host (IPC clients, activation handler)
#[derive(Debug, Clone)]
pub enum SessionCommand {
    Connect(Option<ActivationContext>),
    /// Connect when idle, otherwise hand the context to the running session
    Activate(ActivationContext),
    SetActivationContext(ActivationContext),
    Disconnect,
    StartListening,
    StopListening,
    ClearTranscript,
    UpdateCredentials {
        server_url: Option<String>,
        token: Option<String>,
    },
}

/// Everything the session task consumes besides transport events
#[derive(Debug)]
pub enum SessionInput {
    Command(SessionCommand),
    /// Outcome of the `TransportCommand::Connect` with this generation
    ConnectFinished {
        generation: u64,
        result: Result<(), TransportError>,
    },
    /// Periodic audio level sample
    Levels(AudioLevels),
}

/// Consistent read-only view of the session for presentation layers
#[derive(Debug, Clone, Default)]
pub struct SessionSnapshot {
    pub phase: Phase,
    pub connection_state: ConnectionState,
    pub tool_status: Option<ToolStatus>,
    pub audio_level: f32,
    pub activation_context: Option<ActivationContext>,
    pub transcript: Arc<Vec<TranscriptItem>>,
    pub partial_transcript: String,
}

/// The voice session state machine
pub struct VoiceSession {
    /// Current phase
    phase: Phase,
    /// Room state as last reported by the transport
    connection_state: ConnectionState,
    /// Pending or already-sent activation context
    activation_context: Option<ActivationContext>,
    /// Tool currently running on the agent side
    tool_status: Option<ToolStatus>,
    /// Latest raw audio levels
    levels: AudioLevels,
    /// Remote audio track is subscribed
    speaking: bool,
    transcript: Transcript,
    credentials: Credentials,
    options: ConnectOptions,
    /// Last connect generation handed out
    generation: u64,
    /// Generation of the connect still awaiting its outcome
    pending_connect: Option<u64>,
    commands: mpsc::UnboundedSender<TransportCommand>,
    event_tx: broadcast::Sender<SessionEvent>,
    snapshot_tx: watch::Sender<SessionSnapshot>,
}

impl VoiceSession {
    /// Create a new session in the Idle phase
    pub fn new(
        credentials: Credentials,
        options: ConnectOptions,
        commands: mpsc::UnboundedSender<TransportCommand>,
        event_tx: broadcast::Sender<SessionEvent>,
    ) -> Self {
        let (snapshot_tx, _) = watch::channel(SessionSnapshot::default());
        Self {
            phase: Phase::Idle,
            connection_state: ConnectionState::Disconnected,
            activation_context: None,
            tool_status: None,
            levels: AudioLevels::default(),
            speaking: false,
            transcript: Transcript::new(),
            credentials,
            options,
            generation: 0,
            pending_connect: None,
            commands,
            event_tx,
            snapshot_tx,
        }
    }

    pub fn phase(&self) -> &Phase {
        &self.phase
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection_state
    }

    pub fn tool_status(&self) -> Option<&ToolStatus> {
        self.tool_status.as_ref()
    }

    pub fn activation_context(&self) -> Option<&ActivationContext> {
        self.activation_context.as_ref()
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    /// Single level for visualizers: local while listening, remote while
    /// speaking, the louder of the two otherwise
    pub fn audio_level(&self) -> f32 {
        let level = match self.phase {
            Phase::Listening => self.levels.local,
            Phase::Speaking => self.levels.remote,
            _ => self.levels.local.max(self.levels.remote),
        };
        level.clamp(0.0, 1.0)
    }

    /// Receiver that always holds the latest snapshot
    pub fn subscribe_snapshots(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot_tx.subscribe()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            phase: self.phase.clone(),
            connection_state: self.connection_state,
            tool_status: self.tool_status.clone(),
            audio_level: self.audio_level(),
            activation_context: self.activation_context.clone(),
            transcript: self.transcript.shared(),
            partial_transcript: self.transcript.partial().to_string(),
        }
    }

    /// Run the session, applying host input and transport events as they arrive
    pub async fn run(
        &mut self,
        mut inputs: mpsc::Receiver<SessionInput>,
        mut transport_events: mpsc::UnboundedReceiver<TransportEvent>,
    ) {
        info!("voice session started in Idle phase");
        self.publish_snapshot();

        // Backends without push events drop their sender right away
        let mut events_open = true;

        loop {
            tokio::select! {
                input = inputs.recv() => match input {
                    Some(input) => self.handle_input(input),
                    None => break,
                },
                event = transport_events.recv(), if events_open => match event {
                    Some(event) => self.handle_transport_event(event),
                    None => {
                        debug!("transport event stream closed");
                        events_open = false;
                    }
                },
            }
            self.publish_snapshot();
        }

        info!("voice session stopped");
    }

    /// Apply one input
    pub fn handle_input(&mut self, input: SessionInput) {
        match input {
            SessionInput::Command(command) => self.handle_command(command),
            SessionInput::ConnectFinished { generation, result } => {
                self.finish_connect(generation, result)
            }
            SessionInput::Levels(levels) => {
                // Late samples after a disconnect must not revive the level
                if self.phase != Phase::Idle {
                    self.levels = levels;
                }
            }
        }
    }

    fn handle_command(&mut self, command: SessionCommand) {
        debug!(?command, "session command");
        match command {
            SessionCommand::Connect(context) => self.connect(context),
            SessionCommand::Activate(context) => self.activate(context),
            SessionCommand::SetActivationContext(context) => self.set_activation_context(context),
            SessionCommand::Disconnect => self.disconnect(),
            SessionCommand::StartListening => self.start_listening(),
            SessionCommand::StopListening => self.stop_listening(),
            SessionCommand::ClearTranscript => self.clear_transcript(),
            SessionCommand::UpdateCredentials { server_url, token } => {
                self.update_credentials(server_url, token)
            }
        }
    }

    /// Start a session from Idle or Error
    pub fn connect(&mut self, context: Option<ActivationContext>) {
        if !self.phase.can_connect() {
            info!(phase = %self.phase, "connect ignored, session already in progress");
            return;
        }

        if let Some(context) = context.filter(|c| !c.is_empty()) {
            self.activation_context = Some(context);
        }

        let (url, token) = match self.credentials.require() {
            Ok((url, token)) => (url.to_string(), token.to_string()),
            Err(e) => {
                warn!(%e, "cannot connect");
                self.transition_to(Phase::Error(e.to_string()));
                return;
            }
        };

        self.generation += 1;
        self.pending_connect = Some(self.generation);
        self.transition_to(Phase::Connecting);

        info!(generation = self.generation, %url, "connecting");
        self.issue(TransportCommand::Connect {
            generation: self.generation,
            url,
            token,
            options: self.options.clone(),
        });
    }

    /// Apply the outcome of an earlier connect
    fn finish_connect(&mut self, generation: u64, result: Result<(), TransportError>) {
        if self.pending_connect != Some(generation) {
            debug!(generation, "discarding stale connect outcome");
            return;
        }
        self.pending_connect = None;

        match result {
            Ok(()) => {
                match self.phase {
                    Phase::Connecting | Phase::Connected => {
                        info!("connected, microphone live");
                        self.transition_to(Phase::Listening);
                    }
                    Phase::Idle | Phase::Error(_) => {
                        warn!(phase = %self.phase, "room joined after session ended, leaving");
                        self.issue(TransportCommand::Disconnect);
                        return;
                    }
                    // Agent audio or a tool already moved the session on
                    _ => debug!(phase = %self.phase, "connected, keeping live phase"),
                }

                if let Some(context) = self.activation_context.clone() {
                    self.send_context(&context);
                }
            }
            Err(e) => {
                error!(?e, "connection failed");
                self.transition_to(Phase::Error(e.to_string()));
            }
        }
    }

    /// Tear down the room and return to Idle, keeping the transcript
    pub fn disconnect(&mut self) {
        info!(phase = %self.phase, "disconnecting");
        self.pending_connect = None;
        self.issue(TransportCommand::Disconnect);
        self.reset_connection_state();
        self.transition_to(Phase::Idle);
    }

    /// Store a context and, when a session is live, send it right away
    ///
    /// Identical contexts are sent again on every call.
    pub fn set_activation_context(&mut self, context: ActivationContext) {
        info!(
            session = context.session_id.as_deref().unwrap_or("none"),
            "activation context set"
        );

        let session_live = !matches!(self.phase, Phase::Idle | Phase::Connecting);
        if session_live {
            self.send_context(&context);
        }
        self.activation_context = Some(context);
    }

    /// Handle an external activation: connect when idle, otherwise update context
    pub fn activate(&mut self, context: ActivationContext) {
        if self.phase == Phase::Idle {
            self.connect(Some(context));
        } else if !context.is_empty() {
            self.set_activation_context(context);
        } else {
            debug!(phase = %self.phase, "empty activation while session active");
        }
    }

    /// Publish the microphone; only from Connected
    pub fn start_listening(&mut self) {
        if self.phase != Phase::Connected {
            debug!(phase = %self.phase, "start listening ignored");
            return;
        }
        self.transition_to(Phase::Listening);
        self.issue(TransportCommand::SetMicrophone(true));
    }

    /// Unpublish the microphone; only from Listening
    pub fn stop_listening(&mut self) {
        if self.phase != Phase::Listening {
            debug!(phase = %self.phase, "stop listening ignored");
            return;
        }
        self.transition_to(Phase::Processing);
        self.issue(TransportCommand::SetMicrophone(false));
    }

    pub fn clear_transcript(&mut self) {
        self.transcript.clear();
        self.emit(SessionEvent::TranscriptCleared);
    }

    /// Replace connection settings used by the next connect
    pub fn update_credentials(&mut self, server_url: Option<String>, token: Option<String>) {
        if let Some(url) = server_url {
            self.credentials.server_url = url;
        }
        if let Some(token) = token {
            self.credentials.token = (!token.is_empty()).then_some(token);
        }
        info!(credentials = ?self.credentials, "credentials updated");
    }

    /// Apply an event pushed by the transport
    pub fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::ConnectionStateChanged(state) => self.handle_connection_state(state),
            TransportEvent::DataReceived { payload, topic } => self.handle_data(payload, topic),
            TransportEvent::TrackSubscribed { kind: TrackKind::Audio } => self.set_speaking(true),
            TransportEvent::TrackUnsubscribed { kind: TrackKind::Audio } => self.set_speaking(false),
            TransportEvent::TrackSubscribed { kind } | TransportEvent::TrackUnsubscribed { kind } => {
                debug!(?kind, "ignoring non-audio track");
            }
        }
    }

    fn handle_connection_state(&mut self, state: ConnectionState) {
        debug!(%state, phase = %self.phase, "connection state changed");
        if self.connection_state != state {
            self.connection_state = state;
            self.emit(SessionEvent::ConnectionStateChanged { state });
        }

        match state {
            ConnectionState::Disconnected => {
                if !matches!(self.phase, Phase::Idle | Phase::Error(_)) {
                    warn!(phase = %self.phase, "room disconnected underneath the session");
                    self.pending_connect = None;
                    self.issue(TransportCommand::Disconnect);
                }
                self.reset_connection_state();
                self.transition_to(Phase::Idle);
            }
            ConnectionState::Connecting | ConnectionState::Reconnecting => {
                self.transition_to(Phase::Connecting);
            }
            ConnectionState::Connected => {
                // A repeated "connected" must not downgrade a live session
                if self.phase == Phase::Connecting {
                    self.transition_to(Phase::Connected);
                }
            }
        }
    }

    fn set_speaking(&mut self, speaking: bool) {
        self.speaking = speaking;
        if speaking {
            self.transition_to(Phase::Speaking);
        } else if self.phase == Phase::Speaking {
            self.transition_to(Phase::Connected);
        }
    }

    /// Dispatch a data-channel message by topic
    fn handle_data(&mut self, payload: Vec<u8>, topic: Option<String>) {
        let Some(topic) = topic else {
            debug!("ignoring data message without topic");
            return;
        };
        let Ok(text) = String::from_utf8(payload) else {
            debug!(%topic, "ignoring non-UTF-8 data message");
            return;
        };

        match topic.as_str() {
            topics::TRANSCRIPT | topics::PARTIAL_TRANSCRIPT => {
                self.transcript.set_partial(text.clone());
                self.emit(SessionEvent::PartialTranscript { text });
            }
            topics::FINAL_TRANSCRIPT | topics::ASSISTANT_RESPONSE => {
                let item = self.transcript.append(Role::Assistant, text);
                self.transcript.clear_partial();
                self.emit(SessionEvent::TranscriptAppended { item });
            }
            topics::USER_TRANSCRIPT => {
                let item = self.transcript.append(Role::User, text);
                self.emit(SessionEvent::TranscriptAppended { item });
            }
            topics::TOOL_STATUS => match ToolStatus::from_payload(&text) {
                Some(status) => self.start_tool(status),
                None => debug!("ignoring malformed tool status"),
            },
            topics::TOOL_DONE => self.finish_tool(),
            other => debug!(topic = other, "ignoring data message"),
        }
    }

    fn start_tool(&mut self, status: ToolStatus) {
        let kind = status.kind();
        info!(tool = %status.tool_name, %kind, "tool started");

        let item = self.transcript.append(Role::ToolStatus, status.summary());
        self.emit(SessionEvent::TranscriptAppended { item });

        self.tool_status = Some(status.clone());
        self.emit(SessionEvent::ToolStarted { status });
        self.transition_to(Phase::UsingTool(kind));
    }

    fn finish_tool(&mut self) {
        if self.tool_status.take().is_some() {
            self.emit(SessionEvent::ToolFinished);
        }
        // The conversation carries on after a tool, so this is not Idle
        if matches!(self.phase, Phase::UsingTool(_)) {
            self.transition_to(Phase::Processing);
        }
    }

    fn send_context(&mut self, context: &ActivationContext) {
        let Some(prompt) = context.to_system_prompt() else {
            return;
        };
        info!(%prompt, "sending context to agent");
        self.issue(TransportCommand::SendData {
            payload: prompt.clone().into_bytes(),
            topic: topics::CONTEXT.to_string(),
        });
        self.emit(SessionEvent::ContextSent { prompt });
    }

    /// Drop everything that only makes sense while a room is joined
    fn reset_connection_state(&mut self) {
        if self.tool_status.take().is_some() {
            self.emit(SessionEvent::ToolFinished);
        }
        self.levels = AudioLevels::default();
        self.speaking = false;
        self.connection_state = ConnectionState::Disconnected;
        self.transcript.clear_partial();
    }

    /// Perform a phase transition
    fn transition_to(&mut self, new_phase: Phase) {
        if new_phase == self.phase {
            return;
        }
        let old_phase = std::mem::replace(&mut self.phase, new_phase.clone());

        info!(from = %old_phase, to = %new_phase, "phase transition");
        self.emit(SessionEvent::PhaseChanged {
            from: old_phase,
            to: new_phase,
        });
    }

    fn emit(&self, event: SessionEvent) {
        debug!(%event, "emitting session event");
        let _ = self.event_tx.send(event);
    }

    fn issue(&self, command: TransportCommand) {
        if self.commands.send(command).is_err() {
            warn!("transport driver has stopped, command dropped");
        }
    }

    fn publish_snapshot(&self) {
        self.snapshot_tx.send_replace(self.snapshot());
    }
}
