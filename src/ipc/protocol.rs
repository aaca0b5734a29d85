//! IPC message protocol definitions
//!
//! All messages are JSON-encoded, prefixed with a 4-byte little-endian length.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::context::ActivationContext;
use crate::events::SessionEvent;
use crate::session::{Phase, SessionSnapshot, ToolStatus, TranscriptItem};
use crate::transport::ConnectionState;

/// Requests from the notch UI to the daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Ping to check connectivity
    Ping,

    /// Request current session status
    GetStatus,

    /// Request the full transcript
    GetTranscript,

    /// Start a session, optionally with activation parameters
    Connect {
        #[serde(default)]
        params: BTreeMap<String, String>,
    },

    /// Activation trigger: connect when idle, otherwise update context
    Activate {
        #[serde(default)]
        params: BTreeMap<String, String>,
    },

    /// Activation trigger carrying the raw `notchvoice://activate?...` URL
    ActivateUrl { url: String },

    /// Replace the activation context
    SetContext { params: BTreeMap<String, String> },

    /// Leave the room
    Disconnect,

    /// Publish the microphone
    StartListening,

    /// Unpublish the microphone
    StopListening,

    /// Empty the transcript
    ClearTranscript,

    /// Update room server settings for the next connect
    Configure {
        #[serde(default)]
        server_url: Option<String>,
        #[serde(default)]
        token: Option<String>,
    },

    /// Subscribe to session event notifications
    Subscribe,
}

/// Responses from daemon to UI
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    /// Current session status
    Status(SessionStatus),

    /// Full transcript and the in-progress utterance
    Transcript {
        items: Vec<TranscriptItem>,
        partial: String,
    },

    /// Command queued for the session
    Accepted,

    /// Pong response to ping
    Pong,

    /// Subscription confirmed
    Subscribed,

    /// Error response
    Error { code: String, message: String },
}

impl Response {
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Response::Error {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

/// Push notification from daemon to UI (for subscribed clients)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    /// A session event occurred
    SessionEvent { event: SessionEvent },
}

/// Session status snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStatus {
    /// Daemon version
    pub version: String,

    /// Current phase
    pub phase: Phase,

    /// Caption for the phase
    pub status_text: String,

    /// Whether the audio pipeline is engaged
    pub active: bool,

    /// Room connection state
    pub connection_state: ConnectionState,

    /// Tool currently running, if any
    pub tool_status: Option<ToolStatus>,

    /// Visualizer level in `0.0..=1.0`
    pub audio_level: f32,

    /// Activation context pending or last sent
    pub activation_context: Option<ActivationContext>,

    /// Number of finished transcript turns
    pub transcript_len: usize,

    /// Uptime in seconds
    pub uptime_secs: u64,
}

impl SessionStatus {
    pub fn from_snapshot(snapshot: &SessionSnapshot, uptime_secs: u64) -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            phase: snapshot.phase.clone(),
            status_text: snapshot.phase.status_text(),
            active: snapshot.phase.is_active(),
            connection_state: snapshot.connection_state,
            tool_status: snapshot.tool_status.clone(),
            audio_level: snapshot.audio_level,
            activation_context: snapshot.activation_context.clone(),
            transcript_len: snapshot.transcript.len(),
            uptime_secs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::ToolKind;

    #[test]
    fn test_request_serialization() {
        let req = Request::ActivateUrl {
            url: "notchvoice://activate?session=abc".to_string(),
        };
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("activate_url"));
        assert!(json.contains("session=abc"));
    }

    #[test]
    fn test_request_defaults() {
        let req: Request = serde_json::from_str(r#"{"type":"connect"}"#).unwrap();
        assert!(matches!(req, Request::Connect { params } if params.is_empty()));

        let req: Request = serde_json::from_str(r#"{"type":"configure","token":"t"}"#).unwrap();
        assert!(matches!(
            req,
            Request::Configure { server_url: None, token: Some(t) } if t == "t"
        ));
    }

    #[test]
    fn test_response_serialization() {
        let snapshot = SessionSnapshot {
            phase: Phase::UsingTool(ToolKind::Search),
            ..Default::default()
        };
        let resp = Response::Status(SessionStatus::from_snapshot(&snapshot, 5));
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains(r#""type":"status""#));
        assert!(json.contains("Searching..."));
        assert!(json.contains(r#""active":true"#));
    }

    #[test]
    fn test_notification_serialization() {
        let notification = Notification::SessionEvent {
            event: SessionEvent::ToolFinished,
        };
        let json = serde_json::to_string(&notification).unwrap();
        assert_eq!(
            json,
            r#"{"type":"session_event","event":{"type":"tool_finished"}}"#
        );
    }
}
