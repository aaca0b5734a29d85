//! Events module for session state changes
//!
//! Discrete changes are broadcast to presentation layers (IPC subscribers).
//! Continuous values such as the audio level are only published through
//! the session snapshot.

use serde::{Deserialize, Serialize};

use crate::session::{Phase, ToolStatus, TranscriptItem};
use crate::transport::ConnectionState;

/// Events emitted by the voice session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// The session moved to a new phase
    PhaseChanged { from: Phase, to: Phase },

    /// The transport reported a new room connection state
    ConnectionStateChanged { state: ConnectionState },

    /// The in-progress utterance changed
    PartialTranscript { text: String },

    /// A finished turn was added to the transcript
    TranscriptAppended { item: TranscriptItem },

    /// The transcript was emptied
    TranscriptCleared,

    /// The agent started a tool
    ToolStarted { status: ToolStatus },

    /// The running tool finished
    ToolFinished,

    /// Activation context was sent to the agent
    ContextSent { prompt: String },
}

impl std::fmt::Display for SessionEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionEvent::PhaseChanged { from, to } => {
                write!(f, "PHASE_CHANGED ({} -> {})", from, to)
            }
            SessionEvent::ConnectionStateChanged { state } => {
                write!(f, "CONNECTION_STATE_CHANGED ({})", state)
            }
            SessionEvent::PartialTranscript { text } => {
                write!(f, "PARTIAL_TRANSCRIPT ({} chars)", text.chars().count())
            }
            SessionEvent::TranscriptAppended { item } => {
                write!(f, "TRANSCRIPT_APPENDED ({:?})", item.role)
            }
            SessionEvent::TranscriptCleared => write!(f, "TRANSCRIPT_CLEARED"),
            SessionEvent::ToolStarted { status } => {
                write!(f, "TOOL_STARTED ({})", status.tool_name)
            }
            SessionEvent::ToolFinished => write!(f, "TOOL_FINISHED"),
            SessionEvent::ContextSent { .. } => write!(f, "CONTEXT_SENT"),
        }
    }
}
