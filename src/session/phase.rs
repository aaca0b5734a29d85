//! Session phase definitions

use serde::{Deserialize, Serialize};

use super::tool::ToolKind;

/// The single authoritative state of a voice session
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "phase", content = "detail", rename_all = "snake_case")]
pub enum Phase {
    /// No session, waiting for activation
    #[default]
    Idle,
    /// Joining the room
    Connecting,
    /// In the room, microphone not engaged
    Connected,
    /// Microphone published, user is talking
    Listening,
    /// Waiting on the agent
    Processing,
    /// Agent audio is playing
    Speaking,
    /// Agent is running a tool
    UsingTool(ToolKind),
    /// Connection failed; `connect` again to retry
    Error(String),
}

impl Phase {
    /// Whether the audio pipeline is engaged
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            Phase::Listening | Phase::Processing | Phase::Speaking | Phase::UsingTool(_)
        )
    }

    /// Whether `connect` may start a new session from here
    pub fn can_connect(&self) -> bool {
        matches!(self, Phase::Idle | Phase::Error(_))
    }

    /// Caption shown under the visualizer
    pub fn status_text(&self) -> String {
        match self {
            Phase::Idle => "Tap to start".to_string(),
            Phase::Connecting => "Connecting...".to_string(),
            Phase::Connected => "Connected".to_string(),
            Phase::Listening => "Listening...".to_string(),
            Phase::Processing => "Thinking...".to_string(),
            Phase::Speaking => "Speaking...".to_string(),
            Phase::UsingTool(tool) => tool.caption().to_string(),
            Phase::Error(msg) => format!("Error: {}", msg),
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Idle => write!(f, "Idle"),
            Phase::Connecting => write!(f, "Connecting"),
            Phase::Connected => write!(f, "Connected"),
            Phase::Listening => write!(f, "Listening"),
            Phase::Processing => write!(f, "Processing"),
            Phase::Speaking => write!(f, "Speaking"),
            Phase::UsingTool(tool) => write!(f, "UsingTool({})", tool),
            Phase::Error(msg) => write!(f, "Error({})", msg),
        }
    }
}
