//! Voice session module
//!
//! Provides the session state machine and the types it publishes:
//! - Phase: Idle, Connecting, Connected, Listening, Processing, Speaking,
//!   UsingTool, Error
//! - Transcript: finished turns plus the partial utterance
//! - ToolStatus / ToolKind: what the agent is currently running

mod machine;
mod phase;
mod tool;
mod transcript;

pub use machine::{SessionCommand, SessionInput, SessionSnapshot, VoiceSession};
pub use phase::Phase;
pub use tool::{ToolKind, ToolStatus};
pub use transcript::TranscriptItem;
