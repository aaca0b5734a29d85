//! Real-time transport boundary
//!
//! The room client (audio publish, data channel, level metering) is an
//! external library. The session only sees it through the `Transport`
//! trait and the `TransportEvent`s it delivers, so the backend can be
//! swapped or faked in tests.

mod driver;
#[cfg(feature = "livekit")]
mod livekit;
#[cfg(feature = "livekit")]
mod microphone;
#[cfg_attr(not(feature = "livekit"), allow(dead_code))]
mod pcm;
#[cfg(test)]
pub(crate) mod tests_support;
mod unavailable;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::Voice;

pub use driver::{TransportCommand, TransportDriver};
#[cfg(feature = "livekit")]
pub use self::livekit::LiveKitTransport;
pub use unavailable::UnavailableTransport;

/// Room connection state as reported by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Reconnecting,
    Connected,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Reconnecting => write!(f, "reconnecting"),
            ConnectionState::Connected => write!(f, "connected"),
        }
    }
}

/// Media kind of a remote track
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Audio,
    Video,
}

/// Events pushed by the transport as they happen
#[derive(Debug, Clone)]
pub enum TransportEvent {
    ConnectionStateChanged(ConnectionState),
    /// Data-channel message from a remote participant
    DataReceived {
        payload: Vec<u8>,
        topic: Option<String>,
    },
    TrackSubscribed { kind: TrackKind },
    TrackUnsubscribed { kind: TrackKind },
}

/// Latest local and remote audio levels, each in `0.0..=1.0`
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AudioLevels {
    pub local: f32,
    pub remote: f32,
}

/// Options passed along with a room connect
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectOptions {
    pub auto_subscribe: bool,
    pub echo_cancellation: bool,
    pub auto_gain_control: bool,
    pub noise_suppression: bool,
    /// Voice the agent should answer with
    pub voice: Voice,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            auto_subscribe: true,
            echo_cancellation: true,
            auto_gain_control: true,
            noise_suppression: true,
            voice: Voice::default(),
        }
    }
}

/// Errors reported by a transport backend
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("not connected to a room")]
    NotConnected,

    #[error("microphone error: {0}")]
    Microphone(String),

    #[error("failed to send data: {0}")]
    Send(String),

    #[error("transport unavailable: {0}")]
    Unavailable(String),
}

/// A real-time audio/data room client
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Join the room at `url` with `token`
    async fn connect(
        &self,
        url: &str,
        token: &str,
        options: &ConnectOptions,
    ) -> Result<(), TransportError>;

    /// Unpublish the microphone and leave the room. Safe to call when not connected.
    async fn disconnect(&self);

    /// Publish or unpublish the microphone, returning the published state
    async fn set_microphone(&self, enabled: bool) -> Result<bool, TransportError>;

    /// Send a reliable data-channel message on `topic`
    async fn send_data(&self, payload: Vec<u8>, topic: &str) -> Result<(), TransportError>;

    /// Sample current audio levels; polled, never pushed
    fn audio_levels(&self) -> AudioLevels;
}
