//! Placeholder transport for builds without a room backend

use async_trait::async_trait;
use tracing::debug;

use super::{AudioLevels, ConnectOptions, Transport, TransportError};

/// Transport used when no backend feature is compiled in
///
/// Every connect fails with a readable message, which the session
/// surfaces as its error phase.
#[derive(Debug, Default)]
pub struct UnavailableTransport;

impl UnavailableTransport {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transport for UnavailableTransport {
    async fn connect(
        &self,
        url: &str,
        _token: &str,
        _options: &ConnectOptions,
    ) -> Result<(), TransportError> {
        debug!(url, "connect requested without a transport backend");
        Err(TransportError::Unavailable(
            "no room backend compiled in, rebuild with --features livekit".to_string(),
        ))
    }

    async fn disconnect(&self) {}

    async fn set_microphone(&self, _enabled: bool) -> Result<bool, TransportError> {
        Err(TransportError::NotConnected)
    }

    async fn send_data(&self, _payload: Vec<u8>, _topic: &str) -> Result<(), TransportError> {
        Err(TransportError::NotConnected)
    }

    fn audio_levels(&self) -> AudioLevels {
        AudioLevels::default()
    }
}
