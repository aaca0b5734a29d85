//! Recording transport for tests

use std::sync::Mutex;

use async_trait::async_trait;

use super::{AudioLevels, ConnectOptions, Transport, TransportError};

/// Calls observed by `FakeTransport`
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Connect(String),
    Disconnect,
    SetMicrophone(bool),
    SendData(String, String),
}

/// In-memory transport that records every call
#[derive(Default)]
pub struct FakeTransport {
    pub calls: Mutex<Vec<Call>>,
    pub fail_connect: bool,
    pub levels: Mutex<AudioLevels>,
}

impl FakeTransport {
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn connect(
        &self,
        url: &str,
        _token: &str,
        _options: &ConnectOptions,
    ) -> Result<(), TransportError> {
        self.calls.lock().unwrap().push(Call::Connect(url.to_string()));
        if self.fail_connect {
            Err(TransportError::Connect("unauthorized".to_string()))
        } else {
            Ok(())
        }
    }

    async fn disconnect(&self) {
        self.calls.lock().unwrap().push(Call::Disconnect);
    }

    async fn set_microphone(&self, enabled: bool) -> Result<bool, TransportError> {
        self.calls.lock().unwrap().push(Call::SetMicrophone(enabled));
        Ok(enabled)
    }

    async fn send_data(&self, payload: Vec<u8>, topic: &str) -> Result<(), TransportError> {
        let text = String::from_utf8(payload).unwrap();
        self.calls
            .lock()
            .unwrap()
            .push(Call::SendData(topic.to_string(), text));
        Ok(())
    }

    fn audio_levels(&self) -> AudioLevels {
        *self.levels.lock().unwrap()
    }
}
