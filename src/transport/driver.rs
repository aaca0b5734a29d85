//! Transport command executor
//!
//! The session never awaits the network. It queues `TransportCommand`s and
//! this driver runs them against the backend one at a time, in the order
//! they were issued, reporting connect outcomes back as session input.
//! While a room is connected it also samples audio levels on a fixed
//! interval.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::session::SessionInput;

use super::{ConnectOptions, Transport};

/// Outbound operations issued by the session
#[derive(Debug, Clone, PartialEq)]
pub enum TransportCommand {
    /// Join a room; the outcome is reported with the same generation
    Connect {
        generation: u64,
        url: String,
        token: String,
        options: ConnectOptions,
    },
    /// Unpublish the microphone and leave the room
    Disconnect,
    SetMicrophone(bool),
    SendData { payload: Vec<u8>, topic: String },
}

/// Runs transport commands and the audio level sampler
pub struct TransportDriver<T: Transport> {
    transport: Arc<T>,
    session_tx: mpsc::Sender<SessionInput>,
    level_interval: Duration,
    sampler: Option<JoinHandle<()>>,
}

impl<T: Transport> TransportDriver<T> {
    pub fn new(
        transport: Arc<T>,
        session_tx: mpsc::Sender<SessionInput>,
        level_interval: Duration,
    ) -> Self {
        Self {
            transport,
            session_tx,
            level_interval,
            sampler: None,
        }
    }

    /// Process commands until the session drops its sender
    pub async fn run(mut self, mut commands: mpsc::UnboundedReceiver<TransportCommand>) {
        info!("transport driver started");

        while let Some(command) = commands.recv().await {
            if !self.execute(command).await {
                break;
            }
        }

        self.stop_sampler();
        self.transport.disconnect().await;
        info!("transport driver stopped");
    }

    /// Execute one command. Returns false once the session is gone.
    async fn execute(&mut self, command: TransportCommand) -> bool {
        match command {
            TransportCommand::Connect {
                generation,
                url,
                token,
                options,
            } => {
                debug!(generation, %url, "connecting transport");
                let result = self.transport.connect(&url, &token, &options).await;

                if result.is_ok() {
                    match self.transport.set_microphone(true).await {
                        Ok(published) => debug!(published, "microphone enabled"),
                        Err(e) => warn!(?e, "failed to enable microphone after connect"),
                    }
                    self.start_sampler();
                }

                self.session_tx
                    .send(SessionInput::ConnectFinished { generation, result })
                    .await
                    .is_ok()
            }

            TransportCommand::Disconnect => {
                self.stop_sampler();
                self.transport.disconnect().await;
                debug!("transport disconnected");
                true
            }

            TransportCommand::SetMicrophone(enabled) => {
                match self.transport.set_microphone(enabled).await {
                    Ok(published) => debug!(enabled, published, "microphone toggled"),
                    Err(e) => warn!(?e, enabled, "failed to toggle microphone"),
                }
                true
            }

            TransportCommand::SendData { payload, topic } => {
                let len = payload.len();
                match self.transport.send_data(payload, &topic).await {
                    Ok(()) => debug!(%topic, len, "data sent"),
                    Err(e) => warn!(?e, %topic, "failed to send data"),
                }
                true
            }
        }
    }

    fn start_sampler(&mut self) {
        self.stop_sampler();

        let transport = Arc::clone(&self.transport);
        let session_tx = self.session_tx.clone();
        let period = self.level_interval;

        self.sampler = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;
                // A full queue just drops this sample; the next tick replaces it
                match session_tx.try_send(SessionInput::Levels(transport.audio_levels())) {
                    Ok(()) | Err(TrySendError::Full(_)) => {}
                    Err(TrySendError::Closed(_)) => break,
                }
            }
        }));
    }

    fn stop_sampler(&mut self) {
        if let Some(handle) = self.sampler.take() {
            handle.abort();
        }
    }

    #[cfg(test)]
    fn is_sampling(&self) -> bool {
        self.sampler.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::tests_support::{Call, FakeTransport};
    use crate::transport::{AudioLevels, TransportError};

    fn connect_command(generation: u64) -> TransportCommand {
        TransportCommand::Connect {
            generation,
            url: "ws://room".to_string(),
            token: "token".to_string(),
            options: ConnectOptions::default(),
        }
    }

    fn create_driver(
        transport: FakeTransport,
    ) -> (
        TransportDriver<FakeTransport>,
        Arc<FakeTransport>,
        mpsc::Receiver<SessionInput>,
    ) {
        let transport = Arc::new(transport);
        let (tx, rx) = mpsc::channel(16);
        let driver = TransportDriver::new(Arc::clone(&transport), tx, Duration::from_millis(5));
        (driver, transport, rx)
    }

    #[tokio::test]
    async fn test_connect_success_enables_microphone() {
        let (mut driver, transport, mut rx) = create_driver(FakeTransport::default());

        assert!(driver.execute(connect_command(7)).await);
        assert!(driver.is_sampling());
        assert_eq!(
            transport.calls(),
            vec![Call::Connect("ws://room".to_string()), Call::SetMicrophone(true)]
        );

        match rx.recv().await {
            Some(SessionInput::ConnectFinished { generation, result }) => {
                assert_eq!(generation, 7);
                assert!(result.is_ok());
            }
            other => panic!("unexpected input: {:?}", other),
        }

        driver.stop_sampler();
    }

    #[tokio::test]
    async fn test_connect_failure_reported() {
        let (mut driver, transport, mut rx) = create_driver(FakeTransport {
            fail_connect: true,
            ..Default::default()
        });

        assert!(driver.execute(connect_command(1)).await);
        assert!(!driver.is_sampling());
        assert_eq!(transport.calls(), vec![Call::Connect("ws://room".to_string())]);

        match rx.recv().await {
            Some(SessionInput::ConnectFinished { result, .. }) => {
                assert!(matches!(result, Err(TransportError::Connect(_))));
            }
            other => panic!("unexpected input: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_commands_run_in_order() {
        let (driver, transport, mut rx) = create_driver(FakeTransport::default());
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();

        cmd_tx.send(connect_command(1)).unwrap();
        cmd_tx.send(TransportCommand::Disconnect).unwrap();
        cmd_tx
            .send(TransportCommand::SendData {
                payload: b"hi".to_vec(),
                topic: "context".to_string(),
            })
            .unwrap();
        drop(cmd_tx);

        // Keep draining session input so the connect report never blocks
        let drain = tokio::spawn(async move { while rx.recv().await.is_some() {} });
        driver.run(cmd_rx).await;
        drain.abort();

        assert_eq!(
            transport.calls(),
            vec![
                Call::Connect("ws://room".to_string()),
                Call::SetMicrophone(true),
                Call::Disconnect,
                Call::SendData("context".to_string(), "hi".to_string()),
                Call::Disconnect,
            ]
        );
    }

    #[tokio::test]
    async fn test_sampler_reports_levels_until_disconnect() {
        let (mut driver, transport, mut rx) = create_driver(FakeTransport::default());
        *transport.levels.lock().unwrap() = AudioLevels {
            local: 0.4,
            remote: 0.2,
        };

        driver.execute(connect_command(1)).await;

        let mut saw_levels = false;
        for _ in 0..10 {
            let input = tokio::time::timeout(Duration::from_secs(1), rx.recv())
                .await
                .expect("timed out waiting for input");
            if let Some(SessionInput::Levels(levels)) = input {
                assert_eq!(levels.local, 0.4);
                saw_levels = true;
                break;
            }
        }
        assert!(saw_levels);

        driver.execute(TransportCommand::Disconnect).await;
        assert!(!driver.is_sampling());
    }
}
