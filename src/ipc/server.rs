//! Unix domain socket server for IPC
//!
//! Provides request-response communication and push notifications of
//! session events to subscribed clients.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::context::{ActivationContext, ActivationRequest};
use crate::events::SessionEvent;
use crate::session::{SessionCommand, SessionInput, SessionSnapshot};

use super::protocol::{Notification, Request, Response, SessionStatus};

/// Largest frame body accepted from a client
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// IPC Server handling client connections
pub struct Server {
    socket_path: PathBuf,
    listener: Option<UnixListener>,
    shared: Arc<Shared>,
    shutdown_tx: broadcast::Sender<()>,
}

/// State every client handler needs
struct Shared {
    start_time: Instant,
    /// Commands into the session task
    session_tx: mpsc::Sender<SessionInput>,
    /// Latest session snapshot
    snapshot_rx: watch::Receiver<SessionSnapshot>,
    /// Source of push notifications
    event_tx: broadcast::Sender<SessionEvent>,
}

impl Server {
    /// Create a new IPC server
    pub fn new(
        socket_path: &Path,
        session_tx: mpsc::Sender<SessionInput>,
        snapshot_rx: watch::Receiver<SessionSnapshot>,
        event_tx: broadcast::Sender<SessionEvent>,
    ) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent).context("failed to create socket directory")?;
        }

        // Remove stale socket if it exists
        if socket_path.exists() {
            std::fs::remove_file(socket_path).context("failed to remove stale socket")?;
        }

        let listener = UnixListener::bind(socket_path).context("failed to bind Unix socket")?;

        // Set socket permissions to owner-only (0600)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o600))?;
        }

        let (shutdown_tx, _) = broadcast::channel(1);

        info!(?socket_path, "IPC server listening");

        Ok(Self {
            socket_path: socket_path.to_owned(),
            listener: Some(listener),
            shared: Arc::new(Shared {
                start_time: Instant::now(),
                session_tx,
                snapshot_rx,
                event_tx,
            }),
            shutdown_tx,
        })
    }

    /// Run the server, accepting connections
    pub async fn run(&self) -> Result<()> {
        let listener = self.listener.as_ref().context("server not initialized")?;

        loop {
            match listener.accept().await {
                Ok((stream, _addr)) => {
                    debug!("client connected");
                    let shared = Arc::clone(&self.shared);
                    let mut shutdown_rx = self.shutdown_tx.subscribe();

                    tokio::spawn(async move {
                        tokio::select! {
                            result = handle_client(stream, shared) => {
                                if let Err(e) = result {
                                    warn!(?e, "client handler error");
                                }
                            }
                            _ = shutdown_rx.recv() => {
                                debug!("client handler shutting down");
                            }
                        }
                    });
                }
                Err(e) => {
                    error!(?e, "accept error");
                }
            }
        }
    }

    /// Gracefully shutdown the server
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());

        // Remove socket file
        if self.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.socket_path) {
                warn!(?e, "failed to remove socket file");
            }
        }

        info!("IPC server shutdown complete");
    }
}

/// Handle a single client connection
///
/// Requests are read on a separate task so a subscribed client receives
/// notifications while no request is pending.
async fn handle_client(stream: UnixStream, shared: Arc<Shared>) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let (request_tx, request_rx) = mpsc::channel(8);
    let reader_task = tokio::spawn(read_requests(reader, request_tx));

    let result = serve_client(request_rx, &mut writer, &shared).await;

    reader_task.abort();
    result
}

/// Answer requests and push notifications until the client hangs up
async fn serve_client(
    mut requests: mpsc::Receiver<Result<Request, String>>,
    writer: &mut OwnedWriteHalf,
    shared: &Shared,
) -> Result<()> {
    let mut events: Option<broadcast::Receiver<SessionEvent>> = None;

    loop {
        tokio::select! {
            request = requests.recv() => {
                let response = match request {
                    Some(Ok(request)) => {
                        debug!(?request, "received request");
                        process_request(request, shared, &mut events).await
                    }
                    Some(Err(message)) => Response::error("bad_request", message),
                    None => {
                        debug!("client disconnected");
                        return Ok(());
                    }
                };
                write_frame(writer, &response).await?;
            }
            event = next_event(&mut events) => match event {
                Ok(event) => {
                    write_frame(writer, &Notification::SessionEvent { event }).await?;
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "subscriber lagged, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    events = None;
                }
            },
        }
    }
}

/// Read frames until EOF, forwarding parsed requests or parse errors
async fn read_requests(mut reader: OwnedReadHalf, tx: mpsc::Sender<Result<Request, String>>) {
    loop {
        let frame = match read_frame(&mut reader).await {
            Ok(Some(frame)) => frame,
            Ok(None) => return,
            Err(e) => {
                warn!(?e, "failed to read frame");
                return;
            }
        };

        let request = serde_json::from_slice::<Request>(&frame)
            .map_err(|e| format!("failed to parse request: {}", e));
        if tx.send(request).await.is_err() {
            return;
        }
    }
}

/// Wait for the next event, or forever when not subscribed
async fn next_event(
    events: &mut Option<broadcast::Receiver<SessionEvent>>,
) -> Result<SessionEvent, broadcast::error::RecvError> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Process a request and return a response
async fn process_request(
    request: Request,
    shared: &Shared,
    events: &mut Option<broadcast::Receiver<SessionEvent>>,
) -> Response {
    match request {
        Request::Ping => Response::Pong,

        Request::GetStatus => {
            let uptime = shared.start_time.elapsed().as_secs();
            let status = SessionStatus::from_snapshot(&shared.snapshot_rx.borrow(), uptime);
            Response::Status(status)
        }

        Request::GetTranscript => {
            let snapshot = shared.snapshot_rx.borrow();
            Response::Transcript {
                items: snapshot.transcript.to_vec(),
                partial: snapshot.partial_transcript.clone(),
            }
        }

        Request::Connect { params } => {
            let context = (!params.is_empty()).then(|| ActivationContext::from_params(&params));
            forward(shared, SessionCommand::Connect(context)).await
        }

        Request::Activate { params } => {
            let context = ActivationContext::from_params(&params);
            forward(shared, SessionCommand::Activate(context)).await
        }

        Request::ActivateUrl { url } => match ActivationRequest::parse(&url) {
            Ok(request) => {
                info!(
                    session = request.context.session_id.as_deref().unwrap_or("none"),
                    "activation URL received"
                );
                forward(shared, SessionCommand::Activate(request.context)).await
            }
            Err(e) => {
                warn!(%e, "rejecting activation URL");
                Response::error("invalid_activation", e.to_string())
            }
        },

        Request::SetContext { params } => {
            let context = ActivationContext::from_params(&params);
            forward(shared, SessionCommand::SetActivationContext(context)).await
        }

        Request::Disconnect => forward(shared, SessionCommand::Disconnect).await,
        Request::StartListening => forward(shared, SessionCommand::StartListening).await,
        Request::StopListening => forward(shared, SessionCommand::StopListening).await,
        Request::ClearTranscript => forward(shared, SessionCommand::ClearTranscript).await,

        Request::Configure { server_url, token } => {
            forward(shared, SessionCommand::UpdateCredentials { server_url, token }).await
        }

        Request::Subscribe => {
            *events = Some(shared.event_tx.subscribe());
            debug!("client subscribed to notifications");
            Response::Subscribed
        }
    }
}

/// Queue a command for the session task
async fn forward(shared: &Shared, command: SessionCommand) -> Response {
    match shared.session_tx.send(SessionInput::Command(command)).await {
        Ok(()) => Response::Accepted,
        Err(_) => Response::error("session_stopped", "voice session is not running"),
    }
}

/// Read one length-prefixed frame; `None` on a clean EOF before the header
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        anyhow::bail!("frame of {} bytes exceeds limit", len);
    }

    let mut body = vec![0u8; len];
    reader
        .read_exact(&mut body)
        .await
        .context("truncated frame body")?;
    Ok(Some(body))
}

/// Send a length-prefixed JSON message
pub async fn write_frame<W, T>(writer: &mut W, msg: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: serde::Serialize,
{
    let msg_bytes = serde_json::to_vec(msg)?;
    let msg_len = u32::try_from(msg_bytes.len())
        .context("message too large")?
        .to_le_bytes();

    writer.write_all(&msg_len).await?;
    writer.write_all(&msg_bytes).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::session::Phase;

    #[tokio::test]
    async fn test_write_frame() {
        let body = br#"{"type":"pong"}"#;
        let mut mock = tokio_test::io::Builder::new()
            .write(&(body.len() as u32).to_le_bytes())
            .write(body)
            .build();

        write_frame(&mut mock, &Response::Pong).await.unwrap();
    }

    #[tokio::test]
    async fn test_read_frame() {
        let body = br#"{"type":"ping"}"#;
        let mut mock = tokio_test::io::Builder::new()
            .read(&(body.len() as u32).to_le_bytes())
            .read(body)
            .build();

        let frame = read_frame(&mut mock).await.unwrap().unwrap();
        let request: Request = serde_json::from_slice(&frame).unwrap();
        assert!(matches!(request, Request::Ping));
        assert!(read_frame(&mut mock).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_read_frame_rejects_oversized() {
        let mut mock = tokio_test::io::Builder::new()
            .read(&((MAX_FRAME_LEN as u32) + 1).to_le_bytes())
            .build();
        assert!(read_frame(&mut mock).await.is_err());
    }

    struct Harness {
        _dir: tempfile::TempDir,
        socket_path: PathBuf,
        session_rx: mpsc::Receiver<SessionInput>,
        snapshot_tx: watch::Sender<SessionSnapshot>,
        event_tx: broadcast::Sender<SessionEvent>,
        server: Arc<Server>,
    }

    fn start_server() -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let socket_path = dir.path().join("daemon.sock");
        let (session_tx, session_rx) = mpsc::channel(8);
        let (snapshot_tx, snapshot_rx) = watch::channel(SessionSnapshot::default());
        let (event_tx, _) = broadcast::channel(16);

        let server = Arc::new(
            Server::new(&socket_path, session_tx, snapshot_rx, event_tx.clone()).unwrap(),
        );
        let runner = Arc::clone(&server);
        tokio::spawn(async move { runner.run().await });

        Harness {
            _dir: dir,
            socket_path,
            session_rx,
            snapshot_tx,
            event_tx,
            server,
        }
    }

    async fn call(stream: &mut UnixStream, request: &Request) -> Response {
        write_frame(stream, request).await.unwrap();
        let frame = read_frame(stream).await.unwrap().unwrap();
        serde_json::from_slice(&frame).unwrap()
    }

    #[tokio::test]
    async fn test_ping_and_status() {
        let harness = start_server();
        harness.snapshot_tx.send_replace(SessionSnapshot {
            phase: Phase::Listening,
            ..Default::default()
        });

        let mut stream = UnixStream::connect(&harness.socket_path).await.unwrap();
        assert!(matches!(call(&mut stream, &Request::Ping).await, Response::Pong));

        match call(&mut stream, &Request::GetStatus).await {
            Response::Status(status) => {
                assert_eq!(status.phase, Phase::Listening);
                assert_eq!(status.status_text, "Listening...");
                assert!(status.active);
            }
            other => panic!("unexpected response: {:?}", other),
        }

        harness.server.shutdown().await;
        assert!(!harness.socket_path.exists());
    }

    #[tokio::test]
    async fn test_commands_forwarded() {
        let mut harness = start_server();
        let mut stream = UnixStream::connect(&harness.socket_path).await.unwrap();

        let response = call(
            &mut stream,
            &Request::ActivateUrl {
                url: "notchvoice://activate?session=abc".to_string(),
            },
        )
        .await;
        assert!(matches!(response, Response::Accepted));

        match harness.session_rx.recv().await {
            Some(SessionInput::Command(SessionCommand::Activate(context))) => {
                assert_eq!(context.session_id.as_deref(), Some("abc"));
            }
            other => panic!("unexpected input: {:?}", other),
        }

        let response = call(&mut stream, &Request::Disconnect).await;
        assert!(matches!(response, Response::Accepted));
        assert!(matches!(
            harness.session_rx.recv().await,
            Some(SessionInput::Command(SessionCommand::Disconnect))
        ));
    }

    #[tokio::test]
    async fn test_bad_requests_answered() {
        let harness = start_server();
        let mut stream = UnixStream::connect(&harness.socket_path).await.unwrap();

        let response = call(
            &mut stream,
            &Request::ActivateUrl {
                url: "notchvoice://settings".to_string(),
            },
        )
        .await;
        assert!(matches!(response, Response::Error { code, .. } if code == "invalid_activation"));

        write_frame(&mut stream, &serde_json::json!({"type": "dance"}))
            .await
            .unwrap();
        let frame = read_frame(&mut stream).await.unwrap().unwrap();
        let response: Response = serde_json::from_slice(&frame).unwrap();
        assert!(matches!(response, Response::Error { code, .. } if code == "bad_request"));
    }

    #[tokio::test]
    async fn test_subscribe_receives_events() {
        let harness = start_server();
        let mut stream = UnixStream::connect(&harness.socket_path).await.unwrap();

        assert!(matches!(
            call(&mut stream, &Request::Subscribe).await,
            Response::Subscribed
        ));

        harness
            .event_tx
            .send(SessionEvent::PhaseChanged {
                from: Phase::Idle,
                to: Phase::Connecting,
            })
            .unwrap();

        let frame = tokio::time::timeout(Duration::from_secs(2), read_frame(&mut stream))
            .await
            .expect("no notification received")
            .unwrap()
            .unwrap();
        let notification: Notification = serde_json::from_slice(&frame).unwrap();
        match notification {
            Notification::SessionEvent {
                event: SessionEvent::PhaseChanged { to, .. },
            } => assert_eq!(to, Phase::Connecting),
            other => panic!("unexpected notification: {:?}", other),
        }
    }
}
