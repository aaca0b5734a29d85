//! LiveKit room backend

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use livekit::options::TrackPublishOptions;
use livekit::prelude::*;
use livekit::track::{LocalAudioTrack, LocalTrack, RemoteTrack, TrackSource};
use livekit::webrtc::audio_source::{AudioSourceOptions, RtcAudioSource};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::microphone::MicrophoneCapture;
use super::{
    AudioLevels, ConnectOptions, ConnectionState, TrackKind, Transport, TransportError,
    TransportEvent,
};

const MIC_TRACK_NAME: &str = "microphone";

/// Published microphone track and the capture feeding it
struct Microphone {
    sid: TrackSid,
    _capture: MicrophoneCapture,
}

/// A joined room and its microphone publication
struct ActiveRoom {
    room: Arc<Room>,
    options: AudioSourceOptions,
    mic: Option<Microphone>,
    forwarder: tokio::task::JoinHandle<()>,
}

/// Transport backed by a LiveKit room
///
/// Only events raised by the room itself are forwarded. The outcome of a
/// connect is reported by the driver, and a local disconnect is silent.
/// Publishing the microphone opens the default input device; the track is
/// only published once capture is running.
pub struct LiveKitTransport {
    events: mpsc::UnboundedSender<TransportEvent>,
    active: tokio::sync::Mutex<Option<ActiveRoom>>,
    /// Room handle for the synchronous level sampler
    room: Mutex<Option<Arc<Room>>>,
}

impl LiveKitTransport {
    pub fn new(events: mpsc::UnboundedSender<TransportEvent>) -> Self {
        Self {
            events,
            active: tokio::sync::Mutex::new(None),
            room: Mutex::new(None),
        }
    }

    fn set_room(&self, room: Option<Arc<Room>>) {
        if let Ok(mut slot) = self.room.lock() {
            *slot = room;
        }
    }
}

#[async_trait]
impl Transport for LiveKitTransport {
    async fn connect(
        &self,
        url: &str,
        token: &str,
        options: &ConnectOptions,
    ) -> Result<(), TransportError> {
        let mut active = self.active.lock().await;
        if let Some(previous) = active.take() {
            debug!("closing previous room before reconnecting");
            close_room(previous).await;
        }

        let mut room_options = RoomOptions::default();
        room_options.auto_subscribe = options.auto_subscribe;

        let (room, room_events) = Room::connect(url, token, room_options)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        let room = Arc::new(room);
        info!(room = %room.name(), "joined room");

        // Tell the agent which voice to answer with
        let metadata = serde_json::json!({ "voice": options.voice.display_name() }).to_string();
        if let Err(e) = room.local_participant().set_metadata(metadata).await {
            warn!(?e, "failed to set participant metadata");
        }

        let forwarder = tokio::spawn(forward_events(room_events, self.events.clone()));

        self.set_room(Some(Arc::clone(&room)));
        *active = Some(ActiveRoom {
            room,
            options: AudioSourceOptions {
                echo_cancellation: options.echo_cancellation,
                noise_suppression: options.noise_suppression,
                auto_gain_control: options.auto_gain_control,
            },
            mic: None,
            forwarder,
        });

        Ok(())
    }

    async fn disconnect(&self) {
        let previous = self.active.lock().await.take();
        self.set_room(None);

        if let Some(previous) = previous {
            close_room(previous).await;
        }
    }

    async fn set_microphone(&self, enabled: bool) -> Result<bool, TransportError> {
        let mut active = self.active.lock().await;
        let active = active.as_mut().ok_or(TransportError::NotConnected)?;
        let participant = active.room.local_participant();

        match (enabled, active.mic.take()) {
            (true, Some(mic)) => {
                active.mic = Some(mic);
            }
            (true, None) => {
                let (capture, source) = MicrophoneCapture::start(active.options.clone()).await?;
                let track = LocalAudioTrack::create_audio_track(
                    MIC_TRACK_NAME,
                    RtcAudioSource::Native(source),
                );
                let publication = participant
                    .publish_track(
                        LocalTrack::Audio(track),
                        TrackPublishOptions {
                            source: TrackSource::Microphone,
                            ..Default::default()
                        },
                    )
                    .await
                    .map_err(|e| TransportError::Microphone(e.to_string()))?;
                active.mic = Some(Microphone {
                    sid: publication.sid(),
                    _capture: capture,
                });
            }
            (false, Some(mic)) => {
                participant
                    .unpublish_track(&mic.sid)
                    .await
                    .map_err(|e| TransportError::Microphone(e.to_string()))?;
            }
            (false, None) => {}
        }

        Ok(active.mic.is_some())
    }

    async fn send_data(&self, payload: Vec<u8>, topic: &str) -> Result<(), TransportError> {
        let room = {
            let active = self.active.lock().await;
            let active = active.as_ref().ok_or(TransportError::NotConnected)?;
            Arc::clone(&active.room)
        };

        room.local_participant()
            .publish_data(DataPacket {
                payload,
                topic: Some(topic.to_string()),
                reliable: true,
                ..Default::default()
            })
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    fn audio_levels(&self) -> AudioLevels {
        let room = match self.room.lock() {
            Ok(slot) => slot.clone(),
            Err(_) => None,
        };
        let Some(room) = room else {
            return AudioLevels::default();
        };

        let local = room.local_participant().audio_level();
        let remote = room
            .remote_participants()
            .values()
            .map(|p| p.audio_level())
            .fold(0.0_f32, f32::max);

        AudioLevels { local, remote }
    }
}

async fn close_room(active: ActiveRoom) {
    active.forwarder.abort();
    if let Some(mic) = active.mic {
        if let Err(e) = active.room.local_participant().unpublish_track(&mic.sid).await {
            debug!(?e, "failed to unpublish microphone on close");
        }
    }
    if let Err(e) = active.room.close().await {
        warn!(?e, "failed to close room");
    }
    info!("left room");
}

/// Translate room events into transport events until the room goes away
async fn forward_events(
    mut room_events: mpsc::UnboundedReceiver<RoomEvent>,
    events: mpsc::UnboundedSender<TransportEvent>,
) {
    while let Some(event) = room_events.recv().await {
        let event = match event {
            RoomEvent::ConnectionStateChanged(state) => {
                TransportEvent::ConnectionStateChanged(map_state(state))
            }
            RoomEvent::Reconnecting => {
                TransportEvent::ConnectionStateChanged(ConnectionState::Reconnecting)
            }
            RoomEvent::Reconnected => {
                TransportEvent::ConnectionStateChanged(ConnectionState::Connected)
            }
            RoomEvent::Disconnected { reason } => {
                debug!(?reason, "room disconnected");
                TransportEvent::ConnectionStateChanged(ConnectionState::Disconnected)
            }
            RoomEvent::DataReceived { payload, topic, .. } => TransportEvent::DataReceived {
                payload: payload.to_vec(),
                topic,
            },
            RoomEvent::TrackSubscribed { track, .. } => TransportEvent::TrackSubscribed {
                kind: track_kind(&track),
            },
            RoomEvent::TrackUnsubscribed { track, .. } => TransportEvent::TrackUnsubscribed {
                kind: track_kind(&track),
            },
            _ => continue,
        };

        if events.send(event).is_err() {
            break;
        }
    }
    debug!("room event stream ended");
}

fn map_state(state: livekit::ConnectionState) -> ConnectionState {
    match state {
        livekit::ConnectionState::Connected => ConnectionState::Connected,
        livekit::ConnectionState::Reconnecting => ConnectionState::Reconnecting,
        livekit::ConnectionState::Disconnected => ConnectionState::Disconnected,
    }
}

fn track_kind(track: &RemoteTrack) -> TrackKind {
    match track {
        RemoteTrack::Audio(_) => TrackKind::Audio,
        RemoteTrack::Video(_) => TrackKind::Video,
    }
}
