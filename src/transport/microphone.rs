//! Default input device capture feeding the published microphone track
//!
//! The cpal stream lives on its own thread for its whole life. Its callback
//! downmixes to mono 16-bit PCM and hands buffers to a tokio task that
//! pushes them into the `NativeAudioSource` behind the track.

use std::sync::mpsc as std_mpsc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::SampleFormat;
use livekit::webrtc::audio_frame::AudioFrame;
use livekit::webrtc::audio_source::native::NativeAudioSource;
use livekit::webrtc::audio_source::AudioSourceOptions;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::pcm::{downmix, f32_to_i16};
use super::TransportError;

/// Buffers queued between the device callback and the source
const FRAME_QUEUE: usize = 32;
const QUEUE_SIZE_MS: u32 = 100;

/// A running capture. Dropping it stops the device stream.
pub struct MicrophoneCapture {
    /// Closing this ends the capture thread, which drops the stream
    _stop: std_mpsc::Sender<()>,
    pump: JoinHandle<()>,
}

impl MicrophoneCapture {
    /// Open the default input device and return the source it feeds
    pub async fn start(
        options: AudioSourceOptions,
    ) -> Result<(Self, NativeAudioSource), TransportError> {
        let (ready_tx, ready_rx) = oneshot::channel();
        let (frames_tx, mut frames_rx) = mpsc::channel::<Vec<i16>>(FRAME_QUEUE);
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();

        std::thread::Builder::new()
            .name("mic-capture".to_string())
            .spawn(move || run_stream(frames_tx, ready_tx, stop_rx))
            .map_err(mic_error)?;

        let sample_rate = ready_rx
            .await
            .map_err(|_| TransportError::Microphone("capture thread exited".to_string()))??;

        let source = NativeAudioSource::new(options, sample_rate, 1, QUEUE_SIZE_MS);
        let feed = source.clone();
        let pump = tokio::spawn(async move {
            while let Some(samples) = frames_rx.recv().await {
                let frame = AudioFrame {
                    samples_per_channel: samples.len() as u32,
                    data: samples.into(),
                    sample_rate,
                    num_channels: 1,
                };
                if let Err(e) = feed.capture_frame(&frame).await {
                    debug!(?e, "microphone frame rejected");
                }
            }
        });

        info!(sample_rate, "microphone capture started");
        Ok((Self { _stop: stop_tx, pump }, source))
    }
}

impl Drop for MicrophoneCapture {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

fn mic_error(e: impl std::fmt::Display) -> TransportError {
    TransportError::Microphone(e.to_string())
}

/// Own the stream until the stop sender goes away
fn run_stream(
    frames: mpsc::Sender<Vec<i16>>,
    ready: oneshot::Sender<Result<u32, TransportError>>,
    stop: std_mpsc::Receiver<()>,
) {
    let stream = match open_stream(frames) {
        Ok((stream, sample_rate)) => {
            let _ = ready.send(Ok(sample_rate));
            stream
        }
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };

    let _ = stop.recv();
    drop(stream);
    debug!("microphone capture stopped");
}

fn open_stream(frames: mpsc::Sender<Vec<i16>>) -> Result<(cpal::Stream, u32), TransportError> {
    let device = cpal::default_host()
        .default_input_device()
        .ok_or_else(|| TransportError::Microphone("no input device available".to_string()))?;
    let supported = device.default_input_config().map_err(mic_error)?;
    let sample_format = supported.sample_format();
    let config: cpal::StreamConfig = supported.into();
    let channels = usize::from(config.channels);

    let on_error = |e: cpal::StreamError| warn!(%e, "microphone stream error");

    let stream = match sample_format {
        SampleFormat::F32 => device.build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                // A full queue drops this buffer rather than blocking the device
                let _ = frames.try_send(downmix(data, channels, f32_to_i16));
            },
            on_error,
            None,
        ),
        SampleFormat::I16 => device.build_input_stream(
            &config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                let _ = frames.try_send(downmix(data, channels, |s| s));
            },
            on_error,
            None,
        ),
        other => {
            return Err(TransportError::Microphone(format!(
                "unsupported sample format: {:?}",
                other
            )))
        }
    }
    .map_err(mic_error)?;

    stream.play().map_err(mic_error)?;
    Ok((stream, config.sample_rate.0))
}
