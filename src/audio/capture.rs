//! Blocking microphone capture.
//!
//! `cpal` streams are callback-driven and `!Send` on most platforms, so the
//! capture callback here pushes fixed-size frames into a bounded channel,
//! and the caller (the audio/VAD main thread) blocks on `recv` once per
//! loop iteration. This turns the callback-driven stream into a
//! synchronous, one-frame-per-call capture contract.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, StreamConfig};

use crate::audio::PcmFrame;
use crate::error::{EdnaError, Result};

const SAMPLE_RATE: u32 = 16_000;

/// Owns the input stream for its entire lifetime: opened once at startup
/// and held by the audio thread until shutdown.
pub struct AudioCapture {
    stream: cpal::Stream,
    frames: Receiver<PcmFrame>,
    frame_samples: usize,
}

impl AudioCapture {
    /// Open `device_name` in blocking mode at 16 kHz mono S16LE, `frame_samples`
    /// samples per frame (320 at the default 20 ms / 16 kHz configuration).
    ///
    /// # Errors
    ///
    /// Returns [`EdnaError::Audio`] if the named device cannot be found or
    /// opened, or if the host refuses the requested stream configuration.
    pub fn open(device_name: &str, frame_samples: usize) -> Result<Self> {
        let host = cpal::default_host();
        let device = find_input_device(&host, device_name)?;

        let config = StreamConfig {
            channels: 1,
            sample_rate: cpal::SampleRate(SAMPLE_RATE),
            buffer_size: cpal::BufferSize::Default,
        };

        let (tx, rx) = mpsc::channel::<PcmFrame>();
        let mut pending: Vec<i16> = Vec::with_capacity(frame_samples * 2);

        let supported_format = device
            .default_input_config()
            .map_err(|e| EdnaError::Audio(format!("no input config: {e}")))?
            .sample_format();

        let err_fn = |e| tracing::error!(error = %e, "audio capture stream error");

        let stream = match supported_format {
            SampleFormat::I16 => device.build_input_stream(
                &config,
                move |data: &[i16], _| {
                    push_frames(data, &mut pending, frame_samples, &tx);
                },
                err_fn,
                None,
            ),
            SampleFormat::F32 => {
                let tx = tx.clone();
                device.build_input_stream(
                    &config,
                    move |data: &[f32], _| {
                        let as_i16: Vec<i16> = data
                            .iter()
                            .map(|&s| (s.clamp(-1.0, 1.0) * 32767.0) as i16)
                            .collect();
                        push_frames(&as_i16, &mut pending, frame_samples, &tx);
                    },
                    err_fn,
                    None,
                )
            }
            other => {
                return Err(EdnaError::Audio(format!(
                    "unsupported sample format: {other:?}"
                )))
            }
        }
        .map_err(|e| EdnaError::Audio(format!("failed to build input stream: {e}")))?;

        stream
            .play()
            .map_err(|e| EdnaError::Audio(format!("failed to start input stream: {e}")))?;

        Ok(Self {
            stream,
            frames: rx,
            frame_samples,
        })
    }

    /// Read exactly one frame, blocking. On underrun, the caller is expected
    /// to retry once with a fresh call; two consecutive `Err` returns should
    /// be treated as the capture device being fatally broken.
    pub fn read_frame(&self) -> Result<PcmFrame> {
        match self.frames.recv_timeout(Duration::from_secs(2)) {
            Ok(frame) => Ok(frame),
            Err(RecvTimeoutError::Timeout) => Err(EdnaError::Audio(
                "capture underrun: no frame within timeout".to_string(),
            )),
            Err(RecvTimeoutError::Disconnected) => {
                Err(EdnaError::Audio("capture stream disconnected".to_string()))
            }
        }
    }

    #[must_use]
    pub fn frame_samples(&self) -> usize {
        self.frame_samples
    }

    pub fn close(self) {
        drop(self.stream);
    }
}

fn find_input_device(host: &cpal::Host, name: &str) -> Result<cpal::Device> {
    if let Ok(devices) = host.input_devices() {
        for device in devices {
            if device.name().as_deref() == Ok(name) {
                return Ok(device);
            }
        }
    }
    host.default_input_device()
        .ok_or_else(|| EdnaError::Audio(format!("no input device matching '{name}'")))
}

fn push_frames(
    data: &[i16],
    pending: &mut Vec<i16>,
    frame_samples: usize,
    tx: &mpsc::Sender<PcmFrame>,
) {
    pending.extend_from_slice(data);
    while pending.len() >= frame_samples {
        let frame: Vec<i16> = pending.drain(..frame_samples).collect();
        if tx.send(PcmFrame::new(frame)).is_err() {
            return;
        }
    }
}
