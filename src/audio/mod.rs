//! Microphone capture and loudspeaker playback.

pub mod capture;
pub mod playback;

pub use capture::AudioCapture;
pub use playback::play_wav;

/// 16 kHz, S16LE, mono, 20 ms (320-sample) block. Immutable once produced.
#[derive(Debug, Clone)]
pub struct PcmFrame {
    pub samples: Vec<i16>,
}

impl PcmFrame {
    #[must_use]
    pub fn new(samples: Vec<i16>) -> Self {
        Self { samples }
    }
}
