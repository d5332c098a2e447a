//! Voice activity detection and utterance segmentation.
//!
//! The ternary voiced/unvoiced/fatal decision is behind a `VadDetector`
//! trait so the real `webrtc-vad` binding and a deterministic stub share
//! one code path in tests.

use std::collections::VecDeque;

use crate::audio::PcmFrame;
use crate::config::VadConfig;
use crate::error::{EdnaError, Result};

/// A ternary frame classifier: `Ok(true)` voiced, `Ok(false)` unvoiced,
/// `Err` fatal (the underlying engine's −1 return is treated as fatal).
pub trait VadDetector: Send {
    fn is_voiced(&mut self, frame: &PcmFrame) -> Result<bool>;
}

/// `webrtc-vad` binding at a configurable aggressiveness (default: level 2).
pub struct WebrtcVad {
    inner: webrtc_vad::Vad,
}

impl WebrtcVad {
    /// # Errors
    ///
    /// Returns [`EdnaError::Vad`] if `aggressiveness` is out of the `0..=3`
    /// range the underlying WebRTC VAD accepts.
    pub fn new(aggressiveness: u8) -> Result<Self> {
        let mode = match aggressiveness {
            0 => webrtc_vad::VadMode::Quality,
            1 => webrtc_vad::VadMode::LowBitrate,
            2 => webrtc_vad::VadMode::Aggressive,
            3 => webrtc_vad::VadMode::VeryAggressive,
            other => {
                return Err(EdnaError::Vad(format!(
                    "aggressiveness must be 0..=3, got {other}"
                )))
            }
        };
        Ok(Self {
            inner: webrtc_vad::Vad::new_with_rate_and_mode(webrtc_vad::SampleRate::Rate16kHz, mode),
        })
    }
}

impl VadDetector for WebrtcVad {
    fn is_voiced(&mut self, frame: &PcmFrame) -> Result<bool> {
        self.inner
            .is_voice_segment(&frame.samples)
            .map_err(|()| EdnaError::Vad("webrtc-vad processing failed".to_string()))
    }
}

/// One finalized utterance: pre-roll plus the speech span.
#[derive(Debug, Clone)]
pub struct Utterance {
    pub samples: Vec<i16>,
    pub duration_ms: u32,
}

/// What happened to this frame, for the caller (the audio/VAD main loop) to
/// act on.
#[derive(Debug)]
pub enum SegmenterOutcome {
    /// Mic-gated: phase is `Speaking` or the cooldown counter is positive.
    Gated,
    /// Not yet in speech, still waiting.
    Idle,
    /// `voiced_run` just crossed the start threshold.
    SpeechStart,
    /// In speech, accumulating.
    Accumulating,
    /// `unvoiced_run` crossed the stop threshold; utterance finalized and
    /// long enough to enqueue.
    SpeechEnd(Utterance),
    /// Finalized but shorter than the minimum duration; dropped.
    SpeechEndTooShort,
}

/// Frame-by-frame speech segmenter with hysteresis, pre-roll, and a
/// capture-side-only post-speaking cooldown.
pub struct VadSegmenter {
    config: VadConfig,
    frame_ms: u32,
    pre_roll: VecDeque<PcmFrame>,
    in_speech: bool,
    voiced_run: u32,
    unvoiced_run: u32,
    utterance: Vec<i16>,
    frame_count_in_utterance: u32,
    cooldown: u32,
    was_speaking_phase: bool,
}

impl VadSegmenter {
    #[must_use]
    pub fn new(config: VadConfig, frame_ms: u32) -> Self {
        let pre_roll_frames = config.pre_roll_frames;
        Self {
            config,
            frame_ms,
            pre_roll: VecDeque::with_capacity(pre_roll_frames),
            in_speech: false,
            voiced_run: 0,
            unvoiced_run: 0,
            utterance: Vec::new(),
            frame_count_in_utterance: 0,
            cooldown: 0,
            was_speaking_phase: false,
        }
    }

    /// Reset every segmentation accumulator. Called on every entry into the
    /// mic-gate region so a suspended utterance never bleeds into the next.
    fn reset_accumulators(&mut self) {
        self.in_speech = false;
        self.voiced_run = 0;
        self.unvoiced_run = 0;
        self.utterance.clear();
        self.frame_count_in_utterance = 0;
        self.pre_roll.clear();
    }

    /// Process exactly one frame. `is_speaking_phase` is the state
    /// machine's current `phase == Speaking` snapshot, read by the caller
    /// before calling this.
    ///
    /// # Errors
    ///
    /// Propagates a fatal error from `detector`.
    pub fn process_frame(
        &mut self,
        frame: PcmFrame,
        is_speaking_phase: bool,
        detector: &mut dyn VadDetector,
    ) -> Result<SegmenterOutcome> {
        // Step 2: gate on current phase / pending cooldown.
        if is_speaking_phase || self.cooldown > 0 {
            if self.cooldown > 0 {
                self.cooldown -= 1;
            }
            self.reset_accumulators();
            self.was_speaking_phase = is_speaking_phase;
            return Ok(SegmenterOutcome::Gated);
        }

        // Step 3: arm cooldown the first iteration we observe the phase has
        // left Speaking. Takes effect starting next frame.
        if self.was_speaking_phase {
            self.cooldown = self.config.cooldown_frames;
        }
        self.was_speaking_phase = false;

        // Step 4: pre-roll ring, most recent `pre_roll_frames` only.
        self.pre_roll.push_back(frame.clone());
        while self.pre_roll.len() > self.config.pre_roll_frames {
            self.pre_roll.pop_front();
        }

        // Step 5: ternary VAD decision.
        let voiced = detector.is_voiced(&frame)?;

        if !self.in_speech {
            // Step 6.
            if voiced {
                self.voiced_run += 1;
            } else {
                self.voiced_run = 0;
            }

            if self.voiced_run >= self.config.start_trigger_frames {
                self.in_speech = true;
                self.unvoiced_run = 0;
                self.utterance.clear();
                self.frame_count_in_utterance = 0;
                for pre_frame in &self.pre_roll {
                    self.utterance.extend_from_slice(&pre_frame.samples);
                    self.frame_count_in_utterance += 1;
                }
                return Ok(SegmenterOutcome::SpeechStart);
            }
            return Ok(SegmenterOutcome::Idle);
        }

        // Step 7: in speech, accumulate every frame (including this one;
        // pre-roll frames were already seeded on speech-start above).
        let frame_samples = frame.samples.len();
        self.utterance.extend_from_slice(&frame.samples);
        self.frame_count_in_utterance += 1;

        // Maximum duration is bounded by dropping the oldest samples once the
        // accumulator exceeds it, so an uninterrupted utterance never grows
        // past `max_utterance_ms` regardless of how long the speaker talks.
        let max_frames = self.config.max_utterance_ms / self.frame_ms;
        if self.frame_count_in_utterance > max_frames {
            let excess_frames = self.frame_count_in_utterance - max_frames;
            let drop_samples = (excess_frames as usize) * frame_samples;
            if drop_samples <= self.utterance.len() {
                self.utterance.drain(0..drop_samples);
            }
            self.frame_count_in_utterance = max_frames;
        }

        if voiced {
            self.unvoiced_run = 0;
        } else {
            self.unvoiced_run += 1;
        }

        if self.unvoiced_run >= self.config.stop_trigger_frames {
            let duration_ms = self.frame_count_in_utterance * self.frame_ms;
            let samples = std::mem::take(&mut self.utterance);
            self.reset_accumulators();

            if duration_ms >= self.config.min_utterance_ms {
                return Ok(SegmenterOutcome::SpeechEnd(Utterance {
                    samples,
                    duration_ms,
                }));
            }
            return Ok(SegmenterOutcome::SpeechEndTooShort);
        }

        Ok(SegmenterOutcome::Accumulating)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Deterministic stub: voiced frames are all-nonzero, silence is all-zero.
    struct StubDetector;

    impl VadDetector for StubDetector {
        fn is_voiced(&mut self, frame: &PcmFrame) -> Result<bool> {
            Ok(frame.samples.iter().any(|&s| s != 0))
        }
    }

    fn silent_frame() -> PcmFrame {
        PcmFrame::new(vec![0i16; 320])
    }

    fn voiced_frame() -> PcmFrame {
        PcmFrame::new(vec![1000i16; 320])
    }

    #[test]
    fn pure_silence_never_starts_speech() {
        let mut seg = VadSegmenter::new(VadConfig::default(), 20);
        let mut detector = StubDetector;
        for _ in 0..250 {
            let outcome = seg
                .process_frame(silent_frame(), false, &mut detector)
                .unwrap();
            assert!(matches!(outcome, SegmenterOutcome::Idle));
        }
    }

    #[test]
    fn brief_pop_below_threshold_does_not_start_speech() {
        let mut seg = VadSegmenter::new(VadConfig::default(), 20);
        let mut detector = StubDetector;
        for _ in 0..2 {
            let outcome = seg
                .process_frame(voiced_frame(), false, &mut detector)
                .unwrap();
            assert!(matches!(outcome, SegmenterOutcome::Idle));
        }
        let outcome = seg
            .process_frame(silent_frame(), false, &mut detector)
            .unwrap();
        assert!(matches!(outcome, SegmenterOutcome::Idle));
    }

    #[test]
    fn short_phrase_starts_and_ends_as_expected() {
        let mut seg = VadSegmenter::new(VadConfig::default(), 20);
        let mut detector = StubDetector;

        for _ in 0..15 {
            let outcome = seg
                .process_frame(silent_frame(), false, &mut detector)
                .unwrap();
            assert!(matches!(outcome, SegmenterOutcome::Idle));
        }

        let mut start_events = 0;
        for i in 0..25 {
            let outcome = seg
                .process_frame(voiced_frame(), false, &mut detector)
                .unwrap();
            if matches!(outcome, SegmenterOutcome::SpeechStart) {
                start_events += 1;
                assert_eq!(i, 2); // voiced_run hits 3 on the 3rd frame (index 2)
            }
        }
        assert_eq!(start_events, 1);

        let mut end_outcome = None;
        for _ in 0..25 {
            let outcome = seg
                .process_frame(silent_frame(), false, &mut detector)
                .unwrap();
            if let SegmenterOutcome::SpeechEnd(utterance) = outcome {
                end_outcome = Some(utterance);
                break;
            }
        }
        let utterance = end_outcome.expect("expected a finalized utterance");
        assert!(utterance.duration_ms >= 200);
    }

    #[test]
    fn gating_resets_accumulators() {
        let mut seg = VadSegmenter::new(VadConfig::default(), 20);
        let mut detector = StubDetector;
        for _ in 0..3 {
            seg.process_frame(voiced_frame(), false, &mut detector)
                .unwrap();
        }
        assert!(seg.in_speech);

        let outcome = seg
            .process_frame(voiced_frame(), true, &mut detector)
            .unwrap();
        assert!(matches!(outcome, SegmenterOutcome::Gated));
        assert!(!seg.in_speech);
        assert_eq!(seg.voiced_run, 0);
    }

    #[test]
    fn cooldown_arms_after_leaving_speaking_phase() {
        let mut seg = VadSegmenter::new(VadConfig::default(), 20);
        let mut detector = StubDetector;

        seg.process_frame(silent_frame(), true, &mut detector)
            .unwrap();
        let outcome = seg
            .process_frame(silent_frame(), false, &mut detector)
            .unwrap();
        assert!(!matches!(outcome, SegmenterOutcome::Gated));
        assert_eq!(seg.cooldown, 30);

        let outcome = seg
            .process_frame(silent_frame(), false, &mut detector)
            .unwrap();
        assert!(matches!(outcome, SegmenterOutcome::Gated));
        assert_eq!(seg.cooldown, 29);
    }

    #[test]
    fn continuous_speech_never_exceeds_max_duration() {
        let mut config = VadConfig::default();
        config.max_utterance_ms = 1000; // keep the test fast: 1s cap / 20ms frames = 50
        let mut seg = VadSegmenter::new(config, 20);
        let mut detector = StubDetector;

        for _ in 0..3 {
            seg.process_frame(voiced_frame(), false, &mut detector)
                .unwrap();
        }
        assert!(seg.in_speech);

        // Keep talking well past the cap with no pause.
        for _ in 0..200 {
            let outcome = seg
                .process_frame(voiced_frame(), false, &mut detector)
                .unwrap();
            assert!(matches!(outcome, SegmenterOutcome::Accumulating));
            assert!(seg.frame_count_in_utterance * seg.frame_ms <= 1000);
        }
    }
}
