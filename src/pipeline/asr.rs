//! ASR stage: consumes utterance buffers, produces transcripts, applies
//! invocation stripping, and feeds the command queue.

use std::path::Path;

use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

use crate::error::{EdnaError, Result};
use crate::pipeline::invocation::strip_invocation;
use crate::pipeline::messages::Command;
use crate::queues::{CommandQueue, UtteranceQueue};
use crate::runtime::{RuntimeEvent, RuntimeSender};
use crate::state::{PipelineEvent, StateMachine};
use crate::vad::Utterance;

const BLANK_AUDIO_SENTINEL: &str = "[BLANK_AUDIO]";

/// Opaque speech recognizer: maps PCM to text.
pub trait Transcriber: Send {
    /// Transcribe one utterance's float samples. A non-zero native return
    /// is represented here as `Ok(String::new())`, not as an `Err` — a
    /// transcriber failure on one utterance is per-turn, not fatal, and is
    /// treated the same as blank audio.
    fn transcribe(&mut self, samples: &[f32]) -> Result<String>;
}

/// `whisper-rs` binding against a local `ggml-base.en.bin` model: greedy
/// sampling, single segment, no timestamps, language fixed to the
/// configured code.
pub struct WhisperTranscriber {
    context: WhisperContext,
    language: String,
}

impl WhisperTranscriber {
    /// # Errors
    ///
    /// Returns [`EdnaError::ModelNotFound`] if `model_path` does not exist,
    /// or [`EdnaError::Asr`] if whisper.cpp fails to load it.
    pub fn load(model_path: &Path, language: &str) -> Result<Self> {
        if !model_path.exists() {
            return Err(EdnaError::ModelNotFound(model_path.to_path_buf()));
        }
        let model_path_str = model_path
            .to_str()
            .ok_or_else(|| EdnaError::Asr("invalid model path".to_string()))?;

        let context =
            WhisperContext::new_with_params(model_path_str, WhisperContextParameters::default())
                .map_err(|e| EdnaError::Asr(format!("failed to load whisper model: {e}")))?;

        Ok(Self {
            context,
            language: language.to_string(),
        })
    }

    fn build_params(&self) -> FullParams<'_, '_> {
        let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });
        params.set_language(Some(self.language.as_str()));
        params.set_translate(false);
        params.set_single_segment(true);
        params.set_no_context(true);
        params.set_no_timestamps(true);
        params.set_print_progress(false);
        params.set_print_realtime(false);
        params.set_print_special(false);
        params
    }
}

impl Transcriber for WhisperTranscriber {
    fn transcribe(&mut self, samples: &[f32]) -> Result<String> {
        if samples.is_empty() {
            return Ok(String::new());
        }

        let mut state = match self.context.create_state() {
            Ok(state) => state,
            Err(_) => return Ok(String::new()),
        };

        let params = self.build_params();
        if state.full(params, samples).is_err() {
            return Ok(String::new());
        }

        let num_segments = state.full_n_segments();
        let mut text = String::new();
        for i in 0..num_segments {
            if let Some(segment) = state.get_segment(i) {
                if let Ok(segment_text) = segment.to_str() {
                    if !text.is_empty() {
                        text.push(' ');
                    }
                    text.push_str(segment_text.trim());
                }
            }
        }
        Ok(text.trim().to_string())
    }
}

/// Dedicated ASR worker thread. Blocks on the utterance queue; on shutdown,
/// the caller closes the queue so `pop_blocking` returns `None` and the
/// thread exits.
pub struct AsrStage<T: Transcriber> {
    transcriber: T,
    min_transcript_chars: usize,
}

impl<T: Transcriber> AsrStage<T> {
    #[must_use]
    pub fn new(transcriber: T, min_transcript_chars: usize) -> Self {
        Self {
            transcriber,
            min_transcript_chars,
        }
    }

    /// Run the worker loop until the utterance queue is closed.
    pub fn run(
        &mut self,
        utterances: &UtteranceQueue<Utterance>,
        commands: &CommandQueue<Command>,
        state_machine: &StateMachine,
        events: &RuntimeSender,
    ) {
        while let Some(utterance) = utterances.pop_blocking() {
            self.process_one(&utterance, commands, state_machine, events);
        }
    }

    fn process_one(
        &mut self,
        utterance: &Utterance,
        commands: &CommandQueue<Command>,
        state_machine: &StateMachine,
        events: &RuntimeSender,
    ) {
        let float_samples: Vec<f32> = utterance
            .samples
            .iter()
            .map(|&s| f32::from(s) / 32768.0)
            .collect();

        let raw = match self.transcriber.transcribe(&float_samples) {
            Ok(text) => text,
            Err(e) => {
                let _ = events.send(RuntimeEvent::Error(format!("ASR failure: {e}")));
                String::new()
            }
        };

        let trimmed = raw.trim();
        let text = if trimmed == BLANK_AUDIO_SENTINEL {
            ""
        } else {
            trimmed
        };

        if text.is_empty() || text.chars().count() < self.min_transcript_chars {
            state_machine.dispatch(PipelineEvent::NoCommand("blank audio".to_string()));
            return;
        }

        let _ = events.send(RuntimeEvent::Transcript(text.to_string()));

        match strip_invocation(text) {
            None => {
                state_machine.dispatch(PipelineEvent::NoCommand("ignored transcript".to_string()));
            }
            Some(remainder) if remainder.is_empty() => {
                state_machine.dispatch(PipelineEvent::NoCommand("invocation only".to_string()));
            }
            Some(remainder) => {
                state_machine.dispatch(PipelineEvent::TranscriptReady);
                let _ = events.send(RuntimeEvent::Command(remainder.clone()));
                commands.push(Command(remainder));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubTranscriber(String);

    impl Transcriber for StubTranscriber {
        fn transcribe(&mut self, _samples: &[f32]) -> Result<String> {
            Ok(self.0.clone())
        }
    }

    fn utterance() -> Utterance {
        Utterance {
            samples: vec![1000i16; 8000],
            duration_ms: 500,
        }
    }

    #[test]
    fn blank_audio_sentinel_dispatches_no_command() {
        let mut stage = AsrStage::new(StubTranscriber(BLANK_AUDIO_SENTINEL.to_string()), 2);
        let commands = CommandQueue::new();
        let sm = StateMachine::new();
        sm.dispatch(PipelineEvent::Start);
        sm.dispatch(PipelineEvent::SpeechStart);
        sm.dispatch(PipelineEvent::SpeechEndQueued);
        let (tx, _rx) = crate::runtime::channel();

        stage.process_one(&utterance(), &commands, &sm, &tx);

        assert!(commands.is_empty());
        assert_eq!(sm.current(), crate::state::PipelineState::AwaitSpeech);
    }

    #[test]
    fn non_invocation_transcript_is_ignored() {
        let mut stage = AsrStage::new(StubTranscriber("What time is it".to_string()), 2);
        let commands = CommandQueue::new();
        let sm = StateMachine::new();
        sm.dispatch(PipelineEvent::Start);
        sm.dispatch(PipelineEvent::SpeechStart);
        sm.dispatch(PipelineEvent::SpeechEndQueued);
        let (tx, _rx) = crate::runtime::channel();

        stage.process_one(&utterance(), &commands, &sm, &tx);

        assert!(commands.is_empty());
        assert_eq!(sm.current(), crate::state::PipelineState::AwaitSpeech);
    }

    #[test]
    fn invocation_only_transcript_is_ignored() {
        let mut stage = AsrStage::new(StubTranscriber("Hey Edna.".to_string()), 2);
        let commands = CommandQueue::new();
        let sm = StateMachine::new();
        sm.dispatch(PipelineEvent::Start);
        sm.dispatch(PipelineEvent::SpeechStart);
        sm.dispatch(PipelineEvent::SpeechEndQueued);
        let (tx, _rx) = crate::runtime::channel();

        stage.process_one(&utterance(), &commands, &sm, &tx);

        assert!(commands.is_empty());
        assert_eq!(sm.current(), crate::state::PipelineState::AwaitSpeech);
    }

    #[test]
    fn full_command_is_enqueued_and_transcript_ready_dispatched() {
        let mut stage = AsrStage::new(
            StubTranscriber("Edna what is the sky color".to_string()),
            2,
        );
        let commands = CommandQueue::new();
        let sm = StateMachine::new();
        sm.dispatch(PipelineEvent::Start);
        sm.dispatch(PipelineEvent::SpeechStart);
        sm.dispatch(PipelineEvent::SpeechEndQueued);
        let (tx, _rx) = crate::runtime::channel();

        stage.process_one(&utterance(), &commands, &sm, &tx);

        assert_eq!(sm.current(), crate::state::PipelineState::Thinking);
        let Command(text) = commands.pop_blocking().expect("expected a command");
        assert_eq!(text, "what is the sky color");
    }
}
