//! Edna: a fully local, interactive voice assistant.
//!
//! Microphone -> VAD segmenter -> ASR -> Brain (LLM) -> Speech (TTS) -> speaker.
//!
//! The hard engineering here is not any single neural model (those are
//! opaque native libraries consumed through thin trait boundaries) but the
//! real-time, audio-gated pipeline coordinator: a state machine, a VAD
//! segmenter with hysteresis and pre-roll, and three worker stages that
//! share scarce resources (GPU, speaker, microphone) without ever running
//! concurrently on the same user turn.

pub mod audio;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod queues;
pub mod runtime;
pub mod state;
pub mod vad;

pub use config::EdnaConfig;
pub use error::{EdnaError, Result};
pub use state::{PipelineEvent, PipelineState, StateMachine};
