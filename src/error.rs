//! Error types for the Edna pipeline.

use std::path::PathBuf;

/// Top-level error type for the voice assistant.
#[derive(Debug, thiserror::Error)]
pub enum EdnaError {
    /// Audio device or stream error.
    #[error("audio error: {0}")]
    Audio(String),

    /// Voice activity detection error.
    #[error("VAD error: {0}")]
    Vad(String),

    /// Speech-to-text transcription error.
    #[error("ASR error: {0}")]
    Asr(String),

    /// Language model inference error.
    #[error("LLM error: {0}")]
    Llm(String),

    /// Text-to-speech synthesis error.
    #[error("TTS error: {0}")]
    Tts(String),

    /// Required model file not found at the expected path.
    #[error("model not found: {0}")]
    ModelNotFound(PathBuf),

    /// Configuration error (missing/invalid environment variable or config file).
    #[error("config error: {0}")]
    Config(String),

    /// Pipeline coordination error (queue signaling, state machine misuse).
    #[error("pipeline error: {0}")]
    Pipeline(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Synthesis worker is unusable: spawn/handshake failure, broken pipe,
    /// or a response timeout. Fatal to the worker — callers disable it.
    #[error("synthesis worker error: {0}")]
    SynthesisWorker(String),

    /// A single synthesis request came back as an `ERR <diagnostic>` line.
    /// The worker itself is still alive; callers skip this chunk and keep
    /// using it for the rest of the reply and future turns.
    #[error("synthesis chunk failed: {0}")]
    SynthesisChunkFailed(String),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, EdnaError>;
