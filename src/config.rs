//! Configuration for the voice pipeline.
//!
//! Required paths and device strings come from environment variables.
//! Everything else — VAD hysteresis, pre-roll length, sampler parameters,
//! prompt budgets — has a built-in default and can be overridden by an
//! optional TOML file at `$EDNA_TOP_DIR/edna.toml` (`serde`-derived,
//! `#[serde(default)]`, nested per-component sub-configs).

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{EdnaError, Result};

/// Top-level configuration for the voice pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EdnaConfig {
    pub audio: AudioConfig,
    pub vad: VadConfig,
    pub asr: AsrConfig,
    pub llm: LlmConfig,
    pub tts: TtsConfig,
}

impl Default for EdnaConfig {
    fn default() -> Self {
        Self {
            audio: AudioConfig::default(),
            vad: VadConfig::default(),
            asr: AsrConfig::default(),
            llm: LlmConfig::default(),
            tts: TtsConfig::default(),
        }
    }
}

impl EdnaConfig {
    /// Build the configuration from required environment variables, layering
    /// an optional `$EDNA_TOP_DIR/edna.toml` on top of the built-in default
    /// for every other tunable.
    ///
    /// # Errors
    ///
    /// Returns an error if a required environment variable is missing, or if
    /// a model file does not exist at its derived path.
    pub fn from_env() -> Result<Self> {
        let top_dir = required_env("EDNA_TOP_DIR")?;
        let top_dir = PathBuf::from(top_dir);

        let mut config = Self::load_overlay(&top_dir.join("edna.toml"));

        config.asr.model_path = top_dir
            .join("third_party/whisper.cpp/models/ggml-base.en.bin")
            .to_string_lossy()
            .into_owned();

        config.llm.model_path = find_llm_model(&top_dir)?;

        config.tts.coqui_bin = required_env("EDNA_TTS_COQUI_BIN")?;
        config.tts.model_name = required_env("EDNA_TTS_MODEL")?;
        config.tts.playback_device = required_env("EDNA_TTS_DEVICE")?;

        config.validate()?;
        Ok(config)
    }

    /// Load the optional TOML overlay, falling back to defaults if the file
    /// is absent or malformed (a malformed overlay is logged and ignored
    /// rather than treated as fatal init — it covers non-essential tuning
    /// knobs only).
    fn load_overlay(path: &Path) -> Self {
        let Ok(text) = std::fs::read_to_string(path) else {
            return Self::default();
        };
        match toml::from_str(&text) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "ignoring malformed edna.toml");
                Self::default()
            }
        }
    }

    fn validate(&self) -> Result<()> {
        if !Path::new(&self.asr.model_path).exists() {
            return Err(EdnaError::ModelNotFound(PathBuf::from(&self.asr.model_path)));
        }
        if !Path::new(&self.llm.model_path).exists() {
            return Err(EdnaError::ModelNotFound(PathBuf::from(&self.llm.model_path)));
        }
        Ok(())
    }
}

fn required_env(name: &str) -> Result<String> {
    std::env::var(name).map_err(|_| EdnaError::Config(format!("{name} is not set")))
}

/// Look for `EDNA_TOP_DIR/models/Qwen2.5-2B-Instruct.Q6_K.gguf`, falling
/// back to the first `.gguf` file under `models/` if the canonical name is
/// absent, so operators can swap in a different quantization without
/// touching the environment.
fn find_llm_model(top_dir: &Path) -> Result<String> {
    let canonical = top_dir.join("models/Qwen2.5-2B-Instruct.Q6_K.gguf");
    if canonical.exists() {
        return Ok(canonical.to_string_lossy().into_owned());
    }

    let models_dir = top_dir.join("models");
    let entries = std::fs::read_dir(&models_dir).map_err(|_| {
        EdnaError::ModelNotFound(canonical.clone())
    })?;

    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == "gguf") {
            return Ok(path.to_string_lossy().into_owned());
        }
    }

    Err(EdnaError::ModelNotFound(canonical))
}

/// Audio capture configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Capture device string (ALSA-style, e.g. `plughw:0,0`).
    pub capture_device: String,
    /// Sample rate in Hz. The pipeline is hard-coded for 16 kHz mono S16LE;
    /// this field exists for documentation/validation, not to vary it.
    pub sample_rate: u32,
    /// Frame duration in milliseconds (default 20 ms / 320 samples).
    pub frame_ms: u32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            capture_device: "plughw:0,0".to_string(),
            sample_rate: 16_000,
            frame_ms: 20,
        }
    }
}

impl AudioConfig {
    /// Frame size in samples at the configured rate/duration (320 @ 16kHz/20ms).
    #[must_use]
    pub fn frame_samples(&self) -> usize {
        (self.sample_rate as usize * self.frame_ms as usize) / 1000
    }
}

/// VAD segmenter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VadConfig {
    /// WebRTC VAD aggressiveness, 0-3 (default: level 2).
    pub aggressiveness: u8,
    /// Pre-roll ring length in frames (default: 15 frames / 300 ms).
    pub pre_roll_frames: usize,
    /// Consecutive voiced frames to trigger speech-start (default: 3 / 60 ms).
    pub start_trigger_frames: u32,
    /// Consecutive unvoiced frames to trigger speech-end (default: 20 / 400 ms).
    pub stop_trigger_frames: u32,
    /// Post-speaking cooldown in frames (default: ceil(600ms/20ms) = 30).
    pub cooldown_frames: u32,
    /// Minimum utterance duration in milliseconds (default: 200 ms).
    pub min_utterance_ms: u32,
    /// Maximum utterance duration in milliseconds (default: 10 s).
    pub max_utterance_ms: u32,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            aggressiveness: 2,
            pre_roll_frames: 15,
            start_trigger_frames: 3,
            stop_trigger_frames: 20,
            cooldown_frames: 30,
            min_utterance_ms: 200,
            max_utterance_ms: 10_000,
        }
    }
}

/// Speech-to-text configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AsrConfig {
    /// Path to the `ggml-base.en.bin` whisper.cpp model (derived from `EDNA_TOP_DIR`).
    #[serde(skip_serializing)]
    pub model_path: String,
    /// Language code passed to whisper.cpp (default: `"en"`).
    pub language: String,
    /// A transcript shorter than this many characters is treated as blank.
    pub min_transcript_chars: usize,
}

impl Default for AsrConfig {
    fn default() -> Self {
        Self {
            model_path: String::new(),
            language: "en".to_string(),
            min_transcript_chars: 2,
        }
    }
}

/// Language model configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Path to the GGUF model (derived from `EDNA_TOP_DIR`).
    #[serde(skip_serializing)]
    pub model_path: String,
    /// System prompt prepended to every turn. Each turn is stateless: no
    /// conversational history carries over to the next.
    pub system_prompt: String,
    /// Maximum prompt tokens before truncating to the tail (default: 384).
    pub max_prompt_tokens: usize,
    /// Maximum new tokens to generate (default: 96).
    pub max_new_tokens: usize,
    /// Stop generation on the first newline (default: true).
    pub stop_on_newline: bool,
    /// Sampler chain parameters: temperature, top-k, top-p, and a fixed seed.
    pub temperature: f32,
    pub top_k: i32,
    pub top_p: f32,
    pub seed: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model_path: String::new(),
            system_prompt: "You are Edna, a concise voice assistant. Answer in 1-2 sentences."
                .to_string(),
            max_prompt_tokens: 384,
            max_new_tokens: 96,
            stop_on_newline: true,
            temperature: 0.7,
            top_k: 40,
            top_p: 0.9,
            seed: 0xC0FFEE,
        }
    }
}

/// Text-to-speech configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TtsConfig {
    /// Path to the synthesis worker binary (`EDNA_TTS_COQUI_BIN`).
    #[serde(skip_serializing)]
    pub coqui_bin: String,
    /// Synthesis model name (`EDNA_TTS_MODEL`).
    #[serde(skip_serializing)]
    pub model_name: String,
    /// Playback device string (`EDNA_TTS_DEVICE`), e.g. `plughw:CARD=V3,DEV=0`.
    #[serde(skip_serializing)]
    pub playback_device: String,
    /// Playback binary spawned per WAV chunk; it blocks until playback
    /// completes. Not covered by a required environment variable; defaults
    /// to the standard ALSA playback utility and can be overridden via the
    /// TOML overlay.
    pub playback_bin: String,
    /// Handshake timeout for the synthesis worker's `READY` line, in seconds
    /// (default: 10 s).
    pub handshake_timeout_secs: u64,
    /// Per-request synthesis timeout, in seconds (default: 30 s).
    pub request_timeout_secs: u64,
    /// Shutdown grace period before sending a terminal signal, in
    /// milliseconds (default: 200 ms).
    pub shutdown_grace_ms: u64,
    /// Soft-wrap width for a single oversized sentence, in characters
    /// (default: 180).
    pub soft_wrap_chars: usize,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            coqui_bin: String::new(),
            model_name: String::new(),
            playback_device: String::new(),
            playback_bin: "aplay".to_string(),
            handshake_timeout_secs: 10,
            request_timeout_secs: 30,
            shutdown_grace_ms: 200,
            soft_wrap_chars: 180,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_constants() {
        let config = EdnaConfig::default();
        assert_eq!(config.vad.aggressiveness, 2);
        assert_eq!(config.vad.pre_roll_frames, 15);
        assert_eq!(config.vad.start_trigger_frames, 3);
        assert_eq!(config.vad.stop_trigger_frames, 20);
        assert_eq!(config.vad.cooldown_frames, 30);
        assert_eq!(config.llm.max_prompt_tokens, 384);
        assert_eq!(config.llm.seed, 0xC0FFEE);
        assert_eq!(config.tts.soft_wrap_chars, 180);
    }

    #[test]
    fn frame_samples_is_320_at_defaults() {
        let config = AudioConfig::default();
        assert_eq!(config.frame_samples(), 320);
    }

    #[test]
    fn overlay_falls_back_to_defaults_when_file_missing() {
        let config = EdnaConfig::load_overlay(Path::new("/nonexistent/edna.toml"));
        assert_eq!(config.vad.aggressiveness, 2);
    }
}
