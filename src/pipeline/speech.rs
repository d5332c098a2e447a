//! Speech stage: splits a reply into sentences, synthesizes and plays each
//! in turn. Runs inline on the brain worker's thread right after a reply is
//! produced, rather than on a dedicated thread of its own.

use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, Command as ProcessCommand, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Mutex;
use std::time::Duration;

use crate::audio::play_wav;
use crate::config::TtsConfig;
use crate::error::{EdnaError, Result};
use crate::pipeline::messages::{Reply, Sentence};

/// Opaque neural speech synthesizer: maps text to played audio. A stub
/// implementation lets tests assert chunking and playback counts without a
/// real synthesis subprocess.
pub trait Speaker: Send {
    /// Speak one sentence. Failure is per-chunk — callers log the error and
    /// move on rather than faulting the whole turn.
    fn speak(&mut self, sentence: &Sentence) -> Result<()>;
}

/// Walk `reply`, emitting a fragment each time `.`, `!`, or `?` is followed
/// by whitespace or end-of-input. Trims each fragment; drops empties. If
/// only one fragment results and it exceeds `soft_wrap_chars`, soft-wrap it
/// at whitespace at or before every `soft_wrap_chars`th character.
///
/// A pure function, trivially testable in isolation.
#[must_use]
pub fn split_sentences(reply: &str, soft_wrap_chars: usize) -> Vec<Sentence> {
    let chars: Vec<char> = reply.chars().collect();
    let mut fragments = Vec::new();
    let mut start = 0;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c == '.' || c == '!' || c == '?' {
            let next_is_boundary = i + 1 == chars.len() || chars[i + 1].is_whitespace();
            if next_is_boundary {
                let fragment: String = chars[start..=i].iter().collect();
                push_trimmed(&mut fragments, &fragment);
                start = i + 1;
            }
        }
        i += 1;
    }
    if start < chars.len() {
        let fragment: String = chars[start..].iter().collect();
        push_trimmed(&mut fragments, &fragment);
    }

    if fragments.len() == 1 && fragments[0].chars().count() > soft_wrap_chars {
        return soft_wrap(&fragments[0], soft_wrap_chars)
            .into_iter()
            .map(Sentence)
            .collect();
    }

    fragments.into_iter().map(Sentence).collect()
}

fn push_trimmed(fragments: &mut Vec<String>, fragment: &str) {
    let trimmed = fragment.trim();
    if !trimmed.is_empty() {
        fragments.push(trimmed.to_string());
    }
}

fn soft_wrap(text: &str, width: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= width {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut start = 0;
    while start < chars.len() {
        let ideal_end = (start + width).min(chars.len());
        if ideal_end == chars.len() {
            let chunk: String = chars[start..].iter().collect();
            chunks.push(chunk.trim().to_string());
            break;
        }
        let mut split_at = ideal_end;
        while split_at > start && !chars[split_at].is_whitespace() {
            split_at -= 1;
        }
        if split_at == start {
            split_at = ideal_end; // no whitespace in range; hard cut
        }
        let chunk: String = chars[start..split_at].iter().collect();
        chunks.push(chunk.trim().to_string());
        start = split_at;
    }
    chunks.into_iter().filter(|c| !c.is_empty()).collect()
}

/// Long-lived synthesis subprocess driven by a line-delimited protocol:
/// one text line in, one WAV path (or `ERR <message>`) line out. Confines
/// the child's exclusive stdin/stdout behind a narrow request/response
/// interface rather than letting callers touch the pipes directly.
///
/// `BufRead::read_line` has no timeout of its own, so a stdout reader thread
/// owns the blocking read loop and forwards each line over a channel — the
/// same "confine a blocking resource behind a channel, let the caller block
/// on `recv_timeout`" idiom used for microphone capture in `audio/capture.rs`.
/// This is what actually lets the handshake/request timeouts in the protocol
/// fire against a subprocess that never writes anything, rather than only
/// against one that writes garbage.
pub struct SynthesisWorker {
    child: Mutex<Option<Child>>,
    lines: mpsc::Receiver<String>,
    disabled: Mutex<bool>,
    request_timeout: Duration,
    shutdown_grace_ms: u64,
}

impl SynthesisWorker {
    /// Spawn the subprocess and wait for its `READY` handshake.
    ///
    /// # Errors
    ///
    /// Returns [`EdnaError::SynthesisWorker`] if the subprocess cannot be
    /// spawned, or if `READY` does not arrive within
    /// `config.handshake_timeout_secs`.
    pub fn spawn(coqui_bin: &str, model_name: &str, config: TtsConfig) -> Result<Self> {
        let mut child = ProcessCommand::new(coqui_bin)
            .arg(model_name)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| EdnaError::SynthesisWorker(format!("failed to spawn: {e}")))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| EdnaError::SynthesisWorker("no stdout pipe".to_string()))?;

        let (tx, lines) = mpsc::channel();
        std::thread::spawn(move || {
            let mut reader = BufReader::new(stdout);
            let mut line = String::new();
            loop {
                line.clear();
                match reader.read_line(&mut line) {
                    Ok(0) | Err(_) => return,
                    Ok(_) => {
                        if tx.send(line.trim_end_matches(['\n', '\r']).to_string()).is_err() {
                            return;
                        }
                    }
                }
            }
        });

        let handshake = lines
            .recv_timeout(Duration::from_secs(config.handshake_timeout_secs))
            .map_err(|e| match e {
                RecvTimeoutError::Timeout => {
                    EdnaError::SynthesisWorker("timed out waiting for READY handshake".to_string())
                }
                RecvTimeoutError::Disconnected => {
                    EdnaError::SynthesisWorker("subprocess exited before READY".to_string())
                }
            })?;
        if handshake != "READY" {
            return Err(EdnaError::SynthesisWorker(format!(
                "expected READY handshake, got: {handshake}"
            )));
        }

        Ok(Self {
            child: Mutex::new(Some(child)),
            lines,
            disabled: Mutex::new(false),
            request_timeout: Duration::from_secs(config.request_timeout_secs),
            shutdown_grace_ms: config.shutdown_grace_ms,
        })
    }

    #[must_use]
    pub fn is_disabled(&self) -> bool {
        *self.disabled.lock().expect("synthesis worker mutex poisoned")
    }

    fn disable(&self) {
        *self.disabled.lock().expect("synthesis worker mutex poisoned") = true;
    }

    /// Send one request, get back a WAV path. Guarded by a mutex covering
    /// start/stop/request-write/response-read, but released before the
    /// playback child is spawned.
    fn synthesize(&self, text: &str) -> Result<PathBuf> {
        if self.is_disabled() {
            return Err(EdnaError::SynthesisWorker("worker disabled".to_string()));
        }

        let mut guard = self.child.lock().expect("synthesis worker mutex poisoned");
        let child = guard
            .as_mut()
            .ok_or_else(|| EdnaError::SynthesisWorker("worker not running".to_string()))?;

        let stdin = child
            .stdin
            .as_mut()
            .ok_or_else(|| EdnaError::SynthesisWorker("no stdin pipe".to_string()))?;
        writeln!(stdin, "{text}")
            .map_err(|e| EdnaError::SynthesisWorker(format!("write failed: {e}")))?;
        stdin
            .flush()
            .map_err(|e| EdnaError::SynthesisWorker(format!("flush failed: {e}")))?;

        let line = self.lines.recv_timeout(self.request_timeout).map_err(|e| {
            match e {
                RecvTimeoutError::Timeout => {
                    EdnaError::SynthesisWorker("timed out waiting for synthesis response".to_string())
                }
                RecvTimeoutError::Disconnected => {
                    EdnaError::SynthesisWorker("synthesis subprocess pipe closed".to_string())
                }
            }
        })?;

        if let Some(diagnostic) = line.strip_prefix("ERR ") {
            return Err(EdnaError::SynthesisChunkFailed(diagnostic.trim().to_string()));
        }
        Ok(PathBuf::from(line.trim()))
    }

    /// Writes `__quit__`, closes stdin, waits out the configured grace
    /// period, then kills the child if it hasn't exited on its own.
    pub fn shutdown(&self) {
        let mut guard = self.child.lock().expect("synthesis worker mutex poisoned");
        let Some(mut child) = guard.take() else {
            return;
        };

        if let Some(mut stdin) = child.stdin.take() {
            let _ = writeln!(stdin, "__quit__");
        }
        drop(child.stdin.take());

        std::thread::sleep(Duration::from_millis(self.shutdown_grace_ms));

        match child.try_wait() {
            Ok(Some(_)) => {}
            _ => {
                let _ = child.kill();
                let _ = child.wait();
            }
        }
    }
}

/// Drives the synthesis worker and playback binary for a full reply.
pub struct SpeechStage {
    worker: Option<SynthesisWorker>,
    playback_bin: String,
    playback_device: String,
}

impl SpeechStage {
    #[must_use]
    pub fn new(worker: Option<SynthesisWorker>, playback_bin: String, playback_device: String) -> Self {
        Self {
            worker,
            playback_bin,
            playback_device,
        }
    }

    /// Shut down the underlying synthesis subprocess, if one is running.
    pub fn shutdown(&self) {
        if let Some(worker) = self.worker.as_ref() {
            worker.shutdown();
        }
    }
}

/// `true` for a failure that means the worker process itself is unusable
/// (spawn/handshake/write/flush/timeout/pipe-disconnect); `false` for a
/// per-request `ERR` line, which leaves the worker alive for the rest of
/// the reply and future turns. Kept as a pure, directly-unit-testable
/// function per spec.md §7's split between per-turn synthesis failure and
/// synthesis worker death.
#[must_use]
fn is_worker_fatal(err: &EdnaError) -> bool {
    !matches!(err, EdnaError::SynthesisChunkFailed(_))
}

impl Speaker for SpeechStage {
    fn speak(&mut self, sentence: &Sentence) -> Result<()> {
        let Some(worker) = self.worker.as_ref() else {
            tracing::info!(text = %sentence.0, "synthesis disabled, printing only");
            return Ok(());
        };

        let wav_path = match worker.synthesize(&sentence.0) {
            Ok(path) => path,
            Err(e) if is_worker_fatal(&e) => {
                tracing::warn!(error = %e, "synthesis worker unusable, disabling");
                worker.disable();
                self.worker = None;
                return Err(e);
            }
            Err(e) => {
                tracing::warn!(error = %e, "synthesis chunk failed, skipping");
                return Err(e);
            }
        };

        play_wav(&self.playback_bin, &self.playback_device, &wav_path)
    }
}

/// Split `reply` into sentences and speak each in order, logging and
/// continuing past any per-chunk failure.
pub fn speak_reply(speaker: &mut dyn Speaker, reply: &Reply, soft_wrap_chars: usize) {
    for sentence in split_sentences(&reply.0, soft_wrap_chars) {
        if let Err(e) = speaker.speak(&sentence) {
            tracing::warn!(error = %e, "speech chunk failed, continuing");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_sentence_terminators() {
        let sentences = split_sentences("The sky is blue. Usually.", 180);
        let texts: Vec<_> = sentences.into_iter().map(|s| s.0).collect();
        assert_eq!(texts, vec!["The sky is blue.", "Usually."]);
    }

    #[test]
    fn terminator_without_trailing_space_is_not_a_boundary() {
        let sentences = split_sentences("3.14 is pi", 180);
        let texts: Vec<_> = sentences.into_iter().map(|s| s.0).collect();
        assert_eq!(texts, vec!["3.14 is pi"]);
    }

    #[test]
    fn single_long_fragment_is_soft_wrapped() {
        let long = "word ".repeat(50); // 250 chars, no terminators
        let sentences = split_sentences(long.trim(), 180);
        assert!(sentences.len() >= 2);
        for s in &sentences {
            assert!(s.0.chars().count() <= 180);
        }
    }

    #[test]
    fn empty_fragments_are_dropped() {
        let sentences = split_sentences("Hello!   How are you?", 180);
        let texts: Vec<_> = sentences.into_iter().map(|s| s.0).collect();
        assert_eq!(texts, vec!["Hello!", "How are you?"]);
    }

    #[test]
    fn chunk_error_is_not_worker_fatal() {
        let err = EdnaError::SynthesisChunkFailed("synthesis backend OOM".to_string());
        assert!(!is_worker_fatal(&err));
    }

    #[test]
    fn pipe_and_timeout_errors_are_worker_fatal() {
        assert!(is_worker_fatal(&EdnaError::SynthesisWorker(
            "timed out waiting for synthesis response".to_string()
        )));
        assert!(is_worker_fatal(&EdnaError::SynthesisWorker(
            "synthesis subprocess pipe closed".to_string()
        )));
        assert!(is_worker_fatal(&EdnaError::SynthesisWorker(
            "write failed".to_string()
        )));
    }

    struct CountingSpeaker {
        calls: Vec<String>,
        fail_on: Option<usize>,
    }

    impl Speaker for CountingSpeaker {
        fn speak(&mut self, sentence: &Sentence) -> Result<()> {
            let idx = self.calls.len();
            self.calls.push(sentence.0.clone());
            if self.fail_on == Some(idx) {
                return Err(EdnaError::Tts("stub failure".to_string()));
            }
            Ok(())
        }
    }

    #[test]
    fn full_turn_speaks_both_chunks() {
        let mut speaker = CountingSpeaker {
            calls: Vec::new(),
            fail_on: None,
        };
        let reply = Reply("The sky is blue. Usually.".to_string());
        speak_reply(&mut speaker, &reply, 180);
        assert_eq!(speaker.calls, vec!["The sky is blue.", "Usually."]);
    }

    #[test]
    fn failure_on_one_chunk_does_not_stop_the_rest() {
        let mut speaker = CountingSpeaker {
            calls: Vec::new(),
            fail_on: Some(0),
        };
        let reply = Reply("First. Second.".to_string());
        speak_reply(&mut speaker, &reply, 180);
        assert_eq!(speaker.calls, vec!["First.", "Second."]);
    }
}
