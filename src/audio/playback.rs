//! Loudspeaker playback: spawn the configured playback binary per WAV chunk
//! and block until it exits. The playback binary is an external, spawned
//! child process rather than an in-process audio sink — it blocks the
//! caller until playback completes.

use std::path::Path;
use std::process::Command;

use crate::error::{EdnaError, Result};

/// Spawn the playback binary against `device` for `wav_path`, and wait for
/// it to exit. A non-zero exit code is reported as an error but is not
/// fatal to the overall turn; the caller logs it and moves on to the next
/// chunk.
pub fn play_wav(playback_bin: &str, device: &str, wav_path: &Path) -> Result<()> {
    let status = Command::new(playback_bin)
        .arg("-D")
        .arg(device)
        .arg(wav_path)
        .status()
        .map_err(|e| EdnaError::Audio(format!("failed to spawn playback binary: {e}")))?;

    if status.success() {
        Ok(())
    } else {
        Err(EdnaError::Audio(format!(
            "playback of {} exited with {status}",
            wav_path.display()
        )))
    }
}
