//! Edna CLI entrypoint: a single executable with no flags.
//!
//! Wires together the three long-lived OS threads: the audio/VAD loop on
//! the main thread, a dedicated ASR worker, and a combined brain+speech
//! worker. Exit code 0 on normal SIGINT shutdown; 1 on fatal initialization
//! or audio-capture failure.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use edna::audio::AudioCapture;
use edna::config::EdnaConfig;
use edna::pipeline::asr::{AsrStage, WhisperTranscriber};
use edna::pipeline::brain::{Chatter, LlamaChatter};
use edna::pipeline::messages::Command;
use edna::pipeline::speech::{speak_reply, SpeechStage, SynthesisWorker};
use edna::queues::{CommandQueue, UtteranceQueue};
use edna::runtime::{self, RuntimeEvent};
use edna::state::{PipelineEvent, PipelineState, StateMachine};
use edna::vad::{SegmenterOutcome, Utterance, VadSegmenter, WebrtcVad};

const ANSI_CYAN: &str = "\x1b[36m";
const ANSI_GREEN: &str = "\x1b[32m";
const ANSI_RESET: &str = "\x1b[0m";

fn main() {
    init_tracing();

    let config = match EdnaConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("fatal: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = run(config) {
        eprintln!("fatal: {e}");
        std::process::exit(1);
    }
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
}

fn run(config: EdnaConfig) -> edna::Result<()> {
    let running = Arc::new(AtomicBool::new(true));
    {
        let running = Arc::clone(&running);
        ctrlc::set_handler(move || {
            running.store(false, Ordering::SeqCst);
        })
        .map_err(|e| edna::EdnaError::Config(format!("failed to install SIGINT handler: {e}")))?;
    }

    let state_machine = StateMachine::new();
    let (events_tx, events_rx) = runtime::channel();

    state_machine.on_transition({
        let events_tx = events_tx.clone();
        move |from, to, _event| {
            let _ = events_tx.send(RuntimeEvent::StateChanged { from, to });
        }
    });

    let printer = thread::spawn(move || print_runtime_events(events_rx));

    tracing::info!("loading ASR model");
    let transcriber = WhisperTranscriber::load(
        std::path::Path::new(&config.asr.model_path),
        &config.asr.language,
    )?;

    tracing::info!("loading LLM");
    let chatter = LlamaChatter::load(config.llm.clone())?;

    tracing::info!("starting synthesis worker");
    let worker = match SynthesisWorker::spawn(
        &config.tts.coqui_bin,
        &config.tts.model_name,
        config.tts.clone(),
    ) {
        Ok(worker) => Some(worker),
        Err(e) => {
            tracing::warn!(error = %e, "synthesis worker unavailable, replies will be printed only");
            None
        }
    };

    let utterances: Arc<UtteranceQueue<Utterance>> = Arc::new(UtteranceQueue::new());
    let commands: Arc<CommandQueue<Command>> = Arc::new(CommandQueue::new());

    let asr_handle = {
        let utterances = Arc::clone(&utterances);
        let commands = Arc::clone(&commands);
        let state_machine = state_machine.clone();
        let events_tx = events_tx.clone();
        let min_transcript_chars = config.asr.min_transcript_chars;
        thread::spawn(move || {
            let mut stage = AsrStage::new(transcriber, min_transcript_chars);
            stage.run(&utterances, &commands, &state_machine, &events_tx);
        })
    };

    let brain_handle = {
        let commands = Arc::clone(&commands);
        let state_machine = state_machine.clone();
        let events_tx = events_tx.clone();
        let soft_wrap_chars = config.tts.soft_wrap_chars;
        let playback_bin = config.tts.playback_bin.clone();
        let playback_device = config.tts.playback_device.clone();
        thread::spawn(move || {
            run_brain_and_speech(
                chatter,
                worker,
                &commands,
                &state_machine,
                &events_tx,
                soft_wrap_chars,
                playback_bin,
                playback_device,
            );
        })
    };

    state_machine.dispatch(PipelineEvent::Start);
    let result = run_audio_loop(&config, &running, &utterances, &state_machine);

    utterances.close();
    commands.close();
    state_machine.dispatch(PipelineEvent::Stop);

    let _ = asr_handle.join();
    let _ = brain_handle.join();
    drop(events_tx);
    let _ = printer.join();

    result
}

#[allow(clippy::too_many_arguments)]
fn run_brain_and_speech(
    mut chatter: impl Chatter,
    worker: Option<SynthesisWorker>,
    commands: &CommandQueue<Command>,
    state_machine: &StateMachine,
    events_tx: &edna::runtime::RuntimeSender,
    soft_wrap_chars: usize,
    playback_bin: String,
    playback_device: String,
) {
    let mut speech_stage = SpeechStage::new(worker, playback_bin, playback_device);

    while let Some(command) = commands.pop_blocking() {
        let reply = match chatter.reply(&command) {
            Ok(reply) => reply,
            Err(e) => {
                let _ = events_tx.send(RuntimeEvent::Error(format!("LLM failure: {e}")));
                edna::pipeline::messages::Reply("[LLM_DECODE_FAILED]".to_string())
            }
        };

        if reply.0.is_empty() {
            state_machine.dispatch(PipelineEvent::NoCommand("empty reply".to_string()));
            continue;
        }

        let _ = events_tx.send(RuntimeEvent::Reply(reply.0.clone()));
        state_machine.dispatch(PipelineEvent::ReplyReady);

        speak_reply(&mut speech_stage, &reply, soft_wrap_chars);

        state_machine.dispatch(PipelineEvent::TtsDone);
    }

    speech_stage.shutdown();
}

fn run_audio_loop(
    config: &EdnaConfig,
    running: &Arc<AtomicBool>,
    utterances: &UtteranceQueue<Utterance>,
    state_machine: &StateMachine,
) -> edna::Result<()> {
    let capture = AudioCapture::open(&config.audio.capture_device, config.audio.frame_samples())?;
    let mut detector = WebrtcVad::new(config.vad.aggressiveness)?;
    let mut segmenter = VadSegmenter::new(config.vad.clone(), config.audio.frame_ms);

    let mut consecutive_failures = 0;

    while running.load(Ordering::SeqCst) {
        let frame = match capture.read_frame() {
            Ok(frame) => {
                consecutive_failures = 0;
                frame
            }
            Err(e) => {
                consecutive_failures += 1;
                if consecutive_failures >= 2 {
                    capture.close();
                    return Err(e);
                }
                tracing::warn!(error = %e, "capture underrun, retrying once");
                continue;
            }
        };

        let is_speaking = state_machine.current() == PipelineState::Speaking;

        match segmenter.process_frame(frame, is_speaking, &mut detector)? {
            SegmenterOutcome::Gated => {
                utterances.clear();
            }
            SegmenterOutcome::SpeechStart => {
                state_machine.dispatch(PipelineEvent::SpeechStart);
            }
            SegmenterOutcome::SpeechEnd(utterance) => {
                state_machine.dispatch(PipelineEvent::SpeechEndQueued);
                utterances.replace(utterance);
            }
            SegmenterOutcome::SpeechEndTooShort => {
                state_machine.dispatch(PipelineEvent::SpeechEndQueued);
            }
            SegmenterOutcome::Idle | SegmenterOutcome::Accumulating => {}
        }
    }

    capture.close();
    Ok(())
}

fn print_runtime_events(rx: edna::runtime::RuntimeReceiver) {
    while let Ok(event) = rx.recv() {
        match event {
            RuntimeEvent::Transcript(text) => {
                println!("{ANSI_CYAN}ASR: {text}{ANSI_RESET}");
            }
            RuntimeEvent::Reply(text) => {
                println!("{ANSI_GREEN}EDNA: {text}{ANSI_RESET}");
            }
            RuntimeEvent::Error(message) => {
                tracing::error!("{message}");
            }
            RuntimeEvent::StateChanged { from, to } => {
                tracing::debug!(%from, %to, "state transition");
            }
            RuntimeEvent::Command(_) => {}
        }
    }
}
