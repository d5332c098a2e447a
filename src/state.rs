//! The pipeline state machine: single source of truth for pipeline phase.
//!
//! Expressed as a pure transition function `(state, event) -> (state, bool)`
//! wrapped by a thin, lockable `StateMachine` that notifies observers after
//! releasing its lock: a cheap, `Clone`-able, thread-safe handle shared
//! across every worker thread.

use std::fmt;
use std::sync::{Arc, Mutex};

/// Pipeline phase. Mutated only by [`StateMachine::dispatch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Boot,
    AwaitSpeech,
    CapturingSpeech,
    Transcribing,
    Thinking,
    Speaking,
    Error,
    Shutdown,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Boot => "Boot",
            Self::AwaitSpeech => "AwaitSpeech",
            Self::CapturingSpeech => "CapturingSpeech",
            Self::Transcribing => "Transcribing",
            Self::Thinking => "Thinking",
            Self::Speaking => "Speaking",
            Self::Error => "Error",
            Self::Shutdown => "Shutdown",
        };
        f.write_str(name)
    }
}

/// Events dispatched into the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineEvent {
    Start,
    SpeechStart,
    SpeechEndQueued,
    TranscriptReady,
    /// Carries a short human-readable reason (e.g. `"blank audio"`,
    /// `"ignored transcript"`, `"invocation only"`, `"empty reply"`).
    NoCommand(String),
    ReplyReady,
    TtsDone,
    Stop,
}

/// Pure transition function. Any `(state, event)` pair not listed here is a
/// no-op: returns the unchanged state and `false`.
fn transition(state: PipelineState, event: &PipelineEvent) -> (PipelineState, bool) {
    use PipelineEvent::{
        NoCommand, ReplyReady, SpeechEndQueued, SpeechStart, Start, Stop, TranscriptReady, TtsDone,
    };
    use PipelineState::{
        AwaitSpeech, Boot, CapturingSpeech, Error, Shutdown, Speaking, Thinking, Transcribing,
    };

    match (state, event) {
        (Boot, Start) => (AwaitSpeech, true),
        (Error, Start) => (AwaitSpeech, true),
        (AwaitSpeech, SpeechStart) => (CapturingSpeech, true),
        (CapturingSpeech, SpeechEndQueued) => (Transcribing, true),
        (Transcribing, TranscriptReady) => (Thinking, true),
        (Transcribing, NoCommand(_)) => (AwaitSpeech, true),
        (Thinking, ReplyReady) => (Speaking, true),
        (Thinking, NoCommand(_)) => (AwaitSpeech, true),
        (Speaking, TtsDone) => (AwaitSpeech, true),
        (_, Stop) => (Shutdown, true),
        _ => (state, false),
    }
}

/// Observer callback: `(from, to, event, note)`. Invoked after the state
/// lock is released — must never call back into [`StateMachine::dispatch`]
/// synchronously from within itself without releasing first (it won't
/// deadlock either way, since the lock is already free, but re-entrant
/// dispatch from inside an observer is discouraged as a matter of style).
type Observer = Box<dyn Fn(PipelineState, PipelineState, &PipelineEvent) + Send + Sync>;

/// Thread-safe handle to the pipeline's single source of truth for phase.
#[derive(Clone)]
pub struct StateMachine {
    state: Arc<Mutex<PipelineState>>,
    observers: Arc<Mutex<Vec<Observer>>>,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(PipelineState::Boot)),
            observers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Register an observer invoked after every transition (no-ops included
    /// are not reported — only `did_transition == true` notifies).
    pub fn on_transition<F>(&self, observer: F)
    where
        F: Fn(PipelineState, PipelineState, &PipelineEvent) + Send + Sync + 'static,
    {
        self.observers
            .lock()
            .expect("state machine observer list poisoned")
            .push(Box::new(observer));
    }

    /// Current phase. An atomic snapshot — callable from any thread.
    #[must_use]
    pub fn current(&self) -> PipelineState {
        *self.state.lock().expect("state machine lock poisoned")
    }

    /// Atomically reads the current state, looks up `(state, event)` in the
    /// transition table, and — if defined — updates the state and notifies
    /// observers *after* releasing the lock, so an observer can never
    /// re-enter this same lock.
    pub fn dispatch(&self, event: PipelineEvent) -> PipelineState {
        let (from, to, did_transition) = {
            let mut guard = self.state.lock().expect("state machine lock poisoned");
            let from = *guard;
            let (to, did_transition) = transition(from, &event);
            if did_transition {
                *guard = to;
            }
            (from, to, did_transition)
        };

        if did_transition {
            let observers = self
                .observers
                .lock()
                .expect("state machine observer list poisoned");
            for observer in observers.iter() {
                observer(from, to, &event);
            }
        }

        to
    }
}
