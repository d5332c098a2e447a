//! Ambient observability events, separate from the state machine's own
//! observer callback: every stage emits a lightweight event over an
//! unbounded channel so a CLI printer (or, eventually, a UI) can follow
//! along without coupling to pipeline internals.

use std::sync::mpsc;

use crate::state::PipelineState;

/// An observability event. Carries only what a listener needs to render
/// progress; never consumed by pipeline logic itself.
#[derive(Debug, Clone)]
pub enum RuntimeEvent {
    StateChanged {
        from: PipelineState,
        to: PipelineState,
    },
    Transcript(String),
    Command(String),
    Reply(String),
    Error(String),
}

/// Sending half, cloned into each worker thread.
pub type RuntimeSender = mpsc::Sender<RuntimeEvent>;

/// Receiving half, held by the CLI's printer loop.
pub type RuntimeReceiver = mpsc::Receiver<RuntimeEvent>;

/// Create a fresh, unbounded runtime event channel.
#[must_use]
pub fn channel() -> (RuntimeSender, RuntimeReceiver) {
    mpsc::channel()
}
