//! Pipeline message types, threaded between stages over the queues in
//! [`crate::queues`]. All derive `Debug, Clone` so they can be logged and
//! inspected directly in tests.

/// Text produced by the ASR stage, already trimmed. The sentinel
/// `"[BLANK_AUDIO]"` has already been normalized to empty by the time a
/// `Transcript` is constructed.
#[derive(Debug, Clone)]
pub struct Transcript(pub String);

/// A transcript with its leading invocation phrase stripped. Only
/// `Command`s enter the command queue.
#[derive(Debug, Clone)]
pub struct Command(pub String);

/// The LLM's reply text, trailing role-delimiter markers already removed.
#[derive(Debug, Clone)]
pub struct Reply(pub String);

/// A single fragment of a reply produced by the sentence splitter, ready for
/// synthesis.
#[derive(Debug, Clone)]
pub struct Sentence(pub String);
