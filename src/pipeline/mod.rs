//! The three worker stages (ASR, Brain, Speech) and the message types that
//! flow between them.

pub mod asr;
pub mod brain;
pub mod invocation;
pub mod messages;
pub mod speech;

pub use asr::{AsrStage, Transcriber};
pub use brain::{Chatter, LlamaChatter};
pub use messages::{Command, Reply, Sentence, Transcript};
pub use speech::{Speaker, SpeechStage};
