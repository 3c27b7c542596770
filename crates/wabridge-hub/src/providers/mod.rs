pub mod openai;
pub mod responder;
pub mod transcribe;

pub use openai::OpenAiProvider;
pub use responder::Responder;
pub use transcribe::{OpenAiTranscriber, Transcriber};
