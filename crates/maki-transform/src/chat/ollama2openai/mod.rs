//! Ollama client ↔ canonical: `/api/chat` and `/api/generate` requests
//! convert Ollama → OpenAI; responses and chunks convert back as NDJSON
//! objects.

mod request;
mod response;
mod stream;

pub use request::{chat_request, generate_request};
pub use response::{chat_response, generate_response, iso_timestamp};
pub use stream::OllamaStreamEncoder;

/// Which Ollama endpoint shape the client expects back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OllamaMode {
    Chat,
    Generate,
}
