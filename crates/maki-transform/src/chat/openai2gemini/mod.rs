//! Canonical ↔ Gemini-native upstreams (Gemini CLI): requests convert
//! OpenAI → Gemini, responses and stream chunks convert Gemini → OpenAI.

mod request;
mod response;
mod stream;

pub use request::request;
pub use response::response;
pub use stream::OpenAiFromGeminiStream;
