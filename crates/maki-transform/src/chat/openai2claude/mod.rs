//! Canonical ↔ Claude-native upstreams (Kiro): requests convert OpenAI →
//! Claude, responses and stream events convert Claude → OpenAI.

mod request;
mod response;
mod stream;

pub use request::request;
pub use response::response;
pub use stream::OpenAiStreamDecoder;
