//! Claude client ↔ canonical: requests convert Claude → OpenAI, responses
//! and stream chunks convert OpenAI → Claude.

mod request;
mod response;
mod stream;

pub use request::request;
pub use response::response;
pub use stream::ClaudeStreamEncoder;
