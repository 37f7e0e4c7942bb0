//! Gemini client ↔ canonical: requests convert Gemini → OpenAI, responses
//! and stream chunks convert OpenAI → Gemini.

mod request;
mod response;
mod stream;

pub use request::request;
pub use response::response;
pub use stream::GeminiStreamEncoder;
