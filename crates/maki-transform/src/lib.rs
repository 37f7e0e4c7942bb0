//! Converter mesh between chat protocol families.
//!
//! OpenAI Chat Completions is the canonical pivot: inbound requests are
//! normalised to it, upstream-native responses are normalised back, and the
//! client-facing shape is produced from the canonical form. Each `chat::*`
//! module owns one direction pair and is named after its request direction
//! (`claude2openai` converts Claude requests to canonical and canonical
//! responses back to Claude).

pub mod chat;
pub mod error;
pub mod frame;
pub mod models;

pub use error::{error_body, terminal_error_frames};
