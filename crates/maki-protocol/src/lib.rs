pub mod claude;
pub mod gemini;
pub mod ollama;
pub mod openai;
pub mod sse;

use serde::{Deserialize, Serialize};

/// Chat protocol family. OpenAI Chat Completions is the canonical pivot used
/// by the transform mesh; every other family converts through it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Proto {
    OpenAi,
    Claude,
    Gemini,
    Ollama,
}

impl Proto {
    pub fn as_str(&self) -> &'static str {
        match self {
            Proto::OpenAi => "openai",
            Proto::Claude => "claude",
            Proto::Gemini => "gemini",
            Proto::Ollama => "ollama",
        }
    }
}
