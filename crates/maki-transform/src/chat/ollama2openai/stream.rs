use maki_protocol::{ollama, openai};
use serde_json::Value;

use super::OllamaMode;
use super::response::{done_reason, iso_timestamp};

/// Re-emits canonical OpenAI chunks as Ollama NDJSON objects. The final
/// object carries `done: true` plus the eval counters.
#[derive(Debug)]
pub struct OllamaStreamEncoder {
    mode: OllamaMode,
    model: String,
    finish: Option<openai::FinishReason>,
    usage: Option<openai::Usage>,
}

impl OllamaStreamEncoder {
    pub fn new(mode: OllamaMode) -> Self {
        Self {
            mode,
            model: String::new(),
            finish: None,
            usage: None,
        }
    }

    pub fn push(&mut self, chunk: &openai::ChatCompletionChunk) -> Vec<Value> {
        if self.model.is_empty() {
            self.model = chunk.model.clone();
        }
        if let Some(usage) = &chunk.usage {
            self.usage = Some(usage.clone());
        }

        let mut out = Vec::new();
        if let Some(choice) = chunk.choices.first() {
            if let Some(text) = &choice.delta.content
                && !text.is_empty()
            {
                out.push(self.delta_object(text, chunk.created));
            }
            if let Some(reason) = choice.finish_reason {
                self.finish = Some(reason);
            }
        }
        out
    }

    pub fn finish(&mut self, created: i64) -> Vec<Value> {
        let reason = self
            .finish
            .take()
            .map(|r| done_reason(r).to_string())
            .unwrap_or_else(|| "stop".to_string());
        let usage = self.usage.take();
        let object = match self.mode {
            OllamaMode::Chat => serde_json::to_value(ollama::ChatResponse {
                model: self.model.clone(),
                created_at: iso_timestamp(created),
                message: Some(ollama::ChatMessage {
                    role: "assistant".to_string(),
                    content: String::new(),
                    images: None,
                }),
                done: true,
                done_reason: Some(reason),
                prompt_eval_count: usage.as_ref().map(|u| u.prompt_tokens),
                eval_count: usage.as_ref().map(|u| u.completion_tokens),
            }),
            OllamaMode::Generate => serde_json::to_value(ollama::GenerateResponse {
                model: self.model.clone(),
                created_at: iso_timestamp(created),
                response: String::new(),
                done: true,
                done_reason: Some(reason),
                prompt_eval_count: usage.as_ref().map(|u| u.prompt_tokens),
                eval_count: usage.as_ref().map(|u| u.completion_tokens),
            }),
        };
        vec![object.unwrap_or(Value::Null)]
    }

    fn delta_object(&self, text: &str, created: i64) -> Value {
        let object = match self.mode {
            OllamaMode::Chat => serde_json::to_value(ollama::ChatResponse {
                model: self.model.clone(),
                created_at: iso_timestamp(created),
                message: Some(ollama::ChatMessage {
                    role: "assistant".to_string(),
                    content: text.to_string(),
                    images: None,
                }),
                done: false,
                done_reason: None,
                prompt_eval_count: None,
                eval_count: None,
            }),
            OllamaMode::Generate => serde_json::to_value(ollama::GenerateResponse {
                model: self.model.clone(),
                created_at: iso_timestamp(created),
                response: text.to_string(),
                done: false,
                done_reason: None,
                prompt_eval_count: None,
                eval_count: None,
            }),
        };
        object.unwrap_or(Value::Null)
    }
}
