use std::collections::BTreeMap;

use maki_protocol::{gemini, openai};
use serde_json::Value;

use super::response::finish_to_gemini;

/// Re-emits canonical OpenAI chunks as Gemini stream elements. Text deltas
/// pass straight through; tool calls are atomic in Gemini, so argument
/// fragments are buffered and surfaced as whole `functionCall` parts once
/// the upstream signals completion.
#[derive(Debug, Default)]
pub struct GeminiStreamEncoder {
    model: String,
    /// OpenAI tool-call index → (name, accumulated argument JSON).
    pending_tools: BTreeMap<u32, (String, String)>,
    finish: Option<gemini::FinishReason>,
    usage: Option<openai::Usage>,
}

impl GeminiStreamEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &openai::ChatCompletionChunk) -> Vec<gemini::GenerateContentResponse> {
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
                out.push(self.element(vec![gemini::Part::text(text.clone())], None));
            }
            for call in choice.delta.tool_calls.iter().flatten() {
                let entry = self
                    .pending_tools
                    .entry(call.index)
                    .or_insert_with(|| (String::new(), String::new()));
                if let Some(name) = call.function.as_ref().and_then(|f| f.name.clone()) {
                    entry.0 = name;
                }
                if let Some(args) = call.function.as_ref().and_then(|f| f.arguments.clone()) {
                    entry.1.push_str(&args);
                }
            }
            if let Some(reason) = choice.finish_reason {
                self.finish = Some(finish_to_gemini(reason));
            }
        }
        out
    }

    /// Emit buffered tool calls and the terminal element carrying the finish
    /// reason and usage.
    pub fn finish(&mut self) -> Vec<gemini::GenerateContentResponse> {
        let mut parts = Vec::new();
        for (_, (name, args)) in std::mem::take(&mut self.pending_tools) {
            parts.push(gemini::Part {
                function_call: Some(gemini::FunctionCall {
                    name,
                    args: serde_json::from_str::<Value>(&args).unwrap_or(Value::Null),
                }),
                ..gemini::Part::default()
            });
        }
        let finish = self.finish.take().unwrap_or(gemini::FinishReason::Stop);
        let mut terminal = self.element(parts, Some(finish));
        terminal.usage_metadata = self.usage.take().map(|u| gemini::UsageMetadata {
            prompt_token_count: u.prompt_tokens,
            candidates_token_count: u.completion_tokens,
            total_token_count: u.total_tokens,
        });
        vec![terminal]
    }

    fn element(
        &self,
        parts: Vec<gemini::Part>,
        finish_reason: Option<gemini::FinishReason>,
    ) -> gemini::GenerateContentResponse {
        gemini::GenerateContentResponse {
            candidates: vec![gemini::Candidate {
                content: gemini::Content {
                    role: Some("model".to_string()),
                    parts,
                },
                finish_reason,
                index: Some(0),
            }],
            usage_metadata: None,
            model_version: Some(self.model.clone()),
        }
    }
}
