use maki_protocol::{gemini, openai};

use super::response::gemini_finish_to_openai;

/// Re-emits Gemini stream elements as canonical OpenAI chunks. Gemini tool
/// calls arrive whole, so each becomes one fully-populated tool-call delta.
#[derive(Debug)]
pub struct OpenAiFromGeminiStream {
    id: String,
    model: String,
    created: i64,
    role_sent: bool,
    next_tool: u32,
}

impl OpenAiFromGeminiStream {
    pub fn new(id: impl Into<String>, model: impl Into<String>, created: i64) -> Self {
        Self {
            id: id.into(),
            model: model.into(),
            created,
            role_sent: false,
            next_tool: 0,
        }
    }

    pub fn push(
        &mut self,
        element: gemini::GenerateContentResponse,
    ) -> Vec<openai::ChatCompletionChunk> {
        let mut out = Vec::new();

        if !self.role_sent {
            self.role_sent = true;
            out.push(self.chunk(
                openai::Delta {
                    role: Some(openai::Role::Assistant),
                    ..openai::Delta::default()
                },
                None,
                None,
            ));
        }

        let usage = element.usage_metadata.map(|u| openai::Usage {
            prompt_tokens: u.prompt_token_count,
            completion_tokens: u.candidates_token_count,
            total_tokens: u.total_token_count,
        });

        let Some(candidate) = element.candidates.into_iter().next() else {
            return out;
        };

        let mut saw_tool = false;
        for part in candidate.content.parts {
            if let Some(text) = part.text
                && !text.is_empty()
            {
                out.push(self.chunk(
                    openai::Delta {
                        content: Some(text),
                        ..openai::Delta::default()
                    },
                    None,
                    None,
                ));
            }
            if let Some(call) = part.function_call {
                saw_tool = true;
                let index = self.next_tool;
                self.next_tool += 1;
                out.push(self.chunk(
                    openai::Delta {
                        tool_calls: Some(vec![openai::ToolCallDelta {
                            index,
                            id: Some(format!("call_{index}")),
                            kind: Some("function".to_string()),
                            function: Some(openai::FunctionCallDelta {
                                name: Some(call.name),
                                arguments: Some(call.args.to_string()),
                            }),
                        }]),
                        ..openai::Delta::default()
                    },
                    None,
                    None,
                ));
            }
        }

        if let Some(reason) = candidate.finish_reason {
            let finish = if saw_tool {
                openai::FinishReason::ToolCalls
            } else {
                gemini_finish_to_openai(reason)
            };
            out.push(self.chunk(openai::Delta::default(), Some(finish), usage));
        }

        out
    }

    fn chunk(
        &self,
        delta: openai::Delta,
        finish_reason: Option<openai::FinishReason>,
        usage: Option<openai::Usage>,
    ) -> openai::ChatCompletionChunk {
        openai::ChatCompletionChunk {
            id: self.id.clone(),
            object: "chat.completion.chunk".to_string(),
            created: self.created,
            model: self.model.clone(),
            choices: vec![openai::ChunkChoice {
                index: 0,
                delta,
                finish_reason,
            }],
            usage,
        }
    }
}
