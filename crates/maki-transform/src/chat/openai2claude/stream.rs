use std::collections::BTreeMap;

use maki_protocol::{claude, openai};

use crate::chat::claude_stop_to_openai;

/// Re-emits Anthropic stream events as canonical OpenAI chunks.
#[derive(Debug)]
pub struct OpenAiStreamDecoder {
    id: String,
    model: String,
    created: i64,
    /// Claude content-block index → OpenAI tool-call index.
    tool_indexes: BTreeMap<u32, u32>,
    next_tool: u32,
    input_tokens: u64,
}

impl OpenAiStreamDecoder {
    pub fn new(created: i64) -> Self {
        Self {
            id: "chatcmpl-unknown".to_string(),
            model: "unknown".to_string(),
            created,
            tool_indexes: BTreeMap::new(),
            next_tool: 0,
            input_tokens: 0,
        }
    }

    pub fn push(&mut self, event: claude::StreamEvent) -> Vec<openai::ChatCompletionChunk> {
        match event {
            claude::StreamEvent::MessageStart { message } => {
                self.id = message.id;
                self.model = message.model;
                self.input_tokens = message.usage.input_tokens;
                vec![self.chunk(
                    openai::Delta {
                        role: Some(openai::Role::Assistant),
                        ..openai::Delta::default()
                    },
                    None,
                    None,
                )]
            }
            claude::StreamEvent::ContentBlockStart {
                index,
                content_block,
            } => match content_block {
                claude::ContentBlock::ToolUse { id, name, .. } => {
                    let tool_index = self.next_tool;
                    self.next_tool += 1;
                    self.tool_indexes.insert(index, tool_index);
                    vec![self.chunk(
                        openai::Delta {
                            tool_calls: Some(vec![openai::ToolCallDelta {
                                index: tool_index,
                                id: Some(id),
                                kind: Some("function".to_string()),
                                function: Some(openai::FunctionCallDelta {
                                    name: Some(name),
                                    arguments: Some(String::new()),
                                }),
                            }]),
                            ..openai::Delta::default()
                        },
                        None,
                        None,
                    )]
                }
                _ => Vec::new(),
            },
            claude::StreamEvent::ContentBlockDelta { index, delta } => match delta {
                claude::BlockDelta::TextDelta { text } => vec![self.chunk(
                    openai::Delta {
                        content: Some(text),
                        ..openai::Delta::default()
                    },
                    None,
                    None,
                )],
                claude::BlockDelta::InputJsonDelta { partial_json } => {
                    let Some(tool_index) = self.tool_indexes.get(&index).copied() else {
                        return Vec::new();
                    };
                    vec![self.chunk(
                        openai::Delta {
                            tool_calls: Some(vec![openai::ToolCallDelta {
                                index: tool_index,
                                id: None,
                                kind: None,
                                function: Some(openai::FunctionCallDelta {
                                    name: None,
                                    arguments: Some(partial_json),
                                }),
                            }]),
                            ..openai::Delta::default()
                        },
                        None,
                        None,
                    )]
                }
                claude::BlockDelta::ThinkingDelta { .. } => Vec::new(),
            },
            claude::StreamEvent::MessageDelta { delta, usage } => {
                let finish = delta.stop_reason.map(claude_stop_to_openai);
                let usage = usage.map(|u| openai::Usage {
                    prompt_tokens: self.input_tokens,
                    completion_tokens: u.output_tokens,
                    total_tokens: self.input_tokens + u.output_tokens,
                });
                vec![self.chunk(openai::Delta::default(), finish, usage)]
            }
            claude::StreamEvent::ContentBlockStop { .. }
            | claude::StreamEvent::MessageStop
            | claude::StreamEvent::Ping
            | claude::StreamEvent::Error { .. } => Vec::new(),
        }
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
