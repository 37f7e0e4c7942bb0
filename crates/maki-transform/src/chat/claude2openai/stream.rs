use std::collections::BTreeMap;

use maki_protocol::{claude, openai};
use serde_json::json;

use crate::chat::openai_finish_to_claude;

/// Re-emits canonical OpenAI chunks as the Anthropic named-event sequence:
/// `message_start`, block starts/deltas/stops, `message_delta`,
/// `message_stop`. Text and tool-call blocks get distinct indices; the
/// terminal pair is emitted from `finish`.
#[derive(Debug)]
pub struct ClaudeStreamEncoder {
    started: bool,
    id: String,
    model: String,
    next_block: u32,
    text_block: Option<u32>,
    /// OpenAI tool-call index → Claude content-block index.
    tool_blocks: BTreeMap<u32, u32>,
    stop_reason: Option<claude::StopReason>,
    input_tokens: u64,
    output_tokens: u64,
}

impl ClaudeStreamEncoder {
    pub fn new() -> Self {
        Self {
            started: false,
            id: "msg_unknown".to_string(),
            model: "unknown".to_string(),
            next_block: 0,
            text_block: None,
            tool_blocks: BTreeMap::new(),
            stop_reason: None,
            input_tokens: 0,
            output_tokens: 0,
        }
    }

    pub fn push(&mut self, chunk: &openai::ChatCompletionChunk) -> Vec<claude::StreamEvent> {
        let mut events = Vec::new();

        if !self.started {
            self.started = true;
            self.id = chunk.id.clone();
            self.model = chunk.model.clone();
            events.push(claude::StreamEvent::MessageStart {
                message: claude::MessagesResponse {
                    id: self.id.clone(),
                    kind: "message".to_string(),
                    role: claude::Role::Assistant,
                    content: Vec::new(),
                    model: self.model.clone(),
                    stop_reason: None,
                    stop_sequence: None,
                    usage: claude::Usage::default(),
                },
            });
        }

        if let Some(usage) = &chunk.usage {
            self.input_tokens = usage.prompt_tokens;
            self.output_tokens = usage.completion_tokens;
        }

        if let Some(choice) = chunk.choices.first() {
            if let Some(text) = &choice.delta.content
                && !text.is_empty()
            {
                events.extend(self.emit_text(text));
            }
            for call in choice.delta.tool_calls.iter().flatten() {
                events.extend(self.emit_tool_delta(call));
            }
            if let Some(reason) = choice.finish_reason {
                self.stop_reason = Some(openai_finish_to_claude(reason));
            }
        }

        events
    }

    /// Close open blocks and emit the terminal `message_delta`/`message_stop`
    /// pair. Also used after an upstream stream ends without a finish reason.
    pub fn finish(&mut self) -> Vec<claude::StreamEvent> {
        let mut events = self.close_blocks();
        events.push(claude::StreamEvent::MessageDelta {
            delta: claude::MessageDeltaBody {
                stop_reason: Some(self.stop_reason.take().unwrap_or(claude::StopReason::EndTurn)),
                stop_sequence: None,
            },
            usage: Some(claude::DeltaUsage {
                output_tokens: self.output_tokens,
            }),
        });
        events.push(claude::StreamEvent::MessageStop);
        events
    }

    fn emit_text(&mut self, text: &str) -> Vec<claude::StreamEvent> {
        let mut events = Vec::new();
        let index = match self.text_block {
            Some(index) => index,
            None => {
                let index = self.next_block;
                self.next_block += 1;
                self.text_block = Some(index);
                events.push(claude::StreamEvent::ContentBlockStart {
                    index,
                    content_block: claude::ContentBlock::Text {
                        text: String::new(),
                    },
                });
                index
            }
        };
        events.push(claude::StreamEvent::ContentBlockDelta {
            index,
            delta: claude::BlockDelta::TextDelta {
                text: text.to_string(),
            },
        });
        events
    }

    fn emit_tool_delta(&mut self, call: &openai::ToolCallDelta) -> Vec<claude::StreamEvent> {
        let mut events = Vec::new();
        let index = match self.tool_blocks.get(&call.index) {
            Some(index) => *index,
            None => {
                let index = self.next_block;
                self.next_block += 1;
                self.tool_blocks.insert(call.index, index);
                events.push(claude::StreamEvent::ContentBlockStart {
                    index,
                    content_block: claude::ContentBlock::ToolUse {
                        id: call
                            .id
                            .clone()
                            .unwrap_or_else(|| format!("toolu_{}", call.index)),
                        name: call
                            .function
                            .as_ref()
                            .and_then(|f| f.name.clone())
                            .unwrap_or_default(),
                        input: json!({}),
                    },
                });
                index
            }
        };
        if let Some(arguments) = call.function.as_ref().and_then(|f| f.arguments.clone())
            && !arguments.is_empty()
        {
            events.push(claude::StreamEvent::ContentBlockDelta {
                index,
                delta: claude::BlockDelta::InputJsonDelta {
                    partial_json: arguments,
                },
            });
        }
        events
    }

    fn close_blocks(&mut self) -> Vec<claude::StreamEvent> {
        let mut events = Vec::new();
        if let Some(index) = self.text_block.take() {
            events.push(claude::StreamEvent::ContentBlockStop { index });
        }
        for (_, index) in std::mem::take(&mut self.tool_blocks) {
            events.push(claude::StreamEvent::ContentBlockStop { index });
        }
        events
    }
}

impl Default for ClaudeStreamEncoder {
    fn default() -> Self {
        Self::new()
    }
}
