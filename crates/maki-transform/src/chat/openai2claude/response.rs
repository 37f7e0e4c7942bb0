use maki_protocol::{claude, openai};

use crate::chat::claude_stop_to_openai;

/// Convert a Claude-native upstream response into the canonical OpenAI shape.
pub fn response(resp: claude::MessagesResponse, created: i64) -> openai::ChatCompletionResponse {
    let mut text = String::new();
    let mut tool_calls = Vec::new();
    for block in &resp.content {
        match block {
            claude::ContentBlock::Text { text: t } => text.push_str(t),
            claude::ContentBlock::ToolUse { id, name, input } => {
                tool_calls.push(openai::ToolCall {
                    id: id.clone(),
                    kind: "function".to_string(),
                    function: openai::FunctionCall {
                        name: name.clone(),
                        arguments: input.to_string(),
                    },
                });
            }
            _ => {}
        }
    }

    openai::ChatCompletionResponse {
        id: resp.id,
        object: "chat.completion".to_string(),
        created,
        model: resp.model,
        choices: vec![openai::Choice {
            index: 0,
            message: openai::ChatMessage {
                role: openai::Role::Assistant,
                content: (!text.is_empty()).then(|| openai::MessageContent::Text(text)),
                name: None,
                tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
                tool_call_id: None,
            },
            finish_reason: resp.stop_reason.map(claude_stop_to_openai),
        }],
        usage: Some(openai::Usage {
            prompt_tokens: resp.usage.input_tokens,
            completion_tokens: resp.usage.output_tokens,
            total_tokens: resp.usage.input_tokens + resp.usage.output_tokens,
        }),
    }
}
