use maki_protocol::{claude, openai};
use serde_json::Value;

use crate::chat::openai_finish_to_claude;

/// Convert a canonical OpenAI response into the Anthropic Messages shape.
pub fn response(resp: openai::ChatCompletionResponse) -> claude::MessagesResponse {
    let model = resp.model;
    let id = resp.id;
    let usage = resp
        .usage
        .map(|u| claude::Usage {
            input_tokens: u.prompt_tokens,
            output_tokens: u.completion_tokens,
        })
        .unwrap_or_default();

    let mut content = Vec::new();
    let mut stop_reason = None;
    if let Some(choice) = resp.choices.into_iter().next() {
        let text = choice.message.content_text();
        if !text.is_empty() {
            content.push(claude::ContentBlock::Text { text });
        }
        for call in choice.message.tool_calls.unwrap_or_default() {
            let input = serde_json::from_str::<Value>(&call.function.arguments)
                .unwrap_or(Value::String(call.function.arguments));
            content.push(claude::ContentBlock::ToolUse {
                id: call.id,
                name: call.function.name,
                input,
            });
        }
        stop_reason = choice.finish_reason.map(openai_finish_to_claude);
    }

    claude::MessagesResponse {
        id,
        kind: "message".to_string(),
        role: claude::Role::Assistant,
        content,
        model,
        stop_reason,
        stop_sequence: None,
        usage,
    }
}
