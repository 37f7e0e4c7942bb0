use maki_protocol::{claude, openai};
use serde_json::{Value, json};

/// Convert an Anthropic Messages request into the canonical OpenAI shape.
/// Message ordering is preserved; tool-result blocks surface as `tool` role
/// messages ahead of any user text in the same Claude message.
pub fn request(req: claude::MessagesRequest) -> openai::ChatCompletionRequest {
    let mut messages = Vec::new();

    if let Some(system) = &req.system {
        messages.push(openai::ChatMessage::text(
            openai::Role::System,
            system.flat_text(),
        ));
    }

    for message in &req.messages {
        match (&message.role, &message.content) {
            (claude::Role::User, claude::MessageContent::Text(text)) => {
                messages.push(openai::ChatMessage::text(openai::Role::User, text.clone()));
            }
            (claude::Role::Assistant, claude::MessageContent::Text(text)) => {
                messages.push(openai::ChatMessage::text(
                    openai::Role::Assistant,
                    text.clone(),
                ));
            }
            (claude::Role::User, claude::MessageContent::Blocks(blocks)) => {
                convert_user_blocks(blocks, &mut messages);
            }
            (claude::Role::Assistant, claude::MessageContent::Blocks(blocks)) => {
                convert_assistant_blocks(blocks, &mut messages);
            }
        }
    }

    openai::ChatCompletionRequest {
        model: req.model,
        messages,
        temperature: req.temperature,
        top_p: req.top_p,
        max_tokens: Some(req.max_tokens),
        stop: req
            .stop_sequences
            .filter(|s| !s.is_empty())
            .map(openai::StopSpec::Many),
        stream: req.stream,
        tools: req.tools.map(|tools| {
            tools
                .into_iter()
                .map(|tool| openai::Tool {
                    kind: "function".to_string(),
                    function: openai::FunctionDef {
                        name: tool.name,
                        description: tool.description,
                        parameters: Some(tool.input_schema),
                    },
                })
                .collect()
        }),
        tool_choice: req.tool_choice.map(convert_tool_choice),
        user: req
            .metadata
            .as_ref()
            .and_then(|m| m.get("user_id"))
            .and_then(Value::as_str)
            .map(str::to_string),
    }
}

fn convert_user_blocks(blocks: &[claude::ContentBlock], out: &mut Vec<openai::ChatMessage>) {
    let mut parts = Vec::new();
    for block in blocks {
        match block {
            claude::ContentBlock::Text { text } => {
                parts.push(openai::ContentPart::Text { text: text.clone() });
            }
            claude::ContentBlock::Image { source } => {
                let url = match source {
                    claude::ImageSource::Base64 { media_type, data } => {
                        format!("data:{media_type};base64,{data}")
                    }
                    claude::ImageSource::Url { url } => url.clone(),
                };
                parts.push(openai::ContentPart::ImageUrl {
                    image_url: openai::ImageUrl { url, detail: None },
                });
            }
            claude::ContentBlock::ToolResult {
                tool_use_id,
                content,
                ..
            } => {
                out.push(openai::ChatMessage {
                    role: openai::Role::Tool,
                    content: Some(openai::MessageContent::Text(tool_result_text(content))),
                    name: None,
                    tool_calls: None,
                    tool_call_id: Some(tool_use_id.clone()),
                });
            }
            claude::ContentBlock::ToolUse { .. } | claude::ContentBlock::Thinking { .. } => {}
        }
    }
    if !parts.is_empty() {
        let content = if parts.len() == 1
            && let openai::ContentPart::Text { text } = &parts[0]
        {
            openai::MessageContent::Text(text.clone())
        } else {
            openai::MessageContent::Parts(parts)
        };
        out.push(openai::ChatMessage {
            role: openai::Role::User,
            content: Some(content),
            name: None,
            tool_calls: None,
            tool_call_id: None,
        });
    }
}

fn convert_assistant_blocks(blocks: &[claude::ContentBlock], out: &mut Vec<openai::ChatMessage>) {
    let mut text = String::new();
    let mut tool_calls = Vec::new();
    for block in blocks {
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
    out.push(openai::ChatMessage {
        role: openai::Role::Assistant,
        content: (!text.is_empty()).then(|| openai::MessageContent::Text(text)),
        name: None,
        tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
        tool_call_id: None,
    });
}

fn tool_result_text(content: &Option<Value>) -> String {
    match content {
        None => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(blocks)) => blocks
            .iter()
            .filter_map(|b| b.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join(""),
        Some(other) => other.to_string(),
    }
}

fn convert_tool_choice(choice: Value) -> Value {
    match choice.get("type").and_then(Value::as_str) {
        Some("auto") => json!("auto"),
        Some("any") => json!("required"),
        Some("tool") => json!({
            "type": "function",
            "function": { "name": choice.get("name").and_then(Value::as_str).unwrap_or("") }
        }),
        _ => json!("auto"),
    }
}
