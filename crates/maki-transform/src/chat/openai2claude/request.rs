use maki_protocol::{claude, openai};
use serde_json::{Value, json};

const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Convert a canonical OpenAI request into the Anthropic Messages shape.
/// Claude requires strictly alternating user/assistant turns, so adjacent
/// same-role messages are merged into one multi-block message.
pub fn request(req: openai::ChatCompletionRequest) -> claude::MessagesRequest {
    let mut system = Vec::new();
    let mut messages: Vec<claude::Message> = Vec::new();

    for message in &req.messages {
        match message.role {
            openai::Role::System => system.push(message.content_text()),
            openai::Role::User => {
                push_blocks(&mut messages, claude::Role::User, user_blocks(message));
            }
            openai::Role::Assistant => {
                push_blocks(
                    &mut messages,
                    claude::Role::Assistant,
                    assistant_blocks(message),
                );
            }
            openai::Role::Tool => {
                let block = claude::ContentBlock::ToolResult {
                    tool_use_id: message.tool_call_id.clone().unwrap_or_default(),
                    content: Some(Value::String(message.content_text())),
                    is_error: None,
                };
                push_blocks(&mut messages, claude::Role::User, vec![block]);
            }
        }
    }

    claude::MessagesRequest {
        model: req.model,
        max_tokens: req.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        messages,
        system: (!system.is_empty()).then(|| claude::SystemSpec::Text(system.join("\n"))),
        temperature: req.temperature,
        top_p: req.top_p,
        stop_sequences: req.stop.map(openai::StopSpec::into_vec),
        stream: req.stream,
        tools: req.tools.map(|tools| {
            tools
                .into_iter()
                .map(|tool| claude::ToolDef {
                    name: tool.function.name,
                    description: tool.function.description,
                    input_schema: tool.function.parameters.unwrap_or_else(|| json!({})),
                })
                .collect()
        }),
        tool_choice: req.tool_choice.map(convert_tool_choice),
        metadata: req.user.map(|user| json!({ "user_id": user })),
    }
}

fn push_blocks(
    messages: &mut Vec<claude::Message>,
    role: claude::Role,
    blocks: Vec<claude::ContentBlock>,
) {
    if blocks.is_empty() {
        return;
    }
    if let Some(last) = messages.last_mut()
        && last.role == role
    {
        match &mut last.content {
            claude::MessageContent::Blocks(existing) => existing.extend(blocks),
            claude::MessageContent::Text(text) => {
                let mut merged = vec![claude::ContentBlock::Text { text: text.clone() }];
                merged.extend(blocks);
                last.content = claude::MessageContent::Blocks(merged);
            }
        }
        return;
    }
    messages.push(claude::Message {
        role,
        content: claude::MessageContent::Blocks(blocks),
    });
}

fn user_blocks(message: &openai::ChatMessage) -> Vec<claude::ContentBlock> {
    match &message.content {
        Some(openai::MessageContent::Text(text)) => {
            vec![claude::ContentBlock::Text { text: text.clone() }]
        }
        Some(openai::MessageContent::Parts(parts)) => parts
            .iter()
            .map(|part| match part {
                openai::ContentPart::Text { text } => {
                    claude::ContentBlock::Text { text: text.clone() }
                }
                openai::ContentPart::ImageUrl { image_url } => claude::ContentBlock::Image {
                    source: image_source(&image_url.url),
                },
            })
            .collect(),
        None => Vec::new(),
    }
}

fn assistant_blocks(message: &openai::ChatMessage) -> Vec<claude::ContentBlock> {
    let mut blocks = Vec::new();
    let text = message.content_text();
    if !text.is_empty() {
        blocks.push(claude::ContentBlock::Text { text });
    }
    for call in message.tool_calls.iter().flatten() {
        let input = serde_json::from_str::<Value>(&call.function.arguments)
            .unwrap_or(Value::String(call.function.arguments.clone()));
        blocks.push(claude::ContentBlock::ToolUse {
            id: call.id.clone(),
            name: call.function.name.clone(),
            input,
        });
    }
    blocks
}

fn image_source(url: &str) -> claude::ImageSource {
    if let Some(rest) = url.strip_prefix("data:")
        && let Some((media_type, data)) = rest.split_once(";base64,")
    {
        return claude::ImageSource::Base64 {
            media_type: media_type.to_string(),
            data: data.to_string(),
        };
    }
    claude::ImageSource::Url {
        url: url.to_string(),
    }
}

fn convert_tool_choice(choice: Value) -> Value {
    match &choice {
        Value::String(s) if s == "required" => json!({ "type": "any" }),
        Value::String(s) if s == "none" => json!({ "type": "auto" }),
        Value::String(_) => json!({ "type": "auto" }),
        Value::Object(map) => {
            let name = map
                .get("function")
                .and_then(|f| f.get("name"))
                .and_then(Value::as_str)
                .unwrap_or("");
            json!({ "type": "tool", "name": name })
        }
        _ => json!({ "type": "auto" }),
    }
}
