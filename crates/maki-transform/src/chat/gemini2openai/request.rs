use maki_protocol::{gemini, openai};

/// Convert a Gemini `generateContent` request into the canonical OpenAI
/// shape. The model comes from the URL path, not the body.
pub fn request(
    model: &str,
    req: gemini::GenerateContentRequest,
    stream: bool,
) -> openai::ChatCompletionRequest {
    let mut messages = Vec::new();

    if let Some(system) = &req.system_instruction {
        let text = parts_text(&system.parts);
        if !text.is_empty() {
            messages.push(openai::ChatMessage::text(openai::Role::System, text));
        }
    }

    for content in &req.contents {
        convert_content(content, &mut messages);
    }

    let config = req.generation_config.unwrap_or_default();
    openai::ChatCompletionRequest {
        model: model.to_string(),
        messages,
        temperature: config.temperature,
        top_p: config.top_p,
        max_tokens: config.max_output_tokens,
        stop: config
            .stop_sequences
            .filter(|s| !s.is_empty())
            .map(openai::StopSpec::Many),
        stream: Some(stream),
        tools: req.tools.map(|tools| {
            tools
                .into_iter()
                .flat_map(|t| t.function_declarations)
                .map(|decl| openai::Tool {
                    kind: "function".to_string(),
                    function: openai::FunctionDef {
                        name: decl.name,
                        description: decl.description,
                        parameters: decl.parameters,
                    },
                })
                .collect()
        }),
        tool_choice: None,
        user: None,
    }
}

fn convert_content(content: &gemini::Content, out: &mut Vec<openai::ChatMessage>) {
    let is_model = content.role.as_deref() == Some("model");
    let mut parts = Vec::new();
    let mut tool_calls = Vec::new();

    for part in &content.parts {
        if let Some(text) = &part.text {
            parts.push(openai::ContentPart::Text { text: text.clone() });
        }
        if let Some(inline) = &part.inline_data {
            parts.push(openai::ContentPart::ImageUrl {
                image_url: openai::ImageUrl {
                    url: format!("data:{};base64,{}", inline.mime_type, inline.data),
                    detail: None,
                },
            });
        }
        if let Some(call) = &part.function_call {
            tool_calls.push(openai::ToolCall {
                // Gemini identifies calls by name only; the name doubles as id.
                id: call.name.clone(),
                kind: "function".to_string(),
                function: openai::FunctionCall {
                    name: call.name.clone(),
                    arguments: call.args.to_string(),
                },
            });
        }
        if let Some(resp) = &part.function_response {
            out.push(openai::ChatMessage {
                role: openai::Role::Tool,
                content: Some(openai::MessageContent::Text(resp.response.to_string())),
                name: Some(resp.name.clone()),
                tool_calls: None,
                tool_call_id: Some(resp.name.clone()),
            });
        }
    }

    if parts.is_empty() && tool_calls.is_empty() {
        return;
    }

    let role = if is_model {
        openai::Role::Assistant
    } else {
        openai::Role::User
    };
    let content = if parts.is_empty() {
        None
    } else if parts.len() == 1
        && let openai::ContentPart::Text { text } = &parts[0]
    {
        Some(openai::MessageContent::Text(text.clone()))
    } else {
        Some(openai::MessageContent::Parts(parts))
    };
    out.push(openai::ChatMessage {
        role,
        content,
        name: None,
        tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
        tool_call_id: None,
    });
}

fn parts_text(parts: &[gemini::Part]) -> String {
    parts
        .iter()
        .filter_map(|p| p.text.as_deref())
        .collect::<Vec<_>>()
        .join("\n")
}
