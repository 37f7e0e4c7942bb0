use maki_protocol::{ollama, openai};

/// Convert an Ollama `/api/chat` request into the canonical OpenAI shape.
/// Ollama streams by default; `stream: None` means streaming.
pub fn chat_request(req: ollama::ChatRequest) -> openai::ChatCompletionRequest {
    let messages = req
        .messages
        .into_iter()
        .map(|message| {
            let role = parse_role(&message.role);
            match message.images {
                Some(images) if !images.is_empty() => {
                    let mut parts = vec![openai::ContentPart::Text {
                        text: message.content,
                    }];
                    for image in images {
                        parts.push(openai::ContentPart::ImageUrl {
                            image_url: openai::ImageUrl {
                                url: format!("data:image/png;base64,{image}"),
                                detail: None,
                            },
                        });
                    }
                    openai::ChatMessage {
                        role,
                        content: Some(openai::MessageContent::Parts(parts)),
                        name: None,
                        tool_calls: None,
                        tool_call_id: None,
                    }
                }
                _ => openai::ChatMessage::text(role, message.content),
            }
        })
        .collect();

    let options = req.options.unwrap_or_default();
    openai::ChatCompletionRequest {
        model: req.model,
        messages,
        temperature: options.temperature,
        top_p: options.top_p,
        max_tokens: options.num_predict,
        stop: options
            .stop
            .filter(|s| !s.is_empty())
            .map(openai::StopSpec::Many),
        stream: Some(req.stream.unwrap_or(true)),
        tools: None,
        tool_choice: None,
        user: None,
    }
}

/// Convert an Ollama `/api/generate` request into a single-turn chat.
pub fn generate_request(req: ollama::GenerateRequest) -> openai::ChatCompletionRequest {
    let mut messages = Vec::new();
    if let Some(system) = req.system
        && !system.is_empty()
    {
        messages.push(openai::ChatMessage::text(openai::Role::System, system));
    }
    messages.push(openai::ChatMessage::text(openai::Role::User, req.prompt));

    let options = req.options.unwrap_or_default();
    openai::ChatCompletionRequest {
        model: req.model,
        messages,
        temperature: options.temperature,
        top_p: options.top_p,
        max_tokens: options.num_predict,
        stop: options
            .stop
            .filter(|s| !s.is_empty())
            .map(openai::StopSpec::Many),
        stream: Some(req.stream.unwrap_or(true)),
        tools: None,
        tool_choice: None,
        user: None,
    }
}

fn parse_role(role: &str) -> openai::Role {
    match role {
        "system" => openai::Role::System,
        "assistant" => openai::Role::Assistant,
        "tool" => openai::Role::Tool,
        _ => openai::Role::User,
    }
}
