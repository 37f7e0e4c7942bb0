use std::collections::HashMap;

use maki_protocol::{gemini, openai};
use serde_json::Value;

/// Convert a canonical OpenAI request into the Gemini shape. Tool-call ids
/// are an OpenAI concept; a side map built while walking assistant turns
/// lets tool-result messages recover the function name Gemini requires.
pub fn request(req: openai::ChatCompletionRequest) -> gemini::GenerateContentRequest {
    let mut system = Vec::new();
    let mut contents: Vec<gemini::Content> = Vec::new();
    let mut call_names: HashMap<String, String> = HashMap::new();

    for message in &req.messages {
        match message.role {
            openai::Role::System => system.push(message.content_text()),
            openai::Role::User => {
                contents.push(gemini::Content {
                    role: Some("user".to_string()),
                    parts: user_parts(message),
                });
            }
            openai::Role::Assistant => {
                let mut parts = Vec::new();
                let text = message.content_text();
                if !text.is_empty() {
                    parts.push(gemini::Part::text(text));
                }
                for call in message.tool_calls.iter().flatten() {
                    call_names.insert(call.id.clone(), call.function.name.clone());
                    parts.push(gemini::Part {
                        function_call: Some(gemini::FunctionCall {
                            name: call.function.name.clone(),
                            args: serde_json::from_str::<Value>(&call.function.arguments)
                                .unwrap_or(Value::Null),
                        }),
                        ..gemini::Part::default()
                    });
                }
                if !parts.is_empty() {
                    contents.push(gemini::Content {
                        role: Some("model".to_string()),
                        parts,
                    });
                }
            }
            openai::Role::Tool => {
                let id = message.tool_call_id.clone().unwrap_or_default();
                let name = call_names.get(&id).cloned().unwrap_or(id);
                let text = message.content_text();
                let response = serde_json::from_str::<Value>(&text)
                    .unwrap_or(Value::String(text));
                contents.push(gemini::Content {
                    role: Some("user".to_string()),
                    parts: vec![gemini::Part {
                        function_response: Some(gemini::FunctionResponse { name, response }),
                        ..gemini::Part::default()
                    }],
                });
            }
        }
    }

    let config = gemini::GenerationConfig {
        temperature: req.temperature,
        top_p: req.top_p,
        max_output_tokens: req.max_tokens,
        stop_sequences: req.stop.map(openai::StopSpec::into_vec),
    };
    let has_config = config.temperature.is_some()
        || config.top_p.is_some()
        || config.max_output_tokens.is_some()
        || config.stop_sequences.is_some();

    gemini::GenerateContentRequest {
        contents,
        system_instruction: (!system.is_empty()).then(|| gemini::Content {
            role: None,
            parts: vec![gemini::Part::text(system.join("\n"))],
        }),
        tools: req.tools.map(|tools| {
            vec![gemini::Tool {
                function_declarations: tools
                    .into_iter()
                    .map(|tool| gemini::FunctionDeclaration {
                        name: tool.function.name,
                        description: tool.function.description,
                        parameters: tool.function.parameters,
                    })
                    .collect(),
            }]
        }),
        generation_config: has_config.then_some(config),
    }
}

fn user_parts(message: &openai::ChatMessage) -> Vec<gemini::Part> {
    match &message.content {
        Some(openai::MessageContent::Text(text)) => vec![gemini::Part::text(text.clone())],
        Some(openai::MessageContent::Parts(parts)) => parts
            .iter()
            .map(|part| match part {
                openai::ContentPart::Text { text } => gemini::Part::text(text.clone()),
                openai::ContentPart::ImageUrl { image_url } => {
                    match image_url.url.strip_prefix("data:").and_then(|rest| {
                        rest.split_once(";base64,")
                            .map(|(m, d)| (m.to_string(), d.to_string()))
                    }) {
                        Some((mime_type, data)) => gemini::Part {
                            inline_data: Some(gemini::InlineData { mime_type, data }),
                            ..gemini::Part::default()
                        },
                        None => gemini::Part::text(image_url.url.clone()),
                    }
                }
            })
            .collect(),
        None => Vec::new(),
    }
}
