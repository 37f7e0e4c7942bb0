use maki_protocol::{gemini, openai};

/// Convert a Gemini-native upstream response into the canonical OpenAI shape.
pub fn response(
    resp: gemini::GenerateContentResponse,
    model: &str,
    id: &str,
    created: i64,
) -> openai::ChatCompletionResponse {
    let mut text = String::new();
    let mut tool_calls = Vec::new();
    let mut finish = None;

    if let Some(candidate) = resp.candidates.into_iter().next() {
        for part in candidate.content.parts {
            if let Some(t) = part.text {
                text.push_str(&t);
            }
            if let Some(call) = part.function_call {
                let index = tool_calls.len();
                tool_calls.push(openai::ToolCall {
                    id: format!("call_{index}"),
                    kind: "function".to_string(),
                    function: openai::FunctionCall {
                        name: call.name,
                        arguments: call.args.to_string(),
                    },
                });
            }
        }
        finish = candidate.finish_reason.map(gemini_finish_to_openai);
    }

    if !tool_calls.is_empty() {
        finish = Some(openai::FinishReason::ToolCalls);
    }

    openai::ChatCompletionResponse {
        id: id.to_string(),
        object: "chat.completion".to_string(),
        created,
        model: resp.model_version.unwrap_or_else(|| model.to_string()),
        choices: vec![openai::Choice {
            index: 0,
            message: openai::ChatMessage {
                role: openai::Role::Assistant,
                content: (!text.is_empty()).then(|| openai::MessageContent::Text(text)),
                name: None,
                tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
                tool_call_id: None,
            },
            finish_reason: finish,
        }],
        usage: resp.usage_metadata.map(|u| openai::Usage {
            prompt_tokens: u.prompt_token_count,
            completion_tokens: u.candidates_token_count,
            total_tokens: u.total_token_count,
        }),
    }
}

pub(crate) fn gemini_finish_to_openai(reason: gemini::FinishReason) -> openai::FinishReason {
    match reason {
        gemini::FinishReason::Stop => openai::FinishReason::Stop,
        gemini::FinishReason::MaxTokens => openai::FinishReason::Length,
        gemini::FinishReason::Safety => openai::FinishReason::ContentFilter,
        gemini::FinishReason::Recitation | gemini::FinishReason::Other => {
            openai::FinishReason::Stop
        }
    }
}
