use maki_protocol::{gemini, openai};
use serde_json::Value;

/// Convert a canonical OpenAI response into the Gemini shape.
pub fn response(resp: openai::ChatCompletionResponse) -> gemini::GenerateContentResponse {
    let mut parts = Vec::new();
    let mut finish = None;

    if let Some(choice) = resp.choices.into_iter().next() {
        let text = choice.message.content_text();
        if !text.is_empty() {
            parts.push(gemini::Part::text(text));
        }
        for call in choice.message.tool_calls.unwrap_or_default() {
            parts.push(gemini::Part {
                function_call: Some(gemini::FunctionCall {
                    name: call.function.name,
                    args: serde_json::from_str::<Value>(&call.function.arguments)
                        .unwrap_or(Value::Null),
                }),
                ..gemini::Part::default()
            });
        }
        finish = choice.finish_reason.map(finish_to_gemini);
    }

    gemini::GenerateContentResponse {
        candidates: vec![gemini::Candidate {
            content: gemini::Content {
                role: Some("model".to_string()),
                parts,
            },
            finish_reason: finish,
            index: Some(0),
        }],
        usage_metadata: resp.usage.map(|u| gemini::UsageMetadata {
            prompt_token_count: u.prompt_tokens,
            candidates_token_count: u.completion_tokens,
            total_token_count: u.total_tokens,
        }),
        model_version: Some(resp.model),
    }
}

pub(crate) fn finish_to_gemini(reason: openai::FinishReason) -> gemini::FinishReason {
    match reason {
        openai::FinishReason::Stop | openai::FinishReason::ToolCalls => {
            gemini::FinishReason::Stop
        }
        openai::FinishReason::Length => gemini::FinishReason::MaxTokens,
        openai::FinishReason::ContentFilter => gemini::FinishReason::Safety,
    }
}
