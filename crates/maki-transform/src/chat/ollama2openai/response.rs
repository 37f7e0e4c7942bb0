use maki_protocol::{ollama, openai};

pub fn iso_timestamp(epoch_secs: i64) -> String {
    time::OffsetDateTime::from_unix_timestamp(epoch_secs)
        .unwrap_or(time::OffsetDateTime::UNIX_EPOCH)
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

pub(crate) fn done_reason(reason: openai::FinishReason) -> &'static str {
    match reason {
        openai::FinishReason::Stop | openai::FinishReason::ToolCalls => "stop",
        openai::FinishReason::Length => "length",
        openai::FinishReason::ContentFilter => "filter",
    }
}

/// Convert a canonical OpenAI response into the Ollama `/api/chat` shape.
pub fn chat_response(resp: openai::ChatCompletionResponse) -> ollama::ChatResponse {
    let created_at = iso_timestamp(resp.created);
    let choice = resp.choices.into_iter().next();
    let content = choice
        .as_ref()
        .map(|c| c.message.content_text())
        .unwrap_or_default();
    ollama::ChatResponse {
        model: resp.model,
        created_at,
        message: Some(ollama::ChatMessage {
            role: "assistant".to_string(),
            content,
            images: None,
        }),
        done: true,
        done_reason: choice
            .and_then(|c| c.finish_reason)
            .map(|r| done_reason(r).to_string()),
        prompt_eval_count: resp.usage.as_ref().map(|u| u.prompt_tokens),
        eval_count: resp.usage.as_ref().map(|u| u.completion_tokens),
    }
}

/// Convert a canonical OpenAI response into the Ollama `/api/generate` shape.
pub fn generate_response(resp: openai::ChatCompletionResponse) -> ollama::GenerateResponse {
    let created_at = iso_timestamp(resp.created);
    let choice = resp.choices.into_iter().next();
    ollama::GenerateResponse {
        model: resp.model,
        created_at,
        response: choice
            .as_ref()
            .map(|c| c.message.content_text())
            .unwrap_or_default(),
        done: true,
        done_reason: choice
            .and_then(|c| c.finish_reason)
            .map(|r| done_reason(r).to_string()),
        prompt_eval_count: resp.usage.as_ref().map(|u| u.prompt_tokens),
        eval_count: resp.usage.as_ref().map(|u| u.completion_tokens),
    }
}
