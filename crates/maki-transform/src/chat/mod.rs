pub mod claude2openai;
pub mod gemini2openai;
pub mod ollama2openai;
pub mod openai2claude;
pub mod openai2gemini;

use maki_protocol::{claude, openai};

pub(crate) fn openai_finish_to_claude(reason: openai::FinishReason) -> claude::StopReason {
    match reason {
        openai::FinishReason::Stop => claude::StopReason::EndTurn,
        openai::FinishReason::Length => claude::StopReason::MaxTokens,
        openai::FinishReason::ToolCalls => claude::StopReason::ToolUse,
        openai::FinishReason::ContentFilter => claude::StopReason::Refusal,
    }
}

pub(crate) fn claude_stop_to_openai(reason: claude::StopReason) -> openai::FinishReason {
    match reason {
        claude::StopReason::EndTurn | claude::StopReason::StopSequence => {
            openai::FinishReason::Stop
        }
        claude::StopReason::MaxTokens => openai::FinishReason::Length,
        claude::StopReason::ToolUse => openai::FinishReason::ToolCalls,
        claude::StopReason::Refusal => openai::FinishReason::ContentFilter,
    }
}
