//! Stage 3: bucketise each message by its role in the session narrative.

use maki_protocol::openai::{ChatMessage, Role};
use serde::Serialize;

const WRITE_TOOLS: &[&str] = &["Edit", "Write", "NotebookEdit", "Bash", "Shell"];

const FAILURE_MARKERS: &[&str] = &[
    "error",
    "failed",
    "failure",
    "exception",
    "panic",
    "traceback",
    "permission denied",
    "not found",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Bucket {
    UserInstruction,
    KeyState,
    IntermediateReasoning,
    FailureRecord,
}

pub fn classify(messages: &[ChatMessage]) -> Vec<Bucket> {
    messages.iter().map(classify_one).collect()
}

fn classify_one(message: &ChatMessage) -> Bucket {
    match message.role {
        Role::User | Role::System => Bucket::UserInstruction,
        Role::Assistant => {
            let calls = message.tool_calls.as_deref().unwrap_or_default();
            if calls
                .iter()
                .any(|c| WRITE_TOOLS.contains(&c.function.name.as_str()))
            {
                Bucket::KeyState
            } else {
                Bucket::IntermediateReasoning
            }
        }
        Role::Tool => {
            let lowered = message.content_text().to_ascii_lowercase();
            if FAILURE_MARKERS.iter().any(|m| lowered.contains(m)) {
                Bucket::FailureRecord
            } else {
                Bucket::IntermediateReasoning
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use maki_protocol::openai::{FunctionCall, MessageContent, ToolCall};

    #[test]
    fn buckets_follow_roles_and_tool_semantics() {
        let user = ChatMessage::text(Role::User, "fix the bug");
        assert_eq!(classify_one(&user), Bucket::UserInstruction);

        let write = ChatMessage {
            role: Role::Assistant,
            content: None,
            name: None,
            tool_calls: Some(vec![ToolCall {
                id: "1".to_string(),
                kind: "function".to_string(),
                function: FunctionCall {
                    name: "Edit".to_string(),
                    arguments: "{}".to_string(),
                },
            }]),
            tool_call_id: None,
        };
        assert_eq!(classify_one(&write), Bucket::KeyState);

        let read = ChatMessage {
            tool_calls: Some(vec![ToolCall {
                id: "2".to_string(),
                kind: "function".to_string(),
                function: FunctionCall {
                    name: "Read".to_string(),
                    arguments: "{}".to_string(),
                },
            }]),
            ..write.clone()
        };
        assert_eq!(classify_one(&read), Bucket::IntermediateReasoning);

        let failure = ChatMessage {
            role: Role::Tool,
            content: Some(MessageContent::Text(
                "Traceback (most recent call last): ...".to_string(),
            )),
            name: None,
            tool_calls: None,
            tool_call_id: Some("2".to_string()),
        };
        assert_eq!(classify_one(&failure), Bucket::FailureRecord);
    }
}
