//! Stage 5: act on the scores. KEEP passes through, LIGHT truncates, HEAVY
//! leaves a compressed marker, DISCARD drops the message. Ordering of
//! survivors is preserved.

use maki_protocol::openai::{ChatMessage, MessageContent, Role};
use serde::Serialize;

use super::scorer::{DISCARD_THRESHOLD, HEAVY_THRESHOLD, KEEP_THRESHOLD};

const TOOL_TRUNCATE_CHARS: usize = 1_000;
const OTHER_TRUNCATE_CHARS: usize = 500;
const HEAVY_PREVIEW_CHARS: usize = 80;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Keep,
    Light,
    Heavy,
    Discard,
}

pub fn action_for(score: f64) -> Action {
    if score >= KEEP_THRESHOLD {
        Action::Keep
    } else if score >= HEAVY_THRESHOLD {
        Action::Light
    } else if score >= DISCARD_THRESHOLD {
        Action::Heavy
    } else {
        Action::Discard
    }
}

#[derive(Debug, Default, Serialize)]
pub struct CompressionStats {
    pub input_messages: usize,
    pub output_messages: usize,
    pub kept: usize,
    pub lightly_compressed: usize,
    pub heavily_compressed: usize,
    pub discarded: usize,
    pub input_chars: usize,
    pub output_chars: usize,
    pub compression_ratio: f64,
    pub processing_ms: u64,
}

pub fn apply(messages: Vec<ChatMessage>, scores: &[f64]) -> (Vec<ChatMessage>, CompressionStats) {
    let mut stats = CompressionStats::default();
    let mut output = Vec::with_capacity(messages.len());

    for (mut message, score) in messages.into_iter().zip(scores.iter().copied()) {
        match action_for(score) {
            Action::Keep => {
                stats.kept += 1;
                output.push(message);
            }
            Action::Light => {
                stats.lightly_compressed += 1;
                let limit = if message.role == Role::Tool {
                    TOOL_TRUNCATE_CHARS
                } else {
                    OTHER_TRUNCATE_CHARS
                };
                let text = message.content_text();
                if text.len() > limit {
                    let cut = floor_char_boundary(&text, limit);
                    message.content = Some(MessageContent::Text(format!(
                        "{}… [truncated {} chars]",
                        &text[..cut],
                        text.len() - cut
                    )));
                }
                output.push(message);
            }
            Action::Heavy => {
                stats.heavily_compressed += 1;
                let text = message.content_text();
                let cut = floor_char_boundary(&text, HEAVY_PREVIEW_CHARS);
                message.content = Some(MessageContent::Text(format!(
                    "[compressed: {}…]",
                    &text[..cut]
                )));
                message.tool_calls = None;
                output.push(message);
            }
            Action::Discard => {
                stats.discarded += 1;
            }
        }
    }

    stats.output_messages = output.len();
    (output, stats)
}

fn floor_char_boundary(text: &str, limit: usize) -> usize {
    if limit >= text.len() {
        return text.len();
    }
    let mut cut = limit;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    cut
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thresholds_map_to_actions() {
        assert_eq!(action_for(85.0), Action::Keep);
        assert_eq!(action_for(70.0), Action::Keep);
        assert_eq!(action_for(69.9), Action::Light);
        assert_eq!(action_for(50.0), Action::Light);
        assert_eq!(action_for(49.9), Action::Heavy);
        assert_eq!(action_for(30.0), Action::Heavy);
        assert_eq!(action_for(29.9), Action::Discard);
    }

    #[test]
    fn light_truncates_tool_results_to_1000_chars() {
        let long = "y".repeat(5_000);
        let message = ChatMessage {
            role: Role::Tool,
            content: Some(MessageContent::Text(long)),
            name: None,
            tool_calls: None,
            tool_call_id: Some("t".to_string()),
        };
        let (out, stats) = apply(vec![message], &[60.0]);
        assert_eq!(stats.lightly_compressed, 1);
        let text = out[0].content_text();
        assert!(text.starts_with(&"y".repeat(1_000)));
        assert!(text.contains("[truncated 4000 chars]"));
    }

    #[test]
    fn discard_removes_but_preserves_order_of_rest() {
        let messages = vec![
            ChatMessage::text(Role::User, "first"),
            ChatMessage::text(Role::Assistant, "middle"),
            ChatMessage::text(Role::User, "last"),
        ];
        let (out, stats) = apply(messages, &[90.0, 10.0, 90.0]);
        assert_eq!(stats.discarded, 1);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].content_text(), "first");
        assert_eq!(out[1].content_text(), "last");
    }
}
