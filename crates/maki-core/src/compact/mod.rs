//! Context-compression pipeline: shrink a long chat history before
//! dispatch. Five ordered stages — file-modification tracking, semantic
//! dedup, classification, weight scoring, apply — over the canonical
//! message list. Ordering of surviving messages is never changed.

mod apply;
mod classifier;
mod dedup;
mod scorer;
mod tracker;

pub use apply::{Action, CompressionStats};
pub use classifier::Bucket;

use maki_protocol::openai::ChatMessage;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct CompactOutput {
    pub messages: Vec<ChatMessage>,
    pub stats: CompressionStats,
}

pub fn compress(messages: Vec<ChatMessage>, _now_ms: i64) -> CompactOutput {
    let started = std::time::Instant::now();
    let input_count = messages.len();
    let input_chars: usize = messages.iter().map(message_len).sum();

    let log = tracker::track(&messages);
    let deduped = dedup::deduplicate(messages, &log);
    let buckets = classifier::classify(&deduped);
    let scores = scorer::score(&deduped, &buckets);
    let (messages, mut stats) = apply::apply(deduped, &scores);

    stats.input_messages = input_count;
    stats.input_chars = input_chars;
    stats.output_chars = messages.iter().map(message_len).sum();
    stats.compression_ratio = if stats.input_chars == 0 {
        1.0
    } else {
        stats.output_chars as f64 / stats.input_chars as f64
    };
    stats.processing_ms = started.elapsed().as_millis() as u64;

    CompactOutput { messages, stats }
}

pub(crate) fn message_len(message: &ChatMessage) -> usize {
    message.content_text().len()
}
