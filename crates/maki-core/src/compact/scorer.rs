//! Stage 4: weight every message. Base weight by bucket, multiplied by
//! time decay, a length penalty and a referenced-by-later bonus. User
//! instructions are floored at the KEEP threshold so they never degrade.

use std::collections::HashSet;

use maki_protocol::openai::ChatMessage;

use super::classifier::Bucket;

pub const KEEP_THRESHOLD: f64 = 70.0;
pub const HEAVY_THRESHOLD: f64 = 50.0;
pub const DISCARD_THRESHOLD: f64 = 30.0;

const HALF_LIFE: f64 = 20.0;
const DECAY_FLOOR: f64 = 0.3;
const LENGTH_PENALTY_START: usize = 2_000;
const LENGTH_PENALTY_FULL: usize = 10_000;
const MAX_LENGTH_PENALTY: f64 = 0.3;
const REFERENCE_BONUS: f64 = 1.2;

fn base_weight(bucket: Bucket) -> f64 {
    match bucket {
        Bucket::UserInstruction => 100.0,
        Bucket::KeyState => 80.0,
        Bucket::IntermediateReasoning => 40.0,
        Bucket::FailureRecord => 20.0,
    }
}

pub fn score(messages: &[ChatMessage], buckets: &[Bucket]) -> Vec<f64> {
    let total = messages.len();
    let path_sets: Vec<HashSet<String>> = messages
        .iter()
        .map(|m| path_tokens(&m.content_text()))
        .collect();

    messages
        .iter()
        .enumerate()
        .map(|(index, message)| {
            let bucket = buckets[index];
            let age = (total - 1 - index) as f64;
            let decay = DECAY_FLOOR.max(2f64.powf(-(age / HALF_LIFE)));
            let length = message.content_text().len();
            let length_factor = if length <= LENGTH_PENALTY_START {
                1.0
            } else {
                let over = (length - LENGTH_PENALTY_START) as f64
                    / (LENGTH_PENALTY_FULL - LENGTH_PENALTY_START) as f64;
                1.0 - MAX_LENGTH_PENALTY * over.min(1.0)
            };
            let referenced = path_sets[index]
                .iter()
                .any(|path| path_sets[index + 1..].iter().any(|later| later.contains(path)));
            let bonus = if referenced { REFERENCE_BONUS } else { 1.0 };

            let weight = base_weight(bucket) * decay * length_factor * bonus;
            if bucket == Bucket::UserInstruction {
                weight.max(KEEP_THRESHOLD)
            } else {
                weight
            }
        })
        .collect()
}

/// Path-looking tokens used for the referenced-by-later bonus.
fn path_tokens(text: &str) -> HashSet<String> {
    text.split_whitespace()
        .filter(|token| token.contains('/') && token.contains('.') && token.len() > 3)
        .map(|token| token.trim_matches(['"', '\'', '`', ',', ';', ':', '(', ')']).to_string())
        .filter(|token| !token.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use maki_protocol::openai::Role;

    #[test]
    fn user_instructions_never_fall_below_keep() {
        let messages: Vec<ChatMessage> = (0..200)
            .map(|i| ChatMessage::text(Role::User, format!("instruction {i}")))
            .collect();
        let buckets = vec![Bucket::UserInstruction; messages.len()];
        let scores = score(&messages, &buckets);
        assert!(scores.iter().all(|s| *s >= KEEP_THRESHOLD));
    }

    #[test]
    fn old_reasoning_decays_to_the_floor() {
        let mut messages: Vec<ChatMessage> = (0..100)
            .map(|i| ChatMessage::text(Role::Assistant, format!("thinking {i}")))
            .collect();
        messages.push(ChatMessage::text(Role::Assistant, "latest thought"));
        let buckets = vec![Bucket::IntermediateReasoning; messages.len()];
        let scores = score(&messages, &buckets);
        // Oldest: 40 * 0.3 floor = 12; newest: 40.
        assert!((scores[0] - 12.0).abs() < 1e-9);
        assert!((scores[scores.len() - 1] - 40.0).abs() < 1e-9);
    }

    #[test]
    fn long_content_is_penalised_linearly() {
        let long = "x".repeat(10_000);
        let messages = vec![ChatMessage::text(Role::Assistant, long)];
        let buckets = vec![Bucket::KeyState];
        let scores = score(&messages, &buckets);
        // 80 * (1 - 0.3) at full penalty.
        assert!((scores[0] - 56.0).abs() < 1e-9);
    }

    #[test]
    fn referenced_path_earns_bonus() {
        let messages = vec![
            ChatMessage::text(Role::Assistant, "wrote src/pool.rs earlier"),
            ChatMessage::text(Role::Assistant, "now reviewing src/pool.rs again"),
        ];
        let buckets = vec![Bucket::IntermediateReasoning; 2];
        let scores = score(&messages, &buckets);
        // First message gets the 1.2 bonus; second does not.
        assert!(scores[0] > scores[1] * 0.9);
    }
}
