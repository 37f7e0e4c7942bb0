//! Stage 2: semantic dedup of idempotent tool results. Repeated reads of
//! unchanged content collapse to reference stubs; near-misses get a diff
//! summary. Non-idempotent calls pass through untouched.

use std::collections::{BTreeMap, HashMap, HashSet};

use maki_protocol::openai::{ChatMessage, Role};
use md5::{Digest, Md5};
use serde_json::Value;

use super::tracker::{ModificationLog, arg_path, is_shell_tool};

const JACCARD_STUB_THRESHOLD: f64 = 0.99;
const DEDUP_MARKER: &str = "[dedup]";

const IDEMPOTENT_TOOLS: &[&str] = &[
    "Read", "Grep", "Glob", "WebFetch", "WebSearch", "ListDir", "NotebookRead",
];

const READ_ONLY_SHELL_PREFIXES: &[&str] = &[
    "ls", "cat", "head", "tail", "grep", "find", "pwd", "wc", "which", "stat", "du", "env",
];

const READ_ONLY_GIT: &[&str] = &["git status", "git log", "git diff", "git branch", "git show"];

struct CallSite {
    fingerprint: String,
    path: Option<String>,
}

pub fn deduplicate(mut messages: Vec<ChatMessage>, log: &ModificationLog) -> Vec<ChatMessage> {
    // tool_call_id → fingerprint/path for every eligible (idempotent) call.
    let mut sites: HashMap<String, CallSite> = HashMap::new();
    for message in &messages {
        if message.role != Role::Assistant {
            continue;
        }
        for call in message.tool_calls.iter().flatten() {
            let args: Value =
                serde_json::from_str(&call.function.arguments).unwrap_or(Value::Null);
            if !is_idempotent(&call.function.name, &args) {
                continue;
            }
            sites.insert(
                call.id.clone(),
                CallSite {
                    fingerprint: fingerprint(&call.function.name, &args),
                    path: arg_path(&args),
                },
            );
        }
    }

    // fingerprint → ordered (message index, staleness) of its tool results.
    let mut buckets: BTreeMap<String, Vec<(usize, bool)>> = BTreeMap::new();
    for (index, message) in messages.iter().enumerate() {
        if message.role != Role::Tool {
            continue;
        }
        if message.content_text().starts_with(DEDUP_MARKER) {
            continue; // already rewritten by an earlier pass
        }
        let Some(site) = message
            .tool_call_id
            .as_deref()
            .and_then(|id| sites.get(id))
        else {
            continue;
        };
        let stale = log.is_stale(site.path.as_deref(), index);
        buckets
            .entry(site.fingerprint.clone())
            .or_default()
            .push((index, stale));
    }

    for occurrences in buckets.values() {
        // Newest valid occurrence wins; absent one, the newest overall.
        let retained = occurrences
            .iter()
            .rev()
            .find(|(_, stale)| !stale)
            .or_else(|| occurrences.last())
            .map(|(index, _)| *index)
            .unwrap_or_default();
        let retained_text = messages[retained].content_text();

        for (index, _) in occurrences {
            if *index == retained {
                continue;
            }
            let old_text = messages[*index].content_text();
            let replacement = if jaccard(&old_text, &retained_text) >= JACCARD_STUB_THRESHOLD {
                format!("{DEDUP_MARKER} unchanged; see later result of the same call")
            } else {
                let (added, removed) = line_diff(&old_text, &retained_text);
                format!("{DEDUP_MARKER} superseded (+{added} lines / -{removed} lines in later result)")
            };
            messages[*index].content =
                Some(maki_protocol::openai::MessageContent::Text(replacement));
        }
    }

    messages
}

fn is_idempotent(name: &str, args: &Value) -> bool {
    if IDEMPOTENT_TOOLS.contains(&name) {
        return true;
    }
    if is_shell_tool(name)
        && let Some(command) = args.get("command").and_then(Value::as_str)
    {
        let trimmed = command.trim();
        if READ_ONLY_GIT.iter().any(|p| trimmed.starts_with(p)) {
            return true;
        }
        let head = trimmed.split_whitespace().next().unwrap_or_default();
        return READ_ONLY_SHELL_PREFIXES.contains(&head) && !trimmed.contains('>');
    }
    false
}

/// MD5 over `toolName|canonical-params` with object keys sorted.
pub(crate) fn fingerprint(name: &str, args: &Value) -> String {
    let mut hasher = Md5::new();
    hasher.update(name.as_bytes());
    hasher.update(b"|");
    hasher.update(canonical(args).as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(32);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

fn canonical(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by_key(|(k, _)| k.as_str());
            let inner = entries
                .into_iter()
                .map(|(k, v)| format!("{k:?}:{}", canonical(v)))
                .collect::<Vec<_>>()
                .join(",");
            format!("{{{inner}}}")
        }
        Value::Array(items) => {
            let inner = items.iter().map(canonical).collect::<Vec<_>>().join(",");
            format!("[{inner}]")
        }
        other => other.to_string(),
    }
}

fn jaccard(a: &str, b: &str) -> f64 {
    let set_a: HashSet<&str> = a.split_whitespace().collect();
    let set_b: HashSet<&str> = b.split_whitespace().collect();
    if set_a.is_empty() && set_b.is_empty() {
        return 1.0;
    }
    let intersection = set_a.intersection(&set_b).count();
    let union = set_a.union(&set_b).count();
    intersection as f64 / union as f64
}

fn line_diff(old: &str, new: &str) -> (usize, usize) {
    let old_lines: HashSet<&str> = old.lines().collect();
    let new_lines: HashSet<&str> = new.lines().collect();
    let added = new_lines.difference(&old_lines).count();
    let removed = old_lines.difference(&new_lines).count();
    (added, removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use maki_protocol::openai::{FunctionCall, MessageContent, ToolCall};

    fn read_call(id: &str, path: &str) -> ChatMessage {
        ChatMessage {
            role: Role::Assistant,
            content: None,
            name: None,
            tool_calls: Some(vec![ToolCall {
                id: id.to_string(),
                kind: "function".to_string(),
                function: FunctionCall {
                    name: "Read".to_string(),
                    arguments: format!(r#"{{"file_path":"{path}"}}"#),
                },
            }]),
            tool_call_id: None,
        }
    }

    fn tool_result(id: &str, content: &str) -> ChatMessage {
        ChatMessage {
            role: Role::Tool,
            content: Some(MessageContent::Text(content.to_string())),
            name: None,
            tool_calls: None,
            tool_call_id: Some(id.to_string()),
        }
    }

    fn history() -> Vec<ChatMessage> {
        vec![
            read_call("a", "src/lib.rs"),
            tool_result("a", "fn main() {}\nmod tests;"),
            read_call("b", "src/lib.rs"),
            tool_result("b", "fn main() {}\nmod tests;"),
        ]
    }

    #[test]
    fn identical_reads_collapse_to_stub() {
        let log = ModificationLog::default();
        let out = deduplicate(history(), &log);
        let older = out[1].content_text();
        assert!(older.starts_with(DEDUP_MARKER), "{older}");
        assert!(older.contains("unchanged"));
        // Newest occurrence untouched.
        assert_eq!(out[3].content_text(), "fn main() {}\nmod tests;");
    }

    #[test]
    fn dedup_is_idempotent() {
        let log = ModificationLog::default();
        let once = deduplicate(history(), &log);
        let twice = deduplicate(once.clone(), &log);
        let once_text: Vec<String> = once.iter().map(|m| m.content_text()).collect();
        let twice_text: Vec<String> = twice.iter().map(|m| m.content_text()).collect();
        assert_eq!(once_text, twice_text);
    }

    #[test]
    fn differing_results_get_diff_summary() {
        let mut messages = history();
        messages[3].content = Some(MessageContent::Text(
            "fn main() {}\nmod tests;\nmod extra;".to_string(),
        ));
        let out = deduplicate(messages, &ModificationLog::default());
        let older = out[1].content_text();
        assert!(older.contains("+1 lines / -0 lines"), "{older}");
    }

    #[test]
    fn non_idempotent_calls_pass_through() {
        let mut messages = history();
        for message in &mut messages {
            if let Some(calls) = &mut message.tool_calls {
                calls[0].function.name = "Write".to_string();
            }
        }
        let out = deduplicate(messages.clone(), &ModificationLog::default());
        assert_eq!(out[1].content_text(), messages[1].content_text());
    }

    #[test]
    fn fingerprint_ignores_key_order() {
        let a: Value = serde_json::from_str(r#"{"x":1,"y":2}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"y":2,"x":1}"#).unwrap();
        assert_eq!(fingerprint("Read", &a), fingerprint("Read", &b));
    }
}
