//! Stage 1: walk the history and record, per normalised path, the last
//! message index at which the file was (possibly) modified. Fleet-wide
//! operations (branch switches, package installs) set a global index.

use std::collections::HashMap;

use maki_protocol::openai::{ChatMessage, Role};
use serde_json::Value;

const WRITE_TOOLS: &[&str] = &["Edit", "Write", "NotebookEdit"];

const GLOBAL_SHELL_PATTERNS: &[&str] = &[
    "git checkout",
    "git reset",
    "git revert",
    "git merge",
    "git rebase",
    "npm install",
    "npm ci",
    "yarn add",
    "pnpm install",
    "pip install",
    "cargo add",
    "apt install",
    "apt-get install",
];

#[derive(Debug, Default)]
pub struct ModificationLog {
    pub last_modified: HashMap<String, usize>,
    pub global_index: Option<usize>,
}

impl ModificationLog {
    /// Is an observation of `path` at message `index` older than the last
    /// known modification?
    pub fn is_stale(&self, path: Option<&str>, index: usize) -> bool {
        if let Some(global) = self.global_index
            && index < global
        {
            return true;
        }
        match path {
            Some(path) => self
                .last_modified
                .get(&normalize_path(path))
                .is_some_and(|modified| index < *modified),
            None => false,
        }
    }
}

pub fn track(messages: &[ChatMessage]) -> ModificationLog {
    let mut log = ModificationLog::default();
    for (index, message) in messages.iter().enumerate() {
        if message.role != Role::Assistant {
            continue;
        }
        for call in message.tool_calls.iter().flatten() {
            let name = call.function.name.as_str();
            let args: Value =
                serde_json::from_str(&call.function.arguments).unwrap_or(Value::Null);
            if WRITE_TOOLS.contains(&name) {
                if let Some(path) = arg_path(&args) {
                    log.last_modified.insert(normalize_path(&path), index);
                }
                continue;
            }
            if is_shell_tool(name)
                && let Some(command) = args.get("command").and_then(Value::as_str)
            {
                track_shell(command, index, &mut log);
            }
        }
    }
    log
}

fn track_shell(command: &str, index: usize, log: &mut ModificationLog) {
    let lowered = command.to_ascii_lowercase();
    if GLOBAL_SHELL_PATTERNS
        .iter()
        .any(|pattern| lowered.contains(pattern))
    {
        log.global_index = Some(index);
        return;
    }
    if let Some(target) = redirection_target(command) {
        log.last_modified.insert(normalize_path(&target), index);
        return;
    }
    if lowered.contains("sed -i")
        && let Some(target) = command.split_whitespace().last()
    {
        log.last_modified
            .insert(normalize_path(target), index);
    }
}

/// Target of the last `>` / `>>` redirection, if any.
fn redirection_target(command: &str) -> Option<String> {
    let idx = command.rfind('>')?;
    let rest = command[idx + 1..].trim();
    let target = rest.split_whitespace().next()?;
    if target.is_empty() || target.starts_with('&') {
        return None;
    }
    Some(target.trim_matches(['"', '\'']).to_string())
}

pub(crate) fn is_shell_tool(name: &str) -> bool {
    name == "Bash" || name == "Shell" || name == "run_shell_command"
}

pub(crate) fn arg_path(args: &Value) -> Option<String> {
    for key in ["file_path", "path", "notebook_path"] {
        if let Some(path) = args.get(key).and_then(Value::as_str) {
            return Some(path.to_string());
        }
    }
    None
}

pub(crate) fn normalize_path(path: &str) -> String {
    let trimmed = path.trim();
    trimmed.strip_prefix("./").unwrap_or(trimmed).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use maki_protocol::openai::{FunctionCall, ToolCall};

    fn assistant_call(name: &str, arguments: &str) -> ChatMessage {
        ChatMessage {
            role: Role::Assistant,
            content: None,
            name: None,
            tool_calls: Some(vec![ToolCall {
                id: "c1".to_string(),
                kind: "function".to_string(),
                function: FunctionCall {
                    name: name.to_string(),
                    arguments: arguments.to_string(),
                },
            }]),
            tool_call_id: None,
        }
    }

    #[test]
    fn write_tools_record_per_path_indices() {
        let messages = vec![
            ChatMessage::text(Role::User, "edit it"),
            assistant_call("Edit", r#"{"file_path":"./src/main.rs"}"#),
        ];
        let log = track(&messages);
        assert_eq!(log.last_modified.get("src/main.rs"), Some(&1));
        assert!(log.is_stale(Some("src/main.rs"), 0));
        assert!(!log.is_stale(Some("src/main.rs"), 1));
    }

    #[test]
    fn branch_switch_sets_global_index() {
        let messages = vec![
            assistant_call("Bash", r#"{"command":"git checkout feature"}"#),
        ];
        let log = track(&messages);
        assert_eq!(log.global_index, Some(0));
    }

    #[test]
    fn redirection_records_target() {
        let messages = vec![assistant_call(
            "Bash",
            r#"{"command":"echo hi > notes.txt"}"#,
        )];
        let log = track(&messages);
        assert_eq!(log.last_modified.get("notes.txt"), Some(&0));
    }
}
