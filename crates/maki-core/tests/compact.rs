use maki_core::compact::compress;
use maki_protocol::openai::{
    ChatMessage, FunctionCall, MessageContent, Role, ToolCall,
};

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

/// A long session: an instruction up front, a stretch of repetitive
/// read/reason noise, then recent work.
fn long_session() -> Vec<ChatMessage> {
    let mut messages = vec![ChatMessage::text(
        Role::User,
        "refactor the retry loop in src/dispatch.rs",
    )];
    for i in 0..40 {
        messages.push(read_call(&format!("call_{i}"), "src/dispatch.rs"));
        messages.push(tool_result(
            &format!("call_{i}"),
            "fn dispatch() {\n    // retry loop\n}\n",
        ));
        messages.push(ChatMessage::text(
            Role::Assistant,
            format!("observation {i}: still looking at the loop"),
        ));
    }
    messages.push(ChatMessage::text(Role::User, "ok apply the fix now"));
    messages
}

#[test]
fn compression_shrinks_history_but_keeps_instructions() {
    let input = long_session();
    let input_len = input.len();
    let output = compress(input, 0);

    assert!(output.stats.output_messages < input_len);
    assert!(output.stats.discarded > 0, "{:?}", output.stats);
    assert!(output.stats.compression_ratio < 1.0);
    assert_eq!(output.stats.input_messages, input_len);

    // Both user instructions survive verbatim.
    let texts: Vec<String> = output.messages.iter().map(|m| m.content_text()).collect();
    assert!(texts.iter().any(|t| t.contains("refactor the retry loop")));
    assert!(texts.iter().any(|t| t == "ok apply the fix now"));

    // Duplicate reads collapsed: at most one full copy of the file body
    // survives among the tool results.
    let full_copies = output
        .messages
        .iter()
        .filter(|m| m.content_text().contains("// retry loop"))
        .count();
    assert!(full_copies <= 1, "found {full_copies} full copies");
}

#[test]
fn ordering_is_preserved() {
    let output = compress(long_session(), 0);
    let first = output
        .messages
        .iter()
        .position(|m| m.content_text().contains("refactor the retry loop"));
    let last = output
        .messages
        .iter()
        .position(|m| m.content_text() == "ok apply the fix now");
    assert!(first.unwrap() < last.unwrap());
}

#[test]
fn empty_history_is_a_noop() {
    let output = compress(Vec::new(), 0);
    assert_eq!(output.stats.output_messages, 0);
    assert_eq!(output.stats.compression_ratio, 1.0);
    assert!(output.messages.is_empty());
}
