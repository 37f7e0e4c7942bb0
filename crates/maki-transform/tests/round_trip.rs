use maki_protocol::{claude, gemini, ollama, openai};
use maki_transform::chat::{claude2openai, gemini2openai, ollama2openai, openai2claude, openai2gemini};
use serde_json::json;

fn claude_fixture() -> claude::MessagesRequest {
    claude::MessagesRequest {
        model: "claude-sonnet-4".to_string(),
        max_tokens: 512,
        messages: vec![
            claude::Message {
                role: claude::Role::User,
                content: claude::MessageContent::Text("list the files".to_string()),
            },
            claude::Message {
                role: claude::Role::Assistant,
                content: claude::MessageContent::Blocks(vec![
                    claude::ContentBlock::Text {
                        text: "checking".to_string(),
                    },
                    claude::ContentBlock::ToolUse {
                        id: "toolu_1".to_string(),
                        name: "ls".to_string(),
                        input: json!({"path": "/tmp"}),
                    },
                ]),
            },
            claude::Message {
                role: claude::Role::User,
                content: claude::MessageContent::Blocks(vec![claude::ContentBlock::ToolResult {
                    tool_use_id: "toolu_1".to_string(),
                    content: Some(json!("a.txt\nb.txt")),
                    is_error: None,
                }]),
            },
        ],
        system: Some(claude::SystemSpec::Text("be terse".to_string())),
        temperature: Some(0.2),
        top_p: Some(0.9),
        stop_sequences: Some(vec!["END".to_string()]),
        stream: Some(false),
        tools: Some(vec![claude::ToolDef {
            name: "ls".to_string(),
            description: Some("list a directory".to_string()),
            input_schema: json!({"type": "object", "properties": {"path": {"type": "string"}}}),
        }]),
        tool_choice: None,
        metadata: None,
    }
}

#[test]
fn claude_request_round_trips_through_canonical() {
    let original = claude_fixture();
    let canonical = claude2openai::request(original.clone());
    let back = openai2claude::request(canonical);

    assert_eq!(back.model, original.model);
    assert_eq!(back.max_tokens, original.max_tokens);
    assert_eq!(back.temperature, original.temperature);
    assert_eq!(back.top_p, original.top_p);
    assert_eq!(back.stop_sequences, original.stop_sequences);
    assert_eq!(
        back.system.as_ref().map(claude::SystemSpec::flat_text),
        original.system.as_ref().map(claude::SystemSpec::flat_text)
    );
    assert_eq!(back.messages.len(), original.messages.len());

    // Tool round trip: same name and schema.
    let back_tools = back.tools.unwrap();
    assert_eq!(back_tools.len(), 1);
    assert_eq!(back_tools[0].name, "ls");
    assert_eq!(
        back_tools[0].input_schema["properties"]["path"]["type"],
        "string"
    );

    // The assistant turn keeps its tool_use block with parsed input.
    let claude::MessageContent::Blocks(blocks) = &back.messages[1].content else {
        panic!("assistant turn should be blocks");
    };
    assert!(blocks.iter().any(|b| matches!(
        b,
        claude::ContentBlock::ToolUse { id, name, input }
            if id == "toolu_1" && name == "ls" && input["path"] == "/tmp"
    )));
}

#[test]
fn gemini_request_round_trips_through_canonical() {
    let original = gemini::GenerateContentRequest {
        contents: vec![
            gemini::Content {
                role: Some("user".to_string()),
                parts: vec![gemini::Part::text("what's the weather")],
            },
            gemini::Content {
                role: Some("model".to_string()),
                parts: vec![gemini::Part {
                    function_call: Some(gemini::FunctionCall {
                        name: "get_weather".to_string(),
                        args: json!({"city": "Berlin"}),
                    }),
                    ..gemini::Part::default()
                }],
            },
            gemini::Content {
                role: Some("user".to_string()),
                parts: vec![gemini::Part {
                    function_response: Some(gemini::FunctionResponse {
                        name: "get_weather".to_string(),
                        response: json!({"temp_c": 21}),
                    }),
                    ..gemini::Part::default()
                }],
            },
        ],
        system_instruction: Some(gemini::Content {
            role: None,
            parts: vec![gemini::Part::text("answer in celsius")],
        }),
        tools: Some(vec![gemini::Tool {
            function_declarations: vec![gemini::FunctionDeclaration {
                name: "get_weather".to_string(),
                description: None,
                parameters: Some(json!({"type": "object"})),
            }],
        }]),
        generation_config: Some(gemini::GenerationConfig {
            temperature: Some(0.5),
            top_p: None,
            max_output_tokens: Some(256),
            stop_sequences: None,
        }),
    };

    let canonical = gemini2openai::request("gemini-2.5-pro", original.clone(), false);
    assert_eq!(canonical.model, "gemini-2.5-pro");
    assert_eq!(canonical.temperature, Some(0.5));
    assert_eq!(canonical.max_tokens, Some(256));

    let back = openai2gemini::request(canonical);
    assert_eq!(back.contents.len(), original.contents.len());
    assert_eq!(
        back.system_instruction.unwrap().parts[0].text.as_deref(),
        Some("answer in celsius")
    );
    let call = back.contents[1].parts[0].function_call.as_ref().unwrap();
    assert_eq!(call.name, "get_weather");
    assert_eq!(call.args["city"], "Berlin");
    let resp = back.contents[2].parts[0].function_response.as_ref().unwrap();
    assert_eq!(resp.name, "get_weather");
    assert_eq!(resp.response["temp_c"], 21);
}

#[test]
fn ollama_chat_round_trips_to_canonical_and_back() {
    let req = ollama::ChatRequest {
        model: "kiro:claude-sonnet-4".to_string(),
        messages: vec![
            ollama::ChatMessage {
                role: "system".to_string(),
                content: "you are a proxy".to_string(),
                images: None,
            },
            ollama::ChatMessage {
                role: "user".to_string(),
                content: "hi".to_string(),
                images: None,
            },
        ],
        stream: None,
        options: Some(ollama::Options {
            temperature: Some(0.1),
            top_p: None,
            num_predict: Some(64),
            stop: None,
        }),
    };
    let canonical = ollama2openai::chat_request(req);
    assert_eq!(canonical.stream, Some(true), "ollama defaults to streaming");
    assert_eq!(canonical.max_tokens, Some(64));
    assert_eq!(canonical.messages[0].role, openai::Role::System);

    let resp = openai::ChatCompletionResponse {
        id: "chatcmpl-1".to_string(),
        object: "chat.completion".to_string(),
        created: 1_700_000_000,
        model: "kiro:claude-sonnet-4".to_string(),
        choices: vec![openai::Choice {
            index: 0,
            message: openai::ChatMessage::text(openai::Role::Assistant, "hello"),
            finish_reason: Some(openai::FinishReason::Stop),
        }],
        usage: Some(openai::Usage {
            prompt_tokens: 3,
            completion_tokens: 2,
            total_tokens: 5,
        }),
    };
    let out = ollama2openai::chat_response(resp);
    assert!(out.done);
    assert_eq!(out.message.unwrap().content, "hello");
    assert_eq!(out.done_reason.as_deref(), Some("stop"));
    assert_eq!(out.eval_count, Some(2));
}

#[test]
fn claude_stream_encoder_emits_anthropic_event_sequence() {
    let mut enc = claude2openai::ClaudeStreamEncoder::new();
    let mut chunk = openai::ChatCompletionChunk::empty("chatcmpl-9", "gpt-5", 1);
    chunk.choices.push(openai::ChunkChoice {
        index: 0,
        delta: openai::Delta {
            role: Some(openai::Role::Assistant),
            content: Some("hel".to_string()),
            tool_calls: None,
        },
        finish_reason: None,
    });
    let events = enc.push(&chunk);
    let names: Vec<_> = events.iter().map(|e| e.event_name()).collect();
    assert_eq!(
        names,
        ["message_start", "content_block_start", "content_block_delta"]
    );

    let mut tail = openai::ChatCompletionChunk::empty("chatcmpl-9", "gpt-5", 1);
    tail.choices.push(openai::ChunkChoice {
        index: 0,
        delta: openai::Delta::default(),
        finish_reason: Some(openai::FinishReason::Stop),
    });
    enc.push(&tail);
    let names: Vec<_> = enc.finish().iter().map(|e| e.event_name()).collect();
    assert_eq!(names, ["content_block_stop", "message_delta", "message_stop"]);
}

#[test]
fn claude_stream_decoder_maps_tool_use_to_tool_call_deltas() {
    let mut dec = openai2claude::OpenAiStreamDecoder::new(1);
    dec.push(claude::StreamEvent::MessageStart {
        message: claude::MessagesResponse {
            id: "msg_1".to_string(),
            kind: "message".to_string(),
            role: claude::Role::Assistant,
            content: vec![],
            model: "claude-sonnet-4".to_string(),
            stop_reason: None,
            stop_sequence: None,
            usage: claude::Usage {
                input_tokens: 10,
                output_tokens: 0,
            },
        },
    });
    let chunks = dec.push(claude::StreamEvent::ContentBlockStart {
        index: 1,
        content_block: claude::ContentBlock::ToolUse {
            id: "toolu_1".to_string(),
            name: "ls".to_string(),
            input: json!({}),
        },
    });
    let call = &chunks[0].choices[0].delta.tool_calls.as_ref().unwrap()[0];
    assert_eq!(call.id.as_deref(), Some("toolu_1"));
    assert_eq!(
        call.function.as_ref().unwrap().name.as_deref(),
        Some("ls")
    );

    let chunks = dec.push(claude::StreamEvent::MessageDelta {
        delta: claude::MessageDeltaBody {
            stop_reason: Some(claude::StopReason::ToolUse),
            stop_sequence: None,
        },
        usage: Some(claude::DeltaUsage { output_tokens: 7 }),
    });
    assert_eq!(
        chunks[0].choices[0].finish_reason,
        Some(openai::FinishReason::ToolCalls)
    );
    assert_eq!(chunks[0].usage.as_ref().unwrap().total_tokens, 17);
}

#[test]
fn gemini_stream_encoder_buffers_tool_calls_until_finish() {
    let mut enc = gemini2openai::GeminiStreamEncoder::new();
    let mut chunk = openai::ChatCompletionChunk::empty("chatcmpl-2", "gemini-2.5-pro", 1);
    chunk.choices.push(openai::ChunkChoice {
        index: 0,
        delta: openai::Delta {
            tool_calls: Some(vec![openai::ToolCallDelta {
                index: 0,
                id: Some("call_0".to_string()),
                kind: Some("function".to_string()),
                function: Some(openai::FunctionCallDelta {
                    name: Some("get_weather".to_string()),
                    arguments: Some("{\"city\":".to_string()),
                }),
            }]),
            ..openai::Delta::default()
        },
        finish_reason: None,
    });
    assert!(enc.push(&chunk).is_empty(), "tool args buffer until finish");

    let mut tail = openai::ChatCompletionChunk::empty("chatcmpl-2", "gemini-2.5-pro", 1);
    tail.choices.push(openai::ChunkChoice {
        index: 0,
        delta: openai::Delta {
            tool_calls: Some(vec![openai::ToolCallDelta {
                index: 0,
                id: None,
                kind: None,
                function: Some(openai::FunctionCallDelta {
                    name: None,
                    arguments: Some("\"Berlin\"}".to_string()),
                }),
            }]),
            ..openai::Delta::default()
        },
        finish_reason: Some(openai::FinishReason::ToolCalls),
    });
    enc.push(&tail);
    let elements = enc.finish();
    assert_eq!(elements.len(), 1);
    let call = elements[0].candidates[0].content.parts[0]
        .function_call
        .as_ref()
        .unwrap();
    assert_eq!(call.name, "get_weather");
    assert_eq!(call.args["city"], "Berlin");
}
