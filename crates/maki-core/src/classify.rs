//! Inbound request classification: method + path + body → one typed client
//! operation with the request already lifted to the canonical OpenAI form.

use bytes::Bytes;
use maki_protocol::{Proto, claude, gemini, ollama, openai};
use maki_transform::chat::ollama2openai::OllamaMode;
use maki_transform::chat::{claude2openai, gemini2openai, ollama2openai};
use serde::de::DeserializeOwned;

use crate::error::ProxyError;

#[derive(Debug)]
pub enum ClientOp {
    Chat {
        request: openai::ChatCompletionRequest,
        stream: bool,
        /// Set when the client arrived through `/api/chat` or `/api/generate`.
        ollama_mode: Option<OllamaMode>,
    },
    ModelsList,
    ModelsGet {
        model: String,
    },
    OllamaTags,
    OllamaShow {
        model: String,
    },
    OllamaVersion,
    Embeddings {
        model: String,
        body: serde_json::Value,
    },
    /// Context-compression opt-in: returns compacted messages, no dispatch.
    Compact {
        messages: Vec<openai::ChatMessage>,
    },
}

#[derive(Debug)]
pub struct ClientRequest {
    pub proto: Proto,
    pub op: ClientOp,
}

pub fn classify_request(
    method: &str,
    path: &str,
    body: Bytes,
) -> Result<ClientRequest, ProxyError> {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    match segments.as_slice() {
        ["v1", "messages"] => {
            ensure_post(method)?;
            let req: claude::MessagesRequest = parse_json(Proto::Claude, &body)?;
            let stream = req.stream.unwrap_or(false);
            Ok(ClientRequest {
                proto: Proto::Claude,
                op: ClientOp::Chat {
                    request: claude2openai::request(req),
                    stream,
                    ollama_mode: None,
                },
            })
        }
        ["v1", "chat", "completions"] => {
            ensure_post(method)?;
            let req: openai::ChatCompletionRequest = parse_json(Proto::OpenAi, &body)?;
            let stream = req.stream.unwrap_or(false);
            Ok(ClientRequest {
                proto: Proto::OpenAi,
                op: ClientOp::Chat {
                    request: req,
                    stream,
                    ollama_mode: None,
                },
            })
        }
        ["v1", "completions"] => {
            ensure_post(method)?;
            let req: openai::CompletionRequest = parse_json(Proto::OpenAi, &body)?;
            let stream = req.stream.unwrap_or(false);
            let chat = openai::ChatCompletionRequest {
                model: req.model.clone(),
                messages: vec![openai::ChatMessage::text(
                    openai::Role::User,
                    req.prompt_text(),
                )],
                temperature: req.temperature,
                top_p: None,
                max_tokens: req.max_tokens,
                stop: req.stop.clone(),
                stream: Some(stream),
                tools: None,
                tool_choice: None,
                user: None,
            };
            Ok(ClientRequest {
                proto: Proto::OpenAi,
                op: ClientOp::Chat {
                    request: chat,
                    stream,
                    ollama_mode: None,
                },
            })
        }
        ["v1", "embeddings"] => {
            ensure_post(method)?;
            let value: serde_json::Value = parse_json(Proto::OpenAi, &body)?;
            let model = value
                .get("model")
                .and_then(|m| m.as_str())
                .unwrap_or_default()
                .to_string();
            Ok(ClientRequest {
                proto: Proto::OpenAi,
                op: ClientOp::Embeddings { model, body: value },
            })
        }
        ["v1", "models"] => {
            ensure_get(method)?;
            Ok(ClientRequest {
                proto: Proto::OpenAi,
                op: ClientOp::ModelsList,
            })
        }
        ["v1", "models", model] => {
            ensure_get(method)?;
            Ok(ClientRequest {
                proto: Proto::OpenAi,
                op: ClientOp::ModelsGet {
                    model: (*model).to_string(),
                },
            })
        }
        ["v1", "compact"] => {
            ensure_post(method)?;
            #[derive(serde::Deserialize)]
            struct CompactBody {
                messages: Vec<openai::ChatMessage>,
            }
            let req: CompactBody = parse_json(Proto::OpenAi, &body)?;
            Ok(ClientRequest {
                proto: Proto::OpenAi,
                op: ClientOp::Compact {
                    messages: req.messages,
                },
            })
        }
        ["v1beta", "models"] | ["v1beta", "models", ""] => {
            ensure_get(method)?;
            Ok(ClientRequest {
                proto: Proto::Gemini,
                op: ClientOp::ModelsList,
            })
        }
        ["v1beta", "models", rest @ ..] => classify_gemini_action(method, &rest.join("/"), body),
        ["api", "chat"] => {
            ensure_post(method)?;
            let req: ollama::ChatRequest = parse_json(Proto::Ollama, &body)?;
            let canonical = ollama2openai::chat_request(req);
            let stream = canonical.stream.unwrap_or(true);
            Ok(ClientRequest {
                proto: Proto::Ollama,
                op: ClientOp::Chat {
                    request: canonical,
                    stream,
                    ollama_mode: Some(OllamaMode::Chat),
                },
            })
        }
        ["api", "generate"] => {
            ensure_post(method)?;
            let req: ollama::GenerateRequest = parse_json(Proto::Ollama, &body)?;
            let canonical = ollama2openai::generate_request(req);
            let stream = canonical.stream.unwrap_or(true);
            Ok(ClientRequest {
                proto: Proto::Ollama,
                op: ClientOp::Chat {
                    request: canonical,
                    stream,
                    ollama_mode: Some(OllamaMode::Generate),
                },
            })
        }
        ["api", "tags"] => {
            ensure_get(method)?;
            Ok(ClientRequest {
                proto: Proto::Ollama,
                op: ClientOp::OllamaTags,
            })
        }
        ["api", "show"] => {
            ensure_post(method)?;
            let req: ollama::ShowRequest = parse_json(Proto::Ollama, &body)?;
            Ok(ClientRequest {
                proto: Proto::Ollama,
                op: ClientOp::OllamaShow { model: req.model },
            })
        }
        ["api", "version"] => {
            ensure_get(method)?;
            Ok(ClientRequest {
                proto: Proto::Ollama,
                op: ClientOp::OllamaVersion,
            })
        }
        _ => Err(ProxyError::not_found("unknown path")),
    }
}

fn classify_gemini_action(
    method: &str,
    joined: &str,
    body: Bytes,
) -> Result<ClientRequest, ProxyError> {
    let Some((model, action)) = joined.split_once(':') else {
        ensure_get(method)?;
        return Ok(ClientRequest {
            proto: Proto::Gemini,
            op: ClientOp::ModelsGet {
                model: joined.to_string(),
            },
        });
    };
    ensure_post(method)?;
    // alt=sse on the query is tolerated; framing stays the JSON array.
    let action = action.split('?').next().unwrap_or(action);
    let stream = match action {
        "generateContent" => false,
        "streamGenerateContent" => true,
        _ => return Err(ProxyError::not_found("unknown gemini action")),
    };
    let req: gemini::GenerateContentRequest = parse_json(Proto::Gemini, &body)?;
    Ok(ClientRequest {
        proto: Proto::Gemini,
        op: ClientOp::Chat {
            request: gemini2openai::request(model, req, stream),
            stream,
            ollama_mode: None,
        },
    })
}

fn parse_json<T: DeserializeOwned>(proto: Proto, body: &[u8]) -> Result<T, ProxyError> {
    if body.is_empty() {
        return Err(ProxyError::bad_request(proto, "missing request body"));
    }
    serde_json::from_slice(body)
        .map_err(|err| ProxyError::bad_request(proto, &format!("invalid json: {err}")))
}

fn ensure_post(method: &str) -> Result<(), ProxyError> {
    if method.eq_ignore_ascii_case("POST") {
        Ok(())
    } else {
        Err(ProxyError::method_not_allowed("expected POST"))
    }
}

fn ensure_get(method: &str) -> Result<(), ProxyError> {
    if method.eq_ignore_ascii_case("GET") {
        Ok(())
    } else {
        Err(ProxyError::method_not_allowed("expected GET"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openai_chat_path_is_classified() {
        let body = Bytes::from_static(
            br#"{"model":"gpt-5","messages":[{"role":"user","content":"hi"}],"stream":true}"#,
        );
        let classified = classify_request("POST", "/v1/chat/completions", body).unwrap();
        assert_eq!(classified.proto, Proto::OpenAi);
        match classified.op {
            ClientOp::Chat { stream, .. } => assert!(stream),
            _ => panic!("expected chat"),
        }
    }

    #[test]
    fn gemini_stream_action_is_classified() {
        let body = Bytes::from_static(br#"{"contents":[{"parts":[{"text":"hi"}]}]}"#);
        let classified = classify_request(
            "POST",
            "/v1beta/models/gemini-2.5-pro:streamGenerateContent",
            body,
        )
        .unwrap();
        assert_eq!(classified.proto, Proto::Gemini);
        match classified.op {
            ClientOp::Chat {
                request, stream, ..
            } => {
                assert!(stream);
                assert_eq!(request.model, "gemini-2.5-pro");
            }
            _ => panic!("expected chat"),
        }
    }

    #[test]
    fn ollama_generate_defaults_to_streaming() {
        let body = Bytes::from_static(br#"{"model":"qwen:qwen3-coder-plus","prompt":"hi"}"#);
        let classified = classify_request("POST", "/api/generate", body).unwrap();
        match classified.op {
            ClientOp::Chat {
                stream,
                ollama_mode,
                ..
            } => {
                assert!(stream);
                assert_eq!(ollama_mode, Some(OllamaMode::Generate));
            }
            _ => panic!("expected chat"),
        }
    }

    #[test]
    fn unknown_path_is_not_found() {
        let err = classify_request("GET", "/v2/nothing", Bytes::new()).unwrap_err();
        assert_eq!(err.status, 404);
    }
}
