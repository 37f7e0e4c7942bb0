//! Error bodies and terminal stream frames in each client protocol's native
//! shape. Dispatch never leaks an upstream error body verbatim; everything
//! the client sees comes from here.

use bytes::Bytes;
use maki_protocol::{Proto, claude, gemini, ollama, openai};

use crate::frame;

fn openai_error_kind(status: u16) -> &'static str {
    match status {
        400 => "invalid_request_error",
        401 | 403 => "authentication_error",
        429 => "rate_limit_error",
        500..=599 => "api_error",
        _ => "api_error",
    }
}

fn claude_error_kind(status: u16) -> &'static str {
    match status {
        400 => "invalid_request_error",
        401 | 403 => "authentication_error",
        404 => "not_found_error",
        429 => "rate_limit_error",
        529 => "overloaded_error",
        500..=599 => "api_error",
        _ => "api_error",
    }
}

fn gemini_status_label(status: u16) -> &'static str {
    match status {
        400 => "INVALID_ARGUMENT",
        401 => "UNAUTHENTICATED",
        403 => "PERMISSION_DENIED",
        404 => "NOT_FOUND",
        429 => "RESOURCE_EXHAUSTED",
        503 => "UNAVAILABLE",
        _ => "INTERNAL",
    }
}

/// Non-stream error body in the client protocol's native shape.
pub fn error_body(proto: Proto, status: u16, message: &str) -> Bytes {
    let json = match proto {
        Proto::OpenAi => {
            serde_json::to_vec(&openai::ErrorBody::new(openai_error_kind(status), message))
        }
        Proto::Claude => {
            serde_json::to_vec(&claude::ErrorBody::new(claude_error_kind(status), message))
        }
        Proto::Gemini => serde_json::to_vec(&gemini::ErrorBody::new(
            status,
            gemini_status_label(status),
            message,
        )),
        Proto::Ollama => serde_json::to_vec(&ollama::ErrorBody {
            error: message.to_string(),
        }),
    };
    Bytes::from(json.unwrap_or_else(|_| b"{}".to_vec()))
}

/// Frames that terminate an already-started stream with an in-band error.
///
/// Gemini clients stream a JSON array; the engine owns the array brackets,
/// so the Gemini arm returns a bare element.
pub fn terminal_error_frames(proto: Proto, status: u16, message: &str) -> Vec<Bytes> {
    match proto {
        Proto::OpenAi => vec![
            frame::sse_json(&openai::ErrorBody::new(openai_error_kind(status), message)),
            frame::sse_done(),
        ],
        Proto::Claude => {
            let error = claude::StreamEvent::Error {
                error: claude::ErrorDetail {
                    kind: claude_error_kind(status).to_string(),
                    message: message.to_string(),
                },
            };
            vec![
                frame::sse_named(error.event_name(), &error),
                frame::sse_named("message_stop", &claude::StreamEvent::MessageStop),
            ]
        }
        Proto::Gemini => vec![frame::json_element(&gemini::ErrorBody::new(
            status,
            gemini_status_label(status),
            message,
        ))],
        Proto::Ollama => vec![frame::ndjson(&ollama::ErrorBody {
            error: message.to_string(),
        })],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openai_terminal_frames_end_with_done() {
        let frames = terminal_error_frames(Proto::OpenAi, 502, "upstream exploded");
        assert_eq!(frames.len(), 2);
        let first = String::from_utf8(frames[0].to_vec()).unwrap();
        assert!(first.starts_with("data: {\"error\""));
        assert!(first.contains("upstream exploded"));
        assert_eq!(&frames[1][..], b"data: [DONE]\n\n");
    }

    #[test]
    fn claude_terminal_frames_end_with_message_stop() {
        let frames = terminal_error_frames(Proto::Claude, 429, "slow down");
        let last = String::from_utf8(frames[1].to_vec()).unwrap();
        assert!(last.starts_with("event: message_stop\n"));
    }

    #[test]
    fn error_body_shapes_are_protocol_native() {
        let body = error_body(Proto::Claude, 503, "no healthy account");
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["type"], "error");
        assert_eq!(parsed["error"]["message"], "no healthy account");

        let body = error_body(Proto::Gemini, 429, "quota");
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["error"]["status"], "RESOURCE_EXHAUSTED");
    }
}
