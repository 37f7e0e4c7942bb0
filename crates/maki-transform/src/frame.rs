//! Client-facing wire framing for streamed responses.

use bytes::Bytes;
use serde::Serialize;

/// `data: <json>\n\n` — OpenAI-style anonymous SSE frame.
pub fn sse_json<T: Serialize>(value: &T) -> Bytes {
    let json = serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string());
    Bytes::from(format!("data: {json}\n\n"))
}

/// OpenAI stream terminator.
pub fn sse_done() -> Bytes {
    Bytes::from_static(b"data: [DONE]\n\n")
}

/// `event: <name>\ndata: <json>\n\n` — Anthropic-style named SSE frame.
pub fn sse_named<T: Serialize>(event: &str, value: &T) -> Bytes {
    let json = serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string());
    Bytes::from(format!("event: {event}\ndata: {json}\n\n"))
}

/// One NDJSON line (Ollama framing).
pub fn ndjson<T: Serialize>(value: &T) -> Bytes {
    let json = serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string());
    Bytes::from(format!("{json}\n"))
}

/// Raw JSON bytes for one element of a Gemini stream array. The caller owns
/// the surrounding `[`, `,` separators and `]`.
pub fn json_element<T: Serialize>(value: &T) -> Bytes {
    Bytes::from(serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string()))
}
