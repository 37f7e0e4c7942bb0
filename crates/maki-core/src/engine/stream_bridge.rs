//! Fan-through of one upstream stream to one client: raw upstream bytes →
//! native chunks → canonical chunks → client-framed bytes. Chunks are
//! forwarded in upstream order; once the first frame has been flushed,
//! upstream failures terminate the stream in-band instead of failing over.

use bytes::Bytes;
use maki_protocol::sse::SseParser;
use maki_protocol::{Proto, claude, gemini, openai};
use maki_provider_core::{ByteStream, FamilyError};
use maki_transform::chat::claude2openai::ClaudeStreamEncoder;
use maki_transform::chat::gemini2openai::GeminiStreamEncoder;
use maki_transform::chat::ollama2openai::{OllamaMode, OllamaStreamEncoder};
use maki_transform::chat::openai2claude::OpenAiStreamDecoder;
use maki_transform::chat::openai2gemini::OpenAiFromGeminiStream;
use maki_transform::frame;

/// Decodes the upstream family's native stream into canonical chunks.
pub enum NativeDecoder {
    OpenAi {
        parser: SseParser,
    },
    Claude {
        parser: SseParser,
        decoder: OpenAiStreamDecoder,
    },
    Gemini {
        parser: SseParser,
        decoder: OpenAiFromGeminiStream,
    },
}

impl NativeDecoder {
    pub fn new(native: Proto, model: &str, created: i64) -> Self {
        match native {
            Proto::Claude => NativeDecoder::Claude {
                parser: SseParser::new(),
                decoder: OpenAiStreamDecoder::new(created),
            },
            Proto::Gemini => NativeDecoder::Gemini {
                parser: SseParser::new(),
                decoder: OpenAiFromGeminiStream::new(
                    format!("chatcmpl-{created:x}"),
                    model,
                    created,
                ),
            },
            // Ollama never appears as a native upstream proto.
            Proto::OpenAi | Proto::Ollama => NativeDecoder::OpenAi {
                parser: SseParser::new(),
            },
        }
    }

    pub fn feed(&mut self, bytes: &Bytes) -> Vec<openai::ChatCompletionChunk> {
        match self {
            NativeDecoder::OpenAi { parser } => parser
                .feed(bytes)
                .into_iter()
                .filter(|frame| frame.data != "[DONE]")
                .filter_map(|frame| serde_json::from_str(&frame.data).ok())
                .collect(),
            NativeDecoder::Claude { parser, decoder } => parser
                .feed(bytes)
                .into_iter()
                .filter_map(|frame| serde_json::from_str::<claude::StreamEvent>(&frame.data).ok())
                .flat_map(|event| decoder.push(event))
                .collect(),
            NativeDecoder::Gemini { parser, decoder } => parser
                .feed(bytes)
                .into_iter()
                .filter_map(|frame| {
                    serde_json::from_str::<gemini::GenerateContentResponse>(&frame.data).ok()
                })
                .flat_map(|element| decoder.push(element))
                .collect(),
        }
    }
}

/// Encodes canonical chunks into the client protocol's stream framing.
pub enum ClientEncoder {
    OpenAi,
    Claude(ClaudeStreamEncoder),
    Gemini {
        encoder: GeminiStreamEncoder,
        wrote_any: bool,
    },
    Ollama {
        encoder: OllamaStreamEncoder,
        created: i64,
    },
}

impl ClientEncoder {
    pub fn new(client: Proto, mode: Option<OllamaMode>, created: i64) -> Self {
        match client {
            Proto::OpenAi => ClientEncoder::OpenAi,
            Proto::Claude => ClientEncoder::Claude(ClaudeStreamEncoder::new()),
            Proto::Gemini => ClientEncoder::Gemini {
                encoder: GeminiStreamEncoder::new(),
                wrote_any: false,
            },
            Proto::Ollama => ClientEncoder::Ollama {
                encoder: OllamaStreamEncoder::new(mode.unwrap_or(OllamaMode::Chat)),
                created,
            },
        }
    }

    pub fn content_type(client: Proto) -> &'static str {
        match client {
            Proto::OpenAi | Proto::Claude => "text/event-stream",
            Proto::Gemini => "application/json",
            Proto::Ollama => "application/x-ndjson",
        }
    }

    pub fn push(&mut self, chunk: &openai::ChatCompletionChunk) -> Vec<Bytes> {
        match self {
            ClientEncoder::OpenAi => vec![frame::sse_json(chunk)],
            ClientEncoder::Claude(encoder) => encoder
                .push(chunk)
                .into_iter()
                .map(|event| frame::sse_named(event.event_name(), &event))
                .collect(),
            ClientEncoder::Gemini { encoder, wrote_any } => encoder
                .push(chunk)
                .into_iter()
                .map(|element| array_frame(wrote_any, frame::json_element(&element)))
                .collect(),
            ClientEncoder::Ollama { encoder, .. } => encoder
                .push(chunk)
                .into_iter()
                .map(|object| frame::ndjson(&object))
                .collect(),
        }
    }

    pub fn finish(&mut self) -> Vec<Bytes> {
        match self {
            ClientEncoder::OpenAi => vec![frame::sse_done()],
            ClientEncoder::Claude(encoder) => encoder
                .finish()
                .into_iter()
                .map(|event| frame::sse_named(event.event_name(), &event))
                .collect(),
            ClientEncoder::Gemini { encoder, wrote_any } => {
                let mut frames: Vec<Bytes> = encoder
                    .finish()
                    .into_iter()
                    .map(|element| array_frame(wrote_any, frame::json_element(&element)))
                    .collect();
                frames.push(if *wrote_any {
                    Bytes::from_static(b"]")
                } else {
                    Bytes::from_static(b"[]")
                });
                frames
            }
            ClientEncoder::Ollama { encoder, created } => encoder
                .finish(*created)
                .into_iter()
                .map(|object| frame::ndjson(&object))
                .collect(),
        }
    }

    /// Protocol-correct in-band termination after an upstream failure.
    pub fn error_frames(&mut self, client: Proto, status: u16, message: &str) -> Vec<Bytes> {
        match self {
            ClientEncoder::Gemini { wrote_any, .. } => {
                let element = maki_transform::terminal_error_frames(client, status, message)
                    .into_iter()
                    .next()
                    .unwrap_or_else(|| Bytes::from_static(b"{}"));
                vec![
                    array_frame(wrote_any, element),
                    Bytes::from_static(b"]"),
                ]
            }
            _ => maki_transform::terminal_error_frames(client, status, message),
        }
    }
}

fn array_frame(wrote_any: &mut bool, element: Bytes) -> Bytes {
    let mut framed = Vec::with_capacity(element.len() + 1);
    if *wrote_any {
        framed.push(b',');
    } else {
        framed.push(b'[');
        *wrote_any = true;
    }
    framed.extend_from_slice(&element);
    Bytes::from(framed)
}

#[derive(Debug)]
pub enum BridgeOutcome {
    /// Upstream drained; client saw a complete, well-terminated stream.
    Completed,
    /// Upstream failed mid-stream; an in-band error chunk ended the stream.
    UpstreamError(FamilyError),
    /// Client went away; upstream transfer was aborted, no node penalty.
    ClientGone,
}

/// Pump one upstream stream into a client-framed byte channel. Returns the
/// client stream plus a handle resolving to how the bridge ended.
pub fn spawn_bridge(
    native: Proto,
    client: Proto,
    mode: Option<OllamaMode>,
    model: String,
    mut upstream: ByteStream,
    created: i64,
) -> (
    tokio::sync::mpsc::Receiver<Bytes>,
    tokio::task::JoinHandle<BridgeOutcome>,
) {
    let (tx, rx) = tokio::sync::mpsc::channel::<Bytes>(32);
    let handle = tokio::spawn(async move {
        let mut decoder = NativeDecoder::new(native, &model, created);
        let mut encoder = ClientEncoder::new(client, mode, created);

        while let Some(item) = upstream.recv().await {
            match item {
                Ok(bytes) => {
                    for chunk in decoder.feed(&bytes) {
                        for framed in encoder.push(&chunk) {
                            if tx.send(framed).await.is_err() {
                                return BridgeOutcome::ClientGone;
                            }
                        }
                    }
                }
                Err(error) => {
                    let status = match &error {
                        FamilyError::Http { status, .. } => *status,
                        _ => 502,
                    };
                    for framed in encoder.error_frames(client, status, &error.to_string()) {
                        if tx.send(framed).await.is_err() {
                            return BridgeOutcome::ClientGone;
                        }
                    }
                    return BridgeOutcome::UpstreamError(error);
                }
            }
        }

        for framed in encoder.finish() {
            if tx.send(framed).await.is_err() {
                return BridgeOutcome::ClientGone;
            }
        }
        BridgeOutcome::Completed
    });
    (rx, handle)
}
