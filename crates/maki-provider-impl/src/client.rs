use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use maki_provider_core::{ByteStream, FamilyError, FamilyResult, TransportErrorKind};

pub const DEFAULT_UPSTREAM_TIMEOUT: Duration = Duration::from_secs(120);
pub const REFRESH_TIMEOUT: Duration = Duration::from_secs(30);

const STREAM_CHANNEL_CAPACITY: usize = 32;
const ERROR_BODY_CAP: usize = 64 * 1024;

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: &'static str,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Bytes>,
    pub timeout: Duration,
}

impl HttpRequest {
    pub fn post_json(url: impl Into<String>, body: Bytes) -> Self {
        Self {
            method: "POST",
            url: url.into(),
            headers: vec![("content-type".to_string(), "application/json".to_string())],
            body: Some(body),
            timeout: DEFAULT_UPSTREAM_TIMEOUT,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: "GET",
            url: url.into(),
            headers: Vec::new(),
            body: None,
            timeout: DEFAULT_UPSTREAM_TIMEOUT,
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn bearer(self, token: &str) -> Self {
        self.header("authorization", format!("Bearer {token}"))
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[derive(Debug)]
pub enum HttpResponseBody {
    Full(Bytes),
    Stream(ByteStream),
}

#[derive(Debug)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: HttpResponseBody,
}

impl HttpResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn retry_after_secs(&self) -> Option<u64> {
        self.header("retry-after")?.trim().parse().ok()
    }
}

/// The one seam between adapters and the network. Families and the dispatch
/// engine never name the concrete HTTP client, so tests swap in mocks.
#[async_trait]
pub trait UpstreamClient: Send + Sync {
    /// `stream = false` aggregates the body; `stream = true` hands back a
    /// byte channel once response headers arrive. Non-2xx responses are
    /// always aggregated so callers can classify the error body.
    async fn send(&self, request: HttpRequest, stream: bool) -> FamilyResult<HttpResponse>;
}

pub struct WreqClient {
    client: wreq::Client,
}

impl WreqClient {
    pub fn new() -> FamilyResult<Self> {
        let client = wreq::Client::builder()
            .build()
            .map_err(|err| FamilyError::Other(format!("http client init: {err}")))?;
        Ok(Self { client })
    }
}

fn transport_error(err: &wreq::Error) -> FamilyError {
    let message = err.to_string();
    let kind = if err.is_timeout() {
        TransportErrorKind::Timeout
    } else if err.is_connect() {
        TransportErrorKind::Connect
    } else if message.contains("dns") {
        TransportErrorKind::Dns
    } else if message.contains("certificate") || message.contains("tls") {
        TransportErrorKind::Tls
    } else if message.contains("reset") {
        TransportErrorKind::Reset
    } else {
        TransportErrorKind::Other
    };
    FamilyError::Transport { kind, message }
}

#[async_trait]
impl UpstreamClient for WreqClient {
    async fn send(&self, request: HttpRequest, stream: bool) -> FamilyResult<HttpResponse> {
        let mut builder = match request.method {
            "GET" => self.client.get(&request.url),
            "POST" => self.client.post(&request.url),
            "PUT" => self.client.put(&request.url),
            "DELETE" => self.client.delete(&request.url),
            other => return Err(FamilyError::Other(format!("unsupported method {other}"))),
        };
        builder = builder.timeout(request.timeout);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(|err| transport_error(&err))?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();

        let success = (200..300).contains(&status);
        if stream && success {
            let (tx, rx) = tokio::sync::mpsc::channel(STREAM_CHANNEL_CAPACITY);
            tokio::spawn(async move {
                let mut body = response.bytes_stream();
                while let Some(chunk) = body.next().await {
                    match chunk {
                        Ok(bytes) => {
                            // A dropped receiver aborts the upstream transfer.
                            if tx.send(Ok(bytes)).await.is_err() {
                                break;
                            }
                        }
                        Err(err) => {
                            let _ = tx.send(Err(transport_error(&err))).await;
                            break;
                        }
                    }
                }
            });
            return Ok(HttpResponse {
                status,
                headers,
                body: HttpResponseBody::Stream(rx),
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|err| transport_error(&err))?;
        let bytes = if bytes.len() > ERROR_BODY_CAP && !success {
            bytes.slice(..ERROR_BODY_CAP)
        } else {
            bytes
        };
        Ok(HttpResponse {
            status,
            headers,
            body: HttpResponseBody::Full(bytes),
        })
    }
}
