pub mod codex;
pub mod custom;
pub mod geminicli;
pub mod kiro;
pub mod letta;
pub mod qwen;

use bytes::Bytes;
use maki_provider_core::{ByteStream, FamilyError, FamilyResult, UpstreamResponse};
use serde::Serialize;

use crate::client::{HttpRequest, HttpResponseBody, UpstreamClient};

pub(crate) fn json_body<T: Serialize>(value: &T) -> FamilyResult<Bytes> {
    serde_json::to_vec(value)
        .map(Bytes::from)
        .map_err(|err| FamilyError::Other(format!("request encode: {err}")))
}

/// Send and aggregate; non-2xx becomes a typed `FamilyError::Http` carrying
/// the body snippet and any `Retry-After`.
pub(crate) async fn send_unary(
    client: &dyn UpstreamClient,
    request: HttpRequest,
) -> FamilyResult<UpstreamResponse> {
    let response = client.send(request, false).await?;
    let HttpResponseBody::Full(body) = response.body else {
        return Err(FamilyError::Other("unexpected streaming body".to_string()));
    };
    if !(200..300).contains(&response.status) {
        return Err(FamilyError::Http {
            status: response.status,
            body: String::from_utf8_lossy(&body).into_owned(),
            retry_after_secs: response
                .headers
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case("retry-after"))
                .and_then(|(_, v)| v.trim().parse().ok()),
        });
    }
    Ok(UpstreamResponse {
        status: response.status,
        body,
    })
}

/// Open a stream; a non-2xx status is surfaced as `FamilyError::Http`
/// before any byte reaches the dispatch loop, so fail-over stays possible.
pub(crate) async fn send_stream(
    client: &dyn UpstreamClient,
    request: HttpRequest,
) -> FamilyResult<ByteStream> {
    let response = client.send(request, true).await?;
    match response.body {
        HttpResponseBody::Stream(stream) if (200..300).contains(&response.status) => Ok(stream),
        HttpResponseBody::Stream(mut stream) => {
            // Error bodies are small; drain what the upstream sent.
            let mut collected = Vec::new();
            while let Some(Ok(chunk)) = stream.recv().await {
                collected.extend_from_slice(&chunk);
                if collected.len() > 64 * 1024 {
                    break;
                }
            }
            Err(FamilyError::Http {
                status: response.status,
                body: String::from_utf8_lossy(&collected).into_owned(),
                retry_after_secs: response
                    .headers
                    .iter()
                    .find(|(k, _)| k.eq_ignore_ascii_case("retry-after"))
                    .and_then(|(_, v)| v.trim().parse().ok()),
            })
        }
        HttpResponseBody::Full(body) => {
            if (200..300).contains(&response.status) {
                // Upstream answered without streaming; forward as one chunk.
                let (tx, rx) = tokio::sync::mpsc::channel(1);
                let _ = tx.try_send(Ok(body));
                Ok(rx)
            } else {
                Err(FamilyError::Http {
                    status: response.status,
                    body: String::from_utf8_lossy(&body).into_owned(),
                    retry_after_secs: None,
                })
            }
        }
    }
}
