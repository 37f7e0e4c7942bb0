use std::collections::HashMap;
use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use tokio::sync::{Mutex, oneshot};

/// Result of one loopback callback session. Exactly one of code / error /
/// timeout resolves the session.
#[derive(Debug)]
pub enum CallbackOutcome {
    Code(String),
    Denied(String),
    Timeout,
}

struct CallbackState {
    expected_state: String,
    publisher: Mutex<Option<oneshot::Sender<CallbackOutcome>>>,
}

async fn handle_callback(
    State(shared): State<Arc<CallbackState>>,
    Query(params): Query<HashMap<String, String>>,
) -> (StatusCode, &'static str) {
    // CSRF check before anything else; a mismatch never resolves the
    // session, so the legitimate redirect can still land.
    match params.get("state") {
        Some(state) if *state == shared.expected_state => {}
        _ => return (StatusCode::BAD_REQUEST, "Invalid state"),
    }

    let outcome = if let Some(error) = params.get("error") {
        let detail = params
            .get("error_description")
            .unwrap_or(error)
            .to_string();
        CallbackOutcome::Denied(detail)
    } else if let Some(code) = params.get("code") {
        CallbackOutcome::Code(code.clone())
    } else {
        return (StatusCode::BAD_REQUEST, "missing code");
    };

    let Some(publisher) = shared.publisher.lock().await.take() else {
        return (StatusCode::CONFLICT, "session already resolved");
    };
    let _ = publisher.send(outcome);
    (
        StatusCode::OK,
        "Authentication complete. You can close this tab.",
    )
}

/// Run an ephemeral callback listener on `127.0.0.1:<port>` until the
/// provider redirects back, the user denies, or the deadline passes. The
/// listener is torn down in every case.
pub async fn wait_for_callback(
    port: u16,
    path: &str,
    expected_state: &str,
    deadline: Duration,
) -> std::io::Result<CallbackOutcome> {
    let (tx, rx) = oneshot::channel();
    let shared = Arc::new(CallbackState {
        expected_state: expected_state.to_string(),
        publisher: Mutex::new(Some(tx)),
    });
    let app = axum::Router::new()
        .route(path, get(handle_callback))
        .with_state(shared);
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", port)).await?;

    tokio::select! {
        served = axum::serve(listener, app).into_future() => {
            served?;
            Ok(CallbackOutcome::Timeout)
        }
        outcome = rx => Ok(outcome.unwrap_or(CallbackOutcome::Timeout)),
        _ = tokio::time::sleep(deadline) => Ok(CallbackOutcome::Timeout),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn free_port() -> u16 {
        let listener = tokio::net::TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        listener.local_addr().unwrap().port()
    }

    #[tokio::test]
    async fn mismatched_state_is_rejected_without_resolving() {
        let port = free_port().await;
        let session = tokio::spawn(async move {
            wait_for_callback(port, "/auth/callback", "expected", Duration::from_secs(5)).await
        });
        tokio::time::sleep(Duration::from_millis(100)).await;

        let url =
            format!("http://127.0.0.1:{port}/auth/callback?code=evil&state=forged");
        let body = http_get(&url).await;
        assert!(body.contains("400"));
        assert!(body.contains("Invalid state"));

        // The legitimate redirect still completes the session.
        let url = format!("http://127.0.0.1:{port}/auth/callback?code=good&state=expected");
        let body = http_get(&url).await;
        assert!(body.contains("200"));

        let outcome = session.await.unwrap().unwrap();
        assert!(matches!(outcome, CallbackOutcome::Code(code) if code == "good"));
    }

    #[tokio::test]
    async fn deadline_tears_the_listener_down() {
        let port = free_port().await;
        let outcome =
            wait_for_callback(port, "/auth/callback", "s", Duration::from_millis(50))
                .await
                .unwrap();
        assert!(matches!(outcome, CallbackOutcome::Timeout));
        // Port is free again once the session ends.
        tokio::net::TcpListener::bind(("127.0.0.1", port)).await.unwrap();
    }

    /// Minimal HTTP/1.1 GET returning the raw status line + body.
    async fn http_get(url: &str) -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        let rest = url.strip_prefix("http://").unwrap();
        let (host, path) = rest.split_once('/').unwrap();
        let mut stream = tokio::net::TcpStream::connect(host).await.unwrap();
        stream
            .write_all(
                format!("GET /{path} HTTP/1.1\r\nHost: {host}\r\nConnection: close\r\n\r\n")
                    .as_bytes(),
            )
            .await
            .unwrap();
        let mut buf = String::new();
        stream.read_to_string(&mut buf).await.unwrap();
        buf
    }
}
