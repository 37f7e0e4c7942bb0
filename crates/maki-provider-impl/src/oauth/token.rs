use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use bytes::Bytes;
use maki_provider_core::{FamilyError, FamilyResult, RefreshedTokens};
use serde::Deserialize;

use crate::client::{HttpRequest, HttpResponseBody, REFRESH_TIMEOUT, UpstreamClient};

const REFRESH_ATTEMPTS: u32 = 3;
const REFRESH_BACKOFF_BASE: Duration = Duration::from_millis(1_000);
const REFRESH_BACKOFF_CAP: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub id_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
}

impl TokenResponse {
    pub fn into_refreshed(self, now_ms: i64) -> RefreshedTokens {
        RefreshedTokens {
            access_token: Some(self.access_token),
            refresh_token: self.refresh_token,
            id_token: self.id_token,
            expires_at_ms: self.expires_in.map(|secs| now_ms + secs as i64 * 1_000),
        }
    }
}

fn form_encode(pairs: &[(&str, &str)]) -> String {
    pairs
        .iter()
        .map(|(k, v)| format!("{k}={}", urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

async fn post_form(
    client: &dyn UpstreamClient,
    url: &str,
    pairs: &[(&str, &str)],
) -> FamilyResult<TokenResponse> {
    let request = HttpRequest {
        method: "POST",
        url: url.to_string(),
        headers: vec![(
            "content-type".to_string(),
            "application/x-www-form-urlencoded".to_string(),
        )],
        body: Some(Bytes::from(form_encode(pairs))),
        timeout: REFRESH_TIMEOUT,
    };
    let response = client.send(request, false).await?;
    let HttpResponseBody::Full(body) = response.body else {
        return Err(FamilyError::Other("unexpected streaming token response".to_string()));
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
    serde_json::from_slice(&body)
        .map_err(|err| FamilyError::Other(format!("token response decode: {err}")))
}

/// Exchange an authorization code (+ PKCE verifier) for tokens.
pub async fn exchange_code(
    client: &dyn UpstreamClient,
    token_url: &str,
    client_id: &str,
    redirect_uri: &str,
    code: &str,
    verifier: &str,
) -> FamilyResult<TokenResponse> {
    post_form(
        client,
        token_url,
        &[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri),
            ("client_id", client_id),
            ("code_verifier", verifier),
        ],
    )
    .await
}

fn is_definitive_auth_failure(error: &FamilyError) -> bool {
    match error {
        FamilyError::Http { status, body, .. } => {
            (400..500).contains(status) && body.to_ascii_lowercase().contains("invalid_grant")
        }
        _ => false,
    }
}

/// Refresh with up to three attempts and `min(base·2^i, 10s)` backoff.
/// An explicit `invalid_grant` is definitive and short-circuits the loop.
pub async fn refresh_grant(
    client: &dyn UpstreamClient,
    token_url: &str,
    client_id: &str,
    client_secret: Option<&str>,
    refresh_token: &str,
) -> FamilyResult<TokenResponse> {
    let mut pairs = vec![
        ("grant_type", "refresh_token"),
        ("refresh_token", refresh_token),
        ("client_id", client_id),
    ];
    if let Some(secret) = client_secret {
        pairs.push(("client_secret", secret));
    }

    let mut last_error = FamilyError::Other("refresh never attempted".to_string());
    for attempt in 0..REFRESH_ATTEMPTS {
        match post_form(client, token_url, &pairs).await {
            Ok(tokens) => return Ok(tokens),
            Err(err) if is_definitive_auth_failure(&err) => return Err(err),
            Err(err) => {
                last_error = err;
                let backoff = REFRESH_BACKOFF_BASE
                    .saturating_mul(1 << attempt)
                    .min(REFRESH_BACKOFF_CAP);
                tokio::time::sleep(backoff).await;
            }
        }
    }
    Err(last_error)
}

#[derive(Debug, Clone, Default)]
pub struct IdTokenClaims {
    pub email: Option<String>,
    pub account_id: Option<String>,
}

/// Read (never verify) the JWT payload for profile enrichment.
pub fn parse_id_token_claims(id_token: &str) -> IdTokenClaims {
    let Some(payload) = id_token.split('.').nth(1) else {
        return IdTokenClaims::default();
    };
    let Ok(decoded) = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')) else {
        return IdTokenClaims::default();
    };
    let Ok(value) = serde_json::from_slice::<serde_json::Value>(&decoded) else {
        return IdTokenClaims::default();
    };
    IdTokenClaims {
        email: value
            .get("email")
            .and_then(|v| v.as_str())
            .map(str::to_string),
        account_id: value
            .get("chatgpt_account_id")
            .or_else(|| value.pointer("/https://api.openai.com/auth/chatgpt_account_id"))
            .or_else(|| value.get("sub"))
            .and_then(|v| v.as_str())
            .map(str::to_string),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;

    #[test]
    fn claims_parse_from_unsigned_jwt() {
        let payload = URL_SAFE_NO_PAD
            .encode(br#"{"email":"dev@example.com","sub":"acct-9"}"#);
        let token = format!("eyJhbGciOiJub25lIn0.{payload}.sig");
        let claims = parse_id_token_claims(&token);
        assert_eq!(claims.email.as_deref(), Some("dev@example.com"));
        assert_eq!(claims.account_id.as_deref(), Some("acct-9"));
    }

    #[test]
    fn malformed_token_yields_empty_claims() {
        let claims = parse_id_token_claims("not-a-jwt");
        assert!(claims.email.is_none());
        assert!(claims.account_id.is_none());
    }
}
