use serde::{Deserialize, Serialize};

use crate::family::{FamilyError, TransportErrorKind};

/// Coarse outcome classification driving the lifecycle state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskSignal {
    Success,
    ManualRelease,
    AuthInvalid,
    QuotaExceeded,
    RateLimited,
    Suspended,
    Banned,
    IdentityCollision,
    NetworkTransient,
    ProviderMarkedHealthy,
    ProviderMarkedUnhealthy,
    ProviderNeedsRefresh,
    ProviderDisabled,
    ProviderEnabled,
    Unknown,
}

/// Canonical lockout phrase sets, matched case-insensitively against
/// upstream error bodies. Body markers outrank the HTTP status.
const SUSPENSION_MARKERS: &[&str] = &[
    "temporarily suspended",
    "423 locked",
    "account locked",
    "account suspended",
];

const BAN_MARKERS: &[&str] = &["permanently disabled", "banned", "account terminated"];

pub fn signal_from_http(status: u16, body: &str) -> RiskSignal {
    let lowered = body.to_ascii_lowercase();
    if BAN_MARKERS.iter().any(|marker| lowered.contains(marker)) {
        return RiskSignal::Banned;
    }
    if SUSPENSION_MARKERS
        .iter()
        .any(|marker| lowered.contains(marker))
    {
        return RiskSignal::Suspended;
    }
    match status {
        200..=299 => RiskSignal::Success,
        401 | 403 => RiskSignal::AuthInvalid,
        402 => RiskSignal::QuotaExceeded,
        423 => RiskSignal::Suspended,
        429 => RiskSignal::RateLimited,
        500..=599 => RiskSignal::NetworkTransient,
        _ => RiskSignal::Unknown,
    }
}

/// Signal plus journal context for a failed upstream attempt.
pub fn classify_failure(error: &FamilyError) -> (RiskSignal, String, Option<u16>, Option<String>) {
    match error {
        FamilyError::Http {
            status,
            body,
            retry_after_secs: _,
        } => {
            let signal = signal_from_http(*status, body);
            (
                signal,
                format!("http_{status}"),
                Some(*status),
                Some(snippet(body)),
            )
        }
        FamilyError::Transport { kind, message } => {
            let code = match kind {
                TransportErrorKind::Timeout => "transport_timeout",
                TransportErrorKind::Connect => "transport_connect",
                TransportErrorKind::Dns => "transport_dns",
                TransportErrorKind::Tls => "transport_tls",
                TransportErrorKind::Reset => "transport_reset",
                TransportErrorKind::Other => "transport_other",
            };
            (
                RiskSignal::NetworkTransient,
                code.to_string(),
                None,
                Some(snippet(message)),
            )
        }
        FamilyError::MissingCredential(field) => (
            RiskSignal::AuthInvalid,
            format!("missing_{field}"),
            None,
            None,
        ),
        FamilyError::InvalidConfig(msg) | FamilyError::Other(msg) => (
            RiskSignal::Unknown,
            "internal".to_string(),
            None,
            Some(snippet(msg)),
        ),
        FamilyError::Unsupported(what) => (
            RiskSignal::Unknown,
            format!("unsupported_{what}"),
            None,
            None,
        ),
    }
}

const SNIPPET_MAX: usize = 256;

fn snippet(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.len() <= SNIPPET_MAX {
        return trimmed.to_string();
    }
    let mut cut = SNIPPET_MAX;
    while !trimmed.is_char_boundary(cut) {
        cut -= 1;
    }
    trimmed[..cut].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping_follows_taxonomy() {
        assert_eq!(signal_from_http(200, ""), RiskSignal::Success);
        assert_eq!(signal_from_http(401, ""), RiskSignal::AuthInvalid);
        assert_eq!(signal_from_http(403, ""), RiskSignal::AuthInvalid);
        assert_eq!(signal_from_http(402, ""), RiskSignal::QuotaExceeded);
        assert_eq!(signal_from_http(423, ""), RiskSignal::Suspended);
        assert_eq!(signal_from_http(429, ""), RiskSignal::RateLimited);
        assert_eq!(signal_from_http(502, ""), RiskSignal::NetworkTransient);
        assert_eq!(signal_from_http(418, ""), RiskSignal::Unknown);
    }

    #[test]
    fn body_markers_override_status() {
        assert_eq!(
            signal_from_http(200, "Your account is Temporarily Suspended"),
            RiskSignal::Suspended
        );
        assert_eq!(
            signal_from_http(400, "this key was permanently disabled"),
            RiskSignal::Banned
        );
    }
}
