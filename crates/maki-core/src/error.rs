use bytes::Bytes;
use maki_protocol::Proto;

/// Error surfaced to the client, already shaped in its protocol's native
/// error body.
#[derive(Debug)]
pub struct ProxyError {
    pub status: u16,
    pub body: Bytes,
    pub content_type: &'static str,
}

impl ProxyError {
    pub fn shaped(proto: Proto, status: u16, message: &str) -> Self {
        Self {
            status,
            body: maki_transform::error_body(proto, status, message),
            content_type: "application/json",
        }
    }

    pub fn bad_request(proto: Proto, message: &str) -> Self {
        Self::shaped(proto, 400, message)
    }

    pub fn not_found(message: &str) -> Self {
        Self::shaped(Proto::OpenAi, 404, message)
    }

    pub fn method_not_allowed(message: &str) -> Self {
        Self::shaped(Proto::OpenAi, 405, message)
    }
}
