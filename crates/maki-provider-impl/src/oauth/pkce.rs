use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use sha2::{Digest, Sha256};

const VERIFIER_BYTES: usize = 96;
const STATE_BYTES: usize = 32;

#[derive(Debug, Clone)]
pub struct PkcePair {
    pub verifier: String,
    pub challenge: String,
}

/// RFC 7636 S256 pair: 96 random bytes, base64url without padding, and the
/// SHA-256 challenge over the encoded verifier.
pub fn generate_pkce() -> PkcePair {
    let mut bytes = [0u8; VERIFIER_BYTES];
    rand::rng().fill_bytes(&mut bytes);
    let verifier = URL_SAFE_NO_PAD.encode(bytes);
    let challenge = URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()));
    PkcePair { verifier, challenge }
}

/// CSRF state nonce for authorize URLs.
pub fn generate_state() -> String {
    let mut bytes = [0u8; STATE_BYTES];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verifier_is_96_random_bytes_base64url() {
        let pair = generate_pkce();
        let decoded = URL_SAFE_NO_PAD.decode(&pair.verifier).unwrap();
        assert_eq!(decoded.len(), VERIFIER_BYTES);
        assert!(!pair.verifier.contains('='));
        assert!(!pair.verifier.contains('+'));
    }

    #[test]
    fn challenge_is_sha256_of_verifier() {
        let pair = generate_pkce();
        let expected = URL_SAFE_NO_PAD.encode(Sha256::digest(pair.verifier.as_bytes()));
        assert_eq!(pair.challenge, expected);
    }

    #[test]
    fn states_are_unique() {
        assert_ne!(generate_state(), generate_state());
    }
}
