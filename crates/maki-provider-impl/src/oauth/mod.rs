pub mod loopback;
pub mod manager;
pub mod pkce;
pub mod token;

pub use pkce::{PkcePair, generate_pkce, generate_state};
pub use token::{IdTokenClaims, TokenResponse, parse_id_token_claims};
