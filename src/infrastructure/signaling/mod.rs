//! Signaling token issuers

pub mod hmac_token;

pub use hmac_token::{HmacTokenIssuer, TokenClaims};
