//! HMAC-SHA256 signed channel tokens
//!
//! Format: `base64url(claims_json) "." hex(hmac_sha256(certificate, base64url(claims_json)))`

use crate::config::SignalingConfig;
use crate::domain::shared::error::DomainError;
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::{AccountId, ChannelName};
use crate::domain::signaling::{SignalingToken, SignalingTokenIssuer, TokenRole};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::debug;

type HmacSha256 = Hmac<Sha256>;

/// What a token grants
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    pub app_id: String,
    pub channel: String,
    pub uid: i64,
    pub role: TokenRole,
    pub issued_at: i64,
    pub expires_at: i64,
}

pub struct HmacTokenIssuer {
    app_id: String,
    certificate: Vec<u8>,
    ttl: Duration,
}

impl HmacTokenIssuer {
    pub fn new(app_id: impl Into<String>, certificate: impl AsRef<[u8]>, ttl: Duration) -> Self {
        Self {
            app_id: app_id.into(),
            certificate: certificate.as_ref().to_vec(),
            ttl,
        }
    }

    pub fn from_config(config: &SignalingConfig) -> Self {
        Self::new(
            config.app_id.clone(),
            config.app_certificate.as_bytes(),
            Duration::seconds(config.token_ttl_secs as i64),
        )
    }

    fn mac(&self) -> Result<HmacSha256> {
        HmacSha256::new_from_slice(&self.certificate)
            .map_err(|e| DomainError::Internal(format!("invalid signing key: {}", e)))
    }

    /// Issue a token as of `now`
    pub fn issue_at(
        &self,
        channel: &ChannelName,
        uid: AccountId,
        role: TokenRole,
        now: DateTime<Utc>,
    ) -> Result<SignalingToken> {
        let claims = TokenClaims {
            app_id: self.app_id.clone(),
            channel: channel.as_str().to_string(),
            uid: uid.as_i64(),
            role,
            issued_at: now.timestamp(),
            expires_at: (now + self.ttl).timestamp(),
        };

        let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims)?);
        let mut mac = self.mac()?;
        mac.update(payload.as_bytes());
        let tag = hex::encode(mac.finalize().into_bytes());

        Ok(SignalingToken::new(format!("{}.{}", payload, tag)))
    }

    /// Check signature, app and expiry; returns the claims
    pub fn verify_at(&self, token: &SignalingToken, now: DateTime<Utc>) -> Result<TokenClaims> {
        let (payload, tag) = token
            .as_str()
            .split_once('.')
            .ok_or_else(|| DomainError::Unauthorized("malformed signaling token".to_string()))?;
        let tag = hex::decode(tag)
            .map_err(|_| DomainError::Unauthorized("malformed token signature".to_string()))?;

        let mut mac = self.mac()?;
        mac.update(payload.as_bytes());
        mac.verify_slice(&tag)
            .map_err(|_| DomainError::Unauthorized("bad token signature".to_string()))?;

        let raw = URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|e| DomainError::Decode(format!("token payload: {}", e)))?;
        let claims: TokenClaims = serde_json::from_slice(&raw)?;

        if claims.app_id != self.app_id {
            return Err(DomainError::Unauthorized("token issued for another app".to_string()));
        }
        if claims.expires_at <= now.timestamp() {
            return Err(DomainError::Unauthorized("signaling token expired".to_string()));
        }
        Ok(claims)
    }

    pub fn verify(&self, token: &SignalingToken) -> Result<TokenClaims> {
        self.verify_at(token, Utc::now())
    }
}

impl SignalingTokenIssuer for HmacTokenIssuer {
    fn issue(&self, channel: &ChannelName, uid: AccountId, role: TokenRole) -> Result<SignalingToken> {
        debug!("Issuing {} token for {} on {}", role.as_str(), uid, channel);
        self.issue_at(channel, uid, role, Utc::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issuer() -> HmacTokenIssuer {
        HmacTokenIssuer::new("app", "certificate", Duration::seconds(3600))
    }

    fn channel() -> ChannelName {
        ChannelName::from_string("call_2_1_1700000000000".to_string())
    }

    #[test]
    fn test_issued_token_verifies() {
        let issuer = issuer();
        let now = Utc::now();
        let token = issuer
            .issue_at(&channel(), AccountId::new(1), TokenRole::Publisher, now)
            .unwrap();

        let claims = issuer.verify_at(&token, now).unwrap();
        assert_eq!(claims.uid, 1);
        assert_eq!(claims.channel, "call_2_1_1700000000000");
        assert_eq!(claims.role, TokenRole::Publisher);
    }

    #[test]
    fn test_tokens_differ_per_party() {
        let issuer = issuer();
        let now = Utc::now();
        let a = issuer.issue_at(&channel(), AccountId::new(1), TokenRole::Publisher, now).unwrap();
        let b = issuer.issue_at(&channel(), AccountId::new(2), TokenRole::Publisher, now).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_tampered_token_is_rejected() {
        let issuer = issuer();
        let now = Utc::now();
        let token = issuer
            .issue_at(&channel(), AccountId::new(1), TokenRole::Publisher, now)
            .unwrap();

        let forged_claims = TokenClaims {
            app_id: "app".to_string(),
            channel: channel().as_str().to_string(),
            uid: 99,
            role: TokenRole::Publisher,
            issued_at: now.timestamp(),
            expires_at: now.timestamp() + 3600,
        };
        let forged_payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&forged_claims).unwrap());
        let (_, tag) = token.as_str().split_once('.').unwrap();
        let forged = SignalingToken::new(format!("{}.{}", forged_payload, tag));

        assert!(matches!(
            issuer.verify_at(&forged, now),
            Err(DomainError::Unauthorized(_))
        ));
    }

    #[test]
    fn test_other_certificate_is_rejected() {
        let now = Utc::now();
        let token = issuer()
            .issue_at(&channel(), AccountId::new(1), TokenRole::Publisher, now)
            .unwrap();
        let other = HmacTokenIssuer::new("app", "another-certificate", Duration::seconds(3600));
        assert!(other.verify_at(&token, now).is_err());
    }

    #[test]
    fn test_expired_token_is_rejected() {
        let issuer = issuer();
        let now = Utc::now();
        let token = issuer
            .issue_at(&channel(), AccountId::new(1), TokenRole::Subscriber, now)
            .unwrap();
        assert!(issuer.verify_at(&token, now + Duration::seconds(3601)).is_err());
    }
}
