//! Signaling credentials for the external media provider

use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::{AccountId, ChannelName};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque per-party, per-channel credential
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SignalingToken(String);

impl SignalingToken {
    pub fn new(token: String) -> Self {
        Self(token)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// Tokens are credentials; keep them out of logs.
impl fmt::Debug for SignalingToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SignalingToken(<{} bytes>)", self.0.len())
    }
}

/// Tokens issued for both parties when the advisor accepts
#[derive(Debug, Clone, PartialEq)]
pub struct SignalingTokens {
    pub advisor: SignalingToken,
    pub client: SignalingToken,
}

/// Media channel privilege
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenRole {
    Publisher,
    Subscriber,
}

impl TokenRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenRole::Publisher => "publisher",
            TokenRole::Subscriber => "subscriber",
        }
    }
}

/// Issues credentials for the media provider's channels
#[cfg_attr(test, mockall::automock)]
pub trait SignalingTokenIssuer: Send + Sync {
    fn issue(
        &self,
        channel: &ChannelName,
        uid: AccountId,
        role: TokenRole,
    ) -> Result<SignalingToken>;
}

/// Issue publisher tokens for both parties of a channel
pub fn issue_pair(
    issuer: &dyn SignalingTokenIssuer,
    channel: &ChannelName,
    advisor: AccountId,
    client: AccountId,
) -> Result<SignalingTokens> {
    Ok(SignalingTokens {
        advisor: issuer.issue(channel, advisor, TokenRole::Publisher)?,
        client: issuer.issue(channel, client, TokenRole::Publisher)?,
    })
}
