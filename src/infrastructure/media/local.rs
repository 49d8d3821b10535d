//! In-process stand-in for the external media provider
//!
//! Admits a party to a channel only with a valid token minted for that
//! channel and uid, and tracks who is in which channel.

use crate::domain::media::{MediaHandle, MediaProvider};
use crate::domain::shared::error::DomainError;
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::{AccountId, ChannelName};
use crate::domain::signaling::SignalingToken;
use crate::infrastructure::signaling::HmacTokenIssuer;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

pub struct LocalMediaProvider {
    verifier: Arc<HmacTokenIssuer>,
    members: RwLock<HashMap<Uuid, MediaHandle>>,
}

impl LocalMediaProvider {
    pub fn new(verifier: Arc<HmacTokenIssuer>) -> Self {
        Self {
            verifier,
            members: RwLock::new(HashMap::new()),
        }
    }

    /// Parties currently joined to `channel`
    pub async fn members_of(&self, channel: &ChannelName) -> Vec<AccountId> {
        let mut parties: Vec<AccountId> = self
            .members
            .read()
            .await
            .values()
            .filter(|h| &h.channel == channel)
            .map(|h| h.party)
            .collect();
        parties.sort();
        parties
    }
}

#[async_trait]
impl MediaProvider for LocalMediaProvider {
    async fn join(
        &self,
        channel: &ChannelName,
        token: &SignalingToken,
        party: AccountId,
    ) -> Result<MediaHandle> {
        let claims = self.verifier.verify(token)?;
        if claims.channel != channel.as_str() || claims.uid != party.as_i64() {
            return Err(DomainError::Unauthorized(format!(
                "token does not admit {} to {}",
                party, channel
            )));
        }

        let handle = MediaHandle {
            id: Uuid::new_v4(),
            channel: channel.clone(),
            party,
        };
        self.members.write().await.insert(handle.id, handle.clone());
        info!("Media: {} joined {}", party, channel);
        Ok(handle)
    }

    async fn leave(&self, handle: &MediaHandle) -> Result<()> {
        match self.members.write().await.remove(&handle.id) {
            Some(_) => {
                info!("Media: {} left {}", handle.party, handle.channel);
                Ok(())
            }
            None => Err(DomainError::NotFound(format!("media handle {}", handle.id))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::signaling::{SignalingTokenIssuer, TokenRole};
    use chrono::Duration;

    fn provider() -> (Arc<HmacTokenIssuer>, LocalMediaProvider) {
        let issuer = Arc::new(HmacTokenIssuer::new("app", "cert", Duration::seconds(60)));
        (issuer.clone(), LocalMediaProvider::new(issuer))
    }

    #[tokio::test]
    async fn test_join_and_leave() {
        let (issuer, media) = provider();
        let channel = ChannelName::from_string("call_2_1_5".to_string());
        let token = issuer
            .issue(&channel, AccountId::new(1), TokenRole::Publisher)
            .unwrap();

        let handle = media.join(&channel, &token, AccountId::new(1)).await.unwrap();
        assert_eq!(media.members_of(&channel).await, vec![AccountId::new(1)]);

        media.leave(&handle).await.unwrap();
        assert!(media.members_of(&channel).await.is_empty());
        assert!(media.leave(&handle).await.is_err());
    }

    #[tokio::test]
    async fn test_token_for_someone_else_is_refused() {
        let (issuer, media) = provider();
        let channel = ChannelName::from_string("call_2_1_5".to_string());
        let token = issuer
            .issue(&channel, AccountId::new(2), TokenRole::Publisher)
            .unwrap();

        let err = media.join(&channel, &token, AccountId::new(1)).await.unwrap_err();
        assert!(matches!(err, DomainError::Unauthorized(_)));
    }
}
