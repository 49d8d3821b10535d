//! Media provider port

use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::{AccountId, ChannelName};
use crate::domain::signaling::SignalingToken;
use async_trait::async_trait;
use uuid::Uuid;

/// A party's membership in a media channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaHandle {
    pub id: Uuid,
    pub channel: ChannelName,
    pub party: AccountId,
}

/// Establishes the actual audio path. Failure recovery is the provider's
/// concern; the session core only joins and leaves.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MediaProvider: Send + Sync {
    async fn join(
        &self,
        channel: &ChannelName,
        token: &SignalingToken,
        party: AccountId,
    ) -> Result<MediaHandle>;

    async fn leave(&self, handle: &MediaHandle) -> Result<()>;
}
