//! One connected party: its feed plus its own media membership

use crate::application::dispatcher::FeedSubscription;
use crate::domain::account::Role;
use crate::domain::call_request::CallRequestStatus;
use crate::domain::media::{MediaHandle, MediaProvider};
use crate::domain::notification::Notification;
use crate::domain::shared::error::DomainError;
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::{AccountId, RequestId};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Reacts to a party's notifications by joining and leaving media channels.
///
/// Closing a session only tears down this party's listener and audio; the
/// other party's view of the request is untouched.
pub struct PartySession {
    feed: FeedSubscription,
    media: Arc<dyn MediaProvider>,
    joined: HashMap<RequestId, MediaHandle>,
}

impl PartySession {
    pub fn new(feed: FeedSubscription, media: Arc<dyn MediaProvider>) -> Self {
        Self {
            feed,
            media,
            joined: HashMap::new(),
        }
    }

    pub fn account_id(&self) -> AccountId {
        self.feed.account_id()
    }

    pub fn party(&self) -> Role {
        self.feed.party()
    }

    pub fn in_call(&self, request_id: RequestId) -> bool {
        self.joined.contains_key(&request_id)
    }

    /// Wait for the next notification without touching media.
    ///
    /// Cancel-safe: a dropped call loses nothing, so this is the half to race
    /// in a `select!`. Pass what it yields to [`follow`](Self::follow).
    pub async fn recv(&mut self) -> Option<Result<Notification>> {
        self.feed.recv().await
    }

    /// Apply a received notification to the media side.
    ///
    /// Media failures are logged; the notification stays valid for the party.
    pub async fn follow(&mut self, notification: &Notification) {
        if let Err(e) = self.apply(notification).await {
            warn!(
                "Account {} could not follow request {} to {}: {}",
                self.account_id(),
                notification.request_id,
                notification.status,
                e
            );
        }
    }

    /// [`recv`](Self::recv) then [`follow`](Self::follow). Not cancel-safe.
    pub async fn next(&mut self) -> Option<Result<Notification>> {
        let item = self.recv().await?;
        if let Ok(notification) = &item {
            self.follow(notification).await;
        }
        Some(item)
    }

    async fn apply(&mut self, notification: &Notification) -> Result<()> {
        match notification.status {
            CallRequestStatus::InProgress => {
                if self.joined.contains_key(&notification.request_id) {
                    return Ok(());
                }
                let token = notification.token.as_ref().ok_or_else(|| {
                    DomainError::Internal(format!(
                        "request {} is in progress without a token for {}",
                        notification.request_id,
                        self.account_id()
                    ))
                })?;

                let handle = self
                    .media
                    .join(&notification.channel_name, token, self.account_id())
                    .await?;
                info!(
                    "Account {} joined channel {}",
                    self.account_id(),
                    notification.channel_name
                );
                self.joined.insert(notification.request_id, handle);
            }
            CallRequestStatus::Completed
            | CallRequestStatus::Declined
            | CallRequestStatus::AdvisorDeclined => {
                if let Some(handle) = self.joined.remove(&notification.request_id) {
                    self.media.leave(&handle).await?;
                    info!("Account {} left channel {}", self.account_id(), handle.channel);
                }
            }
            CallRequestStatus::Pending | CallRequestStatus::AdvisorAccepted => {}
        }
        Ok(())
    }

    /// Stop listening and leave every channel this party is in
    pub async fn close(&mut self) {
        self.feed.close();
        for (request_id, handle) in self.joined.drain() {
            if let Err(e) = self.media.leave(&handle).await {
                warn!("Leaving channel for request {} failed: {}", request_id, e);
            }
        }
        debug!("Session for account {} closed", self.feed.account_id());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::dispatcher::NotificationDispatcher;
    use crate::domain::call_request::{CallRequest, EndReason, Negotiation};
    use crate::domain::media::MockMediaProvider;
    use crate::domain::signaling::{SignalingToken, SignalingTokens};
    use crate::infrastructure::realtime::BroadcastTransport;
    use crate::domain::shared::value_objects::ChannelName;
    use async_trait::async_trait;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use std::time::Duration;
    use uuid::Uuid;

    /// Takes a while to connect, like a real provider
    struct SlowMedia;

    #[async_trait]
    impl MediaProvider for SlowMedia {
        async fn join(
            &self,
            channel: &ChannelName,
            _token: &SignalingToken,
            party: AccountId,
        ) -> Result<MediaHandle> {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(MediaHandle {
                id: Uuid::new_v4(),
                channel: channel.clone(),
                party,
            })
        }

        async fn leave(&self, _handle: &MediaHandle) -> Result<()> {
            Ok(())
        }
    }

    fn in_progress() -> CallRequest {
        let mut request =
            CallRequest::new(AccountId::new(1), AccountId::new(2), 2, dec!(3), Utc::now());
        request
            .negotiate(
                &Negotiation::Accept {
                    tokens: SignalingTokens {
                        advisor: SignalingToken::new("adv".to_string()),
                        client: SignalingToken::new("cli".to_string()),
                    },
                },
                Utc::now(),
            )
            .unwrap();
        request.start(Utc::now()).unwrap();
        request
    }

    #[tokio::test]
    async fn test_joins_with_own_token_and_leaves_on_completion() {
        let transport = Arc::new(BroadcastTransport::new(16));
        let dispatcher = NotificationDispatcher::new(transport);

        let mut media = MockMediaProvider::new();
        media
            .expect_join()
            .withf(|_, token, party| token.as_str() == "cli" && *party == AccountId::new(1))
            .times(1)
            .returning(|channel, _, party| {
                Ok(MediaHandle {
                    id: Uuid::new_v4(),
                    channel: channel.clone(),
                    party,
                })
            });
        media.expect_leave().times(1).returning(|_| Ok(()));

        let mut session = PartySession::new(
            dispatcher.subscribe(Role::Client, AccountId::new(1)),
            Arc::new(media),
        );

        let mut request = in_progress();
        dispatcher.publish(&request);
        let started = session.next().await.unwrap().unwrap();
        assert_eq!(started.status, CallRequestStatus::InProgress);
        assert!(session.in_call(request.id));

        request.complete(EndReason::Advisor, Utc::now()).unwrap();
        dispatcher.publish(&request);
        session.next().await.unwrap().unwrap();
        assert!(!session.in_call(request.id));
    }

    #[tokio::test]
    async fn test_close_leaves_open_channels() {
        let transport = Arc::new(BroadcastTransport::new(16));
        let dispatcher = NotificationDispatcher::new(transport);

        let mut media = MockMediaProvider::new();
        media.expect_join().returning(|channel, _, party| {
            Ok(MediaHandle {
                id: Uuid::new_v4(),
                channel: channel.clone(),
                party,
            })
        });
        media.expect_leave().times(1).returning(|_| Ok(()));

        let mut session = PartySession::new(
            dispatcher.subscribe(Role::Advisor, AccountId::new(2)),
            Arc::new(media),
        );

        let request = in_progress();
        dispatcher.publish(&request);
        session.next().await.unwrap().unwrap();

        session.close().await;
        assert!(!session.in_call(request.id));
        assert!(session.next().await.is_none());
    }

    #[tokio::test]
    async fn test_media_failure_still_yields_notification() {
        let transport = Arc::new(BroadcastTransport::new(16));
        let dispatcher = NotificationDispatcher::new(transport);

        let mut media = MockMediaProvider::new();
        media
            .expect_join()
            .returning(|_, _, _| Err(DomainError::Internal("provider down".to_string())));

        let mut session = PartySession::new(
            dispatcher.subscribe(Role::Client, AccountId::new(1)),
            Arc::new(media),
        );

        let request = in_progress();
        dispatcher.publish(&request);
        assert!(session.next().await.unwrap().is_ok());
        assert!(!session.in_call(request.id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupted_wait_keeps_the_notification() {
        let transport = Arc::new(BroadcastTransport::new(16));
        let dispatcher = NotificationDispatcher::new(transport);
        let mut session = PartySession::new(
            dispatcher.subscribe(Role::Client, AccountId::new(1)),
            Arc::new(SlowMedia),
        );

        // Nothing published yet: the other branch wins
        tokio::select! {
            _ = session.recv() => panic!("no notification was published"),
            _ = tokio::time::sleep(Duration::from_millis(20)) => {}
        }

        let request = in_progress();
        dispatcher.publish(&request);

        let notification = tokio::select! {
            item = session.recv() => item.unwrap().unwrap(),
            _ = tokio::time::sleep(Duration::from_millis(20)) => panic!("notification lost"),
        };
        assert_eq!(notification.status, CallRequestStatus::InProgress);

        // The slow join runs outside any race and completes
        session.follow(&notification).await;
        assert!(session.in_call(request.id));
    }
}
