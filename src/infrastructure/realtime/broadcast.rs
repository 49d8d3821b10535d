/// In-process real-time transport on a tokio broadcast channel
use crate::domain::notification::{ChangeFeed, RealtimeTransport, RecipientFilter, RowChange};
use crate::domain::shared::error::DomainError;
use crate::domain::shared::result::Result;
use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Fans every published row change out to all subscribers; each feed keeps
/// only the rows its recipient filter matches.
pub struct BroadcastTransport {
    tx: broadcast::Sender<RowChange>,
}

impl BroadcastTransport {
    /// `capacity` is how many changes a slow subscriber may fall behind
    /// before it starts missing them
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl RealtimeTransport for BroadcastTransport {
    fn publish(&self, change: RowChange) -> Result<usize> {
        match self.tx.send(change) {
            Ok(receivers) => Ok(receivers),
            // Nobody listening is not a delivery failure
            Err(_) => {
                debug!("Row change published with no subscribers");
                Ok(0)
            }
        }
    }

    fn subscribe(&self, filter: RecipientFilter) -> Box<dyn ChangeFeed> {
        Box::new(BroadcastFeed {
            rx: self.tx.subscribe(),
            filter,
        })
    }
}

struct BroadcastFeed {
    rx: broadcast::Receiver<RowChange>,
    filter: RecipientFilter,
}

#[async_trait]
impl ChangeFeed for BroadcastFeed {
    async fn next_change(&mut self) -> Option<Result<RowChange>> {
        loop {
            match self.rx.recv().await {
                Ok(change) => {
                    if self.filter.matches(&change) {
                        return Some(Ok(change));
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(
                        "{} feed for account {} lagged by {} change(s)",
                        self.filter.party, self.filter.account_id, skipped
                    );
                    return Some(Err(DomainError::NotificationDeliveryFailure(format!(
                        "{} change(s) skipped; re-read current state",
                        skipped
                    ))));
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::account::Role;
    use crate::domain::notification::transport::CALL_REQUESTS_TABLE;
    use crate::domain::shared::value_objects::AccountId;
    use serde_json::json;

    fn change(commit: u64, advisor: i64, client: i64) -> RowChange {
        RowChange {
            table: CALL_REQUESTS_TABLE.to_string(),
            commit,
            record: json!({ "advisor_id": advisor, "client_id": client }),
        }
    }

    #[tokio::test]
    async fn test_feed_only_sees_own_rows() {
        let transport = BroadcastTransport::new(8);
        let mut feed = transport.subscribe(RecipientFilter::new(Role::Advisor, AccountId::new(2)));

        transport.publish(change(1, 5, 1)).unwrap();
        transport.publish(change(2, 2, 1)).unwrap();

        let received = feed.next_change().await.unwrap().unwrap();
        assert_eq!(received.commit, 2);
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_ok() {
        let transport = BroadcastTransport::new(8);
        assert_eq!(transport.publish(change(1, 2, 1)).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_lagging_feed_reports_delivery_failure() {
        let transport = BroadcastTransport::new(2);
        let mut feed = transport.subscribe(RecipientFilter::new(Role::Client, AccountId::new(1)));

        for commit in 1..=5 {
            transport.publish(change(commit, 2, 1)).unwrap();
        }

        assert!(matches!(
            feed.next_change().await,
            Some(Err(DomainError::NotificationDeliveryFailure(_)))
        ));
        // The feed recovers with the oldest change still buffered
        assert_eq!(feed.next_change().await.unwrap().unwrap().commit, 4);
    }

    #[tokio::test]
    async fn test_dropped_transport_closes_feed() {
        let transport = BroadcastTransport::new(2);
        let mut feed = transport.subscribe(RecipientFilter::new(Role::Client, AccountId::new(1)));
        drop(transport);
        assert!(feed.next_change().await.is_none());
    }
}
