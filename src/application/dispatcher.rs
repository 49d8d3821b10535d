//! Notification dispatcher - per-party feeds of call request changes

use crate::domain::account::Role;
use crate::domain::call_request::CallRequest;
use crate::domain::notification::{ChangeFeed, Notification, RealtimeTransport, RecipientFilter, RowChange};
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::{AccountId, RequestId};
use metrics::counter;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tracing::{debug, warn};

/// Finished requests a feed remembers after forgetting their commit marker
const FINISHED_WINDOW: usize = 256;

/// Publishes committed request rows and hands out recipient feeds
pub struct NotificationDispatcher {
    transport: Arc<dyn RealtimeTransport>,
}

impl NotificationDispatcher {
    pub fn new(transport: Arc<dyn RealtimeTransport>) -> Self {
        Self { transport }
    }

    /// Publish the current state of `request`.
    ///
    /// Delivery problems are logged and counted, never returned: a party can
    /// always re-read the request on reconnect.
    pub fn publish(&self, request: &CallRequest) -> usize {
        let change = match RowChange::from_request(request) {
            Ok(change) => change,
            Err(e) => {
                warn!("Failed to encode change for request {}: {}", request.id, e);
                counter!("notifications_dropped_total", "reason" => "encode").increment(1);
                return 0;
            }
        };

        match self.transport.publish(change) {
            Ok(reached) => {
                debug!(
                    "Published {} v{} for request {} to {} feed(s)",
                    request.status, request.version, request.id, reached
                );
                reached
            }
            Err(e) => {
                warn!("Failed to publish request {}: {}", request.id, e);
                counter!("notifications_dropped_total", "reason" => "transport").increment(1);
                0
            }
        }
    }

    /// Open a feed for one party's inbox
    pub fn subscribe(&self, party: Role, account_id: AccountId) -> FeedSubscription {
        let filter = RecipientFilter::new(party, account_id);
        debug!("Opening {} feed for account {}", party, account_id);
        FeedSubscription {
            filter,
            feed: Some(self.transport.subscribe(filter)),
            last_seen: HashMap::new(),
            finished: FinishedWindow::default(),
        }
    }
}

/// One party's feed.
///
/// Yields each request change the party is interested in at most once, in
/// commit order per request. Dropping it or calling [`close`](Self::close)
/// tears the listener down.
pub struct FeedSubscription {
    filter: RecipientFilter,
    feed: Option<Box<dyn ChangeFeed>>,
    /// Highest commit delivered per open request
    last_seen: HashMap<RequestId, u64>,
    finished: FinishedWindow,
}

/// Recently finished requests, oldest evicted first
#[derive(Default)]
struct FinishedWindow {
    ids: HashSet<RequestId>,
    order: VecDeque<RequestId>,
}

impl FinishedWindow {
    fn contains(&self, id: &RequestId) -> bool {
        self.ids.contains(id)
    }

    fn insert(&mut self, id: RequestId) {
        if !self.ids.insert(id) {
            return;
        }
        self.order.push_back(id);
        if self.order.len() > FINISHED_WINDOW {
            if let Some(evicted) = self.order.pop_front() {
                self.ids.remove(&evicted);
            }
        }
    }

    fn len(&self) -> usize {
        self.order.len()
    }
}

impl FeedSubscription {
    pub fn party(&self) -> Role {
        self.filter.party
    }

    pub fn account_id(&self) -> AccountId {
        self.filter.account_id
    }

    pub fn is_closed(&self) -> bool {
        self.feed.is_none()
    }

    /// Next notification for this party.
    ///
    /// `Some(Err(_))` reports a change that could not be delivered or
    /// decoded; the feed stays usable. `None` once closed.
    pub async fn recv(&mut self) -> Option<Result<Notification>> {
        loop {
            let feed = self.feed.as_mut()?;

            let change = match feed.next_change().await {
                None => {
                    debug!("Feed for account {} ended", self.filter.account_id);
                    self.feed = None;
                    return None;
                }
                Some(Err(e)) => {
                    warn!("Feed for account {}: {}", self.filter.account_id, e);
                    counter!("notifications_dropped_total", "reason" => "delivery").increment(1);
                    return Some(Err(e));
                }
                Some(Ok(change)) => change,
            };

            if !self.filter.matches(&change) {
                continue;
            }

            let notification = match Notification::decode(&change, self.filter.party) {
                Ok(notification) => notification,
                Err(e) => {
                    warn!("Dropping undecodable change: {}", e);
                    counter!("notifications_dropped_total", "reason" => "decode").increment(1);
                    return Some(Err(e));
                }
            };

            if self.finished.contains(&notification.request_id) {
                debug!(
                    "Commit {} for finished request {} dropped",
                    notification.commit, notification.request_id
                );
                counter!("notifications_dropped_total", "reason" => "duplicate").increment(1);
                continue;
            }

            let last = self.last_seen.entry(notification.request_id).or_insert(0);
            if notification.commit <= *last {
                debug!(
                    "Duplicate or stale commit {} for request {} (seen {})",
                    notification.commit, notification.request_id, last
                );
                counter!("notifications_dropped_total", "reason" => "duplicate").increment(1);
                continue;
            }
            *last = notification.commit;

            if notification.status.is_terminal() {
                // Nothing newer can follow a terminal commit
                self.last_seen.remove(&notification.request_id);
                self.finished.insert(notification.request_id);
            }

            if notification.is_relevant() {
                return Some(Ok(notification));
            }
        }
    }

    pub fn close(&mut self) {
        if self.feed.take().is_some() {
            debug!("Closed {} feed for account {}", self.filter.party, self.filter.account_id);
        }
    }
}
