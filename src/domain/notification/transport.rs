//! Real-time transport port

use crate::domain::account::Role;
use crate::domain::call_request::CallRequest;
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::AccountId;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Table name carried on call request row changes
pub const CALL_REQUESTS_TABLE: &str = "call_requests";

/// An untyped row-change blob, as the transport delivers it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowChange {
    pub table: String,
    /// Monotonic per row; used for de-duplication
    pub commit: u64,
    pub record: Value,
}

impl RowChange {
    pub fn from_request(request: &CallRequest) -> Result<Self> {
        Ok(Self {
            table: CALL_REQUESTS_TABLE.to_string(),
            commit: request.version,
            record: serde_json::to_value(request)?,
        })
    }
}

/// Predicate on the recipient column of a row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecipientFilter {
    pub party: Role,
    pub account_id: AccountId,
}

impl RecipientFilter {
    pub fn new(party: Role, account_id: AccountId) -> Self {
        Self { party, account_id }
    }

    pub fn column(&self) -> &'static str {
        match self.party {
            Role::Advisor => "advisor_id",
            Role::Client => "client_id",
        }
    }

    /// `<column> = <account_id>` on the change's record
    pub fn matches(&self, change: &RowChange) -> bool {
        change.table == CALL_REQUESTS_TABLE
            && change
                .record
                .get(self.column())
                .and_then(Value::as_i64)
                .map_or(false, |id| id == self.account_id.as_i64())
    }
}

/// One subscriber's stream of matching changes
#[async_trait]
pub trait ChangeFeed: Send {
    /// Next matching change. `Some(Err(_))` reports a delivery problem the
    /// feed has recovered from; `None` means the transport is gone.
    async fn next_change(&mut self) -> Option<Result<RowChange>>;
}

/// Delivers row changes at least once to subscribers whose filter matches
pub trait RealtimeTransport: Send + Sync {
    /// Publish a change; returns how many subscribers were reached
    fn publish(&self, change: RowChange) -> Result<usize>;

    fn subscribe(&self, filter: RecipientFilter) -> Box<dyn ChangeFeed>;
}
