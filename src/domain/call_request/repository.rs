//! Call request repository interface

use crate::domain::call_request::aggregate::{CallRequest, Negotiation};
use crate::domain::call_request::value_object::EndReason;
use crate::domain::ledger::Call;
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::RequestId;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Result of closing an in-progress call
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub request: CallRequest,
    /// The billing record, closed with its remark
    pub call: Option<Call>,
}

/// Repository interface for the CallRequest aggregate
///
/// Every write is conditional on the stored status; none of these methods
/// ever overwrite a record blindly.
#[async_trait]
pub trait CallRequestRepository: Send + Sync {
    /// Insert a freshly created pending request
    async fn insert_request(&self, request: &CallRequest) -> Result<()>;

    /// Find a request by its ID
    async fn find_request(&self, id: RequestId) -> Result<Option<CallRequest>>;

    /// Apply a negotiation step if the stored status matches `step.expected()`
    async fn negotiate(
        &self,
        id: RequestId,
        step: Negotiation,
        at: DateTime<Utc>,
    ) -> Result<CallRequest>;

    /// in_progress -> completed, release both accounts to `Available` and
    /// close the billing record, as one unit
    async fn complete(&self, id: RequestId, reason: EndReason, at: DateTime<Utc>)
        -> Result<Completion>;

    /// All requests that have not reached a terminal status
    async fn list_open(&self) -> Result<Vec<CallRequest>>;
}
