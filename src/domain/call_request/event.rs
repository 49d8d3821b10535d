//! Call request domain events

use crate::domain::call_request::aggregate::CallRequest;
use crate::domain::call_request::value_object::CallRequestStatus;
use crate::domain::shared::events::{DomainEvent, EventMetadata};
use crate::domain::shared::value_objects::{AccountId, RequestId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const STATUS_CHANGED: &str = "call_request.status_changed";

/// A committed status change on a call request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusChanged {
    pub metadata: EventMetadata,
    pub request_id: RequestId,
    pub client_id: AccountId,
    pub advisor_id: AccountId,
    /// `None` when the request was just created
    pub from: Option<CallRequestStatus>,
    pub to: CallRequestStatus,
    pub version: u64,
    /// Set when a timer or the sweeper forced the change
    pub forced: bool,
}

impl StatusChanged {
    pub fn created(request: &CallRequest) -> Self {
        Self::build(request, None, false)
    }

    pub fn transitioned(request: &CallRequest, from: CallRequestStatus, forced: bool) -> Self {
        Self::build(request, Some(from), forced)
    }

    fn build(request: &CallRequest, from: Option<CallRequestStatus>, forced: bool) -> Self {
        Self {
            metadata: EventMetadata::at(STATUS_CHANGED, request.updated_at),
            request_id: request.id,
            client_id: request.client_id,
            advisor_id: request.advisor_id,
            from,
            to: request.status,
            version: request.version,
            forced,
        }
    }
}

impl DomainEvent for StatusChanged {
    fn event_type(&self) -> &'static str {
        STATUS_CHANGED
    }

    fn request_id(&self) -> RequestId {
        self.request_id
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.metadata.occurred_at
    }
}
