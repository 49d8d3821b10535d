//! Domain event plumbing

use crate::domain::shared::value_objects::RequestId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Something that happened to a call request
pub trait DomainEvent: Send + Sync {
    fn event_type(&self) -> &'static str;

    /// Request the event belongs to
    fn request_id(&self) -> RequestId;

    fn occurred_at(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventMetadata {
    pub event_id: Uuid,
    /// Commit time of the write that produced the event, not emission time
    pub occurred_at: DateTime<Utc>,
    pub event_type: String,
}

impl EventMetadata {
    pub fn at(event_type: &str, occurred_at: DateTime<Utc>) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            occurred_at,
            event_type: event_type.to_string(),
        }
    }
}
