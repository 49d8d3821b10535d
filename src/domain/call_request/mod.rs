//! Call request bounded context - the negotiation state machine

pub mod aggregate;
pub mod event;
pub mod repository;
pub mod value_object;

pub use aggregate::{CallRequest, Negotiation};
pub use event::StatusChanged;
pub use repository::{CallRequestRepository, Completion};
pub use value_object::{CallRequestStatus, DeclineReason, EndReason, ExpiryKind};
