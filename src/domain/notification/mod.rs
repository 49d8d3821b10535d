//! Notification bounded context - state-change feeds for the two parties

pub mod message;
pub mod transport;

pub use message::Notification;
pub use transport::{ChangeFeed, RealtimeTransport, RecipientFilter, RowChange};
