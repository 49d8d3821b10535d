//! Real-time transport implementations

pub mod broadcast;

pub use broadcast::BroadcastTransport;
