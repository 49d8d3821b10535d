//! Callmarket - call session orchestration for a paid advisor marketplace
//!
//! A client requests a timed voice call with an advisor. The crate runs the
//! request state machine under concurrent actions from both parties and
//! their countdown timers, bills the call exactly once when it starts, and
//! pushes every state change to both parties in real time.
//!
//! Laid out in Domain-Driven Design layers.

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod interface;
pub mod services;

// Re-export commonly used types
pub use domain::shared::error::DomainError;
pub use domain::shared::result::Result;
pub use services::SessionServices;
