//! Domain layer - Core business logic and rules
//!
//! This layer contains:
//! - Aggregates: the call request state machine
//! - Entities: accounts, billing records, ledger entries
//! - Value Objects: identifiers, statuses, reasons
//! - Domain Services: the ledger
//! - Repository Interfaces: ports for persistence
//! - Ports for external collaborators: signaling tokens, media, real-time transport

pub mod account;
pub mod call_request;
pub mod ledger;
pub mod media;
pub mod notification;
pub mod shared;
pub mod signaling;

// Re-export commonly used types
pub use shared::{DomainError, Result};
