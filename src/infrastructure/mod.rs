//! Infrastructure layer - Technical implementations
//!
//! This layer contains:
//! - Repository implementations (in-memory and PostgreSQL)
//! - The in-process real-time transport
//! - Signaling token issuing and the local media provider
//! - The audit trail

pub mod audit;
pub mod media;
pub mod persistence;
pub mod realtime;
pub mod signaling;
