//! Interface layer - External interfaces
//!
//! This layer handles:
//! - REST endpoints for the call request lifecycle and the wallet ledger
//! - The per-party WebSocket notification feed
//! - Request/response formatting

pub mod api;
