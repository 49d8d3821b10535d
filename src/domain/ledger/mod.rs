//! Ledger bounded context - wallet balances and their append-only history

pub mod entity;
pub mod repository;
pub mod service;

pub use entity::{
    plan_call_charge, Call, CallPosting, CallStatus, ChargePlan, WalletTransaction,
};
pub use repository::LedgerRepository;
pub use service::Ledger;
