//! Account bounded context - read model of identities owned elsewhere

pub mod entity;
pub mod repository;

pub use entity::{Account, AccountStatus, Role};
pub use repository::AccountRepository;
