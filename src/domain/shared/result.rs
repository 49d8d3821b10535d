//! Domain result alias

use super::error::DomainError;

pub type Result<T> = std::result::Result<T, DomainError>;
