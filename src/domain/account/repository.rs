//! Account repository interface

use super::entity::Account;
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::AccountId;
use async_trait::async_trait;

/// Read access to accounts.
///
/// Accounts are created and deleted by the identity subsystem. The session
/// core only reads them here; `wallet` and `status` change exclusively inside
/// the ledger and completion units of work.
#[async_trait]
pub trait AccountRepository: Send + Sync {
    /// Find an account by its ID
    async fn find_account(&self, id: AccountId) -> Result<Option<Account>>;
}
