//! Ledger repository interface

use crate::domain::ledger::entity::{Call, CallPosting, WalletTransaction};
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::{AccountId, RequestId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

/// The only writer of wallet balances
#[async_trait]
pub trait LedgerRepository: Send + Sync {
    /// Move the request into in_progress and bill it, in one unit: the
    /// status flip, the `Call` row, the client debit and the advisor credit
    /// are all written or none is. See [`crate::domain::ledger::plan_call_charge`].
    async fn post_call_charge(&self, request_id: RequestId, at: DateTime<Utc>)
        -> Result<CallPosting>;

    /// Credit an account from outside the call path (wallet recharge)
    async fn post_credit(
        &self,
        account_id: AccountId,
        amount: Decimal,
        remark: String,
        at: DateTime<Utc>,
    ) -> Result<WalletTransaction>;

    /// Ledger entries for an account, oldest first
    async fn transactions_for(&self, account_id: AccountId) -> Result<Vec<WalletTransaction>>;

    /// The billing record produced by a request, if it was ever billed
    async fn call_for_request(&self, request_id: RequestId) -> Result<Option<Call>>;
}
