//! Ledger domain service

use crate::domain::account::AccountRepository;
use crate::domain::call_request::CallRequest;
use crate::domain::ledger::entity::{Call, CallPosting, WalletTransaction};
use crate::domain::ledger::repository::LedgerRepository;
use crate::domain::shared::error::DomainError;
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::{AccountId, RequestId};
use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Balance mutations and their history.
///
/// No money moves for a request unless it reaches in_progress, and then it
/// moves exactly once: the posting is conditional on the request still being
/// `advisor_accepted`, so retries and racing joins lose with
/// `InvalidTransition` instead of billing twice.
pub struct Ledger {
    repository: Arc<dyn LedgerRepository>,
    accounts: Arc<dyn AccountRepository>,
}

impl Ledger {
    pub fn new(repository: Arc<dyn LedgerRepository>, accounts: Arc<dyn AccountRepository>) -> Self {
        Self {
            repository,
            accounts,
        }
    }

    /// Bill the call-start of `request`.
    ///
    /// The rate is the one frozen on the request at creation time.
    pub async fn charge_for_call(&self, request: &CallRequest) -> Result<CallPosting> {
        debug!(
            "Charging {} for request {} (client {} -> advisor {})",
            request.total_cost, request.id, request.client_id, request.advisor_id
        );

        let posting = self.repository.post_call_charge(request.id, Utc::now()).await?;

        if let Err(e) = posting.verify() {
            error!("Posting for request {} failed verification: {}", request.id, e);
            return Err(e);
        }

        info!(
            "Billed request {}: call {}, client balance {}, advisor balance {}",
            request.id, posting.call.id, posting.client_entry.balance, posting.advisor_entry.balance
        );
        Ok(posting)
    }

    /// Credit a wallet from the payment gateway
    pub async fn top_up(
        &self,
        account_id: AccountId,
        amount: Decimal,
        payment_reference: &str,
    ) -> Result<WalletTransaction> {
        if amount <= Decimal::ZERO {
            return Err(DomainError::ValidationError(
                "Recharge amount must be positive.".to_string(),
            ));
        }

        let entry = self
            .repository
            .post_credit(
                account_id,
                amount,
                format!("Recharge success. Payment ID: {}", payment_reference),
                Utc::now(),
            )
            .await?;

        info!("Credited {} to account {} (balance {})", amount, account_id, entry.balance);
        Ok(entry)
    }

    pub async fn history(&self, account_id: AccountId) -> Result<Vec<WalletTransaction>> {
        self.repository.transactions_for(account_id).await
    }

    pub async fn call_for_request(&self, request_id: RequestId) -> Result<Option<Call>> {
        self.repository.call_for_request(request_id).await
    }

    /// Check that the wallet equals both the running sum of the account's
    /// ledger entries and the balance snapshot of the latest entry.
    pub async fn reconcile(&self, account_id: AccountId) -> Result<Decimal> {
        let account = self
            .accounts
            .find_account(account_id)
            .await?
            .ok_or_else(|| DomainError::NotFound(format!("Account {}", account_id)))?;
        let entries = self.repository.transactions_for(account_id).await?;

        let sum: Decimal = entries.iter().map(WalletTransaction::net).sum();
        if sum != account.wallet {
            let err = DomainError::BillingInconsistency(format!(
                "account {}: wallet {} but ledger sums to {}",
                account_id, account.wallet, sum
            ));
            error!("{}", err);
            return Err(err);
        }

        if let Some(last) = entries.last() {
            if last.balance != account.wallet {
                let err = DomainError::BillingInconsistency(format!(
                    "account {}: wallet {} but last entry shows {}",
                    account_id, account.wallet, last.balance
                ));
                error!("{}", err);
                return Err(err);
            }
        }

        Ok(account.wallet)
    }
}
