//! In-memory store implementing every repository port
//!
//! All state sits behind one lock, so each multi-record operation (billing,
//! completion) is applied as a single unit.

use crate::domain::account::{Account, AccountRepository, AccountStatus};
use crate::domain::call_request::{
    CallRequest, CallRequestRepository, Completion, EndReason, Negotiation,
};
use crate::domain::ledger::{plan_call_charge, Call, CallPosting, LedgerRepository, WalletTransaction};
use crate::domain::shared::error::DomainError;
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::{AccountId, RequestId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Default)]
struct State {
    accounts: HashMap<AccountId, Account>,
    requests: HashMap<RequestId, CallRequest>,
    calls: HashMap<RequestId, Call>,
    transactions: Vec<WalletTransaction>,
}

impl State {
    fn account(&self, id: AccountId) -> Result<&Account> {
        self.accounts
            .get(&id)
            .ok_or_else(|| DomainError::NotFound(format!("Account {}", id)))
    }

    fn request(&self, id: RequestId) -> Result<&CallRequest> {
        self.requests
            .get(&id)
            .ok_or_else(|| DomainError::NotFound(format!("Call request {}", id)))
    }

    fn release(&mut self, id: AccountId) {
        if let Some(account) = self.accounts.get_mut(&id) {
            account.status = AccountStatus::Available;
        }
    }
}

#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an account as the identity subsystem would. A non-zero
    /// starting wallet is recorded as an opening credit so the ledger always
    /// sums to the balance.
    pub async fn seed_account(&self, account: Account) {
        let mut state = self.state.write().await;
        if account.wallet > Decimal::ZERO {
            state.transactions.push(WalletTransaction::credit(
                account.id,
                account.wallet,
                account.wallet,
                "Opening balance".to_string(),
                Utc::now(),
            ));
        }
        debug!("Seeded {} account {}", account.role, account.id);
        state.accounts.insert(account.id, account);
    }

    /// Presence change made outside the call path (going offline, approval)
    pub async fn set_account_status(&self, id: AccountId, status: AccountStatus) -> Result<()> {
        let mut state = self.state.write().await;
        let account = state
            .accounts
            .get_mut(&id)
            .ok_or_else(|| DomainError::NotFound(format!("Account {}", id)))?;
        account.status = status;
        Ok(())
    }
}

#[async_trait]
impl AccountRepository for MemoryStore {
    async fn find_account(&self, id: AccountId) -> Result<Option<Account>> {
        Ok(self.state.read().await.accounts.get(&id).cloned())
    }
}

#[async_trait]
impl CallRequestRepository for MemoryStore {
    async fn insert_request(&self, request: &CallRequest) -> Result<()> {
        let mut state = self.state.write().await;
        if state.requests.contains_key(&request.id) {
            return Err(DomainError::Storage(format!(
                "Call request {} already exists",
                request.id
            )));
        }
        state.requests.insert(request.id, request.clone());
        Ok(())
    }

    async fn find_request(&self, id: RequestId) -> Result<Option<CallRequest>> {
        Ok(self.state.read().await.requests.get(&id).cloned())
    }

    async fn negotiate(
        &self,
        id: RequestId,
        step: Negotiation,
        at: DateTime<Utc>,
    ) -> Result<CallRequest> {
        let mut state = self.state.write().await;
        let mut request = state.request(id)?.clone();
        request.negotiate(&step, at)?;
        state.requests.insert(id, request.clone());
        Ok(request)
    }

    async fn complete(
        &self,
        id: RequestId,
        reason: EndReason,
        at: DateTime<Utc>,
    ) -> Result<Completion> {
        let mut state = self.state.write().await;
        let mut request = state.request(id)?.clone();
        request.complete(reason, at)?;

        let call = state.calls.get_mut(&id).map(|call| {
            call.close(reason, at);
            call.clone()
        });
        state.release(request.client_id);
        state.release(request.advisor_id);
        state.requests.insert(id, request.clone());

        Ok(Completion { request, call })
    }

    async fn list_open(&self) -> Result<Vec<CallRequest>> {
        let state = self.state.read().await;
        let mut open: Vec<CallRequest> = state
            .requests
            .values()
            .filter(|r| r.is_open())
            .cloned()
            .collect();
        open.sort_by_key(|r| r.created_at);
        Ok(open)
    }
}

#[async_trait]
impl LedgerRepository for MemoryStore {
    async fn post_call_charge(
        &self,
        request_id: RequestId,
        at: DateTime<Utc>,
    ) -> Result<CallPosting> {
        let mut state = self.state.write().await;
        let request = state.request(request_id)?;
        let client = state.account(request.client_id)?;
        let advisor = state.account(request.advisor_id)?;

        let plan = plan_call_charge(request, client, advisor, at)?;
        if state.calls.contains_key(&request_id) {
            return Err(DomainError::BillingInconsistency(format!(
                "request {} already has a billing record",
                request_id
            )));
        }

        state.requests.insert(request_id, plan.request.clone());
        state.accounts.insert(plan.client.id, plan.client.clone());
        state.accounts.insert(plan.advisor.id, plan.advisor.clone());
        state.calls.insert(request_id, plan.call.clone());
        state.transactions.push(plan.client_entry.clone());
        state.transactions.push(plan.advisor_entry.clone());

        Ok(plan.into_posting())
    }

    async fn post_credit(
        &self,
        account_id: AccountId,
        amount: Decimal,
        remark: String,
        at: DateTime<Utc>,
    ) -> Result<WalletTransaction> {
        let mut state = self.state.write().await;
        let account = state
            .accounts
            .get_mut(&account_id)
            .ok_or_else(|| DomainError::NotFound(format!("Account {}", account_id)))?;
        account.wallet += amount;

        let entry = WalletTransaction::credit(account_id, amount, account.wallet, remark, at);
        state.transactions.push(entry.clone());
        Ok(entry)
    }

    async fn transactions_for(&self, account_id: AccountId) -> Result<Vec<WalletTransaction>> {
        let state = self.state.read().await;
        Ok(state
            .transactions
            .iter()
            .filter(|t| t.account_id == account_id)
            .cloned()
            .collect())
    }

    async fn call_for_request(&self, request_id: RequestId) -> Result<Option<Call>> {
        Ok(self.state.read().await.calls.get(&request_id).cloned())
    }
}
