//! Billing record and wallet ledger entries

use crate::domain::account::{Account, AccountStatus};
use crate::domain::call_request::{CallRequest, EndReason};
use crate::domain::shared::error::DomainError;
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::{AccountId, CallId, RequestId, TransactionId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Billing record status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    InProgress,
    Completed,
}

impl CallStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallStatus::InProgress => "in_progress",
            CallStatus::Completed => "completed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "in_progress" => Some(CallStatus::InProgress),
            "completed" => Some(CallStatus::Completed),
            _ => None,
        }
    }
}

/// Billing/audit record, created exactly once when a request is billed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Call {
    pub id: CallId,
    pub request_id: RequestId,
    pub client_id: AccountId,
    pub advisor_id: AccountId,
    pub request_time: DateTime<Utc>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_minutes: u32,
    pub per_minute_charge: Decimal,
    pub call_charge: Decimal,
    pub call_total_charge: Decimal,
    pub status: CallStatus,
    /// How the call ended
    pub remark: Option<String>,
}

impl Call {
    /// Open the billing record for a request entering in_progress
    pub fn open(request: &CallRequest, start_time: DateTime<Utc>) -> Self {
        Self {
            id: CallId::new(),
            request_id: request.id,
            client_id: request.client_id,
            advisor_id: request.advisor_id,
            request_time: request.created_at,
            start_time,
            end_time: None,
            duration_minutes: request.duration_minutes,
            per_minute_charge: request.per_minute_charge(),
            call_charge: request.total_cost,
            call_total_charge: request.total_cost,
            status: CallStatus::InProgress,
            remark: None,
        }
    }

    pub fn close(&mut self, reason: EndReason, at: DateTime<Utc>) {
        self.status = CallStatus::Completed;
        self.end_time = Some(at);
        self.remark = Some(reason.remark().to_string());
    }
}

/// One immutable balance mutation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalletTransaction {
    pub id: TransactionId,
    pub account_id: AccountId,
    pub debit: Decimal,
    pub credit: Decimal,
    /// Wallet balance right after this entry
    pub balance: Decimal,
    pub remark: String,
    pub date_time: DateTime<Utc>,
    pub call_id: Option<CallId>,
}

impl WalletTransaction {
    pub fn debit(
        account_id: AccountId,
        amount: Decimal,
        balance: Decimal,
        remark: String,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: TransactionId::new(),
            account_id,
            debit: amount,
            credit: Decimal::ZERO,
            balance,
            remark,
            date_time: at,
            call_id: None,
        }
    }

    pub fn credit(
        account_id: AccountId,
        amount: Decimal,
        balance: Decimal,
        remark: String,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: TransactionId::new(),
            account_id,
            debit: Decimal::ZERO,
            credit: amount,
            balance,
            remark,
            date_time: at,
            call_id: None,
        }
    }

    pub fn for_call(mut self, call_id: CallId) -> Self {
        self.call_id = Some(call_id);
        self
    }

    /// Signed effect on the wallet
    pub fn net(&self) -> Decimal {
        self.credit - self.debit
    }
}

/// Everything a successful call-start posting wrote
#[derive(Debug, Clone, PartialEq)]
pub struct CallPosting {
    pub request: CallRequest,
    pub call: Call,
    pub client_entry: WalletTransaction,
    pub advisor_entry: WalletTransaction,
}

impl CallPosting {
    /// Check the pair against the frozen request price
    pub fn verify(&self) -> Result<()> {
        let cost = self.request.total_cost;
        if self.client_entry.debit != cost || self.advisor_entry.credit != cost {
            return Err(DomainError::BillingInconsistency(format!(
                "request {}: debit {} / credit {} do not match total cost {}",
                self.request.id, self.client_entry.debit, self.advisor_entry.credit, cost
            )));
        }
        if self.client_entry.call_id != Some(self.call.id)
            || self.advisor_entry.call_id != Some(self.call.id)
        {
            return Err(DomainError::BillingInconsistency(format!(
                "request {}: ledger entries do not reference call {}",
                self.request.id, self.call.id
            )));
        }
        Ok(())
    }
}

/// The writes a call-start posting will perform, computed before any of
/// them happen. Stores apply the whole plan in one unit or not at all.
#[derive(Debug, Clone, PartialEq)]
pub struct ChargePlan {
    pub request: CallRequest,
    pub call: Call,
    pub client: Account,
    pub advisor: Account,
    pub client_entry: WalletTransaction,
    pub advisor_entry: WalletTransaction,
}

impl ChargePlan {
    pub fn into_posting(self) -> CallPosting {
        CallPosting {
            request: self.request,
            call: self.call,
            client_entry: self.client_entry,
            advisor_entry: self.advisor_entry,
        }
    }
}

/// Validate and price the in_progress transition for `request`.
///
/// Fails with `InvalidTransition` unless the request is still
/// `advisor_accepted`, `AdvisorUnavailable` if the advisor is already on
/// another call, and `InsufficientBalance` if the client wallet cannot cover
/// the frozen total.
pub fn plan_call_charge(
    request: &CallRequest,
    client: &Account,
    advisor: &Account,
    at: DateTime<Utc>,
) -> Result<ChargePlan> {
    let mut request = request.clone();
    request.start(at)?;

    if advisor.status == AccountStatus::Busy {
        return Err(DomainError::AdvisorUnavailable(
            "The advisor is currently on another call.".to_string(),
        ));
    }

    let cost = request.total_cost;
    if client.wallet < cost {
        return Err(DomainError::InsufficientBalance {
            required: cost,
            available: client.wallet,
        });
    }

    let call = Call::open(&request, at);

    let mut client = client.clone();
    client.wallet -= cost;
    client.status = AccountStatus::Busy;

    let mut advisor = advisor.clone();
    advisor.wallet += cost;
    advisor.status = AccountStatus::Busy;

    let client_entry = WalletTransaction::debit(
        client.id,
        cost,
        client.wallet,
        format!("Call started with advisor {}", advisor.id),
        at,
    )
    .for_call(call.id);
    let advisor_entry = WalletTransaction::credit(
        advisor.id,
        cost,
        advisor.wallet,
        format!("Call started with client {}", client.id),
        at,
    )
    .for_call(call.id);

    Ok(ChargePlan {
        request,
        call,
        client,
        advisor,
        client_entry,
        advisor_entry,
    })
}
