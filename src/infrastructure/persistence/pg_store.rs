//! PostgreSQL implementation of the session repositories
//!
//! Conditional writes are `UPDATE ... WHERE id = $1 AND status = $2`; the
//! billing and completion units run in one transaction with the request and
//! both account rows locked.

use crate::domain::account::{Account, AccountRepository, AccountStatus, Role};
use crate::domain::call_request::{
    CallRequest, CallRequestRepository, CallRequestStatus, Completion, DeclineReason, EndReason,
    Negotiation,
};
use crate::domain::ledger::{
    plan_call_charge, Call, CallPosting, CallStatus, LedgerRepository, WalletTransaction,
};
use crate::domain::shared::error::DomainError;
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::{
    AccountId, CallId, ChannelName, RequestId, TransactionId,
};
use crate::domain::signaling::SignalingToken;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use tracing::{debug, error};
use uuid::Uuid;

const ACCOUNT_COLUMNS: &str = "id, role, full_name, status, rate_per_minute, wallet";

const REQUEST_COLUMNS: &str = "id, client_id, advisor_id, channel_name, duration_minutes, \
     total_cost, status, advisor_token, client_token, decline_reason, end_reason, version, \
     created_at, accepted_at, started_at, ended_at, updated_at";

const CALL_COLUMNS: &str = "id, request_id, client_id, advisor_id, request_time, start_time, \
     end_time, duration_minutes, per_minute_charge, call_charge, call_total_charge, status, remark";

const TRANSACTION_COLUMNS: &str =
    "id, account_id, debit, credit, balance, remark, date_time, call_id";

fn decode_err(what: &str, value: &str) -> DomainError {
    DomainError::Decode(format!("unknown {} '{}' in database", what, value))
}

#[derive(FromRow)]
struct AccountRow {
    id: i64,
    role: String,
    full_name: String,
    status: String,
    rate_per_minute: Option<Decimal>,
    wallet: Decimal,
}

impl TryFrom<AccountRow> for Account {
    type Error = DomainError;

    fn try_from(r: AccountRow) -> Result<Self> {
        Ok(Account {
            id: AccountId::new(r.id),
            role: Role::from_str(&r.role).ok_or_else(|| decode_err("role", &r.role))?,
            full_name: r.full_name,
            status: AccountStatus::from_str(&r.status)
                .ok_or_else(|| decode_err("account status", &r.status))?,
            rate_per_minute: r.rate_per_minute,
            wallet: r.wallet,
        })
    }
}

#[derive(FromRow)]
struct RequestRow {
    id: Uuid,
    client_id: i64,
    advisor_id: i64,
    channel_name: String,
    duration_minutes: i32,
    total_cost: Decimal,
    status: String,
    advisor_token: Option<String>,
    client_token: Option<String>,
    decline_reason: Option<String>,
    end_reason: Option<String>,
    version: i64,
    created_at: DateTime<Utc>,
    accepted_at: Option<DateTime<Utc>>,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<RequestRow> for CallRequest {
    type Error = DomainError;

    fn try_from(r: RequestRow) -> Result<Self> {
        let decline_reason = match r.decline_reason {
            Some(s) => Some(DeclineReason::from_str(&s).ok_or_else(|| decode_err("decline reason", &s))?),
            None => None,
        };
        let end_reason = match r.end_reason {
            Some(s) => Some(EndReason::from_str(&s).ok_or_else(|| decode_err("end reason", &s))?),
            None => None,
        };

        Ok(CallRequest {
            id: RequestId::from_uuid(r.id),
            client_id: AccountId::new(r.client_id),
            advisor_id: AccountId::new(r.advisor_id),
            channel_name: ChannelName::from_string(r.channel_name),
            duration_minutes: u32::try_from(r.duration_minutes)
                .map_err(|_| decode_err("duration", &r.duration_minutes.to_string()))?,
            total_cost: r.total_cost,
            status: CallRequestStatus::from_str(&r.status)
                .ok_or_else(|| decode_err("call request status", &r.status))?,
            advisor_token: r.advisor_token.map(SignalingToken::new),
            client_token: r.client_token.map(SignalingToken::new),
            decline_reason,
            end_reason,
            version: r.version as u64,
            created_at: r.created_at,
            accepted_at: r.accepted_at,
            started_at: r.started_at,
            ended_at: r.ended_at,
            updated_at: r.updated_at,
        })
    }
}

#[derive(FromRow)]
struct CallRow {
    id: Uuid,
    request_id: Uuid,
    client_id: i64,
    advisor_id: i64,
    request_time: DateTime<Utc>,
    start_time: DateTime<Utc>,
    end_time: Option<DateTime<Utc>>,
    duration_minutes: i32,
    per_minute_charge: Decimal,
    call_charge: Decimal,
    call_total_charge: Decimal,
    status: String,
    remark: Option<String>,
}

impl TryFrom<CallRow> for Call {
    type Error = DomainError;

    fn try_from(r: CallRow) -> Result<Self> {
        Ok(Call {
            id: CallId::from_uuid(r.id),
            request_id: RequestId::from_uuid(r.request_id),
            client_id: AccountId::new(r.client_id),
            advisor_id: AccountId::new(r.advisor_id),
            request_time: r.request_time,
            start_time: r.start_time,
            end_time: r.end_time,
            duration_minutes: r.duration_minutes.max(0) as u32,
            per_minute_charge: r.per_minute_charge,
            call_charge: r.call_charge,
            call_total_charge: r.call_total_charge,
            status: CallStatus::from_str(&r.status)
                .ok_or_else(|| decode_err("call status", &r.status))?,
            remark: r.remark,
        })
    }
}

#[derive(FromRow)]
struct TransactionRow {
    id: Uuid,
    account_id: i64,
    debit: Decimal,
    credit: Decimal,
    balance: Decimal,
    remark: String,
    date_time: DateTime<Utc>,
    call_id: Option<Uuid>,
}

impl From<TransactionRow> for WalletTransaction {
    fn from(r: TransactionRow) -> Self {
        WalletTransaction {
            id: TransactionId::from_uuid(r.id),
            account_id: AccountId::new(r.account_id),
            debit: r.debit,
            credit: r.credit,
            balance: r.balance,
            remark: r.remark,
            date_time: r.date_time,
            call_id: r.call_id.map(CallId::from_uuid),
        }
    }
}

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Register an account as the identity subsystem would, recording any
    /// starting wallet as an opening credit.
    pub async fn insert_account(&self, account: &Account) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO accounts (id, role, full_name, status, rate_per_minute, wallet) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(account.id.as_i64())
        .bind(account.role.as_str())
        .bind(&account.full_name)
        .bind(account.status.as_str())
        .bind(account.rate_per_minute)
        .bind(account.wallet)
        .execute(&mut *tx)
        .await?;

        if account.wallet > Decimal::ZERO {
            let opening = WalletTransaction::credit(
                account.id,
                account.wallet,
                account.wallet,
                "Opening balance".to_string(),
                Utc::now(),
            );
            insert_transaction(&mut tx, &opening).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn set_account_status(&self, id: AccountId, status: AccountStatus) -> Result<()> {
        let result = sqlx::query("UPDATE accounts SET status = $2 WHERE id = $1")
            .bind(id.as_i64())
            .bind(status.as_str())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(DomainError::NotFound(format!("Account {}", id)));
        }
        Ok(())
    }
}

async fn lock_request(tx: &mut Transaction<'_, Postgres>, id: RequestId) -> Result<CallRequest> {
    let row = sqlx::query_as::<_, RequestRow>(&format!(
        "SELECT {} FROM call_requests WHERE id = $1 FOR UPDATE",
        REQUEST_COLUMNS
    ))
    .bind(id.as_uuid())
    .fetch_optional(&mut **tx)
    .await?
    .ok_or_else(|| DomainError::NotFound(format!("Call request {}", id)))?;
    CallRequest::try_from(row)
}

/// Write back every mutable column, conditioned on the status the change
/// started from.
async fn update_request(
    tx: &mut Transaction<'_, Postgres>,
    request: &CallRequest,
    expected: CallRequestStatus,
) -> Result<()> {
    let result = sqlx::query(
        "UPDATE call_requests SET status = $3, advisor_token = $4, client_token = $5, \
         decline_reason = $6, end_reason = $7, version = $8, accepted_at = $9, \
         started_at = $10, ended_at = $11, updated_at = $12 \
         WHERE id = $1 AND status = $2",
    )
    .bind(request.id.as_uuid())
    .bind(expected.as_str())
    .bind(request.status.as_str())
    .bind(request.advisor_token.as_ref().map(|t| t.as_str().to_string()))
    .bind(request.client_token.as_ref().map(|t| t.as_str().to_string()))
    .bind(request.decline_reason.map(|r| r.as_str()))
    .bind(request.end_reason.map(|r| r.as_str()))
    .bind(request.version as i64)
    .bind(request.accepted_at)
    .bind(request.started_at)
    .bind(request.ended_at)
    .bind(request.updated_at)
    .execute(&mut **tx)
    .await?;

    if result.rows_affected() != 1 {
        return Err(DomainError::Storage(format!(
            "conditional update of request {} matched {} rows",
            request.id,
            result.rows_affected()
        )));
    }
    Ok(())
}

async fn update_account(tx: &mut Transaction<'_, Postgres>, account: &Account) -> Result<()> {
    sqlx::query("UPDATE accounts SET wallet = $2, status = $3 WHERE id = $1")
        .bind(account.id.as_i64())
        .bind(account.wallet)
        .bind(account.status.as_str())
        .execute(&mut **tx)
        .await?;
    Ok(())
}

async fn insert_transaction(
    tx: &mut Transaction<'_, Postgres>,
    entry: &WalletTransaction,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO wallet_transactions \
         (id, account_id, debit, credit, balance, remark, date_time, call_id) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
    )
    .bind(entry.id.as_uuid())
    .bind(entry.account_id.as_i64())
    .bind(entry.debit)
    .bind(entry.credit)
    .bind(entry.balance)
    .bind(&entry.remark)
    .bind(entry.date_time)
    .bind(entry.call_id.map(|id| id.as_uuid()))
    .execute(&mut **tx)
    .await?;
    Ok(())
}

#[async_trait]
impl AccountRepository for PgStore {
    async fn find_account(&self, id: AccountId) -> Result<Option<Account>> {
        sqlx::query_as::<_, AccountRow>(&format!(
            "SELECT {} FROM accounts WHERE id = $1",
            ACCOUNT_COLUMNS
        ))
        .bind(id.as_i64())
        .fetch_optional(&self.pool)
        .await?
        .map(Account::try_from)
        .transpose()
    }
}

#[async_trait]
impl CallRequestRepository for PgStore {
    async fn insert_request(&self, request: &CallRequest) -> Result<()> {
        debug!("Inserting call request {}", request.id);

        sqlx::query(&format!(
            "INSERT INTO call_requests ({}) VALUES \
             ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)",
            REQUEST_COLUMNS
        ))
        .bind(request.id.as_uuid())
        .bind(request.client_id.as_i64())
        .bind(request.advisor_id.as_i64())
        .bind(request.channel_name.as_str())
        .bind(request.duration_minutes as i32)
        .bind(request.total_cost)
        .bind(request.status.as_str())
        .bind(request.advisor_token.as_ref().map(|t| t.as_str().to_string()))
        .bind(request.client_token.as_ref().map(|t| t.as_str().to_string()))
        .bind(request.decline_reason.map(|r| r.as_str()))
        .bind(request.end_reason.map(|r| r.as_str()))
        .bind(request.version as i64)
        .bind(request.created_at)
        .bind(request.accepted_at)
        .bind(request.started_at)
        .bind(request.ended_at)
        .bind(request.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_request(&self, id: RequestId) -> Result<Option<CallRequest>> {
        sqlx::query_as::<_, RequestRow>(&format!(
            "SELECT {} FROM call_requests WHERE id = $1",
            REQUEST_COLUMNS
        ))
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?
        .map(CallRequest::try_from)
        .transpose()
    }

    async fn negotiate(
        &self,
        id: RequestId,
        step: Negotiation,
        at: DateTime<Utc>,
    ) -> Result<CallRequest> {
        let mut tx = self.pool.begin().await?;
        let mut request = lock_request(&mut tx, id).await?;

        request.negotiate(&step, at)?;
        update_request(&mut tx, &request, step.expected()).await?;

        tx.commit().await?;
        Ok(request)
    }

    async fn complete(
        &self,
        id: RequestId,
        reason: EndReason,
        at: DateTime<Utc>,
    ) -> Result<Completion> {
        let mut tx = self.pool.begin().await?;
        let mut request = lock_request(&mut tx, id).await?;

        request.complete(reason, at)?;
        update_request(&mut tx, &request, CallRequestStatus::InProgress).await?;

        let call = sqlx::query_as::<_, CallRow>(&format!(
            "UPDATE calls SET status = $2, end_time = $3, remark = $4 \
             WHERE request_id = $1 RETURNING {}",
            CALL_COLUMNS
        ))
        .bind(id.as_uuid())
        .bind(CallStatus::Completed.as_str())
        .bind(at)
        .bind(reason.remark())
        .fetch_optional(&mut *tx)
        .await?
        .map(Call::try_from)
        .transpose()?;

        sqlx::query("UPDATE accounts SET status = $2 WHERE id = ANY($1)")
            .bind(vec![request.client_id.as_i64(), request.advisor_id.as_i64()])
            .bind(AccountStatus::Available.as_str())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(Completion { request, call })
    }

    async fn list_open(&self) -> Result<Vec<CallRequest>> {
        sqlx::query_as::<_, RequestRow>(&format!(
            "SELECT {} FROM call_requests \
             WHERE status IN ('pending', 'advisor_accepted', 'in_progress') \
             ORDER BY created_at",
            REQUEST_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(CallRequest::try_from)
        .collect()
    }
}

#[async_trait]
impl LedgerRepository for PgStore {
    async fn post_call_charge(
        &self,
        request_id: RequestId,
        at: DateTime<Utc>,
    ) -> Result<CallPosting> {
        let mut tx = self.pool.begin().await?;
        let request = lock_request(&mut tx, request_id).await?;

        // Lock both parties in id order so concurrent postings cannot deadlock
        let rows = sqlx::query_as::<_, AccountRow>(&format!(
            "SELECT {} FROM accounts WHERE id = ANY($1) ORDER BY id FOR UPDATE",
            ACCOUNT_COLUMNS
        ))
        .bind(vec![request.client_id.as_i64(), request.advisor_id.as_i64()])
        .fetch_all(&mut *tx)
        .await?;

        let mut client = None;
        let mut advisor = None;
        for row in rows {
            let account = Account::try_from(row)?;
            if account.id == request.client_id {
                client = Some(account);
            } else if account.id == request.advisor_id {
                advisor = Some(account);
            }
        }
        let client = client
            .ok_or_else(|| DomainError::NotFound(format!("Account {}", request.client_id)))?;
        let advisor = advisor
            .ok_or_else(|| DomainError::NotFound(format!("Account {}", request.advisor_id)))?;

        let plan = plan_call_charge(&request, &client, &advisor, at)?;

        let result = sqlx::query(&format!(
            "INSERT INTO calls ({}) VALUES \
             ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13) \
             ON CONFLICT (request_id) DO NOTHING",
            CALL_COLUMNS
        ))
        .bind(plan.call.id.as_uuid())
        .bind(plan.call.request_id.as_uuid())
        .bind(plan.call.client_id.as_i64())
        .bind(plan.call.advisor_id.as_i64())
        .bind(plan.call.request_time)
        .bind(plan.call.start_time)
        .bind(plan.call.end_time)
        .bind(plan.call.duration_minutes as i32)
        .bind(plan.call.per_minute_charge)
        .bind(plan.call.call_charge)
        .bind(plan.call.call_total_charge)
        .bind(plan.call.status.as_str())
        .bind(plan.call.remark.as_deref())
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() != 1 {
            error!("Request {} already has a billing record", request_id);
            return Err(DomainError::BillingInconsistency(format!(
                "request {} already has a billing record",
                request_id
            )));
        }

        update_account(&mut tx, &plan.client).await?;
        update_account(&mut tx, &plan.advisor).await?;
        insert_transaction(&mut tx, &plan.client_entry).await?;
        insert_transaction(&mut tx, &plan.advisor_entry).await?;
        update_request(&mut tx, &plan.request, CallRequestStatus::AdvisorAccepted).await?;

        tx.commit().await?;
        debug!("Posted call charge for request {}", request_id);
        Ok(plan.into_posting())
    }

    async fn post_credit(
        &self,
        account_id: AccountId,
        amount: Decimal,
        remark: String,
        at: DateTime<Utc>,
    ) -> Result<WalletTransaction> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, AccountRow>(&format!(
            "SELECT {} FROM accounts WHERE id = $1 FOR UPDATE",
            ACCOUNT_COLUMNS
        ))
        .bind(account_id.as_i64())
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| DomainError::NotFound(format!("Account {}", account_id)))?;
        let mut account = Account::try_from(row)?;
        account.wallet += amount;

        let entry = WalletTransaction::credit(account_id, amount, account.wallet, remark, at);
        update_account(&mut tx, &account).await?;
        insert_transaction(&mut tx, &entry).await?;

        tx.commit().await?;
        Ok(entry)
    }

    async fn transactions_for(&self, account_id: AccountId) -> Result<Vec<WalletTransaction>> {
        let rows = sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {} FROM wallet_transactions WHERE account_id = $1 ORDER BY seq",
            TRANSACTION_COLUMNS
        ))
        .bind(account_id.as_i64())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(WalletTransaction::from).collect())
    }

    async fn call_for_request(&self, request_id: RequestId) -> Result<Option<Call>> {
        sqlx::query_as::<_, CallRow>(&format!(
            "SELECT {} FROM calls WHERE request_id = $1",
            CALL_COLUMNS
        ))
        .bind(request_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?
        .map(Call::try_from)
        .transpose()
    }
}
