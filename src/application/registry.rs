//! Session registry - every call request transition goes through here

use crate::config::SessionConfig;
use crate::domain::account::{Account, AccountRepository, AccountStatus};
use crate::domain::call_request::{
    CallRequest, CallRequestRepository, CallRequestStatus, DeclineReason, EndReason, Negotiation,
    StatusChanged,
};
use crate::domain::ledger::{Call, CallPosting, Ledger};
use crate::domain::shared::error::DomainError;
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::{AccountId, RequestId};
use crate::domain::signaling::{issue_pair, SignalingTokenIssuer};
use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, info};

/// A committed transition and the event describing it
#[derive(Debug, Clone)]
pub struct Transition {
    pub request: CallRequest,
    pub event: StatusChanged,
}

impl Transition {
    fn created(request: CallRequest) -> Self {
        let event = StatusChanged::created(&request);
        Self { request, event }
    }

    fn moved(request: CallRequest, from: CallRequestStatus, forced: bool) -> Self {
        let event = StatusChanged::transitioned(&request, from, forced);
        Self { request, event }
    }
}

/// Result of a successful join: the transition plus what it billed
#[derive(Debug, Clone)]
pub struct JoinOutcome {
    pub transition: Transition,
    pub posting: CallPosting,
}

/// Result of ending a call
#[derive(Debug, Clone)]
pub struct EndOutcome {
    pub transition: Transition,
    pub call: Option<Call>,
}

/// Owns the call request state machine.
///
/// Every method is keyed by request id and conditioned on the status the
/// transition starts from. Whoever loses a race gets
/// [`DomainError::InvalidTransition`] and the stored record is unchanged.
pub struct SessionRegistry {
    accounts: Arc<dyn AccountRepository>,
    requests: Arc<dyn CallRequestRepository>,
    ledger: Arc<Ledger>,
    tokens: Arc<dyn SignalingTokenIssuer>,
    min_duration_minutes: u32,
    max_duration_minutes: u32,
}

impl SessionRegistry {
    pub fn new(
        accounts: Arc<dyn AccountRepository>,
        requests: Arc<dyn CallRequestRepository>,
        ledger: Arc<Ledger>,
        tokens: Arc<dyn SignalingTokenIssuer>,
        session: &SessionConfig,
    ) -> Self {
        Self {
            accounts,
            requests,
            ledger,
            tokens,
            min_duration_minutes: session.min_duration_minutes,
            max_duration_minutes: session.max_duration_minutes,
        }
    }

    async fn account(&self, id: AccountId) -> Result<Account> {
        self.accounts
            .find_account(id)
            .await?
            .ok_or_else(|| DomainError::NotFound(format!("Account {}", id)))
    }

    pub async fn find(&self, id: RequestId) -> Result<CallRequest> {
        self.requests
            .find_request(id)
            .await?
            .ok_or_else(|| DomainError::NotFound(format!("Call request {}", id)))
    }

    pub async fn list_open(&self) -> Result<Vec<CallRequest>> {
        self.requests.list_open().await
    }

    /// Insert a pending request priced at the advisor's current rate
    pub async fn create(
        &self,
        client_id: AccountId,
        advisor_id: AccountId,
        duration_minutes: u32,
    ) -> Result<Transition> {
        if duration_minutes < self.min_duration_minutes
            || duration_minutes > self.max_duration_minutes
        {
            return Err(DomainError::ValidationError(format!(
                "Call duration must be between {} and {} minutes.",
                self.min_duration_minutes, self.max_duration_minutes
            )));
        }

        let client = self.account(client_id).await?;
        if !client.is_client() {
            return Err(DomainError::Unauthorized(format!(
                "Account {} is not a client",
                client_id
            )));
        }

        let advisor = self.account(advisor_id).await?;
        if !advisor.is_advisor() {
            return Err(DomainError::NotFound(format!("Advisor {}", advisor_id)));
        }

        match advisor.status {
            AccountStatus::Available => {}
            AccountStatus::Busy => {
                return Err(DomainError::AdvisorUnavailable(
                    "The advisor is currently on another call.".to_string(),
                ))
            }
            _ => {
                return Err(DomainError::AdvisorUnavailable(
                    "Advisor is not available for calls.".to_string(),
                ))
            }
        }

        let rate = advisor.rate_per_minute.ok_or_else(|| {
            DomainError::AdvisorUnavailable("Advisor has not set a rate.".to_string())
        })?;
        let cost = rate * Decimal::from(duration_minutes);
        if client.wallet < cost {
            return Err(DomainError::InsufficientBalance {
                required: cost,
                available: client.wallet,
            });
        }

        let request = CallRequest::new(client_id, advisor_id, duration_minutes, rate, Utc::now());
        self.requests.insert_request(&request).await?;

        info!(
            "Call request {} created: client {} -> advisor {}, {} min, cost {}",
            request.id, client_id, advisor_id, duration_minutes, request.total_cost
        );
        Ok(Transition::created(request))
    }

    /// pending -> advisor_accepted, issuing both parties' signaling tokens
    pub async fn advisor_accept(&self, id: RequestId) -> Result<Transition> {
        let request = self.find(id).await?;
        if request.status != CallRequestStatus::Pending {
            return Err(DomainError::InvalidTransition {
                request_id: id,
                expected: CallRequestStatus::Pending,
                actual: request.status,
            });
        }

        let tokens = issue_pair(
            self.tokens.as_ref(),
            &request.channel_name,
            request.advisor_id,
            request.client_id,
        )?;

        let accepted = self
            .requests
            .negotiate(id, Negotiation::Accept { tokens }, Utc::now())
            .await?;

        info!("Call request {} accepted by advisor {}", id, accepted.advisor_id);
        Ok(Transition::moved(accepted, CallRequestStatus::Pending, false))
    }

    /// pending -> advisor_declined
    pub async fn advisor_decline(&self, id: RequestId, reason: DeclineReason) -> Result<Transition> {
        let declined = self
            .requests
            .negotiate(id, Negotiation::AdvisorDecline { reason }, Utc::now())
            .await?;

        info!("Call request {} declined ({})", id, reason.as_str());
        Ok(Transition::moved(
            declined,
            CallRequestStatus::Pending,
            reason == DeclineReason::Timeout,
        ))
    }

    /// advisor_accepted -> in_progress, billing the call in the same unit
    pub async fn client_join(&self, id: RequestId) -> Result<JoinOutcome> {
        let request = self.find(id).await?;
        let posting = self.ledger.charge_for_call(&request).await?;

        info!("Call {} started for request {}", posting.call.id, id);
        Ok(JoinOutcome {
            transition: Transition::moved(
                posting.request.clone(),
                CallRequestStatus::AdvisorAccepted,
                false,
            ),
            posting,
        })
    }

    /// advisor_accepted -> declined
    pub async fn client_decline(&self, id: RequestId, reason: DeclineReason) -> Result<Transition> {
        let declined = self
            .requests
            .negotiate(id, Negotiation::ClientDecline { reason }, Utc::now())
            .await?;

        info!("Call request {} declined after acceptance ({})", id, reason.as_str());
        Ok(Transition::moved(
            declined,
            CallRequestStatus::AdvisorAccepted,
            reason == DeclineReason::Timeout,
        ))
    }

    /// in_progress -> completed, releasing both accounts
    pub async fn end(&self, id: RequestId, reason: EndReason) -> Result<EndOutcome> {
        let completion = self.requests.complete(id, reason, Utc::now()).await?;

        match &completion.call {
            Some(call) => info!("Call {} ended: {}", call.id, reason.remark()),
            None => debug!("Request {} completed without a billing record", id),
        }

        Ok(EndOutcome {
            transition: Transition::moved(
                completion.request,
                CallRequestStatus::InProgress,
                reason == EndReason::Auto,
            ),
            call: completion.call,
        })
    }
}
