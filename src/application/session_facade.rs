//! Session facade - the public call operations
//!
//! Combines registry, ledger, dispatcher and timers into the actions parties
//! (and the timers acting for them) perform. Holds no session state itself;
//! everything lives in the stores and the timer table.

use crate::application::dispatcher::{FeedSubscription, NotificationDispatcher};
use crate::application::registry::{SessionRegistry, Transition};
use crate::application::timers::{Expiry, TimerSupervisor};
use crate::config::SessionConfig;
use crate::domain::account::{AccountRepository, Role};
use crate::domain::call_request::{
    CallRequest, CallRequestStatus, DeclineReason, EndReason, ExpiryKind,
};
use crate::domain::ledger::{Ledger, WalletTransaction};
use crate::domain::shared::error::DomainError;
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::{AccountId, RequestId};
use crate::infrastructure::audit::AuditLogger;
use metrics::counter;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Advisor's answer to a pending request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdvisorAction {
    Accept,
    Decline,
}

/// Client's answer to an accepted request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientAction {
    Join,
    Decline,
}

pub struct SessionFacade {
    registry: SessionRegistry,
    ledger: Arc<Ledger>,
    accounts: Arc<dyn AccountRepository>,
    dispatcher: Arc<NotificationDispatcher>,
    timers: TimerSupervisor,
    audit: Arc<AuditLogger>,
    accept_window: Duration,
    join_window: Duration,
}

impl SessionFacade {
    pub fn new(
        registry: SessionRegistry,
        ledger: Arc<Ledger>,
        accounts: Arc<dyn AccountRepository>,
        dispatcher: Arc<NotificationDispatcher>,
        timers: TimerSupervisor,
        audit: Arc<AuditLogger>,
        session: &SessionConfig,
    ) -> Self {
        Self {
            registry,
            ledger,
            accounts,
            dispatcher,
            timers,
            audit,
            accept_window: session.accept_window(),
            join_window: session.join_window(),
        }
    }

    /// A client asks an advisor for a call of `duration_minutes`
    pub async fn request_call(
        &self,
        caller: AccountId,
        advisor_id: AccountId,
        duration_minutes: u32,
    ) -> Result<CallRequest> {
        let transition = self
            .registry
            .create(caller, advisor_id, duration_minutes)
            .await
            .map_err(|e| self.rejected("request_call", caller, e))?;

        counter!("call_requests_total").increment(1);
        self.audit.log_request_created(&transition.request).await;
        self.after_transition(&transition, Some(caller)).await;
        Ok(transition.request)
    }

    pub async fn advisor_respond(
        &self,
        caller: AccountId,
        request_id: RequestId,
        action: AdvisorAction,
    ) -> Result<CallRequest> {
        match action {
            AdvisorAction::Accept => self.accept_call(caller, request_id).await,
            AdvisorAction::Decline => self.decline_call(caller, request_id).await,
        }
    }

    pub async fn client_respond(
        &self,
        caller: AccountId,
        request_id: RequestId,
        action: ClientAction,
    ) -> Result<CallRequest> {
        match action {
            ClientAction::Join => self.join_call(caller, request_id).await,
            ClientAction::Decline => self.decline_after_accept(caller, request_id).await,
        }
    }

    pub async fn accept_call(&self, caller: AccountId, request_id: RequestId) -> Result<CallRequest> {
        self.authorize(request_id, caller, Some(Role::Advisor)).await?;

        let transition = self
            .registry
            .advisor_accept(request_id)
            .await
            .map_err(|e| self.rejected("accept_call", caller, e))?;

        self.after_transition(&transition, Some(caller)).await;
        Ok(transition.request)
    }

    pub async fn decline_call(&self, caller: AccountId, request_id: RequestId) -> Result<CallRequest> {
        self.authorize(request_id, caller, Some(Role::Advisor)).await?;

        let transition = self
            .registry
            .advisor_decline(request_id, DeclineReason::Advisor)
            .await
            .map_err(|e| self.rejected("decline_call", caller, e))?;

        self.after_transition(&transition, Some(caller)).await;
        Ok(transition.request)
    }

    /// Client joins an accepted request; this is where the call is billed
    pub async fn join_call(&self, caller: AccountId, request_id: RequestId) -> Result<CallRequest> {
        self.authorize(request_id, caller, Some(Role::Client)).await?;

        let outcome = match self.registry.client_join(request_id).await {
            Ok(outcome) => outcome,
            Err(e) => {
                self.record_billing_failure(request_id, &e).await;
                return Err(self.rejected("join_call", caller, e));
            }
        };

        counter!("billing_postings_total").increment(1);
        self.audit.log_billing_posted(&outcome.posting).await;
        self.after_transition(&outcome.transition, Some(caller)).await;
        Ok(outcome.transition.request)
    }

    pub async fn decline_after_accept(
        &self,
        caller: AccountId,
        request_id: RequestId,
    ) -> Result<CallRequest> {
        self.authorize(request_id, caller, Some(Role::Client)).await?;

        let transition = self
            .registry
            .client_decline(request_id, DeclineReason::Client)
            .await
            .map_err(|e| self.rejected("decline_after_accept", caller, e))?;

        self.after_transition(&transition, Some(caller)).await;
        Ok(transition.request)
    }

    /// Either party ends an in-progress call
    pub async fn end_call(
        &self,
        caller: AccountId,
        request_id: RequestId,
        reason: EndReason,
    ) -> Result<CallRequest> {
        let request = self.authorize(request_id, caller, None).await?;

        let mismatched = match reason {
            EndReason::Advisor => caller != request.advisor_id,
            EndReason::Client => caller != request.client_id,
            EndReason::Error => false,
            // Only the duration timer ends a call as auto
            EndReason::Auto => {
                return Err(DomainError::ValidationError(
                    "Calls are auto-ended by the timer only.".to_string(),
                ))
            }
        };
        if mismatched {
            return Err(DomainError::ValidationError(
                "End reason does not match the caller.".to_string(),
            ));
        }

        let outcome = self
            .registry
            .end(request_id, reason)
            .await
            .map_err(|e| self.rejected("end_call", caller, e))?;

        self.after_transition(&outcome.transition, Some(caller)).await;
        Ok(outcome.transition.request)
    }

    /// Force the transition a fired countdown stands for.
    ///
    /// Returns the updated request when the force won; misfires against a
    /// request that already moved on are logged and absorbed.
    pub async fn expire(&self, expiry: Expiry) -> Option<CallRequest> {
        let Expiry { request_id, kind } = expiry;

        let result = match kind {
            ExpiryKind::AcceptWindow => {
                self.registry
                    .advisor_decline(request_id, DeclineReason::Timeout)
                    .await
            }
            ExpiryKind::JoinWindow => {
                self.registry
                    .client_decline(request_id, DeclineReason::Timeout)
                    .await
            }
            ExpiryKind::CallDuration => self
                .registry
                .end(request_id, EndReason::Auto)
                .await
                .map(|outcome| outcome.transition),
        };

        match result {
            Ok(transition) => {
                info!(
                    "{} expired for request {}: now {}",
                    kind, request_id, transition.request.status
                );
                counter!("timer_expiries_total", "kind" => kind.as_str()).increment(1);
                self.audit.log_timer_expired(request_id, kind).await;
                self.after_transition(&transition, None).await;
                Some(transition.request)
            }
            Err(e) if e.is_benign() => {
                debug!("Timer misfire on request {} ({}): {}", request_id, kind, e);
                None
            }
            Err(e) => {
                warn!("Forced {} on request {} failed: {}", kind, request_id, e);
                None
            }
        }
    }

    /// Drain fired timers into [`expire`](Self::expire)
    pub fn spawn_expiry_worker(
        self: Arc<Self>,
        mut fired: mpsc::UnboundedReceiver<Expiry>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(expiry) = fired.recv().await {
                self.expire(expiry).await;
            }
            debug!("Expiry worker stopped");
        })
    }

    /// A request as seen by one of its parties
    pub async fn get_request(&self, caller: AccountId, request_id: RequestId) -> Result<CallRequest> {
        self.authorize(request_id, caller, None).await
    }

    pub async fn open_requests(&self) -> Result<Vec<CallRequest>> {
        self.registry.list_open().await
    }

    /// Open the caller's notification feed
    pub async fn subscribe(&self, caller: AccountId) -> Result<FeedSubscription> {
        let account = self
            .accounts
            .find_account(caller)
            .await?
            .ok_or_else(|| DomainError::NotFound(format!("Account {}", caller)))?;
        Ok(self.dispatcher.subscribe(account.role, caller))
    }

    pub async fn history(&self, caller: AccountId, account_id: AccountId) -> Result<Vec<WalletTransaction>> {
        if caller != account_id {
            return Err(DomainError::Unauthorized(format!(
                "Account {} cannot read the ledger of {}",
                caller, account_id
            )));
        }
        self.ledger.history(account_id).await
    }

    /// Wallet recharge confirmed by the payment gateway
    pub async fn top_up(
        &self,
        account_id: AccountId,
        amount: Decimal,
        payment_reference: &str,
    ) -> Result<WalletTransaction> {
        let entry = self.ledger.top_up(account_id, amount, payment_reference).await?;
        self.audit
            .log_wallet_credited(account_id, amount, payment_reference.to_string())
            .await;
        Ok(entry)
    }

    /// Check an account's wallet against its ledger, alarming on drift
    pub async fn reconcile(&self, account_id: AccountId) -> Result<Decimal> {
        match self.ledger.reconcile(account_id).await {
            Err(DomainError::BillingInconsistency(detail)) => {
                self.audit
                    .log_billing_inconsistency(None, Some(account_id), detail.clone())
                    .await;
                Err(DomainError::BillingInconsistency(detail))
            }
            other => other,
        }
    }

    pub fn timers(&self) -> &TimerSupervisor {
        &self.timers
    }

    /// Load the request and check the caller's part in it. `role: None`
    /// admits either party.
    async fn authorize(
        &self,
        request_id: RequestId,
        caller: AccountId,
        role: Option<Role>,
    ) -> Result<CallRequest> {
        let request = self.registry.find(request_id).await?;

        let allowed = match role {
            Some(Role::Advisor) => request.advisor_id == caller,
            Some(Role::Client) => request.client_id == caller,
            None => request.is_party(caller),
        };

        if !allowed {
            warn!("Account {} denied on request {}", caller, request_id);
            return Err(DomainError::Unauthorized(format!(
                "Account {} may not act on request {}",
                caller, request_id
            )));
        }
        Ok(request)
    }

    /// Move timers, notify both feeds and record the change
    async fn after_transition(&self, transition: &Transition, actor: Option<AccountId>) {
        let request = &transition.request;
        counter!("call_transitions_total", "to" => request.status.as_str()).increment(1);

        if let Some(kind) = transition.event.from.and_then(ExpiryKind::guarding) {
            self.timers.cancel(request.id, kind).await;
        }

        match request.status {
            CallRequestStatus::Pending => {
                self.timers
                    .arm(request.id, ExpiryKind::AcceptWindow, self.accept_window)
                    .await;
            }
            CallRequestStatus::AdvisorAccepted => {
                self.timers
                    .arm(request.id, ExpiryKind::JoinWindow, self.join_window)
                    .await;
            }
            CallRequestStatus::InProgress => {
                let length = Duration::from_secs(u64::from(request.duration_minutes) * 60);
                self.timers
                    .arm(request.id, ExpiryKind::CallDuration, length)
                    .await;
            }
            _ => {
                self.timers.cancel_all(request.id).await;
            }
        }

        self.dispatcher.publish(request);
        self.audit.log_transition(&transition.event, actor).await;
    }

    async fn record_billing_failure(&self, request_id: RequestId, err: &DomainError) {
        let reason = match err {
            DomainError::InsufficientBalance { .. } => "insufficient_balance",
            DomainError::AdvisorUnavailable(_) => "advisor_unavailable",
            DomainError::BillingInconsistency(_) => "inconsistency",
            DomainError::Storage(_) | DomainError::Internal(_) => "storage",
            _ => return,
        };
        counter!("billing_failures_total", "reason" => reason).increment(1);

        if let DomainError::BillingInconsistency(detail) = err {
            error!("Billing inconsistency on request {}: {}", request_id, detail);
            self.audit
                .log_billing_inconsistency(Some(request_id), None, detail.clone())
                .await;
        } else {
            self.audit
                .log_billing_rejected(request_id, err.to_string())
                .await;
        }
    }

    /// Log a failed party action at a level matching its severity
    fn rejected(&self, operation: &str, caller: AccountId, err: DomainError) -> DomainError {
        if err.is_benign() {
            debug!("{} by {} lost a race: {}", operation, caller, err);
        } else {
            info!("{} by {} rejected: {}", operation, caller, err);
        }
        err
    }
}
