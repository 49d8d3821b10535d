//! Call request aggregate root

use crate::domain::call_request::value_object::{
    CallRequestStatus, DeclineReason, EndReason, ExpiryKind,
};
use crate::domain::shared::error::DomainError;
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::{AccountId, ChannelName, RequestId};
use crate::domain::signaling::{SignalingToken, SignalingTokens};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Negotiation steps a party (or a timer acting for one) can take before
/// billing starts
#[derive(Debug, Clone, PartialEq)]
pub enum Negotiation {
    /// Advisor accepts; tokens for both parties are issued up front
    Accept { tokens: SignalingTokens },
    /// Advisor declines, or the accept window runs out
    AdvisorDecline { reason: DeclineReason },
    /// Client declines after acceptance, or the join window runs out
    ClientDecline { reason: DeclineReason },
}

impl Negotiation {
    pub fn expected(&self) -> CallRequestStatus {
        match self {
            Negotiation::Accept { .. } | Negotiation::AdvisorDecline { .. } => {
                CallRequestStatus::Pending
            }
            Negotiation::ClientDecline { .. } => CallRequestStatus::AdvisorAccepted,
        }
    }

    pub fn target(&self) -> CallRequestStatus {
        match self {
            Negotiation::Accept { .. } => CallRequestStatus::AdvisorAccepted,
            Negotiation::AdvisorDecline { .. } => CallRequestStatus::AdvisorDeclined,
            Negotiation::ClientDecline { .. } => CallRequestStatus::Declined,
        }
    }
}

/// Call request aggregate root
///
/// The single record both parties and the timers race on. Every mutation
/// names the status it expects to find; a mismatch fails with
/// [`DomainError::InvalidTransition`] and leaves the record untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallRequest {
    pub id: RequestId,
    pub client_id: AccountId,
    pub advisor_id: AccountId,
    pub channel_name: ChannelName,
    pub duration_minutes: u32,
    /// duration x advisor rate at request time, frozen thereafter
    pub total_cost: Decimal,
    pub status: CallRequestStatus,
    pub advisor_token: Option<SignalingToken>,
    pub client_token: Option<SignalingToken>,
    pub decline_reason: Option<DeclineReason>,
    pub end_reason: Option<EndReason>,
    /// Commit marker, bumped on every write
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl CallRequest {
    /// Create a pending request, pricing it at the advisor's current rate
    pub fn new(
        client_id: AccountId,
        advisor_id: AccountId,
        duration_minutes: u32,
        rate_per_minute: Decimal,
        now: DateTime<Utc>,
    ) -> Self {
        let id = RequestId::new();
        Self {
            id,
            client_id,
            advisor_id,
            channel_name: ChannelName::derive(id, advisor_id, client_id, now),
            duration_minutes,
            total_cost: rate_per_minute * Decimal::from(duration_minutes),
            status: CallRequestStatus::Pending,
            advisor_token: None,
            client_token: None,
            decline_reason: None,
            end_reason: None,
            version: 1,
            created_at: now,
            accepted_at: None,
            started_at: None,
            ended_at: None,
            updated_at: now,
        }
    }

    /// Apply a pre-billing negotiation step
    pub fn negotiate(&mut self, step: &Negotiation, at: DateTime<Utc>) -> Result<()> {
        self.advance(step.expected(), step.target(), at)?;

        match step {
            Negotiation::Accept { tokens } => {
                self.advisor_token = Some(tokens.advisor.clone());
                self.client_token = Some(tokens.client.clone());
                self.accepted_at = Some(at);
            }
            Negotiation::AdvisorDecline { reason } | Negotiation::ClientDecline { reason } => {
                self.decline_reason = Some(*reason);
            }
        }

        Ok(())
    }

    /// advisor_accepted -> in_progress; only the ledger posting calls this
    pub fn start(&mut self, at: DateTime<Utc>) -> Result<()> {
        self.advance(
            CallRequestStatus::AdvisorAccepted,
            CallRequestStatus::InProgress,
            at,
        )?;
        self.started_at = Some(at);
        Ok(())
    }

    /// in_progress -> completed
    pub fn complete(&mut self, reason: EndReason, at: DateTime<Utc>) -> Result<()> {
        self.advance(
            CallRequestStatus::InProgress,
            CallRequestStatus::Completed,
            at,
        )?;
        self.end_reason = Some(reason);
        self.ended_at = Some(at);
        Ok(())
    }

    /// Guarded move: the stored status must equal `expected`
    fn advance(
        &mut self,
        expected: CallRequestStatus,
        next: CallRequestStatus,
        at: DateTime<Utc>,
    ) -> Result<()> {
        if self.status != expected {
            return Err(DomainError::InvalidTransition {
                request_id: self.id,
                expected,
                actual: self.status,
            });
        }

        if !self.status.can_transition_to(&next) {
            return Err(DomainError::Internal(format!(
                "Transition {} -> {} is not in the request graph",
                self.status, next
            )));
        }

        self.status = next;
        self.version += 1;
        self.updated_at = at;
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        !self.status.is_terminal()
    }

    pub fn is_party(&self, account: AccountId) -> bool {
        self.client_id == account || self.advisor_id == account
    }

    /// Rate actually charged per minute
    pub fn per_minute_charge(&self) -> Decimal {
        if self.duration_minutes == 0 {
            return Decimal::ZERO;
        }
        self.total_cost / Decimal::from(self.duration_minutes)
    }

    /// The countdown currently governing this request and when it runs out
    pub fn deadline(
        &self,
        accept_window: Duration,
        join_window: Duration,
    ) -> Option<(ExpiryKind, DateTime<Utc>)> {
        match self.status {
            CallRequestStatus::Pending => {
                Some((ExpiryKind::AcceptWindow, self.created_at + accept_window))
            }
            CallRequestStatus::AdvisorAccepted => {
                let accepted_at = self.accepted_at.unwrap_or(self.updated_at);
                Some((ExpiryKind::JoinWindow, accepted_at + join_window))
            }
            CallRequestStatus::InProgress => {
                let started_at = self.started_at.unwrap_or(self.updated_at);
                Some((
                    ExpiryKind::CallDuration,
                    started_at + Duration::minutes(i64::from(self.duration_minutes)),
                ))
            }
            _ => None,
        }
    }
}
