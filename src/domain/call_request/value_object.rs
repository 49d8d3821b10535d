//! Call request value objects

use crate::domain::account::Role;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Negotiation state of a call request
///
/// ```text
/// pending ──► advisor_accepted ──► in_progress ──► completed
///    │               │
///    ▼               ▼
/// advisor_declined  declined
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallRequestStatus {
    Pending,
    AdvisorAccepted,
    AdvisorDeclined,
    Declined,
    InProgress,
    Completed,
}

impl CallRequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallRequestStatus::Pending => "pending",
            CallRequestStatus::AdvisorAccepted => "advisor_accepted",
            CallRequestStatus::AdvisorDeclined => "advisor_declined",
            CallRequestStatus::Declined => "declined",
            CallRequestStatus::InProgress => "in_progress",
            CallRequestStatus::Completed => "completed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(CallRequestStatus::Pending),
            "advisor_accepted" => Some(CallRequestStatus::AdvisorAccepted),
            "advisor_declined" => Some(CallRequestStatus::AdvisorDeclined),
            "declined" => Some(CallRequestStatus::Declined),
            "in_progress" => Some(CallRequestStatus::InProgress),
            "completed" => Some(CallRequestStatus::Completed),
            _ => None,
        }
    }

    /// Check if a transition to the new status is valid
    pub fn can_transition_to(&self, next: &CallRequestStatus) -> bool {
        use CallRequestStatus::*;

        matches!(
            (self, next),
            (Pending, AdvisorAccepted)
                | (Pending, AdvisorDeclined)
                | (AdvisorAccepted, InProgress)
                | (AdvisorAccepted, Declined)
                | (InProgress, Completed)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CallRequestStatus::AdvisorDeclined
                | CallRequestStatus::Declined
                | CallRequestStatus::Completed
        )
    }

    /// Whether a party still has something to react to once the request
    /// reaches this status.
    pub fn concerns(&self, party: Role, decline_reason: Option<DeclineReason>) -> bool {
        match self {
            CallRequestStatus::Pending => party == Role::Advisor,
            CallRequestStatus::AdvisorAccepted => party == Role::Client,
            // The advisor only needs to hear about their own decline when the
            // clock made it for them.
            CallRequestStatus::AdvisorDeclined => {
                party == Role::Client || decline_reason == Some(DeclineReason::Timeout)
            }
            CallRequestStatus::Declined
            | CallRequestStatus::InProgress
            | CallRequestStatus::Completed => true,
        }
    }
}

impl fmt::Display for CallRequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who closed a request on one of the declined branches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeclineReason {
    Advisor,
    Client,
    Timeout,
}

impl DeclineReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeclineReason::Advisor => "advisor",
            DeclineReason::Client => "client",
            DeclineReason::Timeout => "timeout",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "advisor" => Some(DeclineReason::Advisor),
            "client" => Some(DeclineReason::Client),
            "timeout" => Some(DeclineReason::Timeout),
            _ => None,
        }
    }
}

/// How an in-progress call ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndReason {
    Advisor,
    Client,
    Auto,
    Error,
}

impl EndReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            EndReason::Advisor => "advisor",
            EndReason::Client => "client",
            EndReason::Auto => "auto",
            EndReason::Error => "error",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "advisor" => Some(EndReason::Advisor),
            "client" => Some(EndReason::Client),
            "auto" => Some(EndReason::Auto),
            "error" => Some(EndReason::Error),
            _ => None,
        }
    }

    /// Remark stored on the billing record
    pub fn remark(&self) -> &'static str {
        match self {
            EndReason::Advisor => "Call ended by advisor",
            EndReason::Client => "Call ended by client",
            EndReason::Auto => "Call auto-ended (timer)",
            EndReason::Error => "Call ended due to error",
        }
    }
}

/// Countdowns that can force a transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpiryKind {
    /// Advisor must accept or decline a pending request
    AcceptWindow,
    /// Client must join an accepted request
    JoinWindow,
    /// Booked call length
    CallDuration,
}

impl ExpiryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExpiryKind::AcceptWindow => "accept_window",
            ExpiryKind::JoinWindow => "join_window",
            ExpiryKind::CallDuration => "call_duration",
        }
    }

    /// Status the countdown guards; firing against any other status is a no-op
    pub fn watched_status(&self) -> CallRequestStatus {
        match self {
            ExpiryKind::AcceptWindow => CallRequestStatus::Pending,
            ExpiryKind::JoinWindow => CallRequestStatus::AdvisorAccepted,
            ExpiryKind::CallDuration => CallRequestStatus::InProgress,
        }
    }

    /// The countdown that runs while a request sits in `status`
    pub fn guarding(status: CallRequestStatus) -> Option<Self> {
        match status {
            CallRequestStatus::Pending => Some(ExpiryKind::AcceptWindow),
            CallRequestStatus::AdvisorAccepted => Some(ExpiryKind::JoinWindow),
            CallRequestStatus::InProgress => Some(ExpiryKind::CallDuration),
            _ => None,
        }
    }
}

impl fmt::Display for ExpiryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
