//! Domain errors

use crate::domain::call_request::CallRequestStatus;
use crate::domain::shared::value_objects::RequestId;
use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DomainError {
    /// The stored state no longer matches the state the caller expected.
    /// Lost races and late timer fires both end up here.
    #[error("Invalid transition for request {request_id}: expected {expected}, found {actual}")]
    InvalidTransition {
        request_id: RequestId,
        expected: CallRequestStatus,
        actual: CallRequestStatus,
    },

    #[error("Advisor unavailable: {0}")]
    AdvisorUnavailable(String),

    #[error("Insufficient balance: required {required}, available {available}")]
    InsufficientBalance {
        required: Decimal,
        available: Decimal,
    },

    #[error("Billing inconsistency: {0}")]
    BillingInconsistency(String),

    #[error("Notification delivery failure: {0}")]
    NotificationDeliveryFailure(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl DomainError {
    /// Race losses and timer misfires are absorbed rather than reported
    pub fn is_benign(&self) -> bool {
        matches!(self, DomainError::InvalidTransition { .. })
    }

    /// Reason string shown to the party that initiated the failing action
    pub fn user_message(&self) -> String {
        match self {
            DomainError::InvalidTransition { actual, .. } => match actual {
                CallRequestStatus::AdvisorDeclined | CallRequestStatus::Declined => {
                    "This call request was declined or has expired.".to_string()
                }
                CallRequestStatus::Completed => "This call has already ended.".to_string(),
                _ => "This call request has expired or was already answered.".to_string(),
            },
            DomainError::AdvisorUnavailable(reason) => reason.clone(),
            DomainError::InsufficientBalance { .. } => "Insufficient Balance.".to_string(),
            DomainError::NotFound(_) => "Call request not found.".to_string(),
            DomainError::Unauthorized(_) => {
                "You are not a party to this call request.".to_string()
            }
            DomainError::ValidationError(reason) => reason.clone(),
            DomainError::BillingInconsistency(_)
            | DomainError::NotificationDeliveryFailure(_)
            | DomainError::Decode(_)
            | DomainError::Storage(_)
            | DomainError::Internal(_) => "Unexpected error. Please try again.".to_string(),
        }
    }
}

#[cfg(feature = "postgres")]
impl From<sqlx::Error> for DomainError {
    fn from(e: sqlx::Error) -> Self {
        DomainError::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for DomainError {
    fn from(e: serde_json::Error) -> Self {
        DomainError::Decode(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_transition_is_benign() {
        let err = DomainError::InvalidTransition {
            request_id: RequestId::new(),
            expected: CallRequestStatus::Pending,
            actual: CallRequestStatus::AdvisorDeclined,
        };
        assert!(err.is_benign());
        assert!(!DomainError::BillingInconsistency("x".to_string()).is_benign());
    }

    #[test]
    fn test_user_messages_hide_internal_detail() {
        let err = DomainError::Storage("connection reset by peer".to_string());
        assert!(!err.user_message().contains("connection"));

        let err = DomainError::InsufficientBalance {
            required: Decimal::new(100, 0),
            available: Decimal::new(99, 0),
        };
        assert_eq!(err.user_message(), "Insufficient Balance.");
    }

    #[test]
    fn test_expired_request_message() {
        let err = DomainError::InvalidTransition {
            request_id: RequestId::new(),
            expected: CallRequestStatus::AdvisorAccepted,
            actual: CallRequestStatus::Declined,
        };
        assert!(err.user_message().contains("expired"));
    }
}
