//! Typed notifications decoded from row changes

use crate::domain::account::Role;
use crate::domain::call_request::{CallRequestStatus, DeclineReason, EndReason};
use crate::domain::notification::transport::RowChange;
use crate::domain::shared::error::DomainError;
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::{AccountId, ChannelName, RequestId};
use crate::domain::signaling::SignalingToken;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Wire shape of a call request row. Status fields stay strings here so an
/// unknown value can be reported instead of silently dropped.
#[derive(Debug, Deserialize)]
struct RequestRecord {
    id: Uuid,
    client_id: i64,
    advisor_id: i64,
    channel_name: String,
    duration_minutes: u32,
    total_cost: Decimal,
    status: String,
    advisor_token: Option<String>,
    client_token: Option<String>,
    decline_reason: Option<String>,
    end_reason: Option<String>,
}

/// A status change as seen by one recipient
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub recipient: Role,
    pub request_id: RequestId,
    pub client_id: AccountId,
    pub advisor_id: AccountId,
    pub status: CallRequestStatus,
    pub channel_name: ChannelName,
    pub duration_minutes: u32,
    pub total_cost: Decimal,
    pub decline_reason: Option<DeclineReason>,
    pub end_reason: Option<EndReason>,
    /// The recipient's own signaling token, never the counterparty's
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<SignalingToken>,
    pub commit: u64,
}

impl Notification {
    /// Map an untyped change into the closed set of known statuses
    pub fn decode(change: &RowChange, recipient: Role) -> Result<Self> {
        let record: RequestRecord = serde_json::from_value(change.record.clone())?;

        let status = CallRequestStatus::from_str(&record.status).ok_or_else(|| {
            DomainError::Decode(format!(
                "unknown call request status '{}' on {}",
                record.status, record.id
            ))
        })?;
        let decline_reason = record
            .decline_reason
            .as_deref()
            .map(|s| {
                DeclineReason::from_str(s)
                    .ok_or_else(|| DomainError::Decode(format!("unknown decline reason '{}'", s)))
            })
            .transpose()?;
        let end_reason = record
            .end_reason
            .as_deref()
            .map(|s| {
                EndReason::from_str(s)
                    .ok_or_else(|| DomainError::Decode(format!("unknown end reason '{}'", s)))
            })
            .transpose()?;

        let token = match recipient {
            Role::Advisor => record.advisor_token,
            Role::Client => record.client_token,
        }
        .map(SignalingToken::new);

        Ok(Self {
            recipient,
            request_id: RequestId::from_uuid(record.id),
            client_id: AccountId::new(record.client_id),
            advisor_id: AccountId::new(record.advisor_id),
            status,
            channel_name: ChannelName::from_string(record.channel_name),
            duration_minutes: record.duration_minutes,
            total_cost: record.total_cost,
            decline_reason,
            end_reason,
            token,
            commit: change.commit,
        })
    }

    /// Whether the recipient has anything to react to
    pub fn is_relevant(&self) -> bool {
        self.status.concerns(self.recipient, self.decline_reason)
    }

    /// Short human-readable text for the recipient
    pub fn summary(&self) -> String {
        match (self.status, self.recipient) {
            (CallRequestStatus::Pending, _) => format!(
                "Incoming call request for {} minutes.",
                self.duration_minutes
            ),
            (CallRequestStatus::AdvisorAccepted, _) => {
                "Advisor accepted your call. Join now!".to_string()
            }
            (CallRequestStatus::AdvisorDeclined, Role::Client) => {
                match self.decline_reason {
                    Some(DeclineReason::Timeout) => "Your call request expired.".to_string(),
                    _ => "The advisor declined your call request.".to_string(),
                }
            }
            (CallRequestStatus::AdvisorDeclined, Role::Advisor) => {
                "Call request expired without a response.".to_string()
            }
            (CallRequestStatus::Declined, Role::Advisor) => "The client declined the call.".to_string(),
            (CallRequestStatus::Declined, Role::Client) => match self.decline_reason {
                Some(DeclineReason::Timeout) => {
                    "You did not respond. Call auto-declined.".to_string()
                }
                _ => "You declined the call.".to_string(),
            },
            (CallRequestStatus::InProgress, _) => "Call started!".to_string(),
            (CallRequestStatus::Completed, _) => "Call completed.".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::call_request::{CallRequest, Negotiation};
    use crate::domain::signaling::SignalingTokens;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn accepted() -> CallRequest {
        let mut request =
            CallRequest::new(AccountId::new(1), AccountId::new(2), 5, dec!(4), Utc::now());
        request
            .negotiate(
                &Negotiation::Accept {
                    tokens: SignalingTokens {
                        advisor: SignalingToken::new("adv".to_string()),
                        client: SignalingToken::new("cli".to_string()),
                    },
                },
                Utc::now(),
            )
            .unwrap();
        request
    }

    #[test]
    fn test_decode_picks_recipient_token() {
        let change = RowChange::from_request(&accepted()).unwrap();

        let for_client = Notification::decode(&change, Role::Client).unwrap();
        assert_eq!(for_client.status, CallRequestStatus::AdvisorAccepted);
        assert_eq!(for_client.token.as_ref().map(|t| t.as_str()), Some("cli"));
        assert_eq!(for_client.total_cost, dec!(20));
        assert_eq!(for_client.commit, 2);

        let for_advisor = Notification::decode(&change, Role::Advisor).unwrap();
        assert_eq!(for_advisor.token.as_ref().map(|t| t.as_str()), Some("adv"));
    }

    #[test]
    fn test_unknown_status_is_decode_error() {
        let mut change = RowChange::from_request(&accepted()).unwrap();
        change.record["status"] = serde_json::Value::String("ringing".to_string());

        let err = Notification::decode(&change, Role::Client).unwrap_err();
        assert!(matches!(err, DomainError::Decode(msg) if msg.contains("ringing")));
    }

    #[test]
    fn test_malformed_record_is_decode_error() {
        let change = RowChange {
            table: "call_requests".to_string(),
            commit: 1,
            record: serde_json::json!({ "id": "not-a-uuid" }),
        };
        assert!(matches!(
            Notification::decode(&change, Role::Advisor),
            Err(DomainError::Decode(_))
        ));
    }

    #[test]
    fn test_relevance_follows_interest_table() {
        let change = RowChange::from_request(&accepted()).unwrap();
        assert!(Notification::decode(&change, Role::Client).unwrap().is_relevant());
        assert!(!Notification::decode(&change, Role::Advisor).unwrap().is_relevant());
    }
}
