//! API Data Transfer Objects

use crate::application::{AdvisorAction, ClientAction};
use crate::domain::call_request::{CallRequest, CallRequestStatus, DeclineReason, EndReason};
use crate::domain::shared::error::DomainError;
use crate::domain::shared::value_objects::{AccountId, ChannelName, RequestId};
use crate::domain::signaling::SignalingToken;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Generic API response wrapper
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
        }
    }
}

/// Domain failure rendered as a status code plus the caller-facing reason
#[derive(Debug)]
pub struct ApiError(pub DomainError);

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            DomainError::InvalidTransition { .. } | DomainError::AdvisorUnavailable(_) => {
                StatusCode::CONFLICT
            }
            DomainError::InsufficientBalance { .. } => StatusCode::PAYMENT_REQUIRED,
            DomainError::NotFound(_) => StatusCode::NOT_FOUND,
            DomainError::Unauthorized(_) => StatusCode::FORBIDDEN,
            DomainError::ValidationError(_) => StatusCode::BAD_REQUEST,
            DomainError::BillingInconsistency(_)
            | DomainError::NotificationDeliveryFailure(_)
            | DomainError::Decode(_)
            | DomainError::Storage(_)
            | DomainError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status(),
            Json(ApiResponse::<()>::error(self.0.user_message())),
        )
            .into_response()
    }
}

pub type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

#[derive(Debug, Deserialize)]
pub struct CreateCallRequest {
    pub advisor_id: AccountId,
    pub duration_minutes: u32,
}

#[derive(Debug, Deserialize)]
pub struct AdvisorResponseRequest {
    pub action: AdvisorAction,
}

#[derive(Debug, Deserialize)]
pub struct ClientResponseRequest {
    pub action: ClientAction,
}

#[derive(Debug, Deserialize)]
pub struct EndCallRequest {
    pub reason: EndReason,
}

/// Payment gateway confirmation
#[derive(Debug, Deserialize)]
pub struct CreditRequest {
    pub amount: Decimal,
    pub payment_reference: String,
}

/// Call request as shown to one of its parties.
///
/// Only the viewer's own signaling token is included.
#[derive(Debug, Serialize, Deserialize)]
pub struct CallRequestView {
    pub id: RequestId,
    pub client_id: AccountId,
    pub advisor_id: AccountId,
    pub channel_name: ChannelName,
    pub duration_minutes: u32,
    pub total_cost: Decimal,
    pub status: CallRequestStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decline_reason: Option<DeclineReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_reason: Option<EndReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<SignalingToken>,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl CallRequestView {
    pub fn for_viewer(request: CallRequest, viewer: AccountId) -> Self {
        let token = if viewer == request.advisor_id {
            request.advisor_token
        } else if viewer == request.client_id {
            request.client_token
        } else {
            None
        };

        Self {
            id: request.id,
            client_id: request.client_id,
            advisor_id: request.advisor_id,
            channel_name: request.channel_name,
            duration_minutes: request.duration_minutes,
            total_cost: request.total_cost,
            status: request.status,
            decline_reason: request.decline_reason,
            end_reason: request.end_reason,
            token,
            version: request.version,
            created_at: request.created_at,
            accepted_at: request.accepted_at,
            started_at: request.started_at,
            ended_at: request.ended_at,
        }
    }
}
