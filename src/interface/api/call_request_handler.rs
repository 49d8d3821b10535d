//! Call request API handlers

use super::dto::{
    AdvisorResponseRequest, ApiResponse, ApiResult, CallRequestView,
    ClientResponseRequest, CreateCallRequest, EndCallRequest,
};
use crate::application::SessionFacade;
use crate::domain::media::MediaProvider;
use crate::domain::shared::value_objects::{AccountId, RequestId};
use async_trait::async_trait;
use axum::{
    extract::{FromRequestParts, Path, State},
    http::{request::Parts, StatusCode},
    Json,
};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Header carrying the authenticated account id
pub const CALLER_HEADER: &str = "x-account-id";

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub facade: Arc<SessionFacade>,
    pub media: Arc<dyn MediaProvider>,
}

/// Account making the request, as asserted by the upstream authenticator
#[derive(Debug, Clone, Copy)]
pub struct Caller(pub AccountId);

#[async_trait]
impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, Json<ApiResponse<()>>);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(CALLER_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<i64>().ok())
            .map(|id| Caller(AccountId::new(id)))
            .ok_or_else(|| {
                (
                    StatusCode::UNAUTHORIZED,
                    Json(ApiResponse::error(format!(
                        "Missing or invalid {} header",
                        CALLER_HEADER
                    ))),
                )
            })
    }
}

/// Health check endpoint
pub async fn health_check() -> Json<ApiResponse<&'static str>> {
    Json(ApiResponse::success("OK"))
}

/// Client asks an advisor for a call
pub async fn create_call_request(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Json(body): Json<CreateCallRequest>,
) -> ApiResult<CallRequestView> {
    info!(
        "API: Account {} requesting a {} minute call with advisor {}",
        caller, body.duration_minutes, body.advisor_id
    );

    let request = state
        .facade
        .request_call(caller, body.advisor_id, body.duration_minutes)
        .await?;

    Ok(Json(ApiResponse::success(CallRequestView::for_viewer(
        request, caller,
    ))))
}

pub async fn get_call_request(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(id): Path<Uuid>,
) -> ApiResult<CallRequestView> {
    let request = state
        .facade
        .get_request(caller, RequestId::from_uuid(id))
        .await?;
    Ok(Json(ApiResponse::success(CallRequestView::for_viewer(
        request, caller,
    ))))
}

pub async fn advisor_response(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(id): Path<Uuid>,
    Json(body): Json<AdvisorResponseRequest>,
) -> ApiResult<CallRequestView> {
    info!("API: Advisor {} answers {} with {:?}", caller, id, body.action);

    let request = state
        .facade
        .advisor_respond(caller, RequestId::from_uuid(id), body.action)
        .await?;
    Ok(Json(ApiResponse::success(CallRequestView::for_viewer(
        request, caller,
    ))))
}

pub async fn client_response(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(id): Path<Uuid>,
    Json(body): Json<ClientResponseRequest>,
) -> ApiResult<CallRequestView> {
    info!("API: Client {} answers {} with {:?}", caller, id, body.action);

    let request = state
        .facade
        .client_respond(caller, RequestId::from_uuid(id), body.action)
        .await?;
    Ok(Json(ApiResponse::success(CallRequestView::for_viewer(
        request, caller,
    ))))
}

pub async fn end_call(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(id): Path<Uuid>,
    Json(body): Json<EndCallRequest>,
) -> ApiResult<CallRequestView> {
    info!("API: Account {} ending {} ({})", caller, id, body.reason.as_str());

    let request = state
        .facade
        .end_call(caller, RequestId::from_uuid(id), body.reason)
        .await?;
    Ok(Json(ApiResponse::success(CallRequestView::for_viewer(
        request, caller,
    ))))
}
