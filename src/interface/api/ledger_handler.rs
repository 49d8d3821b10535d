//! Wallet ledger API handlers

use super::call_request_handler::{AppState, Caller};
use super::dto::{ApiResponse, ApiResult, CreditRequest};
use crate::domain::ledger::WalletTransaction;
use crate::domain::shared::value_objects::AccountId;
use axum::{
    extract::{Path, State},
    Json,
};
use tracing::info;

/// Ordered ledger entries of the caller's own account
pub async fn list_transactions(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(account_id): Path<i64>,
) -> ApiResult<Vec<WalletTransaction>> {
    let entries = state
        .facade
        .history(caller, AccountId::new(account_id))
        .await?;
    Ok(Json(ApiResponse::success(entries)))
}

/// Recharge confirmed by the payment gateway.
///
/// Gateway callbacks are authenticated upstream and carry no party header.
pub async fn post_credit(
    State(state): State<AppState>,
    Path(account_id): Path<i64>,
    Json(body): Json<CreditRequest>,
) -> ApiResult<WalletTransaction> {
    info!(
        "API: Crediting {} to account {} (payment {})",
        body.amount, account_id, body.payment_reference
    );

    let entry = state
        .facade
        .top_up(
            AccountId::new(account_id),
            body.amount,
            &body.payment_reference,
        )
        .await?;
    Ok(Json(ApiResponse::success(entry)))
}
