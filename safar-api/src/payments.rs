use axum::{
    extract::{Path, State},
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use safar_shared::models::Transaction;

use crate::error::AppError;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new().route("/v1/applicants/{id}/payments", post(record_payment))
}

#[derive(Debug, Deserialize)]
pub struct PaymentRequest {
    pub amount: i64,
    pub notes: Option<String>,
    pub user_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct PaymentResponse {
    pub transaction: Transaction,
    pub total_paid: i64,
    pub remaining_balance: i64,
}

/// POST /v1/applicants/:id/payments
async fn record_payment(
    State(state): State<AppState>,
    Path(applicant_id): Path<Uuid>,
    Json(req): Json<PaymentRequest>,
) -> Result<Json<PaymentResponse>, AppError> {
    let receipt = state
        .service
        .record_payment(applicant_id, req.amount, req.notes, req.user_id)
        .await?;
    Ok(Json(PaymentResponse {
        transaction: receipt.transaction,
        total_paid: receipt.total_paid,
        remaining_balance: receipt.remaining_balance,
    }))
}
