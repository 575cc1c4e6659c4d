use axum::{
    extract::{Path, State},
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use safar_shared::models::{Transaction, Voucher};

use crate::error::AppError;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new().route("/v1/vouchers/{id}/redeem", post(redeem_voucher))
}

#[derive(Debug, Deserialize, Default)]
pub struct RedeemRequest {
    pub notes: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RedeemResponse {
    pub voucher: Voucher,
    pub transaction: Transaction,
}

/// POST /v1/vouchers/:id/redeem: cash out an unused voucher's balance.
async fn redeem_voucher(
    State(state): State<AppState>,
    Path(voucher_id): Path<Uuid>,
    Json(req): Json<RedeemRequest>,
) -> Result<Json<RedeemResponse>, AppError> {
    let (voucher, transaction) = state.service.redeem_voucher(voucher_id, req.notes).await?;
    Ok(Json(RedeemResponse {
        voucher,
        transaction,
    }))
}
