use axum::{
    extract::{Path, State},
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use safar_core::plan::FeeBreakdown;
use safar_shared::models::{Applicant, Ticket, Voucher};
use safar_ticketing::{
    ExecuteOutcome, IssueRequest, TicketAction, TicketChanges, UsageStatus,
};

use crate::error::AppError;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/applicants/{id}/ticket", post(issue_ticket))
        .route("/v1/applicants/{id}/ticket/preview", post(preview_action))
        .route("/v1/applicants/{id}/ticket/execute", post(execute_action))
        .route("/v1/tickets/{id}/usage", post(update_usage))
        .route("/v1/tickets/{id}/cancel", post(cancel_ticket))
}

#[derive(Debug, Deserialize)]
pub struct TicketActionRequest {
    pub action: TicketAction,
    #[serde(flatten)]
    pub changes: TicketChanges,
    pub user_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct IssueTicketRequest {
    #[serde(flatten)]
    pub ticket: IssueRequest,
    pub user_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct UsageRequest {
    pub status: UsageStatus,
    pub user_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct TicketActionResponse {
    pub fees: FeeBreakdown,
    pub applicant: Applicant,
    pub ticket: Option<Ticket>,
    pub voucher: Option<Voucher>,
}

impl From<ExecuteOutcome> for TicketActionResponse {
    fn from(outcome: ExecuteOutcome) -> Self {
        Self {
            fees: outcome.fees,
            applicant: outcome.applicant,
            ticket: outcome.ticket,
            voucher: outcome.voucher,
        }
    }
}

/// POST /v1/applicants/:id/ticket/preview: dry-run fee computation, no
/// state change.
async fn preview_action(
    State(state): State<AppState>,
    Path(applicant_id): Path<Uuid>,
    Json(req): Json<TicketActionRequest>,
) -> Result<Json<FeeBreakdown>, AppError> {
    let fees = state
        .service
        .preview_action(applicant_id, req.action, &req.changes)
        .await?;
    Ok(Json(fees))
}

/// POST /v1/applicants/:id/ticket/execute: same computation, committed.
async fn execute_action(
    State(state): State<AppState>,
    Path(applicant_id): Path<Uuid>,
    Json(req): Json<TicketActionRequest>,
) -> Result<Json<TicketActionResponse>, AppError> {
    let outcome = state
        .service
        .execute_action(applicant_id, req.action, &req.changes, req.user_id)
        .await?;
    Ok(Json(outcome.into()))
}

/// POST /v1/applicants/:id/ticket: issue a ticket.
async fn issue_ticket(
    State(state): State<AppState>,
    Path(applicant_id): Path<Uuid>,
    Json(req): Json<IssueTicketRequest>,
) -> Result<Json<TicketActionResponse>, AppError> {
    let outcome = state
        .service
        .issue_ticket(applicant_id, req.ticket, req.user_id)
        .await?;
    Ok(Json(outcome.into()))
}

/// POST /v1/tickets/:id/usage: mark USED or NO_SHOW (the latter applies
/// the fine and may issue a compensation voucher).
async fn update_usage(
    State(state): State<AppState>,
    Path(ticket_id): Path<Uuid>,
    Json(req): Json<UsageRequest>,
) -> Result<Json<TicketActionResponse>, AppError> {
    let outcome = state
        .service
        .update_usage(ticket_id, req.status, req.user_id)
        .await?;
    Ok(Json(outcome.into()))
}

#[derive(Debug, Deserialize, Default)]
pub struct CancelTicketRequest {
    pub user_id: Option<Uuid>,
}

/// POST /v1/tickets/:id/cancel: ticket-level cancel: status only, no
/// fees, applicant untouched.
async fn cancel_ticket(
    State(state): State<AppState>,
    Path(ticket_id): Path<Uuid>,
    Json(req): Json<CancelTicketRequest>,
) -> Result<Json<TicketActionResponse>, AppError> {
    let outcome = state.service.cancel_ticket_only(ticket_id, req.user_id).await?;
    Ok(Json(outcome.into()))
}
