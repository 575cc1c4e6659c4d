//! Commit plans: the data handed from the engine to a store for atomic
//! application. A plan is computed once from a read-only snapshot; preview
//! returns its fee breakdown, execute submits the whole plan. Both paths
//! therefore share the exact same fee computation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use safar_shared::models::{
    Applicant, ApplicantStatus, Ticket, TicketStatus, Transaction, TransactionType, TripType,
    Voucher,
};

/// A single balance mutation. Amounts are whole dinars. Ops carry deltas,
/// not absolute values, so the store can re-apply them against a freshly
/// locked applicant row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum LedgerOp {
    /// `amount_paid += amount`; remaining balance recomputed.
    Payment { amount: i64 },
    /// Fee or price-difference: `total_amount += delta`;
    /// `remaining_balance += delta`. `delta` may be negative.
    Charge { delta: i64 },
}

/// Fee computation result shown in previews and applied on execute.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeeBreakdown {
    pub policy_fee: i64,
    pub price_difference: i64,
    pub total_fee: i64,
    pub policy_name: Option<String>,
    pub hours_until_departure: f64,
}

/// Transaction to append inside the commit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionDraft {
    pub tx_type: TransactionType,
    pub category: String,
    pub amount: i64,
    pub applicant_id: Option<Uuid>,
    pub notes: Option<String>,
}

/// Voucher to create inside the commit. `notes` already carries the
/// encoded `[META:...]` block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoucherDraft {
    pub voucher_type: String,
    pub notes: String,
}

/// Audit entry written best-effort after the commit succeeds; a failed
/// activity write never rolls back the financial mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityDraft {
    pub applicant_id: Uuid,
    pub user_id: Option<Uuid>,
    pub action: String,
    pub details: String,
}

/// Optional ticket field changes applied together with a status change.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TicketFieldUpdate {
    pub departure_date: Option<DateTime<Utc>>,
    pub departure_location: Option<String>,
    pub arrival_location: Option<String>,
    pub bus_number: Option<String>,
    pub seat_number: Option<String>,
}

/// Atomic unit for modify / cancel / no-show / mark-used: ticket status,
/// applicant ledger, voucher issuance and transactions all land together
/// or not at all.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketActionPlan {
    pub applicant_id: Uuid,
    pub ticket_id: Uuid,
    pub fees: FeeBreakdown,
    pub ticket_status: TicketStatus,
    pub ticket_fields: TicketFieldUpdate,
    pub applicant_status: Option<ApplicantStatus>,
    pub ledger_ops: Vec<LedgerOp>,
    pub voucher: Option<VoucherDraft>,
    pub transactions: Vec<TransactionDraft>,
    pub activity: Vec<ActivityDraft>,
}

/// Atomic unit for ticket issuance. `price_delta` is zero when the
/// applicant's transportation was already priced at registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueCommit {
    pub ticket: Ticket,
    pub price_delta: i64,
    /// `Some` turns `has_transportation` on and records the trip type.
    pub transport_type: Option<TripType>,
    pub applicant_status: Option<ApplicantStatus>,
    pub activity: Vec<ActivityDraft>,
}

/// Atomic unit for recording a payment against an applicant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentCommit {
    pub applicant_id: Uuid,
    pub amount: i64,
    pub transaction: TransactionDraft,
    pub activity: Vec<ActivityDraft>,
}

/// Atomic unit for cash-redeeming a voucher: mark used + append marker +
/// record the withdrawal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedemptionCommit {
    pub voucher_id: Uuid,
    pub transaction: TransactionDraft,
    /// Appended to the voucher notes, e.g. `" [REFUNDED_CASH]"`.
    pub notes_suffix: String,
}

/// What a commit produced, read back from inside the same transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitOutcome {
    pub applicant: Applicant,
    pub ticket: Option<Ticket>,
    pub voucher: Option<Voucher>,
    pub transactions: Vec<Transaction>,
}
