//! The single place where applicant balances change. Payments recompute
//! the remaining balance from scratch (never decrement in place, to avoid
//! drift); fee charges move total and remaining by the same delta, which
//! preserves the invariant by construction.

use chrono::Utc;

use safar_core::plan::LedgerOp;
use safar_shared::models::Applicant;

/// Apply one ledger op to an applicant's financial fields. Invariant held
/// on exit: `remaining_balance == total_amount - discount - amount_paid`.
pub fn apply(applicant: &mut Applicant, op: &LedgerOp) {
    match *op {
        LedgerOp::Payment { amount } => {
            applicant.amount_paid += amount;
            recompute_remaining(applicant);
        }
        LedgerOp::Charge { delta } => {
            applicant.total_amount += delta;
            applicant.remaining_balance += delta;
        }
    }
    applicant.updated_at = Utc::now();
}

pub fn apply_all(applicant: &mut Applicant, ops: &[LedgerOp]) {
    for op in ops {
        apply(applicant, op);
    }
}

fn recompute_remaining(applicant: &mut Applicant) {
    applicant.remaining_balance =
        applicant.total_amount - applicant.discount - applicant.amount_paid;
}
