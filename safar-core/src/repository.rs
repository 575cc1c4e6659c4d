use async_trait::async_trait;
use uuid::Uuid;

use crate::plan::{
    ActivityDraft, CommitOutcome, IssueCommit, PaymentCommit, RedemptionCommit, TicketActionPlan,
};
use crate::Result;
use safar_shared::models::{
    Applicant, CancellationPolicy, PolicyCategory, Ticket, Transaction, TransportRoute, Voucher,
};

/// Storage boundary for the ticketing engine. Reads hand out snapshots;
/// the `commit_*` methods apply a whole plan in one transaction; partial
/// application is a correctness violation. Implementations must make sure
/// two concurrent commits against the same applicant cannot both read a
/// stale balance (row lock or single-writer serialization).
#[async_trait]
pub trait Store: Send + Sync {
    async fn get_applicant(&self, id: Uuid) -> Result<Option<Applicant>>;

    async fn get_ticket(&self, id: Uuid) -> Result<Option<Ticket>>;

    /// The applicant's most recent ticket still in play (ISSUED or
    /// MODIFIED).
    async fn current_ticket(&self, applicant_id: Uuid) -> Result<Option<Ticket>>;

    async fn ticket_number_exists(&self, number: &str) -> Result<bool>;

    /// Exact directional lookup over active routes only.
    async fn find_active_route(
        &self,
        departure: &str,
        arrival: &str,
    ) -> Result<Option<TransportRoute>>;

    async fn active_policies(&self, category: PolicyCategory) -> Result<Vec<CancellationPolicy>>;

    /// Name-text search over active policies, for legacy policies created
    /// before the category column existed.
    async fn active_policies_named(&self, needles: &[&str]) -> Result<Vec<CancellationPolicy>>;

    async fn get_voucher(&self, id: Uuid) -> Result<Option<Voucher>>;

    async fn commit_ticket_action(&self, plan: &TicketActionPlan) -> Result<CommitOutcome>;

    async fn commit_issue(&self, commit: &IssueCommit) -> Result<CommitOutcome>;

    async fn commit_payment(&self, commit: &PaymentCommit) -> Result<CommitOutcome>;

    async fn commit_redemption(&self, commit: &RedemptionCommit) -> Result<(Voucher, Transaction)>;
}

/// Append-only audit trail. Best-effort by contract: callers log failures
/// at warn level and move on; a lost audit row never aborts a financial
/// mutation.
#[async_trait]
pub trait ActivityLogger: Send + Sync {
    async fn record(&self, entry: &ActivityDraft) -> Result<()>;
}
