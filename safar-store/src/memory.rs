//! In-memory store for tests and local development. One mutex serializes
//! every commit, so concurrent fee applications can never read a stale
//! balance.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use uuid::Uuid;

use safar_core::plan::{
    ActivityDraft, CommitOutcome, IssueCommit, PaymentCommit, RedemptionCommit, TicketActionPlan,
    TransactionDraft,
};
use safar_core::repository::{ActivityLogger, Store};
use safar_core::{Error, Result};
use safar_shared::models::{
    ActivityLog, Applicant, CancellationPolicy, PolicyCategory, Ticket, TicketStatus, Transaction,
    TransportRoute, Voucher,
};
use safar_ticketing::ledger;

#[derive(Default)]
struct Inner {
    applicants: HashMap<Uuid, Applicant>,
    tickets: HashMap<Uuid, Ticket>,
    routes: Vec<TransportRoute>,
    policies: Vec<CancellationPolicy>,
    vouchers: HashMap<Uuid, Voucher>,
    transactions: Vec<Transaction>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_applicant(&self, applicant: Applicant) {
        self.inner
            .lock()
            .await
            .applicants
            .insert(applicant.id, applicant);
    }

    pub async fn insert_ticket(&self, ticket: Ticket) {
        self.inner.lock().await.tickets.insert(ticket.id, ticket);
    }

    pub async fn insert_route(&self, route: TransportRoute) {
        self.inner.lock().await.routes.push(route);
    }

    pub async fn insert_policy(&self, policy: CancellationPolicy) {
        self.inner.lock().await.policies.push(policy);
    }

    pub async fn insert_voucher(&self, voucher: Voucher) {
        self.inner.lock().await.vouchers.insert(voucher.id, voucher);
    }

    pub async fn applicant(&self, id: Uuid) -> Option<Applicant> {
        self.inner.lock().await.applicants.get(&id).cloned()
    }

    pub async fn ticket(&self, id: Uuid) -> Option<Ticket> {
        self.inner.lock().await.tickets.get(&id).cloned()
    }

    pub async fn vouchers(&self) -> Vec<Voucher> {
        self.inner.lock().await.vouchers.values().cloned().collect()
    }

    pub async fn transactions(&self) -> Vec<Transaction> {
        self.inner.lock().await.transactions.clone()
    }

    fn materialize_transactions(
        drafts: &[TransactionDraft],
        sink: &mut Vec<Transaction>,
    ) -> Vec<Transaction> {
        let created: Vec<Transaction> = drafts
            .iter()
            .map(|d| Transaction {
                id: Uuid::new_v4(),
                tx_type: d.tx_type,
                category: d.category.clone(),
                amount: d.amount,
                applicant_id: d.applicant_id,
                notes: d.notes.clone(),
                created_at: Utc::now(),
            })
            .collect();
        sink.extend(created.iter().cloned());
        created
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_applicant(&self, id: Uuid) -> Result<Option<Applicant>> {
        Ok(self.inner.lock().await.applicants.get(&id).cloned())
    }

    async fn get_ticket(&self, id: Uuid) -> Result<Option<Ticket>> {
        Ok(self.inner.lock().await.tickets.get(&id).cloned())
    }

    async fn current_ticket(&self, applicant_id: Uuid) -> Result<Option<Ticket>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .tickets
            .values()
            .filter(|t| {
                t.applicant_id == applicant_id
                    && matches!(t.status, TicketStatus::Issued | TicketStatus::Modified)
            })
            .max_by_key(|t| t.created_at)
            .cloned())
    }

    async fn ticket_number_exists(&self, number: &str) -> Result<bool> {
        let inner = self.inner.lock().await;
        Ok(inner.tickets.values().any(|t| t.ticket_number == number))
    }

    async fn find_active_route(
        &self,
        departure: &str,
        arrival: &str,
    ) -> Result<Option<TransportRoute>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .routes
            .iter()
            .find(|r| {
                r.is_active
                    && r.departure_location == departure
                    && r.arrival_location == arrival
            })
            .cloned())
    }

    async fn active_policies(&self, category: PolicyCategory) -> Result<Vec<CancellationPolicy>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .policies
            .iter()
            .filter(|p| p.is_active && p.category == category)
            .cloned()
            .collect())
    }

    async fn active_policies_named(&self, needles: &[&str]) -> Result<Vec<CancellationPolicy>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .policies
            .iter()
            .filter(|p| p.is_active && needles.iter().any(|n| p.name.contains(n)))
            .cloned()
            .collect())
    }

    async fn get_voucher(&self, id: Uuid) -> Result<Option<Voucher>> {
        Ok(self.inner.lock().await.vouchers.get(&id).cloned())
    }

    async fn commit_ticket_action(&self, plan: &TicketActionPlan) -> Result<CommitOutcome> {
        let mut inner = self.inner.lock().await;

        // Re-check under the lock; a concurrent commit may have moved the
        // ticket out of ISSUED/MODIFIED after the caller's snapshot read.
        let current = inner
            .tickets
            .get(&plan.ticket_id)
            .ok_or_else(|| Error::NotFound("ticket", plan.ticket_id.to_string()))?;
        if !matches!(
            current.status,
            TicketStatus::Issued | TicketStatus::Modified
        ) {
            return Err(Error::InvalidState(format!(
                "ticket {} is {} and no longer accepts this transition",
                current.ticket_number,
                current.status.as_str()
            )));
        }

        let applicant = inner
            .applicants
            .get_mut(&plan.applicant_id)
            .ok_or_else(|| Error::NotFound("applicant", plan.applicant_id.to_string()))?;
        ledger::apply_all(applicant, &plan.ledger_ops);
        if let Some(status) = plan.applicant_status {
            applicant.status = status;
        }
        let applicant = applicant.clone();

        let ticket = inner
            .tickets
            .get_mut(&plan.ticket_id)
            .ok_or_else(|| Error::NotFound("ticket", plan.ticket_id.to_string()))?;
        if let Some(date) = plan.ticket_fields.departure_date {
            ticket.departure_date = date;
        }
        if let Some(ref loc) = plan.ticket_fields.departure_location {
            ticket.departure_location = loc.clone();
        }
        if let Some(ref loc) = plan.ticket_fields.arrival_location {
            ticket.arrival_location = loc.clone();
        }
        if let Some(ref bus) = plan.ticket_fields.bus_number {
            ticket.bus_number = Some(bus.clone());
        }
        if let Some(ref seat) = plan.ticket_fields.seat_number {
            ticket.seat_number = Some(seat.clone());
        }
        ticket.update_status(plan.ticket_status);
        let ticket = ticket.clone();

        let voucher = plan.voucher.as_ref().map(|draft| Voucher {
            id: Uuid::new_v4(),
            voucher_type: draft.voucher_type.clone(),
            is_used: false,
            used_at: None,
            notes: draft.notes.clone(),
            created_at: Utc::now(),
        });
        if let Some(ref v) = voucher {
            inner.vouchers.insert(v.id, v.clone());
        }

        let transactions =
            Self::materialize_transactions(&plan.transactions, &mut inner.transactions);

        Ok(CommitOutcome {
            applicant,
            ticket: Some(ticket),
            voucher,
            transactions,
        })
    }

    async fn commit_issue(&self, commit: &IssueCommit) -> Result<CommitOutcome> {
        let mut inner = self.inner.lock().await;

        let applicant = inner
            .applicants
            .get_mut(&commit.ticket.applicant_id)
            .ok_or_else(|| {
                Error::NotFound("applicant", commit.ticket.applicant_id.to_string())
            })?;
        if commit.price_delta != 0 {
            ledger::apply(
                applicant,
                &safar_core::plan::LedgerOp::Charge {
                    delta: commit.price_delta,
                },
            );
        }
        if let Some(trip_type) = commit.transport_type {
            applicant.has_transportation = true;
            applicant.transport_type = Some(trip_type);
        }
        if let Some(status) = commit.applicant_status {
            applicant.status = status;
        }
        applicant.updated_at = Utc::now();
        let applicant = applicant.clone();

        inner
            .tickets
            .insert(commit.ticket.id, commit.ticket.clone());

        Ok(CommitOutcome {
            applicant,
            ticket: Some(commit.ticket.clone()),
            voucher: None,
            transactions: Vec::new(),
        })
    }

    async fn commit_payment(&self, commit: &PaymentCommit) -> Result<CommitOutcome> {
        let mut inner = self.inner.lock().await;

        let applicant = inner
            .applicants
            .get_mut(&commit.applicant_id)
            .ok_or_else(|| Error::NotFound("applicant", commit.applicant_id.to_string()))?;
        ledger::apply(
            applicant,
            &safar_core::plan::LedgerOp::Payment {
                amount: commit.amount,
            },
        );
        let applicant = applicant.clone();

        let transactions = Self::materialize_transactions(
            std::slice::from_ref(&commit.transaction),
            &mut inner.transactions,
        );

        Ok(CommitOutcome {
            applicant,
            ticket: None,
            voucher: None,
            transactions,
        })
    }

    async fn commit_redemption(&self, commit: &RedemptionCommit) -> Result<(Voucher, Transaction)> {
        let mut inner = self.inner.lock().await;

        let voucher = inner
            .vouchers
            .get_mut(&commit.voucher_id)
            .ok_or_else(|| Error::NotFound("voucher", commit.voucher_id.to_string()))?;
        if voucher.is_used {
            return Err(Error::InvalidState(format!(
                "voucher {} already used",
                voucher.id
            )));
        }
        voucher.is_used = true;
        voucher.used_at = Some(Utc::now());
        voucher.notes.push_str(&commit.notes_suffix);
        let voucher = voucher.clone();

        let transaction = Self::materialize_transactions(
            std::slice::from_ref(&commit.transaction),
            &mut inner.transactions,
        )
        .into_iter()
        .next()
        .ok_or_else(|| Error::Storage("redemption produced no transaction".into()))?;

        Ok((voucher, transaction))
    }
}

/// Collects audit entries in memory; lets tests assert on what was logged.
#[derive(Default)]
pub struct MemoryActivityLogger {
    entries: Mutex<Vec<ActivityLog>>,
}

impl MemoryActivityLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn entries(&self) -> Vec<ActivityLog> {
        self.entries.lock().await.clone()
    }
}

#[async_trait]
impl ActivityLogger for MemoryActivityLogger {
    async fn record(&self, entry: &ActivityDraft) -> Result<()> {
        self.entries.lock().await.push(ActivityLog {
            id: Uuid::new_v4(),
            applicant_id: entry.applicant_id,
            user_id: entry.user_id,
            action: entry.action.clone(),
            details: entry.details.clone(),
            created_at: Utc::now(),
        });
        Ok(())
    }
}
