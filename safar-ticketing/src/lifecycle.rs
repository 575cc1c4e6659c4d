//! Ticket lifecycle orchestration: issue, modify, cancel, no-show,
//! mark-used, payments and voucher redemption.
//!
//! Every fee-carrying operation is planned from a read-only snapshot into
//! a commit plan; preview returns the plan's fee breakdown and execute
//! submits the identical plan to the store, so preview and commit can
//! never disagree. The store applies each plan atomically.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use safar_core::plan::{
    ActivityDraft, FeeBreakdown, IssueCommit, LedgerOp, PaymentCommit, TicketActionPlan,
    TicketFieldUpdate, TransactionDraft, VoucherDraft,
};
use safar_core::repository::{ActivityLogger, Store};
use safar_core::{Error, Result};
use safar_shared::models::{
    Applicant, ApplicantStatus, PolicyCategory, Ticket, TicketStatus, Transaction,
    TransactionType, TripType, Voucher,
};

use crate::policy;
use crate::pricing;
use crate::voucher::{self, VoucherMeta};

/// Legacy policy names predating the category column.
const LEGACY_NO_SHOW_NAMES: [&str; 2] = ["فوات", "عدم حضور"];

const TICKET_NUMBER_ATTEMPTS: usize = 10;

/// Admin-triggered ticket action. A closed enum: no loose action strings
/// reach the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TicketAction {
    Cancellation,
    Modification,
}

/// Requested status for the usage endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UsageStatus {
    Used,
    NoShow,
}

/// Field changes carried by a modification. All optional; omitted fields
/// keep their current values.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TicketChanges {
    pub new_date: Option<DateTime<Utc>>,
    pub new_departure: Option<String>,
    pub new_destination: Option<String>,
    pub bus_number: Option<String>,
    pub seat_number: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IssueRequest {
    pub departure_date: DateTime<Utc>,
    pub departure_location: String,
    pub arrival_location: String,
    pub bus_number: Option<String>,
    pub seat_number: Option<String>,
    pub trip_type: TripType,
}

/// What an executed operation produced.
#[derive(Debug, Clone, Serialize)]
pub struct ExecuteOutcome {
    pub fees: FeeBreakdown,
    pub applicant: Applicant,
    pub ticket: Option<Ticket>,
    pub voucher: Option<Voucher>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PaymentReceipt {
    pub transaction: Transaction,
    pub total_paid: i64,
    pub remaining_balance: i64,
}

/// Orchestrates the ticket lifecycle over a [`Store`]. Activity logging is
/// best-effort: a failed audit write is warned about and swallowed, the
/// financial commit stands.
pub struct TicketService {
    store: Arc<dyn Store>,
    logger: Arc<dyn ActivityLogger>,
    ticket_prefix: String,
}

impl TicketService {
    pub fn new(store: Arc<dyn Store>, logger: Arc<dyn ActivityLogger>) -> Self {
        Self {
            store,
            logger,
            ticket_prefix: "TKT-".to_string(),
        }
    }

    pub fn with_ticket_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.ticket_prefix = prefix.into();
        self
    }

    /// Dry-run a cancellation or modification: same computation as
    /// [`execute_action`](Self::execute_action), nothing committed.
    pub async fn preview_action(
        &self,
        applicant_id: Uuid,
        action: TicketAction,
        changes: &TicketChanges,
    ) -> Result<FeeBreakdown> {
        let plan = self.plan_action(applicant_id, action, changes, None).await?;
        Ok(plan.fees)
    }

    /// Commit a cancellation or modification: ticket status, applicant
    /// ledger, compensation voucher and transactions land in one atomic
    /// unit.
    pub async fn execute_action(
        &self,
        applicant_id: Uuid,
        action: TicketAction,
        changes: &TicketChanges,
        user_id: Option<Uuid>,
    ) -> Result<ExecuteOutcome> {
        let plan = self
            .plan_action(applicant_id, action, changes, user_id)
            .await?;
        let outcome = self.store.commit_ticket_action(&plan).await?;
        self.flush_activity(&plan.activity).await;
        Ok(ExecuteOutcome {
            fees: plan.fees,
            applicant: outcome.applicant,
            ticket: outcome.ticket,
            voucher: outcome.voucher,
        })
    }

    async fn plan_action(
        &self,
        applicant_id: Uuid,
        action: TicketAction,
        changes: &TicketChanges,
        user_id: Option<Uuid>,
    ) -> Result<TicketActionPlan> {
        let applicant = self.require_applicant(applicant_id).await?;
        let ticket = self
            .store
            .current_ticket(applicant_id)
            .await?
            .ok_or_else(|| {
                Error::InvalidState(format!("applicant {} has no active ticket", applicant_id))
            })?;

        let hours = hours_until(ticket.departure_date, Utc::now());
        let trip_type = applicant.transport_type.unwrap_or(TripType::OneWay);

        match action {
            TicketAction::Cancellation => {
                self.plan_cancellation(&applicant, &ticket, hours, trip_type, user_id)
                    .await
            }
            TicketAction::Modification => {
                self.plan_modification(&applicant, &ticket, changes, hours, trip_type, user_id)
                    .await
            }
        }
    }

    async fn plan_cancellation(
        &self,
        applicant: &Applicant,
        ticket: &Ticket,
        hours: f64,
        trip_type: TripType,
        user_id: Option<Uuid>,
    ) -> Result<TicketActionPlan> {
        let policies = self
            .store
            .active_policies(PolicyCategory::Cancellation)
            .await?;
        let no_show_policies = self.store.active_policies(PolicyCategory::NoShow).await?;
        let decision = policy::select_with_fallback(
            PolicyCategory::Cancellation,
            hours,
            &policies,
            &no_show_policies,
        );

        let route = self
            .store
            .find_active_route(&ticket.departure_location, &ticket.arrival_location)
            .await?;
        let ticket_price = pricing::route_price(route.as_ref(), trip_type);

        let fine = decision.fee_amount;
        let refundable = ticket_price - fine;

        let fees = FeeBreakdown {
            policy_fee: fine,
            price_difference: 0,
            total_fee: fine,
            policy_name: decision.policy.as_ref().map(|p| p.name.clone()),
            hours_until_departure: hours,
        };

        let voucher_draft = (refundable > 0).then(|| {
            compensation_voucher(
                ticket,
                refundable,
                voucher::TYPE_COMP_CANCEL,
                "Ticket Cancellation",
            )
        });

        Ok(TicketActionPlan {
            applicant_id: applicant.id,
            ticket_id: ticket.id,
            fees,
            ticket_status: TicketStatus::Cancelled,
            ticket_fields: TicketFieldUpdate::default(),
            applicant_status: Some(ApplicantStatus::Cancelled),
            ledger_ops: charge_ops(fine),
            voucher: voucher_draft,
            transactions: Vec::new(),
            activity: vec![ActivityDraft {
                applicant_id: applicant.id,
                user_id,
                action: "TICKET_CANCELLED".to_string(),
                details: format!(
                    "Ticket {} cancelled; fine {}, refundable {}",
                    ticket.ticket_number, fine, refundable
                ),
            }],
        })
    }

    async fn plan_modification(
        &self,
        applicant: &Applicant,
        ticket: &Ticket,
        changes: &TicketChanges,
        hours: f64,
        trip_type: TripType,
        user_id: Option<Uuid>,
    ) -> Result<TicketActionPlan> {
        let policies = self
            .store
            .active_policies(PolicyCategory::Modification)
            .await?;
        let decision = policy::select_policy(hours, &policies);

        let new_departure = changes
            .new_departure
            .as_deref()
            .unwrap_or(&ticket.departure_location);
        let new_arrival = changes
            .new_destination
            .as_deref()
            .unwrap_or(&ticket.arrival_location);

        let old_route = self
            .store
            .find_active_route(&ticket.departure_location, &ticket.arrival_location)
            .await?;
        let new_route = self.store.find_active_route(new_departure, new_arrival).await?;

        let old_price = pricing::route_price(old_route.as_ref(), trip_type);
        let new_price = pricing::route_price(new_route.as_ref(), trip_type);
        let price_difference = pricing::price_difference(old_price, new_price);

        let total_fee = decision.fee_amount + price_difference;

        let fees = FeeBreakdown {
            policy_fee: decision.fee_amount,
            price_difference,
            total_fee,
            policy_name: decision.policy.as_ref().map(|p| p.name.clone()),
            hours_until_departure: hours,
        };

        Ok(TicketActionPlan {
            applicant_id: applicant.id,
            ticket_id: ticket.id,
            fees,
            ticket_status: TicketStatus::Modified,
            ticket_fields: TicketFieldUpdate {
                departure_date: changes.new_date,
                departure_location: changes.new_departure.clone(),
                arrival_location: changes.new_destination.clone(),
                bus_number: changes.bus_number.clone(),
                seat_number: changes.seat_number.clone(),
            },
            applicant_status: None,
            ledger_ops: charge_ops(total_fee),
            voucher: None,
            transactions: Vec::new(),
            activity: vec![ActivityDraft {
                applicant_id: applicant.id,
                user_id,
                action: "TICKET_MODIFIED".to_string(),
                details: format!(
                    "Ticket {} modified; policy fee {}, price difference {}",
                    ticket.ticket_number, decision.fee_amount, price_difference
                ),
            }],
        })
    }

    /// Issue a ticket. Adds the route price to the applicant's balance only
    /// when transportation was not already priced at registration.
    pub async fn issue_ticket(
        &self,
        applicant_id: Uuid,
        request: IssueRequest,
        user_id: Option<Uuid>,
    ) -> Result<ExecuteOutcome> {
        if request.departure_location.trim().is_empty() || request.arrival_location.trim().is_empty()
        {
            return Err(Error::Validation(
                "departure and arrival locations are required".to_string(),
            ));
        }

        let applicant = self.require_applicant(applicant_id).await?;
        let ticket_number = self.generate_ticket_number().await?;

        let price_delta = if applicant.has_transportation {
            0
        } else {
            let route = self
                .store
                .find_active_route(&request.departure_location, &request.arrival_location)
                .await?;
            pricing::route_price(route.as_ref(), request.trip_type)
        };

        let now = Utc::now();
        let ticket = Ticket {
            id: Uuid::new_v4(),
            applicant_id,
            ticket_number: ticket_number.clone(),
            departure_date: request.departure_date,
            departure_location: request.departure_location,
            arrival_location: request.arrival_location,
            bus_number: request.bus_number,
            seat_number: request.seat_number,
            status: TicketStatus::Issued,
            created_at: now,
            updated_at: now,
        };

        let commit = IssueCommit {
            ticket,
            price_delta,
            transport_type: (!applicant.has_transportation).then_some(request.trip_type),
            applicant_status: Some(ApplicantStatus::Ticketed),
            activity: vec![ActivityDraft {
                applicant_id,
                user_id,
                action: "TICKET_ISSUED".to_string(),
                details: format!(
                    "Ticket {} issued; transportation charge {}",
                    ticket_number, price_delta
                ),
            }],
        };

        let outcome = self.store.commit_issue(&commit).await?;
        self.flush_activity(&commit.activity).await;
        Ok(ExecuteOutcome {
            fees: FeeBreakdown {
                policy_fee: 0,
                price_difference: price_delta,
                total_fee: price_delta,
                policy_name: None,
                hours_until_departure: hours_until(request.departure_date, now),
            },
            applicant: outcome.applicant,
            ticket: outcome.ticket,
            voucher: None,
        })
    }

    /// Mark a ticket USED or NO_SHOW. Re-transitioning into the same state
    /// is rejected, so a no-show fine can never be applied twice.
    pub async fn update_usage(
        &self,
        ticket_id: Uuid,
        status: UsageStatus,
        user_id: Option<Uuid>,
    ) -> Result<ExecuteOutcome> {
        let ticket = self.require_ticket(ticket_id).await?;
        if !matches!(ticket.status, TicketStatus::Issued | TicketStatus::Modified) {
            return Err(Error::InvalidState(format!(
                "ticket {} is {} and cannot transition to {:?}",
                ticket.ticket_number,
                ticket.status.as_str(),
                status
            )));
        }
        let applicant = self.require_applicant(ticket.applicant_id).await?;

        let hours = hours_until(ticket.departure_date, Utc::now());
        let plan = match status {
            UsageStatus::Used => TicketActionPlan {
                applicant_id: applicant.id,
                ticket_id: ticket.id,
                fees: FeeBreakdown {
                    policy_fee: 0,
                    price_difference: 0,
                    total_fee: 0,
                    policy_name: None,
                    hours_until_departure: hours,
                },
                ticket_status: TicketStatus::Used,
                ticket_fields: TicketFieldUpdate::default(),
                applicant_status: None,
                ledger_ops: Vec::new(),
                voucher: None,
                transactions: Vec::new(),
                activity: vec![ActivityDraft {
                    applicant_id: applicant.id,
                    user_id,
                    action: "TICKET_USED".to_string(),
                    details: format!("Ticket {} marked used", ticket.ticket_number),
                }],
            },
            UsageStatus::NoShow => self.plan_no_show(&applicant, &ticket, hours, user_id).await?,
        };

        let outcome = self.store.commit_ticket_action(&plan).await?;
        self.flush_activity(&plan.activity).await;
        Ok(ExecuteOutcome {
            fees: plan.fees,
            applicant: outcome.applicant,
            ticket: outcome.ticket,
            voucher: outcome.voucher,
        })
    }

    async fn plan_no_show(
        &self,
        applicant: &Applicant,
        ticket: &Ticket,
        hours: f64,
        user_id: Option<Uuid>,
    ) -> Result<TicketActionPlan> {
        // Categorized policies first, then the legacy name search.
        let mut policies = self.store.active_policies(PolicyCategory::NoShow).await?;
        if policies.is_empty() {
            policies = self.store.active_policies_named(&LEGACY_NO_SHOW_NAMES).await?;
        }
        let selected = policy::first_active(&policies);
        let fine = selected.map(|p| p.fee_amount).unwrap_or(0);

        let route = self
            .store
            .find_active_route(&ticket.departure_location, &ticket.arrival_location)
            .await?;
        let refundable = pricing::one_way_price(route.as_ref()) - fine;

        let voucher_draft = (refundable > 0).then(|| {
            compensation_voucher(
                ticket,
                refundable,
                voucher::TYPE_COMP_NO_SHOW,
                "Missed Departure",
            )
        });

        Ok(TicketActionPlan {
            applicant_id: applicant.id,
            ticket_id: ticket.id,
            fees: FeeBreakdown {
                policy_fee: fine,
                price_difference: 0,
                total_fee: fine,
                policy_name: selected.map(|p| p.name.clone()),
                hours_until_departure: hours,
            },
            ticket_status: TicketStatus::NoShow,
            ticket_fields: TicketFieldUpdate::default(),
            applicant_status: None,
            ledger_ops: charge_ops(fine),
            voucher: voucher_draft,
            transactions: Vec::new(),
            activity: vec![ActivityDraft {
                applicant_id: applicant.id,
                user_id,
                action: "TICKET_NO_SHOW".to_string(),
                details: format!(
                    "Ticket {} marked no-show; fine {}, refundable {}",
                    ticket.ticket_number, fine, refundable
                ),
            }],
        })
    }

    /// Ticket-level cancel: marks only the ticket, never the applicant, and
    /// applies no fees. The applicant-level cancellation above is the
    /// financial operation; the two entry points deliberately have
    /// different blast radii.
    pub async fn cancel_ticket_only(
        &self,
        ticket_id: Uuid,
        user_id: Option<Uuid>,
    ) -> Result<ExecuteOutcome> {
        let ticket = self.require_ticket(ticket_id).await?;
        if !matches!(ticket.status, TicketStatus::Issued | TicketStatus::Modified) {
            return Err(Error::InvalidState(format!(
                "ticket {} is {} and cannot be cancelled",
                ticket.ticket_number,
                ticket.status.as_str()
            )));
        }
        let applicant = self.require_applicant(ticket.applicant_id).await?;

        let plan = TicketActionPlan {
            applicant_id: applicant.id,
            ticket_id: ticket.id,
            fees: FeeBreakdown {
                policy_fee: 0,
                price_difference: 0,
                total_fee: 0,
                policy_name: None,
                hours_until_departure: hours_until(ticket.departure_date, Utc::now()),
            },
            ticket_status: TicketStatus::Cancelled,
            ticket_fields: TicketFieldUpdate::default(),
            applicant_status: None,
            ledger_ops: Vec::new(),
            voucher: None,
            transactions: Vec::new(),
            activity: vec![ActivityDraft {
                applicant_id: applicant.id,
                user_id,
                action: "TICKET_STATUS_CANCELLED".to_string(),
                details: format!("Ticket {} status set to cancelled", ticket.ticket_number),
            }],
        };

        let outcome = self.store.commit_ticket_action(&plan).await?;
        self.flush_activity(&plan.activity).await;
        Ok(ExecuteOutcome {
            fees: plan.fees,
            applicant: outcome.applicant,
            ticket: outcome.ticket,
            voucher: None,
        })
    }

    /// Record a payment: `amount_paid` grows, remaining balance is
    /// recomputed, and the PAYMENT transaction lands in the same atomic
    /// unit.
    pub async fn record_payment(
        &self,
        applicant_id: Uuid,
        amount: i64,
        notes: Option<String>,
        user_id: Option<Uuid>,
    ) -> Result<PaymentReceipt> {
        if amount <= 0 {
            return Err(Error::Validation(
                "payment amount must be positive".to_string(),
            ));
        }
        let applicant = self.require_applicant(applicant_id).await?;

        let commit = PaymentCommit {
            applicant_id,
            amount,
            transaction: TransactionDraft {
                tx_type: TransactionType::Payment,
                category: "PAYMENT".to_string(),
                amount,
                applicant_id: Some(applicant_id),
                notes,
            },
            activity: vec![ActivityDraft {
                applicant_id,
                user_id,
                action: "PAYMENT_RECORDED".to_string(),
                details: format!("Payment of {} recorded for {}", amount, applicant.full_name),
            }],
        };

        let outcome = self.store.commit_payment(&commit).await?;
        self.flush_activity(&commit.activity).await;

        let transaction = outcome.transactions.into_iter().next().ok_or_else(|| {
            Error::Storage("payment commit returned no transaction".into())
        })?;
        Ok(PaymentReceipt {
            total_paid: outcome.applicant.amount_paid,
            remaining_balance: outcome.applicant.remaining_balance,
            transaction,
        })
    }

    /// Cash-redeem a voucher (see the voucher module for the validation
    /// rules).
    pub async fn redeem_voucher(
        &self,
        voucher_id: Uuid,
        notes: Option<String>,
    ) -> Result<(Voucher, Transaction)> {
        let stored = self.store.get_voucher(voucher_id).await?.ok_or_else(|| {
            Error::NotFound("voucher", voucher_id.to_string())
        })?;
        let commit = voucher::plan_redemption(&stored, notes.as_deref())?;
        self.store.commit_redemption(&commit).await
    }

    async fn require_applicant(&self, id: Uuid) -> Result<Applicant> {
        self.store
            .get_applicant(id)
            .await?
            .ok_or_else(|| Error::NotFound("applicant", id.to_string()))
    }

    async fn require_ticket(&self, id: Uuid) -> Result<Ticket> {
        self.store
            .get_ticket(id)
            .await?
            .ok_or_else(|| Error::NotFound("ticket", id.to_string()))
    }

    /// Unique `PREFIX` + 6 random digits, checked against existing numbers
    /// before commit.
    async fn generate_ticket_number(&self) -> Result<String> {
        use rand::Rng;
        for _ in 0..TICKET_NUMBER_ATTEMPTS {
            let digits: u32 = rand::thread_rng().gen_range(0..1_000_000);
            let candidate = format!("{}{:06}", self.ticket_prefix, digits);
            if !self.store.ticket_number_exists(&candidate).await? {
                return Ok(candidate);
            }
        }
        Err(Error::Validation(
            "could not allocate a unique ticket number".to_string(),
        ))
    }

    async fn flush_activity(&self, drafts: &[ActivityDraft]) {
        for draft in drafts {
            if let Err(err) = self.logger.record(draft).await {
                warn!(action = %draft.action, error = %err, "activity log write failed");
            }
        }
    }
}

fn charge_ops(delta: i64) -> Vec<LedgerOp> {
    if delta == 0 {
        Vec::new()
    } else {
        vec![LedgerOp::Charge { delta }]
    }
}

fn compensation_voucher(
    ticket: &Ticket,
    refundable: i64,
    real_type: &str,
    reason: &str,
) -> VoucherDraft {
    let meta = VoucherMeta {
        category: voucher::CATEGORY_COMPENSATION.to_string(),
        amount: refundable,
        balance: refundable,
        real_type: real_type.to_string(),
        source_ticket_id: Some(ticket.id.to_string()),
        reason: Some(reason.to_string()),
        ..VoucherMeta::fallback(real_type)
    };
    VoucherDraft {
        voucher_type: voucher::CATEGORY_COMPENSATION.to_string(),
        notes: voucher::encode(
            &format!("Compensation voucher for ticket {}", ticket.ticket_number),
            &meta,
        ),
    }
}

/// Signed hours between now and departure; positive while the bus has not
/// left yet.
pub fn hours_until(departure: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    (departure - now).num_milliseconds() as f64 / 3_600_000.0
}
