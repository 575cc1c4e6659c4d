//! Postgres implementation of the storage boundary. Every commit runs in
//! one transaction and re-reads the applicant row `FOR UPDATE` before
//! applying ledger ops, so two concurrent fee applications cannot both see
//! a stale balance.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use safar_core::plan::{
    ActivityDraft, CommitOutcome, IssueCommit, LedgerOp, PaymentCommit, RedemptionCommit,
    TicketActionPlan, TransactionDraft,
};
use safar_core::repository::{ActivityLogger, Store};
use safar_core::{Error, Result};
use safar_shared::models::{
    Applicant, CancellationPolicy, PolicyCategory, Ticket, Transaction, TransportRoute, Voucher,
};
use safar_ticketing::ledger;

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn parse_enum<T>(value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value.parse::<T>().map_err(Error::storage)
}

#[derive(sqlx::FromRow)]
struct ApplicantRow {
    id: Uuid,
    full_name: String,
    applicant_code: String,
    phone: Option<String>,
    status: String,
    total_amount: i64,
    discount: i64,
    amount_paid: i64,
    remaining_balance: i64,
    has_transportation: bool,
    transport_type: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ApplicantRow> for Applicant {
    type Error = Error;

    fn try_from(row: ApplicantRow) -> Result<Self> {
        Ok(Applicant {
            id: row.id,
            full_name: row.full_name,
            applicant_code: row.applicant_code,
            phone: row.phone,
            status: parse_enum(&row.status)?,
            total_amount: row.total_amount,
            discount: row.discount,
            amount_paid: row.amount_paid,
            remaining_balance: row.remaining_balance,
            has_transportation: row.has_transportation,
            transport_type: row
                .transport_type
                .as_deref()
                .map(parse_enum)
                .transpose()?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct TicketRow {
    id: Uuid,
    applicant_id: Uuid,
    ticket_number: String,
    departure_date: DateTime<Utc>,
    departure_location: String,
    arrival_location: String,
    bus_number: Option<String>,
    seat_number: Option<String>,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<TicketRow> for Ticket {
    type Error = Error;

    fn try_from(row: TicketRow) -> Result<Self> {
        Ok(Ticket {
            id: row.id,
            applicant_id: row.applicant_id,
            ticket_number: row.ticket_number,
            departure_date: row.departure_date,
            departure_location: row.departure_location,
            arrival_location: row.arrival_location,
            bus_number: row.bus_number,
            seat_number: row.seat_number,
            status: parse_enum(&row.status)?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct RouteRow {
    id: Uuid,
    departure_location: String,
    arrival_location: String,
    one_way_price: i64,
    round_trip_price: i64,
    is_active: bool,
}

impl From<RouteRow> for TransportRoute {
    fn from(row: RouteRow) -> Self {
        TransportRoute {
            id: row.id,
            departure_location: row.departure_location,
            arrival_location: row.arrival_location,
            one_way_price: row.one_way_price,
            round_trip_price: row.round_trip_price,
            is_active: row.is_active,
        }
    }
}

#[derive(sqlx::FromRow)]
struct PolicyRow {
    id: Uuid,
    name: String,
    category: String,
    hours_trigger: Option<i64>,
    condition: Option<String>,
    fee_amount: i64,
    is_active: bool,
}

impl TryFrom<PolicyRow> for CancellationPolicy {
    type Error = Error;

    fn try_from(row: PolicyRow) -> Result<Self> {
        Ok(CancellationPolicy {
            id: row.id,
            name: row.name,
            category: parse_enum(&row.category)?,
            hours_trigger: row.hours_trigger,
            condition: row.condition.as_deref().map(parse_enum).transpose()?,
            fee_amount: row.fee_amount,
            is_active: row.is_active,
        })
    }
}

#[derive(sqlx::FromRow)]
struct VoucherRow {
    id: Uuid,
    voucher_type: String,
    is_used: bool,
    used_at: Option<DateTime<Utc>>,
    notes: String,
    created_at: DateTime<Utc>,
}

impl From<VoucherRow> for Voucher {
    fn from(row: VoucherRow) -> Self {
        Voucher {
            id: row.id,
            voucher_type: row.voucher_type,
            is_used: row.is_used,
            used_at: row.used_at,
            notes: row.notes,
            created_at: row.created_at,
        }
    }
}

const APPLICANT_COLS: &str = "id, full_name, applicant_code, phone, status, total_amount, \
     discount, amount_paid, remaining_balance, has_transportation, transport_type, \
     created_at, updated_at";

const TICKET_COLS: &str = "id, applicant_id, ticket_number, departure_date, departure_location, \
     arrival_location, bus_number, seat_number, status, created_at, updated_at";

const POLICY_COLS: &str =
    "id, name, category, hours_trigger, condition, fee_amount, is_active";

async fn lock_applicant(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    id: Uuid,
) -> Result<Applicant> {
    let row = sqlx::query_as::<_, ApplicantRow>(&format!(
        "SELECT {APPLICANT_COLS} FROM applicants WHERE id = $1 FOR UPDATE"
    ))
    .bind(id)
    .fetch_optional(&mut **tx)
    .await
    .map_err(Error::storage)?
    .ok_or_else(|| Error::NotFound("applicant", id.to_string()))?;
    row.try_into()
}

async fn update_applicant(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    applicant: &Applicant,
) -> Result<()> {
    sqlx::query(
        "UPDATE applicants SET status = $2, total_amount = $3, amount_paid = $4, \
         remaining_balance = $5, has_transportation = $6, transport_type = $7, \
         updated_at = $8 WHERE id = $1",
    )
    .bind(applicant.id)
    .bind(applicant.status.as_str())
    .bind(applicant.total_amount)
    .bind(applicant.amount_paid)
    .bind(applicant.remaining_balance)
    .bind(applicant.has_transportation)
    .bind(applicant.transport_type.map(|t| t.as_str()))
    .bind(applicant.updated_at)
    .execute(&mut **tx)
    .await
    .map_err(Error::storage)?;
    Ok(())
}

async fn insert_transactions(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    drafts: &[TransactionDraft],
) -> Result<Vec<Transaction>> {
    let mut created = Vec::with_capacity(drafts.len());
    for draft in drafts {
        let record = Transaction {
            id: Uuid::new_v4(),
            tx_type: draft.tx_type,
            category: draft.category.clone(),
            amount: draft.amount,
            applicant_id: draft.applicant_id,
            notes: draft.notes.clone(),
            created_at: Utc::now(),
        };
        sqlx::query(
            "INSERT INTO transactions (id, tx_type, category, amount, applicant_id, notes, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(record.id)
        .bind(record.tx_type.as_str())
        .bind(&record.category)
        .bind(record.amount)
        .bind(record.applicant_id)
        .bind(&record.notes)
        .bind(record.created_at)
        .execute(&mut **tx)
        .await
        .map_err(Error::storage)?;
        created.push(record);
    }
    Ok(created)
}

#[async_trait]
impl Store for PgStore {
    async fn get_applicant(&self, id: Uuid) -> Result<Option<Applicant>> {
        let row = sqlx::query_as::<_, ApplicantRow>(&format!(
            "SELECT {APPLICANT_COLS} FROM applicants WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::storage)?;
        row.map(TryInto::try_into).transpose()
    }

    async fn get_ticket(&self, id: Uuid) -> Result<Option<Ticket>> {
        let row = sqlx::query_as::<_, TicketRow>(&format!(
            "SELECT {TICKET_COLS} FROM tickets WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::storage)?;
        row.map(TryInto::try_into).transpose()
    }

    async fn current_ticket(&self, applicant_id: Uuid) -> Result<Option<Ticket>> {
        let row = sqlx::query_as::<_, TicketRow>(&format!(
            "SELECT {TICKET_COLS} FROM tickets \
             WHERE applicant_id = $1 AND status IN ('ISSUED', 'MODIFIED') \
             ORDER BY created_at DESC LIMIT 1"
        ))
        .bind(applicant_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::storage)?;
        row.map(TryInto::try_into).transpose()
    }

    async fn ticket_number_exists(&self, number: &str) -> Result<bool> {
        sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM tickets WHERE ticket_number = $1)",
        )
        .bind(number)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::storage)
    }

    async fn find_active_route(
        &self,
        departure: &str,
        arrival: &str,
    ) -> Result<Option<TransportRoute>> {
        let row = sqlx::query_as::<_, RouteRow>(
            "SELECT id, departure_location, arrival_location, one_way_price, \
             round_trip_price, is_active FROM transport_routes \
             WHERE departure_location = $1 AND arrival_location = $2 AND is_active \
             LIMIT 1",
        )
        .bind(departure)
        .bind(arrival)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::storage)?;
        Ok(row.map(Into::into))
    }

    async fn active_policies(&self, category: PolicyCategory) -> Result<Vec<CancellationPolicy>> {
        let rows = sqlx::query_as::<_, PolicyRow>(&format!(
            "SELECT {POLICY_COLS} FROM cancellation_policies \
             WHERE category = $1 AND is_active ORDER BY id"
        ))
        .bind(category.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(Error::storage)?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn active_policies_named(&self, needles: &[&str]) -> Result<Vec<CancellationPolicy>> {
        let patterns: Vec<String> = needles.iter().map(|n| format!("%{}%", n)).collect();
        let rows = sqlx::query_as::<_, PolicyRow>(&format!(
            "SELECT {POLICY_COLS} FROM cancellation_policies \
             WHERE is_active AND name ILIKE ANY($1) ORDER BY id"
        ))
        .bind(&patterns)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::storage)?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn get_voucher(&self, id: Uuid) -> Result<Option<Voucher>> {
        let row = sqlx::query_as::<_, VoucherRow>(
            "SELECT id, voucher_type, is_used, used_at, notes, created_at \
             FROM vouchers WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::storage)?;
        Ok(row.map(Into::into))
    }

    async fn commit_ticket_action(&self, plan: &TicketActionPlan) -> Result<CommitOutcome> {
        let mut tx = self.pool.begin().await.map_err(Error::storage)?;

        let mut applicant = lock_applicant(&mut tx, plan.applicant_id).await?;
        ledger::apply_all(&mut applicant, &plan.ledger_ops);
        if let Some(status) = plan.applicant_status {
            applicant.status = status;
        }
        update_applicant(&mut tx, &applicant).await?;

        let now = Utc::now();
        // The status guard makes the precondition part of the commit: a
        // concurrent transition that won the race leaves zero rows here and
        // the whole transaction rolls back.
        let ticket_row = sqlx::query_as::<_, TicketRow>(&format!(
            "UPDATE tickets SET status = $2, \
             departure_date = COALESCE($3, departure_date), \
             departure_location = COALESCE($4, departure_location), \
             arrival_location = COALESCE($5, arrival_location), \
             bus_number = COALESCE($6, bus_number), \
             seat_number = COALESCE($7, seat_number), \
             updated_at = $8 \
             WHERE id = $1 AND status IN ('ISSUED', 'MODIFIED') \
             RETURNING {TICKET_COLS}"
        ))
        .bind(plan.ticket_id)
        .bind(plan.ticket_status.as_str())
        .bind(plan.ticket_fields.departure_date)
        .bind(plan.ticket_fields.departure_location.as_deref())
        .bind(plan.ticket_fields.arrival_location.as_deref())
        .bind(plan.ticket_fields.bus_number.as_deref())
        .bind(plan.ticket_fields.seat_number.as_deref())
        .bind(now)
        .fetch_optional(&mut *tx)
        .await
        .map_err(Error::storage)?;
        let ticket: Ticket = match ticket_row {
            Some(row) => row.try_into()?,
            None => {
                let status: Option<String> =
                    sqlx::query_scalar("SELECT status FROM tickets WHERE id = $1")
                        .bind(plan.ticket_id)
                        .fetch_optional(&mut *tx)
                        .await
                        .map_err(Error::storage)?;
                return Err(match status {
                    Some(status) => Error::InvalidState(format!(
                        "ticket {} is {} and no longer accepts this transition",
                        plan.ticket_id, status
                    )),
                    None => Error::NotFound("ticket", plan.ticket_id.to_string()),
                });
            }
        };

        let voucher = match plan.voucher.as_ref() {
            Some(draft) => {
                let voucher = Voucher {
                    id: Uuid::new_v4(),
                    voucher_type: draft.voucher_type.clone(),
                    is_used: false,
                    used_at: None,
                    notes: draft.notes.clone(),
                    created_at: now,
                };
                sqlx::query(
                    "INSERT INTO vouchers (id, voucher_type, is_used, used_at, notes, created_at) \
                     VALUES ($1, $2, $3, $4, $5, $6)",
                )
                .bind(voucher.id)
                .bind(&voucher.voucher_type)
                .bind(voucher.is_used)
                .bind(voucher.used_at)
                .bind(&voucher.notes)
                .bind(voucher.created_at)
                .execute(&mut *tx)
                .await
                .map_err(Error::storage)?;
                Some(voucher)
            }
            None => None,
        };

        let transactions = insert_transactions(&mut tx, &plan.transactions).await?;

        tx.commit().await.map_err(Error::storage)?;

        Ok(CommitOutcome {
            applicant,
            ticket: Some(ticket),
            voucher,
            transactions,
        })
    }

    async fn commit_issue(&self, commit: &IssueCommit) -> Result<CommitOutcome> {
        let mut tx = self.pool.begin().await.map_err(Error::storage)?;

        let mut applicant = lock_applicant(&mut tx, commit.ticket.applicant_id).await?;
        if commit.price_delta != 0 {
            ledger::apply(
                &mut applicant,
                &LedgerOp::Charge {
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
        update_applicant(&mut tx, &applicant).await?;

        let t = &commit.ticket;
        sqlx::query(
            "INSERT INTO tickets (id, applicant_id, ticket_number, departure_date, \
             departure_location, arrival_location, bus_number, seat_number, status, \
             created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .bind(t.id)
        .bind(t.applicant_id)
        .bind(&t.ticket_number)
        .bind(t.departure_date)
        .bind(&t.departure_location)
        .bind(&t.arrival_location)
        .bind(t.bus_number.as_deref())
        .bind(t.seat_number.as_deref())
        .bind(t.status.as_str())
        .bind(t.created_at)
        .bind(t.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(Error::storage)?;

        tx.commit().await.map_err(Error::storage)?;

        Ok(CommitOutcome {
            applicant,
            ticket: Some(commit.ticket.clone()),
            voucher: None,
            transactions: Vec::new(),
        })
    }

    async fn commit_payment(&self, commit: &PaymentCommit) -> Result<CommitOutcome> {
        let mut tx = self.pool.begin().await.map_err(Error::storage)?;

        let mut applicant = lock_applicant(&mut tx, commit.applicant_id).await?;
        ledger::apply(
            &mut applicant,
            &LedgerOp::Payment {
                amount: commit.amount,
            },
        );
        update_applicant(&mut tx, &applicant).await?;

        let transactions =
            insert_transactions(&mut tx, std::slice::from_ref(&commit.transaction)).await?;

        tx.commit().await.map_err(Error::storage)?;

        Ok(CommitOutcome {
            applicant,
            ticket: None,
            voucher: None,
            transactions,
        })
    }

    async fn commit_redemption(&self, commit: &RedemptionCommit) -> Result<(Voucher, Transaction)> {
        let mut tx = self.pool.begin().await.map_err(Error::storage)?;

        let row = sqlx::query_as::<_, VoucherRow>(
            "SELECT id, voucher_type, is_used, used_at, notes, created_at \
             FROM vouchers WHERE id = $1 FOR UPDATE",
        )
        .bind(commit.voucher_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(Error::storage)?
        .ok_or_else(|| Error::NotFound("voucher", commit.voucher_id.to_string()))?;
        let mut voucher: Voucher = row.into();
        // Recheck under the row lock; a concurrent redemption may have won.
        if voucher.is_used {
            return Err(Error::InvalidState(format!(
                "voucher {} already used",
                voucher.id
            )));
        }

        voucher.is_used = true;
        voucher.used_at = Some(Utc::now());
        voucher.notes.push_str(&commit.notes_suffix);
        sqlx::query(
            "UPDATE vouchers SET is_used = TRUE, used_at = $2, notes = $3 WHERE id = $1",
        )
        .bind(voucher.id)
        .bind(voucher.used_at)
        .bind(&voucher.notes)
        .execute(&mut *tx)
        .await
        .map_err(Error::storage)?;

        let transaction =
            insert_transactions(&mut tx, std::slice::from_ref(&commit.transaction))
                .await?
                .into_iter()
                .next()
                .ok_or_else(|| Error::Storage("redemption produced no transaction".into()))?;

        tx.commit().await.map_err(Error::storage)?;

        Ok((voucher, transaction))
    }
}

/// Audit trail writer. Callers treat failures as best-effort.
pub struct PgActivityLogger {
    pool: PgPool,
}

impl PgActivityLogger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ActivityLogger for PgActivityLogger {
    async fn record(&self, entry: &ActivityDraft) -> Result<()> {
        sqlx::query(
            "INSERT INTO activity_logs (id, applicant_id, user_id, action, details, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(Uuid::new_v4())
        .bind(entry.applicant_id)
        .bind(entry.user_id)
        .bind(&entry.action)
        .bind(&entry.details)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(Error::storage)?;
        Ok(())
    }
}
