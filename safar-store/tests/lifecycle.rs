//! End-to-end lifecycle tests over the in-memory store: issuance,
//! cancellation, modification, no-show, payments and voucher redemption.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use uuid::Uuid;

use safar_core::plan::{
    ActivityDraft, CommitOutcome, IssueCommit, PaymentCommit, RedemptionCommit, TicketActionPlan,
};
use safar_core::repository::{ActivityLogger, Store};
use safar_core::{Error, Result};
use safar_shared::models::{
    Applicant, ApplicantStatus, CancellationPolicy, PolicyCategory, PolicyCondition, Ticket,
    TicketStatus, Transaction, TransactionType, TransportRoute, TripType, Voucher,
};
use safar_store::{MemoryActivityLogger, MemoryStore};
use safar_ticketing::{
    voucher, IssueRequest, TicketAction, TicketChanges, TicketService, UsageStatus,
};

struct Fixture {
    store: Arc<MemoryStore>,
    logger: Arc<MemoryActivityLogger>,
    service: TicketService,
}

fn fixture() -> Fixture {
    let store = Arc::new(MemoryStore::new());
    let logger = Arc::new(MemoryActivityLogger::new());
    let service = TicketService::new(store.clone(), logger.clone());
    Fixture {
        store,
        logger,
        service,
    }
}

fn applicant() -> Applicant {
    let mut a = Applicant::new("Huda Salman".to_string(), "PNR-730014".to_string());
    a.total_amount = 200_000;
    a.remaining_balance = 200_000;
    a
}

fn route(departure: &str, arrival: &str, one_way: i64, round_trip: i64) -> TransportRoute {
    TransportRoute {
        id: Uuid::new_v4(),
        departure_location: departure.to_string(),
        arrival_location: arrival.to_string(),
        one_way_price: one_way,
        round_trip_price: round_trip,
        is_active: true,
    }
}

fn policy(
    category: PolicyCategory,
    name: &str,
    hours_trigger: Option<i64>,
    condition: Option<PolicyCondition>,
    fee_amount: i64,
) -> CancellationPolicy {
    CancellationPolicy {
        id: Uuid::new_v4(),
        name: name.to_string(),
        category,
        hours_trigger,
        condition,
        fee_amount,
        is_active: true,
    }
}

fn ticket(applicant_id: Uuid, departure_in_hours: i64) -> Ticket {
    let now = Utc::now();
    Ticket {
        id: Uuid::new_v4(),
        applicant_id,
        ticket_number: "TKT-553301".to_string(),
        departure_date: now + Duration::hours(departure_in_hours),
        departure_location: "Baghdad".to_string(),
        arrival_location: "Erbil".to_string(),
        bus_number: Some("B12".to_string()),
        seat_number: Some("14".to_string()),
        status: TicketStatus::Issued,
        created_at: now,
        updated_at: now,
    }
}

fn issue_request(departure: &str, arrival: &str, trip_type: TripType) -> IssueRequest {
    IssueRequest {
        departure_date: Utc::now() + Duration::hours(72),
        departure_location: departure.to_string(),
        arrival_location: arrival.to_string(),
        bus_number: Some("B7".to_string()),
        seat_number: Some("3".to_string()),
        trip_type,
    }
}

#[tokio::test]
async fn issuing_charges_route_price_for_unpriced_transportation() {
    let f = fixture();
    let a = applicant();
    let applicant_id = a.id;
    f.store.insert_applicant(a).await;
    f.store.insert_route(route("Baghdad", "Erbil", 50_000, 90_000)).await;

    let outcome = f
        .service
        .issue_ticket(applicant_id, issue_request("Baghdad", "Erbil", TripType::OneWay), None)
        .await
        .unwrap();

    let a = f.store.applicant(applicant_id).await.unwrap();
    assert_eq!(a.total_amount, 250_000);
    assert_eq!(a.remaining_balance, 250_000);
    assert!(a.has_transportation);
    assert_eq!(a.transport_type, Some(TripType::OneWay));
    assert_eq!(a.status, ApplicantStatus::Ticketed);
    assert!(a.balance_consistent());

    let t = outcome.ticket.unwrap();
    assert_eq!(t.status, TicketStatus::Issued);
    assert!(t.ticket_number.starts_with("TKT-"));
    assert_eq!(t.ticket_number.len(), "TKT-".len() + 6);
}

#[tokio::test]
async fn issuing_adds_nothing_when_transportation_already_priced() {
    let f = fixture();
    let mut a = applicant();
    a.has_transportation = true;
    a.transport_type = Some(TripType::RoundTrip);
    let applicant_id = a.id;
    f.store.insert_applicant(a).await;
    f.store.insert_route(route("Baghdad", "Erbil", 50_000, 90_000)).await;

    f.service
        .issue_ticket(applicant_id, issue_request("Baghdad", "Erbil", TripType::RoundTrip), None)
        .await
        .unwrap();

    let a = f.store.applicant(applicant_id).await.unwrap();
    assert_eq!(a.total_amount, 200_000);
    assert_eq!(a.remaining_balance, 200_000);
}

#[tokio::test]
async fn issuing_without_a_route_charges_nothing() {
    let f = fixture();
    let a = applicant();
    let applicant_id = a.id;
    f.store.insert_applicant(a).await;

    f.service
        .issue_ticket(applicant_id, issue_request("Baghdad", "Mosul", TripType::OneWay), None)
        .await
        .unwrap();

    let a = f.store.applicant(applicant_id).await.unwrap();
    assert_eq!(a.total_amount, 200_000);
    assert!(a.has_transportation);
}

#[tokio::test]
async fn cancellation_applies_fine_and_issues_compensation_voucher() {
    let f = fixture();
    let mut a = applicant();
    a.has_transportation = true;
    a.transport_type = Some(TripType::OneWay);
    let applicant_id = a.id;
    f.store.insert_applicant(a).await;
    let t = ticket(applicant_id, 12);
    f.store.insert_ticket(t.clone()).await;
    f.store.insert_route(route("Baghdad", "Erbil", 50_000, 90_000)).await;
    f.store
        .insert_policy(policy(
            PolicyCategory::Cancellation,
            "Late cancellation",
            Some(24),
            Some(PolicyCondition::LessThan),
            10_000,
        ))
        .await;

    let preview = f
        .service
        .preview_action(applicant_id, TicketAction::Cancellation, &TicketChanges::default())
        .await
        .unwrap();
    assert_eq!(preview.policy_fee, 10_000);
    assert_eq!(preview.total_fee, 10_000);
    assert_eq!(preview.policy_name.as_deref(), Some("Late cancellation"));

    let outcome = f
        .service
        .execute_action(applicant_id, TicketAction::Cancellation, &TicketChanges::default(), None)
        .await
        .unwrap();

    // Preview and execute share one computation
    assert_eq!(outcome.fees, preview);

    let a = f.store.applicant(applicant_id).await.unwrap();
    assert_eq!(a.status, ApplicantStatus::Cancelled);
    assert_eq!(a.total_amount, 210_000);
    assert_eq!(a.remaining_balance, 210_000);
    assert!(a.balance_consistent());

    assert_eq!(
        f.store.ticket(t.id).await.unwrap().status,
        TicketStatus::Cancelled
    );

    let v = outcome.voucher.expect("refundable amount issues a voucher");
    let meta = voucher::decode(&v.notes, &v.voucher_type);
    assert_eq!(meta.balance, 40_000); // 50_000 price - 10_000 fine
    assert_eq!(meta.real_type, voucher::TYPE_COMP_CANCEL);
    assert_eq!(meta.source_ticket_id.as_deref(), Some(t.id.to_string().as_str()));
}

#[tokio::test]
async fn cancellation_after_grace_window_uses_no_show_fallback() {
    let f = fixture();
    let mut a = applicant();
    a.has_transportation = true;
    a.transport_type = Some(TripType::OneWay);
    let applicant_id = a.id;
    f.store.insert_applicant(a).await;
    f.store.insert_ticket(ticket(applicant_id, -20)).await;
    f.store.insert_route(route("Baghdad", "Erbil", 50_000, 90_000)).await;
    f.store
        .insert_policy(policy(
            PolicyCategory::Cancellation,
            "Late cancellation",
            Some(48),
            Some(PolicyCondition::LessThan),
            5_000,
        ))
        .await;
    f.store
        .insert_policy(policy(PolicyCategory::NoShow, "No show", None, None, 20_000))
        .await;

    let preview = f
        .service
        .preview_action(applicant_id, TicketAction::Cancellation, &TicketChanges::default())
        .await
        .unwrap();
    assert_eq!(preview.policy_fee, 20_000);
    assert_eq!(preview.policy_name.as_deref(), Some("No show"));
}

#[tokio::test]
async fn modification_charges_fee_plus_price_difference() {
    let f = fixture();
    let mut a = applicant();
    a.has_transportation = true;
    a.transport_type = Some(TripType::OneWay);
    let applicant_id = a.id;
    f.store.insert_applicant(a).await;
    let t = ticket(applicant_id, 12);
    f.store.insert_ticket(t.clone()).await;
    f.store.insert_route(route("Baghdad", "Erbil", 50_000, 90_000)).await;
    f.store.insert_route(route("Baghdad", "Basra", 65_000, 120_000)).await;
    f.store
        .insert_policy(policy(
            PolicyCategory::Modification,
            "Late modification",
            Some(24),
            Some(PolicyCondition::LessThan),
            5_000,
        ))
        .await;

    let changes = TicketChanges {
        new_destination: Some("Basra".to_string()),
        seat_number: Some("22".to_string()),
        ..TicketChanges::default()
    };

    let preview = f
        .service
        .preview_action(applicant_id, TicketAction::Modification, &changes)
        .await
        .unwrap();
    assert_eq!(preview.policy_fee, 5_000);
    assert_eq!(preview.price_difference, 15_000);
    assert_eq!(preview.total_fee, 20_000);

    let outcome = f
        .service
        .execute_action(applicant_id, TicketAction::Modification, &changes, None)
        .await
        .unwrap();
    assert_eq!(outcome.fees, preview);

    let a = f.store.applicant(applicant_id).await.unwrap();
    assert_eq!(a.total_amount, 220_000);
    assert!(a.balance_consistent());
    // Applicant is not cancelled by a modification
    assert_eq!(a.status, ApplicantStatus::Registered);

    let t = f.store.ticket(t.id).await.unwrap();
    assert_eq!(t.status, TicketStatus::Modified);
    assert_eq!(t.arrival_location, "Basra");
    assert_eq!(t.seat_number.as_deref(), Some("22"));
    assert_eq!(t.departure_location, "Baghdad");
}

#[tokio::test]
async fn no_show_applies_fine_once_and_rejects_a_second_attempt() {
    let f = fixture();
    let mut a = applicant();
    a.has_transportation = true;
    a.transport_type = Some(TripType::OneWay);
    let applicant_id = a.id;
    f.store.insert_applicant(a).await;
    let t = ticket(applicant_id, -2);
    f.store.insert_ticket(t.clone()).await;
    f.store.insert_route(route("Baghdad", "Erbil", 50_000, 90_000)).await;
    f.store
        .insert_policy(policy(PolicyCategory::NoShow, "No show", None, None, 20_000))
        .await;

    let outcome = f
        .service
        .update_usage(t.id, UsageStatus::NoShow, None)
        .await
        .unwrap();
    assert_eq!(outcome.fees.policy_fee, 20_000);

    let a = f.store.applicant(applicant_id).await.unwrap();
    assert_eq!(a.total_amount, 220_000);
    assert!(a.balance_consistent());

    let v = outcome.voucher.expect("no-show compensation voucher");
    let meta = voucher::decode(&v.notes, &v.voucher_type);
    assert_eq!(meta.balance, 30_000); // one-way 50_000 - 20_000 fine
    assert_eq!(meta.real_type, voucher::TYPE_COMP_NO_SHOW);

    // Second attempt double-applies nothing
    let err = f
        .service
        .update_usage(t.id, UsageStatus::NoShow, None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidState(_)));
    let a = f.store.applicant(applicant_id).await.unwrap();
    assert_eq!(a.total_amount, 220_000);
    assert_eq!(f.store.vouchers().await.len(), 1);
}

#[tokio::test]
async fn no_show_falls_back_to_legacy_policy_names() {
    let f = fixture();
    let a = applicant();
    let applicant_id = a.id;
    f.store.insert_applicant(a).await;
    let t = ticket(applicant_id, -2);
    f.store.insert_ticket(t.clone()).await;
    // Legacy record predating the category column, categorized as a
    // cancellation but named for missed departures.
    f.store
        .insert_policy(policy(
            PolicyCategory::Cancellation,
            "غرامة فوات الحافلة",
            None,
            None,
            15_000,
        ))
        .await;

    let outcome = f
        .service
        .update_usage(t.id, UsageStatus::NoShow, None)
        .await
        .unwrap();
    assert_eq!(outcome.fees.policy_fee, 15_000);
    assert_eq!(outcome.fees.policy_name.as_deref(), Some("غرامة فوات الحافلة"));
}

#[tokio::test]
async fn mark_used_has_no_financial_effect() {
    let f = fixture();
    let a = applicant();
    let applicant_id = a.id;
    f.store.insert_applicant(a).await;
    let t = ticket(applicant_id, -1);
    f.store.insert_ticket(t.clone()).await;

    let outcome = f.service.update_usage(t.id, UsageStatus::Used, None).await.unwrap();
    assert_eq!(outcome.fees.total_fee, 0);
    assert!(outcome.voucher.is_none());

    let a = f.store.applicant(applicant_id).await.unwrap();
    assert_eq!(a.total_amount, 200_000);
    assert_eq!(
        f.store.ticket(t.id).await.unwrap().status,
        TicketStatus::Used
    );

    let err = f.service.update_usage(t.id, UsageStatus::Used, None).await.unwrap_err();
    assert!(matches!(err, Error::InvalidState(_)));
}

#[tokio::test]
async fn ticket_level_cancel_leaves_the_applicant_alone() {
    let f = fixture();
    let a = applicant();
    let applicant_id = a.id;
    f.store.insert_applicant(a).await;
    let t = ticket(applicant_id, 48);
    f.store.insert_ticket(t.clone()).await;

    f.service.cancel_ticket_only(t.id, None).await.unwrap();

    let a = f.store.applicant(applicant_id).await.unwrap();
    assert_eq!(a.status, ApplicantStatus::Registered);
    assert_eq!(a.total_amount, 200_000);
    assert_eq!(
        f.store.ticket(t.id).await.unwrap().status,
        TicketStatus::Cancelled
    );
    assert!(f.store.vouchers().await.is_empty());
}

#[tokio::test]
async fn payment_recomputes_remaining_and_records_a_transaction() {
    let f = fixture();
    let mut a = applicant();
    a.discount = 20_000;
    a.remaining_balance = 180_000;
    let applicant_id = a.id;
    f.store.insert_applicant(a).await;

    let receipt = f
        .service
        .record_payment(applicant_id, 80_000, Some("first installment".to_string()), None)
        .await
        .unwrap();
    assert_eq!(receipt.total_paid, 80_000);
    assert_eq!(receipt.remaining_balance, 100_000);
    assert_eq!(receipt.transaction.tx_type, TransactionType::Payment);
    assert_eq!(receipt.transaction.amount, 80_000);

    let a = f.store.applicant(applicant_id).await.unwrap();
    assert!(a.balance_consistent());

    let logged = f.logger.entries().await;
    assert!(logged.iter().any(|e| e.action == "PAYMENT_RECORDED"));
}

#[tokio::test]
async fn rejects_non_positive_payments() {
    let f = fixture();
    let a = applicant();
    let applicant_id = a.id;
    f.store.insert_applicant(a).await;

    let err = f.service.record_payment(applicant_id, 0, None, None).await.unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
    assert!(f.store.transactions().await.is_empty());
}

struct FailingLogger;

#[async_trait]
impl ActivityLogger for FailingLogger {
    async fn record(&self, _entry: &ActivityDraft) -> Result<()> {
        Err(Error::Storage("audit table unavailable".into()))
    }
}

#[tokio::test]
async fn a_failed_activity_write_never_rolls_back_a_payment() {
    let store = Arc::new(MemoryStore::new());
    let service = TicketService::new(store.clone(), Arc::new(FailingLogger));
    let a = applicant();
    let applicant_id = a.id;
    store.insert_applicant(a).await;

    let receipt = service
        .record_payment(applicant_id, 50_000, None, None)
        .await
        .expect("payment commits despite the audit failure");
    assert_eq!(receipt.total_paid, 50_000);
    assert_eq!(store.transactions().await.len(), 1);
}

#[tokio::test]
async fn voucher_redemption_pays_out_once() {
    let f = fixture();
    let mut a = applicant();
    a.has_transportation = true;
    a.transport_type = Some(TripType::OneWay);
    let applicant_id = a.id;
    f.store.insert_applicant(a).await;
    let t = ticket(applicant_id, 12);
    f.store.insert_ticket(t).await;
    f.store.insert_route(route("Baghdad", "Erbil", 50_000, 90_000)).await;
    f.store
        .insert_policy(policy(
            PolicyCategory::Cancellation,
            "Late cancellation",
            Some(24),
            Some(PolicyCondition::LessThan),
            10_000,
        ))
        .await;

    let outcome = f
        .service
        .execute_action(applicant_id, TicketAction::Cancellation, &TicketChanges::default(), None)
        .await
        .unwrap();
    let voucher_id = outcome.voucher.unwrap().id;

    let (redeemed, tx) = f
        .service
        .redeem_voucher(voucher_id, Some("paid at the desk".to_string()))
        .await
        .unwrap();
    assert!(redeemed.is_used);
    assert!(redeemed.used_at.is_some());
    assert!(redeemed.notes.contains(voucher::REFUNDED_CASH_MARKER));
    assert_eq!(tx.tx_type, TransactionType::Withdrawal);
    assert_eq!(tx.amount, -40_000);
    assert_eq!(tx.category, voucher::TX_CATEGORY_VOUCHER_REFUND);

    let err = f.service.redeem_voucher(voucher_id, None).await.unwrap_err();
    assert!(matches!(err, Error::InvalidState(_)));
    assert_eq!(f.store.transactions().await.len(), 1);
}

#[tokio::test]
async fn redeeming_a_markerless_voucher_fails_without_a_transaction() {
    let f = fixture();
    let v = safar_shared::models::Voucher {
        id: Uuid::new_v4(),
        voucher_type: "GIFT".to_string(),
        is_used: false,
        used_at: None,
        notes: "handwritten gift note".to_string(),
        created_at: Utc::now(),
    };
    f.store.insert_voucher(v.clone()).await;

    let err = f.service.redeem_voucher(v.id, None).await.unwrap_err();
    assert!(matches!(err, Error::InvalidState(_)));
    assert!(f.store.transactions().await.is_empty());
}

/// Delegates every call to the memory store, but holds `get_ticket`
/// callers at a barrier so two racing operations both read the ticket
/// before either commits.
struct StalledReadStore {
    inner: Arc<MemoryStore>,
    barrier: tokio::sync::Barrier,
}

#[async_trait]
impl Store for StalledReadStore {
    async fn get_applicant(&self, id: Uuid) -> Result<Option<Applicant>> {
        self.inner.get_applicant(id).await
    }

    async fn get_ticket(&self, id: Uuid) -> Result<Option<Ticket>> {
        let ticket = self.inner.get_ticket(id).await?;
        self.barrier.wait().await;
        Ok(ticket)
    }

    async fn current_ticket(&self, applicant_id: Uuid) -> Result<Option<Ticket>> {
        self.inner.current_ticket(applicant_id).await
    }

    async fn ticket_number_exists(&self, number: &str) -> Result<bool> {
        self.inner.ticket_number_exists(number).await
    }

    async fn find_active_route(
        &self,
        departure: &str,
        arrival: &str,
    ) -> Result<Option<TransportRoute>> {
        self.inner.find_active_route(departure, arrival).await
    }

    async fn active_policies(&self, category: PolicyCategory) -> Result<Vec<CancellationPolicy>> {
        self.inner.active_policies(category).await
    }

    async fn active_policies_named(&self, needles: &[&str]) -> Result<Vec<CancellationPolicy>> {
        self.inner.active_policies_named(needles).await
    }

    async fn get_voucher(&self, id: Uuid) -> Result<Option<Voucher>> {
        self.inner.get_voucher(id).await
    }

    async fn commit_ticket_action(&self, plan: &TicketActionPlan) -> Result<CommitOutcome> {
        self.inner.commit_ticket_action(plan).await
    }

    async fn commit_issue(&self, commit: &IssueCommit) -> Result<CommitOutcome> {
        self.inner.commit_issue(commit).await
    }

    async fn commit_payment(&self, commit: &PaymentCommit) -> Result<CommitOutcome> {
        self.inner.commit_payment(commit).await
    }

    async fn commit_redemption(&self, commit: &RedemptionCommit) -> Result<(Voucher, Transaction)> {
        self.inner.commit_redemption(commit).await
    }
}

#[tokio::test]
async fn concurrent_no_shows_apply_the_fine_once() {
    let inner = Arc::new(MemoryStore::new());
    let store = Arc::new(StalledReadStore {
        inner: inner.clone(),
        barrier: tokio::sync::Barrier::new(2),
    });
    let service = Arc::new(TicketService::new(
        store,
        Arc::new(MemoryActivityLogger::new()),
    ));

    let mut a = applicant();
    a.has_transportation = true;
    a.transport_type = Some(TripType::OneWay);
    let applicant_id = a.id;
    inner.insert_applicant(a).await;
    let t = ticket(applicant_id, -2);
    let ticket_id = t.id;
    inner.insert_ticket(t).await;
    inner.insert_route(route("Baghdad", "Erbil", 50_000, 90_000)).await;
    inner
        .insert_policy(policy(PolicyCategory::NoShow, "No show", None, None, 20_000))
        .await;

    // Both callers read the still-ISSUED ticket before either commits.
    let first = tokio::spawn({
        let service = service.clone();
        async move { service.update_usage(ticket_id, UsageStatus::NoShow, None).await }
    });
    let second = tokio::spawn({
        let service = service.clone();
        async move { service.update_usage(ticket_id, UsageStatus::NoShow, None).await }
    });
    let results = [first.await.unwrap(), second.await.unwrap()];

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .any(|r| matches!(r, Err(Error::InvalidState(_)))));

    let a = inner.applicant(applicant_id).await.unwrap();
    assert_eq!(a.total_amount, 220_000);
    assert!(a.balance_consistent());
    assert_eq!(inner.vouchers().await.len(), 1);
    assert_eq!(
        inner.ticket(ticket_id).await.unwrap().status,
        TicketStatus::NoShow
    );
}

#[tokio::test]
async fn missing_entities_surface_not_found() {
    let f = fixture();
    let err = f
        .service
        .preview_action(Uuid::new_v4(), TicketAction::Cancellation, &TicketChanges::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound("applicant", _)));

    let err = f.service.redeem_voucher(Uuid::new_v4(), None).await.unwrap_err();
    assert!(matches!(err, Error::NotFound("voucher", _)));
}
