//! Scheduling flow tests against the in-memory store

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use rust_decimal::Decimal;

use install_scheduler::{
    clock::{Clock, FixedClock},
    config::{RetryConfig, SchedulingConfig},
    error::{AppError, AppResult},
    models::{
        appointment::{
            Appointment, AppointmentDraft, AppointmentStatus, BookingRequest, RescheduleAppointment,
            VisitOutcome,
        },
        ledger::{CapacitySnapshot, Reservation},
        order::{FulfillmentEventKind, FulfillmentOrder, FulfillmentStatus, PendingFilter},
        schedule::{
            all_weekdays, CreateBlackout, CreateTimeSlot, TimeSlotDraft, TimeSlotTemplate,
            UpdateTimeSlot,
        },
        user::Actor,
    },
    repository::{memory::MemoryStore, AppointmentsRepository, BookingLedger, Repository},
    services::{notifications::TracingNotifier, reconciliation::ReconciliationService, Services},
};

const INSTALLER_ID: i32 = 10;
const ZIP: &str = "30301";

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 1, 9, 0, 0).unwrap()
}

fn date(value: &str) -> NaiveDate {
    value.parse().unwrap()
}

fn config() -> SchedulingConfig {
    SchedulingConfig {
        retry: RetryConfig {
            max_attempts: 2,
            base_delay_ms: 1,
        },
        ..Default::default()
    }
}

fn order(id: i32, status: FulfillmentStatus, ready: &str) -> FulfillmentOrder {
    FulfillmentOrder {
        id,
        order_number: format!("WO-{:05}", id),
        customer_id: 1000 + id,
        status,
        ready_for_installation_date: date(ready),
        service_zip_code: ZIP.to_string(),
        diy_flagged: false,
        diy_reason: None,
        customer_name: format!("Customer {}", id),
        customer_email: Some(format!("customer{}@example.com", id)),
        customer_phone: None,
        shipped_at: Some(now() - Duration::days(3)),
        updated_at: None,
    }
}

fn customer_of(order_id: i32) -> Actor {
    Actor::customer(1000 + order_id)
}

fn admin() -> Actor {
    Actor::admin(1)
}

fn installer() -> Actor {
    Actor::installer(INSTALLER_ID)
}

fn booking(on: &str, slot_id: i32) -> BookingRequest {
    serde_json::from_value(serde_json::json!({ "date": on, "slot_id": slot_id })).unwrap()
}

struct Harness {
    services: Services,
    repository: Repository,
    /// AM, PM, EVE
    defaults: Vec<TimeSlotTemplate>,
    /// 09:00-11:00, capacity 1
    single: TimeSlotTemplate,
}

impl Harness {
    fn am(&self) -> i32 {
        self.defaults[0].id
    }

    fn pm(&self) -> i32 {
        self.defaults[1].id
    }

    async fn remaining(&self, on: &str, slot_id: i32) -> i32 {
        self.repository.ledger.peek(date(on), slot_id).await.unwrap()
    }

    async fn order_status(&self, id: i32) -> FulfillmentStatus {
        self.repository.orders.get(id).await.unwrap().status
    }
}

fn harness(orders: Vec<FulfillmentOrder>) -> Harness {
    harness_with(orders, |repository| repository)
}

/// Harness whose services run over `wrap(repository)`; `Harness::repository`
/// stays the plain store
fn harness_with(orders: Vec<FulfillmentOrder>, wrap: impl FnOnce(Repository) -> Repository) -> Harness {
    let clock: Arc<dyn Clock> = Arc::new(FixedClock(now()));
    let store = MemoryStore::with_clock(clock.clone());
    let defaults = store.seed_default_slots().unwrap();
    let single = store
        .insert_slot(&TimeSlotDraft {
            name: "Express 9am-11am".into(),
            code: "EXP".into(),
            start_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            end_time: NaiveTime::from_hms_opt(11, 0, 0).unwrap(),
            total_capacity: 1,
            additional_fee: Decimal::new(2500, 2),
            requires_signature: false,
            allows_specific_time: false,
            available_days: all_weekdays(),
            min_lead_days: 0,
            max_advance_days: 60,
            is_active: true,
            display_order: 4,
        })
        .unwrap();
    for order in orders {
        store.insert_order(order).unwrap();
    }
    store.assign_zip(INSTALLER_ID, ZIP).unwrap();

    let repository = Repository::in_memory(store);
    let services = Services::new(wrap(repository.clone()), Arc::new(TracingNotifier), clock, config());
    Harness {
        services,
        repository,
        defaults,
        single,
    }
}

// ---- Scenarios ----

#[tokio::test]
async fn test_second_booking_of_single_capacity_slot_is_rejected() {
    let h = harness(vec![
        order(1, FulfillmentStatus::PendingInstallation, "2025-06-03"),
        order(2, FulfillmentStatus::PendingInstallation, "2025-06-03"),
    ]);

    let first = h
        .services
        .scheduling
        .schedule(1, &booking("2025-06-10", h.single.id), &customer_of(1))
        .await
        .unwrap();
    assert_eq!(first.status, AppointmentStatus::Scheduled);

    let second = h
        .services
        .scheduling
        .schedule(2, &booking("2025-06-10", h.single.id), &customer_of(2))
        .await;
    assert!(matches!(second, Err(AppError::SlotUnavailable(_))));

    assert_eq!(h.order_status(1).await, FulfillmentStatus::Scheduled);
    assert_eq!(h.order_status(2).await, FulfillmentStatus::PendingInstallation);
    assert_eq!(h.remaining("2025-06-10", h.single.id).await, 0);
    assert!(h.repository.appointments.list_for_order(2).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_booking_before_ready_date_is_rejected() {
    let h = harness(vec![order(1, FulfillmentStatus::Shipped, "2025-06-12")]);

    let early = h
        .services
        .scheduling
        .schedule(1, &booking("2025-06-11", h.am()), &customer_of(1))
        .await;
    assert!(matches!(early, Err(AppError::Validation(_))));
    assert_eq!(h.remaining("2025-06-11", h.am()).await, 4);

    let appointment = h
        .services
        .scheduling
        .schedule(1, &booking("2025-06-12", h.am()), &customer_of(1))
        .await
        .unwrap();
    assert_eq!(appointment.service_date, date("2025-06-12"));
    assert_eq!(h.order_status(1).await, FulfillmentStatus::Scheduled);
}

#[tokio::test]
async fn test_failed_reschedule_keeps_original_booking() {
    let h = harness(vec![
        order(1, FulfillmentStatus::PendingInstallation, "2025-06-03"),
        order(2, FulfillmentStatus::PendingInstallation, "2025-06-03"),
    ]);

    let original = h
        .services
        .scheduling
        .schedule(1, &booking("2025-06-10", h.am()), &customer_of(1))
        .await
        .unwrap();
    h.services
        .scheduling
        .schedule(2, &booking("2025-06-10", h.single.id), &customer_of(2))
        .await
        .unwrap();
    let am_before = h.remaining("2025-06-10", h.am()).await;

    let request = RescheduleAppointment {
        date: "2025-06-10".into(),
        slot_id: h.single.id,
    };
    let result = h
        .services
        .scheduling
        .reschedule(original.id, &request, &customer_of(1))
        .await;
    assert!(matches!(result, Err(AppError::SlotUnavailable(_))));

    let current = h.repository.appointments.get(original.id).await.unwrap();
    assert_eq!(current.slot_id, h.am());
    assert_eq!(current.status, AppointmentStatus::Scheduled);
    assert_eq!(current.hold_token, original.hold_token);
    assert_eq!(h.remaining("2025-06-10", h.am()).await, am_before);
    assert_eq!(h.remaining("2025-06-10", h.single.id).await, 0);
    assert_eq!(h.order_status(1).await, FulfillmentStatus::Scheduled);
}

#[tokio::test]
async fn test_installer_schedules_diy_order_anyway() {
    let h = harness(vec![order(1, FulfillmentStatus::PendingInstallation, "2025-06-03")]);

    let diy = h
        .services
        .scheduling
        .mark_diy(1, Some("Customer prefers to install"), &installer())
        .await
        .unwrap();
    assert_eq!(diy.status, FulfillmentStatus::Diy);
    assert!(diy.diy_flagged);

    let appointment = h
        .services
        .scheduling
        .schedule(1, &booking("2025-06-05", h.pm()), &installer())
        .await
        .unwrap();
    assert_eq!(appointment.order_id, 1);
    assert_eq!(h.order_status(1).await, FulfillmentStatus::Scheduled);

    // Flagged orders fall back to diy when the appointment goes away
    h.services
        .scheduling
        .cancel(appointment.id, None, &installer())
        .await
        .unwrap();
    assert_eq!(h.order_status(1).await, FulfillmentStatus::Diy);
}

#[tokio::test]
async fn test_cancel_gives_capacity_back() {
    let h = harness(vec![order(1, FulfillmentStatus::PendingInstallation, "2025-06-03")]);

    let appointment = h
        .services
        .scheduling
        .schedule(1, &booking("2025-06-10", h.pm()), &customer_of(1))
        .await
        .unwrap();
    assert_eq!(h.remaining("2025-06-10", h.pm()).await, 3);

    let cancelled = h
        .services
        .scheduling
        .cancel(appointment.id, Some("Moving house"), &customer_of(1))
        .await
        .unwrap();
    assert_eq!(cancelled.status, AppointmentStatus::Cancelled);
    assert_eq!(cancelled.cancel_reason.as_deref(), Some("Moving house"));
    assert_eq!(h.remaining("2025-06-10", h.pm()).await, 4);
    assert_eq!(h.order_status(1).await, FulfillmentStatus::PendingInstallation);

    // A second cancel is a no-op
    let again = h
        .services
        .scheduling
        .cancel(appointment.id, None, &customer_of(1))
        .await
        .unwrap();
    assert_eq!(again.status, AppointmentStatus::Cancelled);
    assert_eq!(h.remaining("2025-06-10", h.pm()).await, 4);

    let kinds: Vec<_> = h
        .services
        .scheduling
        .order_history(1, &customer_of(1))
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.kind)
        .collect();
    assert_eq!(kinds, vec![FulfillmentEventKind::Scheduled, FulfillmentEventKind::Cancelled]);
}

// ---- Properties ----

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_bookings_never_exceed_capacity() {
    let orders: Vec<_> = (1..=12)
        .map(|id| order(id, FulfillmentStatus::PendingInstallation, "2025-06-03"))
        .collect();
    let h = harness(orders);
    let pm = h.pm();

    let mut handles = Vec::new();
    for id in 1..=12 {
        let scheduling = h.services.scheduling.clone();
        handles.push(tokio::spawn(async move {
            scheduling
                .schedule(id, &booking("2025-06-10", pm), &customer_of(id))
                .await
        }));
    }

    let mut booked = 0;
    let mut unavailable = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => booked += 1,
            Err(AppError::SlotUnavailable(_)) => unavailable += 1,
            Err(e) => panic!("unexpected error: {}", e),
        }
    }

    assert_eq!(booked, 4);
    assert_eq!(unavailable, 8);
    assert_eq!(h.remaining("2025-06-10", pm).await, 0);
    let counts = h
        .repository
        .ledger
        .booked_counts(date("2025-06-10"), date("2025-06-10"))
        .await
        .unwrap();
    assert_eq!(counts.booked(date("2025-06-10"), pm), 4);
}

#[tokio::test]
async fn test_order_never_has_two_active_appointments() {
    let h = harness(vec![order(1, FulfillmentStatus::PendingInstallation, "2025-06-03")]);

    h.services
        .scheduling
        .schedule(1, &booking("2025-06-10", h.am()), &customer_of(1))
        .await
        .unwrap();
    let second = h
        .services
        .scheduling
        .schedule(1, &booking("2025-06-11", h.pm()), &customer_of(1))
        .await;

    match second {
        Err(AppError::OrderStateConflict { status, .. }) => assert_eq!(status, FulfillmentStatus::Scheduled),
        other => panic!("expected a state conflict, got {:?}", other.map(|a| a.id)),
    }
    assert_eq!(h.repository.appointments.list_for_order(1).await.unwrap().len(), 1);
    assert_eq!(h.remaining("2025-06-11", h.pm()).await, 4);
}

fn blackout(name: &str, on: &str, slot_ids: Option<Vec<i32>>, message: Option<&str>) -> CreateBlackout {
    CreateBlackout {
        name: name.into(),
        start_date: on.into(),
        end_date: None,
        slot_ids,
        message: message.map(str::to_string),
    }
}

#[tokio::test]
async fn test_full_day_blackout_hides_every_slot() {
    let h = harness(vec![order(1, FulfillmentStatus::PendingInstallation, "2025-06-03")]);
    h.services
        .schedules
        .create_blackout(&blackout("Inventory day", "2025-06-12", None, Some("Closed for inventory")))
        .await
        .unwrap();

    let days = h
        .services
        .availability
        .get_availability(date("2025-06-11"), date("2025-06-13"), Some(ZIP))
        .await
        .unwrap();
    assert_eq!(days.len(), 3);

    let blacked = &days[1];
    assert_eq!(blacked.date, date("2025-06-12"));
    assert!(blacked.is_blacked_out);
    assert!(!blacked.has_availability);
    assert!(blacked.slots.iter().all(|s| !s.is_available));
    assert_eq!(blacked.blackouts[0].message.as_deref(), Some("Closed for inventory"));
    assert!(days[0].has_availability && days[2].has_availability);

    let result = h
        .services
        .scheduling
        .schedule(1, &booking("2025-06-12", h.am()), &customer_of(1))
        .await;
    match result {
        Err(AppError::Validation(message)) => assert_eq!(message, "Closed for inventory"),
        other => panic!("expected a validation error, got {:?}", other.map(|a| a.id)),
    }
    assert_eq!(h.remaining("2025-06-12", h.am()).await, 4);
}

#[tokio::test]
async fn test_partial_blackout_removes_listed_slots_only() {
    let h = harness(Vec::new());
    let rule = h
        .services
        .schedules
        .create_blackout(&blackout("Team training", "2025-06-12", Some(vec![h.pm()]), None))
        .await
        .unwrap();
    assert_eq!(rule.end_date, date("2025-06-12"));

    let days = h
        .services
        .availability
        .get_availability(date("2025-06-12"), date("2025-06-12"), None)
        .await
        .unwrap();
    let ids: Vec<i32> = days[0].slots.iter().map(|s| s.slot.id).collect();
    assert!(!ids.contains(&h.pm()));
    assert!(ids.contains(&h.am()));
    assert!(!days[0].is_blacked_out);
    assert!(days[0].has_availability);

    // Unknown slots are rejected
    let invalid = h
        .services
        .schedules
        .create_blackout(&blackout("Typo", "2025-06-13", Some(vec![9999]), None))
        .await;
    assert!(matches!(invalid, Err(AppError::Validation(_))));

    h.services.schedules.delete_blackout(rule.id).await.unwrap();
    let days = h
        .services
        .availability
        .get_availability(date("2025-06-12"), date("2025-06-12"), None)
        .await
        .unwrap();
    assert!(days[0].slots.iter().any(|s| s.slot.id == h.pm()));
}

#[tokio::test]
async fn test_past_and_same_day_slots_are_not_offered() {
    let h = harness(vec![order(1, FulfillmentStatus::PendingInstallation, "2025-05-20")]);

    let days = h
        .services
        .availability
        .get_availability(date("2025-05-31"), date("2025-06-01"), None)
        .await
        .unwrap();
    assert_eq!(days.len(), 2);
    assert!(!days[0].has_availability);

    // 09:00 now, two hour cutoff: morning has started, afternoon is still open
    let today = &days[1];
    let offered = |slot_id: i32| today.slots.iter().find(|s| s.slot.id == slot_id).unwrap().is_available;
    assert!(!offered(h.am()));
    assert!(offered(h.pm()));

    let past = h
        .services
        .scheduling
        .schedule(1, &booking("2025-05-31", h.pm()), &customer_of(1))
        .await;
    assert!(matches!(past, Err(AppError::Validation(_))));

    let too_soon = h
        .services
        .scheduling
        .schedule(1, &booking("2025-06-01", h.am()), &customer_of(1))
        .await;
    assert!(matches!(too_soon, Err(AppError::Validation(_))));

    h.services
        .scheduling
        .schedule(1, &booking("2025-06-01", h.pm()), &customer_of(1))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_availability_is_capped_at_horizon_and_checks_zip() {
    let h = harness(Vec::new());

    let days = h
        .services
        .availability
        .get_availability(date("2025-06-02"), date("2025-09-30"), None)
        .await
        .unwrap();
    assert_eq!(days.len(), 30);

    let unserviced = h
        .services
        .availability
        .get_availability(date("2025-06-02"), date("2025-06-03"), Some("99999"))
        .await;
    assert!(matches!(unserviced, Err(AppError::Validation(_))));

    let reversed = h
        .services
        .availability
        .get_availability(date("2025-06-03"), date("2025-06-02"), None)
        .await;
    assert!(matches!(reversed, Err(AppError::Validation(_))));
}

#[tokio::test]
async fn test_reschedule_moves_capacity() {
    let h = harness(vec![order(1, FulfillmentStatus::PendingInstallation, "2025-06-03")]);

    let original = h
        .services
        .scheduling
        .schedule(1, &booking("2025-06-10", h.am()), &customer_of(1))
        .await
        .unwrap();

    let request = RescheduleAppointment {
        date: "2025-06-11".into(),
        slot_id: h.pm(),
    };
    let moved = h
        .services
        .scheduling
        .reschedule(original.id, &request, &customer_of(1))
        .await
        .unwrap();

    assert_eq!(moved.id, original.id);
    assert_eq!(moved.service_date, date("2025-06-11"));
    assert_eq!(moved.slot_id, h.pm());
    assert_ne!(moved.hold_token, original.hold_token);
    assert_eq!(h.remaining("2025-06-10", h.am()).await, 4);
    assert_eq!(h.remaining("2025-06-11", h.pm()).await, 3);
    assert_eq!(h.order_status(1).await, FulfillmentStatus::Scheduled);

    let history = h.services.scheduling.order_history(1, &admin()).await.unwrap();
    let last = history.last().unwrap();
    assert_eq!(last.kind, FulfillmentEventKind::Rescheduled);
    assert_eq!(last.old_date, Some(date("2025-06-10")));
    assert_eq!(last.new_slot_id, Some(h.pm()));

    // Same date and slot changes nothing
    let same = RescheduleAppointment {
        date: "2025-06-11".into(),
        slot_id: h.pm(),
    };
    let unchanged = h
        .services
        .scheduling
        .reschedule(original.id, &same, &customer_of(1))
        .await
        .unwrap();
    assert_eq!(unchanged.hold_token, moved.hold_token);
    assert_eq!(h.remaining("2025-06-11", h.pm()).await, 3);
}

#[tokio::test]
async fn test_visit_outcome_closes_appointment() {
    let h = harness(vec![
        order(1, FulfillmentStatus::PendingInstallation, "2025-06-03"),
        order(2, FulfillmentStatus::PendingInstallation, "2025-06-03"),
    ]);

    let done = h
        .services
        .scheduling
        .schedule(1, &booking("2025-06-10", h.am()), &customer_of(1))
        .await
        .unwrap();
    let missed = h
        .services
        .scheduling
        .schedule(2, &booking("2025-06-10", h.am()), &customer_of(2))
        .await
        .unwrap();

    let by_customer = h
        .services
        .scheduling
        .record_visit(done.id, VisitOutcome::Completed, None, &customer_of(1))
        .await;
    assert!(matches!(by_customer, Err(AppError::Authorization(_))));

    let completed = h
        .services
        .scheduling
        .record_visit(done.id, VisitOutcome::Completed, Some("Blinds fitted"), &installer())
        .await
        .unwrap();
    assert_eq!(completed.status, AppointmentStatus::Completed);
    assert_eq!(h.order_status(1).await, FulfillmentStatus::Installed);

    h.services
        .scheduling
        .record_visit(missed.id, VisitOutcome::NoShow, None, &installer())
        .await
        .unwrap();
    assert_eq!(h.order_status(2).await, FulfillmentStatus::PendingInstallation);

    // Visits that took place keep their capacity
    assert_eq!(h.remaining("2025-06-10", h.am()).await, 2);

    let cancel_completed = h
        .services
        .scheduling
        .cancel(done.id, None, &admin())
        .await;
    assert!(matches!(cancel_completed, Err(AppError::OrderStateConflict { .. })));
}

#[tokio::test]
async fn test_callers_are_limited_to_their_orders() {
    let mut outside = order(2, FulfillmentStatus::PendingInstallation, "2025-06-03");
    outside.service_zip_code = "10001".into();
    let h = harness(vec![order(1, FulfillmentStatus::PendingInstallation, "2025-06-03"), outside]);

    let stranger = h
        .services
        .scheduling
        .schedule(1, &booking("2025-06-10", h.am()), &customer_of(2))
        .await;
    assert!(matches!(stranger, Err(AppError::Authorization(_))));

    let out_of_area = h
        .services
        .scheduling
        .mark_diy(2, None, &installer())
        .await;
    assert!(matches!(out_of_area, Err(AppError::Authorization(_))));

    h.services
        .scheduling
        .schedule(2, &booking("2025-06-10", h.am()), &admin())
        .await
        .unwrap();
    assert_eq!(h.remaining("2025-06-10", h.am()).await, 3);
}

#[tokio::test]
async fn test_pending_orders_follow_filter_and_search() {
    let mut outside = order(3, FulfillmentStatus::PendingInstallation, "2025-06-01");
    outside.service_zip_code = "10001".into();
    let h = harness(vec![
        order(1, FulfillmentStatus::Shipped, "2025-05-28"),
        order(2, FulfillmentStatus::Diy, "2025-05-29"),
        outside,
        order(4, FulfillmentStatus::PendingInstallation, "2025-06-20"),
    ]);

    let pending = h
        .services
        .installer
        .pending_orders(INSTALLER_ID, PendingFilter::Pending, None)
        .await
        .unwrap();
    assert_eq!(pending.service_zip_codes, vec![ZIP.to_string()]);
    let ids: Vec<i32> = pending.orders.iter().map(|p| p.order.id).collect();
    assert_eq!(ids, vec![1]);

    let all = h
        .services
        .installer
        .pending_orders(INSTALLER_ID, PendingFilter::All, None)
        .await
        .unwrap();
    assert_eq!(all.orders.len(), 2);

    let searched = h
        .services
        .installer
        .pending_orders(INSTALLER_ID, PendingFilter::All, Some("wo-00002"))
        .await
        .unwrap();
    assert_eq!(searched.orders.len(), 1);
    assert_eq!(searched.orders[0].order.status, FulfillmentStatus::Diy);
}

#[tokio::test]
async fn test_sweep_releases_orphaned_hold() {
    let h = harness(vec![order(1, FulfillmentStatus::PendingInstallation, "2025-06-03")]);

    // A hold taken by a request that died before writing its appointment
    h.repository
        .ledger
        .try_reserve(date("2025-06-10"), h.pm())
        .await
        .unwrap();
    h.services
        .scheduling
        .schedule(1, &booking("2025-06-10", h.pm()), &customer_of(1))
        .await
        .unwrap();
    assert_eq!(h.remaining("2025-06-10", h.pm()).await, 2);

    // Too recent to be declared orphaned
    let report = h.services.reconciliation.sweep().await.unwrap();
    assert_eq!(report.released, 0);
    assert_eq!(h.remaining("2025-06-10", h.pm()).await, 2);

    let later: Arc<dyn Clock> = Arc::new(FixedClock(now() + Duration::minutes(10)));
    let sweeper = ReconciliationService::new(h.repository.clone(), later, config());
    let report = sweeper.sweep().await.unwrap();
    assert_eq!(report.released, 1);
    assert_eq!(h.remaining("2025-06-10", h.pm()).await, 3);

    // The live appointment keeps its capacity
    let report = sweeper.sweep().await.unwrap();
    assert_eq!(report.released, 0);
    assert_eq!(h.remaining("2025-06-10", h.pm()).await, 3);
}

#[tokio::test]
async fn test_booked_counts_stay_within_capacity() {
    let orders: Vec<_> = (1..=6)
        .map(|id| order(id, FulfillmentStatus::PendingInstallation, "2025-06-03"))
        .collect();
    let h = harness(orders);
    let eve = h.defaults[2].clone();

    let mut appointments = Vec::new();
    for id in 1..=6 {
        if let Ok(appointment) = h
            .services
            .scheduling
            .schedule(id, &booking("2025-06-10", eve.id), &customer_of(id))
            .await
        {
            appointments.push(appointment);
        }
    }
    assert_eq!(appointments.len() as i32, eve.total_capacity);

    for appointment in &appointments {
        h.services
            .scheduling
            .cancel(appointment.id, None, &admin())
            .await
            .unwrap();
        h.services
            .scheduling
            .cancel(appointment.id, None, &admin())
            .await
            .unwrap();
        let remaining = h.remaining("2025-06-10", eve.id).await;
        assert!((0..=eve.total_capacity).contains(&remaining));
    }
    assert_eq!(h.remaining("2025-06-10", eve.id).await, eve.total_capacity);

    let report = h.services.reconciliation.sweep().await.unwrap();
    assert_eq!(report.resynced, 0);
}

// ---- Slot calendar rules ----

#[tokio::test]
async fn test_slot_weekdays_and_booking_window() {
    let h = harness(vec![
        order(1, FulfillmentStatus::PendingInstallation, "2025-05-30"),
    ]);
    let weekday_slot: CreateTimeSlot = serde_json::from_value(serde_json::json!({
        "name": "Weekday late morning",
        "code": "WKD",
        "start_time": "10:00",
        "end_time": "12:00",
        "total_capacity": 2,
        "available_days": [5, 1, 2, 3, 4, 1],
        "min_lead_days": 2,
        "max_advance_days": 14
    }))
    .unwrap();
    let slot = h.services.schedules.create_slot(&weekday_slot).await.unwrap();
    assert_eq!(slot.available_days, vec![1, 2, 3, 4, 5]);

    // Today is Sunday 2025-06-01
    let days = h
        .services
        .availability
        .get_availability(date("2025-06-01"), date("2025-06-16"), None)
        .await
        .unwrap();
    let offered = |on: &str| {
        days.iter()
            .find(|day| day.date == date(on))
            .unwrap()
            .slots
            .iter()
            .any(|s| s.slot.id == slot.id)
    };
    assert!(!offered("2025-06-02"));
    assert!(offered("2025-06-03"));
    assert!(!offered("2025-06-07"));
    assert!(!offered("2025-06-08"));
    assert!(offered("2025-06-13"));
    assert!(!offered("2025-06-16"));

    for (on, reason) in [
        ("2025-06-02", "at least 2 days"),
        ("2025-06-08", "Sunday"),
        ("2025-06-16", "more than 14 days"),
    ] {
        match h.services.scheduling.schedule(1, &booking(on, slot.id), &customer_of(1)).await {
            Err(AppError::Validation(message)) => assert!(message.contains(reason), "{}", message),
            other => panic!("expected a validation error for {}, got {:?}", on, other.map(|a| a.id)),
        }
    }
    assert_eq!(h.remaining("2025-06-02", slot.id).await, 2);

    h.services
        .scheduling
        .schedule(1, &booking("2025-06-03", slot.id), &customer_of(1))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_slot_calendar_rules_are_validated() {
    let h = harness(Vec::new());
    let create = |rules: serde_json::Value| -> CreateTimeSlot {
        let mut body = serde_json::json!({
            "name": "Midday",
            "code": "MID",
            "start_time": "11:00",
            "end_time": "13:00",
            "total_capacity": 2
        });
        if let (Some(body), Some(rules)) = (body.as_object_mut(), rules.as_object()) {
            body.extend(rules.clone());
        }
        serde_json::from_value(body).unwrap()
    };

    for rules in [
        serde_json::json!({ "available_days": [7] }),
        serde_json::json!({ "available_days": [] }),
        serde_json::json!({ "min_lead_days": 10, "max_advance_days": 5 }),
        serde_json::json!({ "min_lead_days": -1 }),
    ] {
        let result = h.services.schedules.create_slot(&create(rules.clone())).await;
        assert!(matches!(result, Err(AppError::Validation(_))), "{}", rules);
    }

    let slot = h.services.schedules.create_slot(&create(serde_json::json!({}))).await.unwrap();
    assert_eq!(slot.available_days, all_weekdays());
    assert_eq!(slot.min_lead_days, 0);
    assert_eq!(slot.max_advance_days, 60);
}

#[tokio::test]
async fn test_capacity_cannot_drop_below_existing_bookings() {
    let orders: Vec<_> = (1..=3)
        .map(|id| order(id, FulfillmentStatus::PendingInstallation, "2025-06-03"))
        .collect();
    let h = harness(orders);
    for id in 1..=3 {
        h.services
            .scheduling
            .schedule(id, &booking("2025-06-10", h.am()), &customer_of(id))
            .await
            .unwrap();
    }

    let shrink: UpdateTimeSlot = serde_json::from_value(serde_json::json!({ "total_capacity": 1 })).unwrap();
    match h.services.schedules.update_slot(h.am(), &shrink).await {
        Err(AppError::Validation(message)) => assert!(message.contains("2025-06-10"), "{}", message),
        other => panic!("expected a validation error, got {:?}", other.map(|s| s.total_capacity)),
    }
    let slot = h.repository.catalog.get_slot(h.am()).await.unwrap();
    assert_eq!(slot.total_capacity, 4);
    assert_eq!(h.remaining("2025-06-10", h.am()).await, 1);

    let exact: UpdateTimeSlot = serde_json::from_value(serde_json::json!({ "total_capacity": 3 })).unwrap();
    let slot = h.services.schedules.update_slot(h.am(), &exact).await.unwrap();
    assert_eq!(slot.total_capacity, 3);
    assert_eq!(h.remaining("2025-06-10", h.am()).await, 0);

    // Other slots are unaffected by the AM bookings
    let pm = h.services.schedules.update_slot(h.pm(), &shrink).await.unwrap();
    assert_eq!(pm.total_capacity, 1);
}

#[tokio::test]
async fn test_availability_near_the_end_of_the_calendar() {
    let h = harness(Vec::new());
    let last = NaiveDate::MAX;
    let days = h
        .services
        .availability
        .get_availability(last.pred_opt().unwrap(), last, None)
        .await
        .unwrap();
    assert_eq!(days.len(), 2);
    assert!(days.iter().all(|day| !day.has_availability));
}

// ---- Failed writes ----

/// Appointment store whose writes fail after the ledger has been touched
struct FailingWrites {
    inner: Arc<dyn AppointmentsRepository>,
    fail_create: bool,
    fail_move: bool,
}

fn write_failure() -> AppError {
    AppError::Internal("appointment write failed".to_string())
}

#[async_trait]
impl AppointmentsRepository for FailingWrites {
    async fn get(&self, id: i32) -> AppResult<Appointment> {
        self.inner.get(id).await
    }

    async fn find_active_for_order(&self, order_id: i32) -> AppResult<Option<Appointment>> {
        self.inner.find_active_for_order(order_id).await
    }

    async fn list_for_order(&self, order_id: i32) -> AppResult<Vec<Appointment>> {
        self.inner.list_for_order(order_id).await
    }

    async fn create(
        &self,
        draft: &AppointmentDraft,
        reservation: &Reservation,
        expected: FulfillmentStatus,
        actor: &Actor,
    ) -> AppResult<Appointment> {
        if self.fail_create {
            return Err(write_failure());
        }
        self.inner.create(draft, reservation, expected, actor).await
    }

    async fn move_to(
        &self,
        appointment: &Appointment,
        reservation: &Reservation,
        specific_time: Option<NaiveTime>,
        actor: &Actor,
    ) -> AppResult<Appointment> {
        if self.fail_move {
            return Err(write_failure());
        }
        self.inner.move_to(appointment, reservation, specific_time, actor).await
    }

    async fn close(
        &self,
        appointment_id: i32,
        status: AppointmentStatus,
        order_status: FulfillmentStatus,
        reason: Option<&str>,
        actor: &Actor,
    ) -> AppResult<Option<Appointment>> {
        self.inner.close(appointment_id, status, order_status, reason, actor).await
    }
}

/// Ledger whose releases keep timing out
struct StuckReleases {
    inner: Arc<dyn BookingLedger>,
}

#[async_trait]
impl BookingLedger for StuckReleases {
    async fn try_reserve(&self, date: NaiveDate, slot_id: i32) -> AppResult<Reservation> {
        self.inner.try_reserve(date, slot_id).await
    }

    async fn release(&self, _reservation: &Reservation) -> AppResult<bool> {
        Err(AppError::Database(sqlx::Error::PoolTimedOut))
    }

    async fn peek(&self, date: NaiveDate, slot_id: i32) -> AppResult<i32> {
        self.inner.peek(date, slot_id).await
    }

    async fn booked_counts(&self, from: NaiveDate, to: NaiveDate) -> AppResult<CapacitySnapshot> {
        self.inner.booked_counts(from, to).await
    }

    async fn orphaned_reservations(&self, stale_before: DateTime<Utc>) -> AppResult<Vec<Reservation>> {
        self.inner.orphaned_reservations(stale_before).await
    }

    async fn resync_counters(&self) -> AppResult<u64> {
        self.inner.resync_counters().await
    }
}

fn failing_writes(fail_create: bool, fail_move: bool) -> impl FnOnce(Repository) -> Repository {
    move |repository| Repository {
        appointments: Arc::new(FailingWrites {
            inner: repository.appointments.clone(),
            fail_create,
            fail_move,
        }),
        ..repository
    }
}

#[tokio::test]
async fn test_failed_booking_write_gives_reservation_back() {
    let h = harness_with(
        vec![order(1, FulfillmentStatus::PendingInstallation, "2025-06-03")],
        failing_writes(true, false),
    );

    let result = h
        .services
        .scheduling
        .schedule(1, &booking("2025-06-10", h.am()), &customer_of(1))
        .await;
    assert!(matches!(result, Err(AppError::Internal(_))));

    assert_eq!(h.remaining("2025-06-10", h.am()).await, 4);
    assert_eq!(h.order_status(1).await, FulfillmentStatus::PendingInstallation);
    assert!(h.repository.appointments.list_for_order(1).await.unwrap().is_empty());
    let leftovers = h
        .repository
        .ledger
        .orphaned_reservations(now() + Duration::days(1))
        .await
        .unwrap();
    assert!(leftovers.is_empty());
}

#[tokio::test]
async fn test_failed_reschedule_write_keeps_old_booking_and_frees_new_slot() {
    let h = harness_with(
        vec![order(1, FulfillmentStatus::PendingInstallation, "2025-06-03")],
        failing_writes(false, true),
    );

    let booked = h
        .services
        .scheduling
        .schedule(1, &booking("2025-06-10", h.am()), &customer_of(1))
        .await
        .unwrap();

    let request = RescheduleAppointment {
        date: "2025-06-11".into(),
        slot_id: h.pm(),
    };
    let result = h
        .services
        .scheduling
        .reschedule(booked.id, &request, &customer_of(1))
        .await;
    assert!(matches!(result, Err(AppError::Internal(_))));

    let current = h.repository.appointments.get(booked.id).await.unwrap();
    assert_eq!(current.service_date, date("2025-06-10"));
    assert_eq!(current.slot_id, h.am());
    assert_eq!(current.status, AppointmentStatus::Scheduled);
    assert_eq!(current.hold_token, booked.hold_token);
    assert_eq!(h.remaining("2025-06-10", h.am()).await, 3);
    assert_eq!(h.remaining("2025-06-11", h.pm()).await, 4);
    assert_eq!(h.order_status(1).await, FulfillmentStatus::Scheduled);
}

#[tokio::test]
async fn test_failed_rollback_is_reported_and_swept() {
    let h = harness_with(
        vec![order(1, FulfillmentStatus::PendingInstallation, "2025-06-03")],
        |repository| {
            let repository = failing_writes(true, false)(repository);
            Repository {
                ledger: Arc::new(StuckReleases {
                    inner: repository.ledger.clone(),
                }),
                ..repository
            }
        },
    );

    let result = h
        .services
        .scheduling
        .schedule(1, &booking("2025-06-10", h.am()), &customer_of(1))
        .await;
    assert!(matches!(result, Err(AppError::ReservationRollback(_))));

    // The hold outlives the failed request
    assert_eq!(h.remaining("2025-06-10", h.am()).await, 3);
    assert_eq!(h.order_status(1).await, FulfillmentStatus::PendingInstallation);

    let later: Arc<dyn Clock> = Arc::new(FixedClock(now() + Duration::minutes(10)));
    let report = ReconciliationService::new(h.repository.clone(), later, config())
        .sweep()
        .await
        .unwrap();
    assert_eq!(report.released, 1);
    assert_eq!(h.remaining("2025-06-10", h.am()).await, 4);
}
