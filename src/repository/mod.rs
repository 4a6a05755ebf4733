//! Repository layer
//!
//! Each concern is a trait so the services run unchanged against PostgreSQL or
//! the in-memory store.

pub mod appointments;
pub mod ledger;
pub mod memory;
pub mod orders;
pub mod schedules;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use sqlx::{Pool, Postgres};

use crate::{
    error::{AppError, AppResult},
    models::{
        appointment::{Appointment, AppointmentDraft, AppointmentStatus},
        ledger::{CapacitySnapshot, Reservation},
        order::{
            FulfillmentEvent, FulfillmentEventKind, FulfillmentOrder, FulfillmentStatus,
            NewFulfillmentEvent, PendingFilter, PendingOrder,
        },
        schedule::{BlackoutDraft, BlackoutRule, TimeSlotDraft, TimeSlotTemplate},
        user::Actor,
    },
};

/// Slot templates and blackout rules (read-mostly reference data)
#[async_trait]
pub trait CatalogRepository: Send + Sync {
    async fn list_slots(&self, include_inactive: bool) -> AppResult<Vec<TimeSlotTemplate>>;
    async fn get_slot(&self, id: i32) -> AppResult<TimeSlotTemplate>;
    async fn create_slot(&self, draft: &TimeSlotDraft) -> AppResult<TimeSlotTemplate>;

    /// Rewrites a template. Fails with a validation error, leaving the template
    /// unchanged, if some date on or after `booked_from` already has more
    /// bookings than the new capacity.
    async fn update_slot(
        &self,
        id: i32,
        draft: &TimeSlotDraft,
        booked_from: NaiveDate,
    ) -> AppResult<TimeSlotTemplate>;

    /// Rules overlapping the given range
    async fn list_blackouts(
        &self,
        start_date: Option<NaiveDate>,
        end_date: Option<NaiveDate>,
    ) -> AppResult<Vec<BlackoutRule>>;
    async fn create_blackout(&self, draft: &BlackoutDraft) -> AppResult<BlackoutRule>;
    async fn delete_blackout(&self, id: i32) -> AppResult<()>;
}

/// Authoritative slot capacity consumption.
///
/// The only component allowed to change `booked_count`. Every unit of consumed
/// capacity is a [`Reservation`] whose token is released at most once.
#[async_trait]
pub trait BookingLedger: Send + Sync {
    /// Atomically takes one unit of capacity, failing with `SlotUnavailable`
    /// when `booked_count` has reached the slot's capacity
    async fn try_reserve(&self, date: NaiveDate, slot_id: i32) -> AppResult<Reservation>;

    /// Gives the unit back. Returns false if the token was already released.
    async fn release(&self, reservation: &Reservation) -> AppResult<bool>;

    /// Remaining capacity, never negative
    async fn peek(&self, date: NaiveDate, slot_id: i32) -> AppResult<i32>;

    /// Booked counts for availability listings
    async fn booked_counts(&self, from: NaiveDate, to: NaiveDate) -> AppResult<CapacitySnapshot>;

    /// Holds no live appointment accounts for: unattached and created before
    /// `stale_before`, attached to a cancelled appointment, or superseded by a
    /// reschedule
    async fn orphaned_reservations(&self, stale_before: DateTime<Utc>) -> AppResult<Vec<Reservation>>;

    /// Sets every counter to its number of live holds, returns counters changed
    async fn resync_counters(&self) -> AppResult<u64>;
}

/// Durable appointment records.
///
/// Mutations write the appointment, the order status and the history entry
/// as one unit.
#[async_trait]
pub trait AppointmentsRepository: Send + Sync {
    async fn get(&self, id: i32) -> AppResult<Appointment>;
    async fn find_active_for_order(&self, order_id: i32) -> AppResult<Option<Appointment>>;
    async fn list_for_order(&self, order_id: i32) -> AppResult<Vec<Appointment>>;

    /// Inserts the appointment and attaches `reservation` to it. Fails with an
    /// order state conflict if the order left `expected` or already has an
    /// active appointment.
    async fn create(
        &self,
        draft: &AppointmentDraft,
        reservation: &Reservation,
        expected: FulfillmentStatus,
        actor: &Actor,
    ) -> AppResult<Appointment>;

    /// Points a scheduled appointment at `reservation`'s (date, slot) and sets its
    /// requested time. Fails with a conflict if the appointment changed since it
    /// was read.
    async fn move_to(
        &self,
        appointment: &Appointment,
        reservation: &Reservation,
        specific_time: Option<NaiveTime>,
        actor: &Actor,
    ) -> AppResult<Appointment>;

    /// Ends a scheduled appointment and moves its order to `order_status`.
    /// Returns `None` when the appointment was no longer scheduled.
    async fn close(
        &self,
        appointment_id: i32,
        status: AppointmentStatus,
        order_status: FulfillmentStatus,
        reason: Option<&str>,
        actor: &Actor,
    ) -> AppResult<Option<Appointment>>;
}

/// Orders as seen by the scheduling core
#[async_trait]
pub trait OrdersRepository: Send + Sync {
    async fn get(&self, id: i32) -> AppResult<FulfillmentOrder>;

    /// Compare-and-set of the order status, recording `event`
    async fn transition(
        &self,
        id: i32,
        from: FulfillmentStatus,
        to: FulfillmentStatus,
        event: NewFulfillmentEvent,
        actor: &Actor,
    ) -> AppResult<FulfillmentOrder>;

    async fn history(&self, order_id: i32) -> AppResult<Vec<FulfillmentEvent>>;

    async fn installer_zip_codes(&self, installer_id: i32) -> AppResult<Vec<String>>;
    async fn is_zip_serviced(&self, zip: &str) -> AppResult<bool>;

    /// Orders in `zip_codes` ready on or before `ready_by`, oldest first
    async fn list_pending(
        &self,
        zip_codes: &[String],
        filter: PendingFilter,
        search: Option<&str>,
        ready_by: NaiveDate,
    ) -> AppResult<Vec<PendingOrder>>;
}

pub(crate) fn capacity_below_bookings(date: NaiveDate, booked: i32, capacity: i32) -> AppError {
    AppError::Validation(format!(
        "{} appointments are already booked on {}, capacity cannot be lowered to {}",
        booked, date, capacity
    ))
}

/// History entry recorded when an appointment ends in `status`
pub(crate) fn closing_event_kind(status: AppointmentStatus) -> AppResult<FulfillmentEventKind> {
    match status {
        AppointmentStatus::Cancelled => Ok(FulfillmentEventKind::Cancelled),
        AppointmentStatus::Completed => Ok(FulfillmentEventKind::Installed),
        AppointmentStatus::NoShow => Ok(FulfillmentEventKind::NoShow),
        AppointmentStatus::Scheduled => Err(AppError::Internal(
            "An appointment cannot be closed as scheduled".to_string(),
        )),
    }
}

/// Main repository struct holding one implementation per concern
#[derive(Clone)]
pub struct Repository {
    pub catalog: Arc<dyn CatalogRepository>,
    pub ledger: Arc<dyn BookingLedger>,
    pub appointments: Arc<dyn AppointmentsRepository>,
    pub orders: Arc<dyn OrdersRepository>,
}

impl Repository {
    /// Create a PostgreSQL-backed repository with the given database pool
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self {
            catalog: Arc::new(schedules::PgCatalogRepository::new(pool.clone())),
            ledger: Arc::new(ledger::PgBookingLedger::new(pool.clone())),
            appointments: Arc::new(appointments::PgAppointmentsRepository::new(pool.clone())),
            orders: Arc::new(orders::PgOrdersRepository::new(pool)),
        }
    }

    /// Create a repository over one shared in-memory store
    pub fn in_memory(store: memory::MemoryStore) -> Self {
        let store = Arc::new(store);
        Self {
            catalog: store.clone(),
            ledger: store.clone(),
            appointments: store.clone(),
            orders: store,
        }
    }
}
