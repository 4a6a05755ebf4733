//! In-memory repository
//!
//! One mutex guards the whole state, so every trait method is atomic with
//! respect to every other. Used by the test suite and by `database.backend =
//! "memory"` for local runs.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    sync::{Arc, Mutex, MutexGuard},
};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use super::{
    capacity_below_bookings, closing_event_kind, AppointmentsRepository, BookingLedger,
    CatalogRepository, OrdersRepository,
};
use crate::{
    clock::{Clock, SystemClock},
    error::{AppError, AppResult},
    models::{
        appointment::{Appointment, AppointmentDraft, AppointmentStatus},
        ledger::{CapacitySnapshot, Reservation},
        order::{
            FulfillmentEvent, FulfillmentEventKind, FulfillmentOrder, FulfillmentStatus,
            NewFulfillmentEvent, PendingFilter, PendingOrder,
        },
        schedule::{
            all_weekdays, BlackoutDraft, BlackoutRule, TimeSlotDraft, TimeSlotTemplate,
            DEFAULT_MAX_ADVANCE_DAYS,
        },
        user::Actor,
    },
};

#[derive(Default)]
struct State {
    slots: BTreeMap<i32, TimeSlotTemplate>,
    blackouts: BTreeMap<i32, BlackoutRule>,
    orders: BTreeMap<i32, FulfillmentOrder>,
    installer_zips: BTreeMap<i32, BTreeSet<String>>,
    appointments: BTreeMap<i32, Appointment>,
    holds: HashMap<Uuid, Reservation>,
    counters: HashMap<(NaiveDate, i32), i32>,
    events: Vec<FulfillmentEvent>,
    last_id: i64,
}

impl State {
    fn next_id(&mut self) -> i64 {
        self.last_id += 1;
        self.last_id
    }

    fn next_i32(&mut self) -> AppResult<i32> {
        i32::try_from(self.next_id()).map_err(|_| AppError::Internal("Identifier overflow".to_string()))
    }

    fn order_conflict(&self, order_id: i32, message: &str) -> AppError {
        match self.orders.get(&order_id) {
            Some(order) => AppError::state_conflict(order_id, order.status, message),
            None => AppError::NotFound(format!("Order {} not found", order_id)),
        }
    }

    fn push_event(&mut self, event: NewFulfillmentEvent, actor: &Actor, now: DateTime<Utc>) {
        let id = self.next_id();
        self.events.push(FulfillmentEvent {
            id,
            order_id: event.order_id,
            appointment_id: event.appointment_id,
            kind: event.kind,
            old_date: event.old_date,
            old_slot_id: event.old_slot_id,
            new_date: event.new_date,
            new_slot_id: event.new_slot_id,
            reason: event.reason,
            actor_role: actor.role.as_str().to_string(),
            actor_id: actor.id,
            created_at: now,
        });
    }
}

/// Name, code, (start hour, end hour), capacity, signature, specific time, display order
type Window<'a> = (&'a str, &'a str, (u32, u32), i32, bool, bool, i16);

fn default_window(window: Window<'_>) -> TimeSlotDraft {
    let (name, code, (start, end), capacity, signature, specific, order) = window;
    TimeSlotDraft {
        name: name.to_string(),
        code: code.to_string(),
        start_time: NaiveTime::from_hms_opt(start, 0, 0).unwrap_or(NaiveTime::MIN),
        end_time: NaiveTime::from_hms_opt(end, 0, 0).unwrap_or(NaiveTime::MIN),
        total_capacity: capacity,
        additional_fee: Decimal::ZERO,
        requires_signature: signature,
        allows_specific_time: specific,
        available_days: all_weekdays(),
        min_lead_days: 0,
        max_advance_days: DEFAULT_MAX_ADVANCE_DAYS,
        is_active: true,
        display_order: order,
    }
}

pub struct MemoryStore {
    state: Mutex<State>,
    clock: Arc<dyn Clock>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Store whose timestamps come from `clock`
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(State::default()),
            clock,
        }
    }

    fn lock(&self) -> AppResult<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| AppError::Internal("In-memory store lock poisoned".to_string()))
    }

    // ---- Seeding ----

    pub fn insert_slot(&self, draft: &TimeSlotDraft) -> AppResult<TimeSlotTemplate> {
        let now = self.clock.now();
        let mut state = self.lock()?;
        if state.slots.values().any(|s| s.code == draft.code) {
            return Err(AppError::Validation(format!("Slot code '{}' already exists", draft.code)));
        }
        let id = state.next_i32()?;
        let slot = TimeSlotTemplate {
            id,
            name: draft.name.clone(),
            code: draft.code.clone(),
            start_time: draft.start_time,
            end_time: draft.end_time,
            total_capacity: draft.total_capacity,
            additional_fee: draft.additional_fee,
            requires_signature: draft.requires_signature,
            allows_specific_time: draft.allows_specific_time,
            available_days: draft.available_days.clone(),
            min_lead_days: draft.min_lead_days,
            max_advance_days: draft.max_advance_days,
            is_active: draft.is_active,
            display_order: draft.display_order,
            created_at: Some(now),
            updated_at: None,
        };
        state.slots.insert(id, slot.clone());
        Ok(slot)
    }

    /// Morning, afternoon and evening windows, as seeded by the initial migration
    pub fn seed_default_slots(&self) -> AppResult<Vec<TimeSlotTemplate>> {
        [
            ("Morning 8am-12pm", "AM", (8, 12), 4, false, true, 1),
            ("Afternoon 12pm-4pm", "PM", (12, 16), 4, false, true, 2),
            ("Evening 4pm-7pm", "EVE", (16, 19), 2, true, false, 3),
        ]
        .into_iter()
        .map(|window| self.insert_slot(&default_window(window)))
        .collect()
    }

    pub fn insert_blackout(&self, draft: &BlackoutDraft) -> AppResult<BlackoutRule> {
        let now = self.clock.now();
        let mut state = self.lock()?;
        let id = state.next_i32()?;
        let rule = BlackoutRule {
            id,
            name: draft.name.clone(),
            start_date: draft.start_date,
            end_date: draft.end_date,
            slot_ids: draft.slot_ids.clone(),
            message: draft.message.clone(),
            created_at: Some(now),
        };
        state.blackouts.insert(id, rule.clone());
        Ok(rule)
    }

    /// Adds or replaces an order, keeping its ID
    pub fn insert_order(&self, order: FulfillmentOrder) -> AppResult<()> {
        let mut state = self.lock()?;
        state.last_id = state.last_id.max(i64::from(order.id));
        state.orders.insert(order.id, order);
        Ok(())
    }

    pub fn assign_zip(&self, installer_id: i32, zip_code: &str) -> AppResult<()> {
        let mut state = self.lock()?;
        state
            .installer_zips
            .entry(installer_id)
            .or_default()
            .insert(zip_code.to_string());
        Ok(())
    }
}

#[async_trait]
impl CatalogRepository for MemoryStore {
    async fn list_slots(&self, include_inactive: bool) -> AppResult<Vec<TimeSlotTemplate>> {
        let state = self.lock()?;
        let mut slots: Vec<TimeSlotTemplate> = state
            .slots
            .values()
            .filter(|s| include_inactive || s.is_active)
            .cloned()
            .collect();
        slots.sort_by_key(|s| (s.display_order, s.start_time));
        Ok(slots)
    }

    async fn get_slot(&self, id: i32) -> AppResult<TimeSlotTemplate> {
        self.lock()?
            .slots
            .get(&id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("Time slot {} not found", id)))
    }

    async fn create_slot(&self, draft: &TimeSlotDraft) -> AppResult<TimeSlotTemplate> {
        self.insert_slot(draft)
    }

    async fn update_slot(
        &self,
        id: i32,
        draft: &TimeSlotDraft,
        booked_from: NaiveDate,
    ) -> AppResult<TimeSlotTemplate> {
        let now = self.clock.now();
        let mut state = self.lock()?;
        if state.slots.values().any(|s| s.id != id && s.code == draft.code) {
            return Err(AppError::Validation(format!("Slot code '{}' already exists", draft.code)));
        }
        let busiest = state
            .counters
            .iter()
            .filter(|((date, slot_id), booked)| {
                *slot_id == id && *date >= booked_from && **booked > draft.total_capacity
            })
            .map(|((date, _), booked)| (*booked, *date))
            .max_by_key(|(booked, date)| (*booked, std::cmp::Reverse(*date)));
        if let Some((booked, date)) = busiest {
            return Err(capacity_below_bookings(date, booked, draft.total_capacity));
        }
        let slot = state
            .slots
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("Time slot {} not found", id)))?;
        slot.name = draft.name.clone();
        slot.code = draft.code.clone();
        slot.start_time = draft.start_time;
        slot.end_time = draft.end_time;
        slot.total_capacity = draft.total_capacity;
        slot.additional_fee = draft.additional_fee;
        slot.requires_signature = draft.requires_signature;
        slot.allows_specific_time = draft.allows_specific_time;
        slot.available_days = draft.available_days.clone();
        slot.min_lead_days = draft.min_lead_days;
        slot.max_advance_days = draft.max_advance_days;
        slot.is_active = draft.is_active;
        slot.display_order = draft.display_order;
        slot.updated_at = Some(now);
        Ok(slot.clone())
    }

    async fn list_blackouts(
        &self,
        start_date: Option<NaiveDate>,
        end_date: Option<NaiveDate>,
    ) -> AppResult<Vec<BlackoutRule>> {
        let state = self.lock()?;
        let mut rules: Vec<BlackoutRule> = state
            .blackouts
            .values()
            .filter(|b| start_date.map_or(true, |d| b.end_date >= d))
            .filter(|b| end_date.map_or(true, |d| b.start_date <= d))
            .cloned()
            .collect();
        rules.sort_by_key(|b| (b.start_date, b.id));
        Ok(rules)
    }

    async fn create_blackout(&self, draft: &BlackoutDraft) -> AppResult<BlackoutRule> {
        self.insert_blackout(draft)
    }

    async fn delete_blackout(&self, id: i32) -> AppResult<()> {
        self.lock()?
            .blackouts
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| AppError::NotFound(format!("Blackout {} not found", id)))
    }
}

#[async_trait]
impl BookingLedger for MemoryStore {
    async fn try_reserve(&self, date: NaiveDate, slot_id: i32) -> AppResult<Reservation> {
        let now = self.clock.now();
        let mut state = self.lock()?;

        let slot = state
            .slots
            .get(&slot_id)
            .filter(|s| s.is_active)
            .ok_or_else(|| AppError::NotFound(format!("Time slot {} not found", slot_id)))?;
        let (capacity, name) = (slot.total_capacity, slot.name.clone());

        let booked = state.counters.entry((date, slot_id)).or_insert(0);
        if *booked >= capacity {
            return Err(AppError::SlotUnavailable(format!(
                "{} on {} is fully booked, please pick another slot",
                name, date
            )));
        }
        *booked += 1;

        let reservation = Reservation {
            token: Uuid::new_v4(),
            service_date: date,
            slot_id,
            created_at: now,
        };
        state.holds.insert(reservation.token, reservation.clone());
        Ok(reservation)
    }

    async fn release(&self, reservation: &Reservation) -> AppResult<bool> {
        let mut state = self.lock()?;
        let Some(held) = state.holds.remove(&reservation.token) else {
            return Ok(false);
        };
        if let Some(booked) = state.counters.get_mut(&(held.service_date, held.slot_id)) {
            *booked = (*booked - 1).max(0);
        }
        Ok(true)
    }

    async fn peek(&self, date: NaiveDate, slot_id: i32) -> AppResult<i32> {
        let state = self.lock()?;
        let slot = state
            .slots
            .get(&slot_id)
            .ok_or_else(|| AppError::NotFound(format!("Time slot {} not found", slot_id)))?;
        let booked = state.counters.get(&(date, slot_id)).copied().unwrap_or(0);
        Ok((slot.total_capacity - booked).max(0))
    }

    async fn booked_counts(&self, from: NaiveDate, to: NaiveDate) -> AppResult<CapacitySnapshot> {
        let state = self.lock()?;
        Ok(state
            .counters
            .iter()
            .filter(|((date, _), _)| *date >= from && *date <= to)
            .map(|((date, slot_id), booked)| (*date, *slot_id, *booked))
            .collect())
    }

    async fn orphaned_reservations(&self, stale_before: DateTime<Utc>) -> AppResult<Vec<Reservation>> {
        let state = self.lock()?;
        let mut orphans: Vec<Reservation> = state
            .holds
            .values()
            .filter(|hold| {
                let holders: Vec<&Appointment> = state
                    .appointments
                    .values()
                    .filter(|a| a.hold_token == hold.token)
                    .collect();
                let live = holders.iter().any(|a| a.status != AppointmentStatus::Cancelled);
                !live && (!holders.is_empty() || hold.created_at < stale_before)
            })
            .cloned()
            .collect();
        orphans.sort_by_key(|r| r.created_at);
        Ok(orphans)
    }

    async fn resync_counters(&self) -> AppResult<u64> {
        let mut state = self.lock()?;

        let mut live: HashMap<(NaiveDate, i32), i32> = HashMap::new();
        for hold in state.holds.values() {
            *live.entry((hold.service_date, hold.slot_id)).or_insert(0) += 1;
        }

        let mut changed = 0;
        for (key, booked) in state.counters.iter_mut() {
            let held = live.remove(key).unwrap_or(0);
            if *booked != held {
                *booked = held;
                changed += 1;
            }
        }
        for (key, held) in live {
            state.counters.insert(key, held);
            changed += 1;
        }
        Ok(changed)
    }
}

#[async_trait]
impl AppointmentsRepository for MemoryStore {
    async fn get(&self, id: i32) -> AppResult<Appointment> {
        self.lock()?
            .appointments
            .get(&id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("Appointment {} not found", id)))
    }

    async fn find_active_for_order(&self, order_id: i32) -> AppResult<Option<Appointment>> {
        Ok(self
            .lock()?
            .appointments
            .values()
            .find(|a| a.order_id == order_id && a.is_active())
            .cloned())
    }

    async fn list_for_order(&self, order_id: i32) -> AppResult<Vec<Appointment>> {
        let state = self.lock()?;
        let mut rows: Vec<Appointment> = state
            .appointments
            .values()
            .filter(|a| a.order_id == order_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(rows)
    }

    async fn create(
        &self,
        draft: &AppointmentDraft,
        reservation: &Reservation,
        expected: FulfillmentStatus,
        actor: &Actor,
    ) -> AppResult<Appointment> {
        let now = self.clock.now();
        let mut state = self.lock()?;

        match state.orders.get(&draft.order_id) {
            Some(order) if order.status == expected => {}
            _ => return Err(state.order_conflict(draft.order_id, "Order status changed while booking")),
        }
        if state
            .appointments
            .values()
            .any(|a| a.order_id == draft.order_id && a.is_active())
        {
            return Err(state.order_conflict(draft.order_id, "Order already has an active appointment"));
        }

        let id = state.next_i32()?;
        let details = &draft.details;
        let appointment = Appointment {
            id,
            order_id: draft.order_id,
            service_date: draft.service_date,
            slot_id: draft.slot_id,
            status: AppointmentStatus::Scheduled,
            specific_time_requested: details.specific_time,
            delivery_location: details.delivery_location,
            access_instructions: details.access_instructions.clone(),
            alternate_recipient: details.alternate_recipient.clone(),
            alternate_phone: details.alternate_phone.clone(),
            customer_notes: details.customer_notes.clone(),
            notification_prefs: details.notification_prefs,
            hold_token: reservation.token,
            cancel_reason: None,
            created_at: now,
            updated_at: now,
        };
        state.appointments.insert(id, appointment.clone());

        if let Some(order) = state.orders.get_mut(&draft.order_id) {
            order.status = FulfillmentStatus::Scheduled;
            order.updated_at = Some(now);
        }

        let event = NewFulfillmentEvent::new(draft.order_id, FulfillmentEventKind::Scheduled)
            .appointment(id)
            .to_slot(draft.service_date, draft.slot_id);
        state.push_event(event, actor, now);

        Ok(appointment)
    }

    async fn move_to(
        &self,
        appointment: &Appointment,
        reservation: &Reservation,
        specific_time: Option<NaiveTime>,
        actor: &Actor,
    ) -> AppResult<Appointment> {
        let now = self.clock.now();
        let mut state = self.lock()?;

        let unchanged = state
            .appointments
            .get(&appointment.id)
            .is_some_and(|a| a.is_active() && a.hold_token == appointment.hold_token);
        if !unchanged {
            return Err(state.order_conflict(appointment.order_id, "Appointment changed while rescheduling"));
        }

        let moved = {
            let current = state
                .appointments
                .get_mut(&appointment.id)
                .ok_or_else(|| AppError::NotFound(format!("Appointment {} not found", appointment.id)))?;
            current.service_date = reservation.service_date;
            current.slot_id = reservation.slot_id;
            current.hold_token = reservation.token;
            current.specific_time_requested = specific_time;
            current.updated_at = now;
            current.clone()
        };

        let event = NewFulfillmentEvent::new(moved.order_id, FulfillmentEventKind::Rescheduled)
            .appointment(moved.id)
            .from_slot(appointment.service_date, appointment.slot_id)
            .to_slot(moved.service_date, moved.slot_id);
        state.push_event(event, actor, now);

        Ok(moved)
    }

    async fn close(
        &self,
        appointment_id: i32,
        status: AppointmentStatus,
        order_status: FulfillmentStatus,
        reason: Option<&str>,
        actor: &Actor,
    ) -> AppResult<Option<Appointment>> {
        let kind = closing_event_kind(status)?;
        let now = self.clock.now();
        let mut state = self.lock()?;

        let order_id = match state.appointments.get(&appointment_id) {
            Some(a) if a.is_active() => a.order_id,
            Some(_) => return Ok(None),
            None => return Err(AppError::NotFound(format!("Appointment {} not found", appointment_id))),
        };

        if !state
            .orders
            .get(&order_id)
            .is_some_and(|o| o.status == FulfillmentStatus::Scheduled)
        {
            return Err(state.order_conflict(order_id, "Order is not scheduled"));
        }
        if let Some(order) = state.orders.get_mut(&order_id) {
            order.status = order_status;
            order.updated_at = Some(now);
        }

        let closed = match state.appointments.get_mut(&appointment_id) {
            Some(a) => {
                a.status = status;
                if status == AppointmentStatus::Cancelled {
                    if let Some(reason) = reason {
                        a.cancel_reason = Some(reason.to_string());
                    }
                }
                a.updated_at = now;
                a.clone()
            }
            None => return Err(AppError::NotFound(format!("Appointment {} not found", appointment_id))),
        };

        let event = NewFulfillmentEvent::new(order_id, kind)
            .appointment(appointment_id)
            .from_slot(closed.service_date, closed.slot_id)
            .reason(reason.map(str::to_string));
        state.push_event(event, actor, now);

        Ok(Some(closed))
    }
}

#[async_trait]
impl OrdersRepository for MemoryStore {
    async fn get(&self, id: i32) -> AppResult<FulfillmentOrder> {
        self.lock()?
            .orders
            .get(&id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("Order {} not found", id)))
    }

    async fn transition(
        &self,
        id: i32,
        from: FulfillmentStatus,
        to: FulfillmentStatus,
        event: NewFulfillmentEvent,
        actor: &Actor,
    ) -> AppResult<FulfillmentOrder> {
        let now = self.clock.now();
        let mut state = self.lock()?;

        if !state.orders.get(&id).is_some_and(|o| o.status == from) {
            return Err(state.order_conflict(id, &format!("Order is no longer {}", from)));
        }
        let order = {
            let order = state
                .orders
                .get_mut(&id)
                .ok_or_else(|| AppError::NotFound(format!("Order {} not found", id)))?;
            order.status = to;
            if to == FulfillmentStatus::Diy {
                order.diy_flagged = true;
                order.diy_reason = event.reason.clone();
            }
            order.updated_at = Some(now);
            order.clone()
        };

        state.push_event(event, actor, now);
        Ok(order)
    }

    async fn history(&self, order_id: i32) -> AppResult<Vec<FulfillmentEvent>> {
        Ok(self
            .lock()?
            .events
            .iter()
            .filter(|e| e.order_id == order_id)
            .cloned()
            .collect())
    }

    async fn installer_zip_codes(&self, installer_id: i32) -> AppResult<Vec<String>> {
        Ok(self
            .lock()?
            .installer_zips
            .get(&installer_id)
            .map(|zips| zips.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn is_zip_serviced(&self, zip: &str) -> AppResult<bool> {
        Ok(self.lock()?.installer_zips.values().any(|zips| zips.contains(zip)))
    }

    async fn list_pending(
        &self,
        zip_codes: &[String],
        filter: PendingFilter,
        search: Option<&str>,
        ready_by: NaiveDate,
    ) -> AppResult<Vec<PendingOrder>> {
        let state = self.lock()?;
        let needle = search
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_lowercase);

        let matches = |order: &FulfillmentOrder| match &needle {
            None => true,
            Some(needle) => [
                Some(order.order_number.as_str()),
                Some(order.customer_name.as_str()),
                order.customer_email.as_deref(),
                order.customer_phone.as_deref(),
            ]
            .into_iter()
            .flatten()
            .any(|field| field.to_lowercase().contains(needle.as_str())),
        };

        let mut rows: Vec<PendingOrder> = state
            .orders
            .values()
            .filter(|o| zip_codes.contains(&o.service_zip_code))
            .filter(|o| filter.statuses().contains(&o.status))
            .filter(|o| o.ready_for_installation_date <= ready_by)
            .filter(|o| matches(o))
            .map(|o| PendingOrder {
                has_appointment: state
                    .appointments
                    .values()
                    .any(|a| a.order_id == o.id && a.is_active()),
                order: o.clone(),
            })
            .filter(|p| filter != PendingFilter::Pending || !p.has_appointment)
            .collect();
        rows.sort_by_key(|p| (p.order.ready_for_installation_date, p.order.id));
        Ok(rows)
    }
}
