//! Scheduling service
//!
//! The only entry point that books, moves or ends appointments. Every operation
//! validates before touching the ledger, reserves before writing, and releases
//! a reservation only after the write that stops using it has committed.

use std::sync::Arc;

use chrono::{Duration, NaiveDate, NaiveTime};
use validator::Validate;

use super::{
    availability::slot_open_for_booking,
    fulfillment::{self, FulfillmentTrigger},
    notifications::ReminderScheduler,
    retry::with_retry,
};
use crate::{
    clock::Clock,
    config::SchedulingConfig,
    error::{AppError, AppResult},
    models::{
        appointment::{
            Appointment, AppointmentDraft, AppointmentStatus, BookingDetails, BookingRequest,
            RescheduleAppointment, VisitOutcome,
        },
        ledger::Reservation,
        order::{FulfillmentEvent, FulfillmentEventKind, FulfillmentOrder, NewFulfillmentEvent},
        schedule::{parse_date, parse_time, TimeSlotTemplate},
        user::{Actor, Role},
    },
    repository::Repository,
};

#[derive(Clone)]
pub struct SchedulingService {
    repository: Repository,
    reminders: ReminderScheduler,
    clock: Arc<dyn Clock>,
    config: SchedulingConfig,
}

impl SchedulingService {
    pub fn new(
        repository: Repository,
        reminders: ReminderScheduler,
        clock: Arc<dyn Clock>,
        config: SchedulingConfig,
    ) -> Self {
        Self {
            repository,
            reminders,
            clock,
            config,
        }
    }

    // ---- Access ----

    /// Customers act on their own orders, installers on orders in their zip
    /// codes, admins on everything
    pub async fn authorize(&self, order: &FulfillmentOrder, actor: &Actor) -> AppResult<()> {
        match actor.role {
            Role::Admin => Ok(()),
            Role::Customer if order.customer_id == actor.id => Ok(()),
            Role::Customer => Err(AppError::Authorization(
                "You can only manage your own orders".to_string(),
            )),
            Role::Installer => {
                let zips = self.repository.orders.installer_zip_codes(actor.id).await?;
                if zips.contains(&order.service_zip_code) {
                    Ok(())
                } else {
                    Err(AppError::Authorization(
                        "Order is outside your service area".to_string(),
                    ))
                }
            }
        }
    }

    async fn load_order(&self, order_id: i32, actor: &Actor) -> AppResult<FulfillmentOrder> {
        let order = self.repository.orders.get(order_id).await?;
        self.authorize(&order, actor).await?;
        Ok(order)
    }

    // ---- Booking rules ----

    /// Checks everything that can be checked without the ledger and returns the slot
    async fn validate_booking(
        &self,
        order: &FulfillmentOrder,
        date: NaiveDate,
        slot_id: i32,
        specific_time: Option<NaiveTime>,
    ) -> AppResult<TimeSlotTemplate> {
        let offset = self.config.local_offset();
        let now = self.clock.local_now(offset);

        if date < now.date() {
            return Err(AppError::Validation("Cannot book a date in the past".to_string()));
        }
        if date < order.ready_for_installation_date {
            return Err(AppError::Validation(format!(
                "Earliest installation date for this order is {}",
                order.ready_for_installation_date
            )));
        }

        let slot = match self.repository.catalog.get_slot(slot_id).await {
            Ok(slot) if slot.is_active => slot,
            Ok(_) | Err(AppError::NotFound(_)) => {
                return Err(AppError::Validation(format!("Time slot {} is not available", slot_id)))
            }
            Err(e) => return Err(e),
        };

        if let Some(reason) = slot.calendar_violation(date, now.date()) {
            return Err(AppError::Validation(reason));
        }

        let blackouts = self.repository.catalog.list_blackouts(Some(date), Some(date)).await?;
        if let Some(rule) = blackouts.iter().find(|b| b.blocks(date, slot.id)) {
            return Err(AppError::Validation(rule.message.clone().unwrap_or_else(|| {
                format!("{} is not available on {}", slot.name, date)
            })));
        }

        let cutoff = Duration::minutes(self.config.same_day_cutoff_minutes);
        if !slot_open_for_booking(date, &slot, now, cutoff) {
            return Err(AppError::Validation(format!(
                "{} on {} can no longer be booked, please choose a later slot",
                slot.name, date
            )));
        }

        if let Some(time) = specific_time {
            if !slot.allows_specific_time {
                return Err(AppError::Validation(format!(
                    "{} does not accept a specific time request",
                    slot.name
                )));
            }
            if !slot.contains_time(time) {
                return Err(AppError::Validation(format!(
                    "Requested time must fall within {} - {}",
                    slot.start_time.format("%H:%M"),
                    slot.end_time.format("%H:%M")
                )));
            }
        }

        Ok(slot)
    }

    // ---- Ledger helpers ----

    async fn reserve(&self, date: NaiveDate, slot_id: i32) -> AppResult<Reservation> {
        let ledger = self.repository.ledger.as_ref();
        with_retry(&self.config.retry, "try_reserve", move || ledger.try_reserve(date, slot_id)).await
    }

    async fn release(&self, reservation: &Reservation) -> AppResult<bool> {
        let ledger = self.repository.ledger.as_ref();
        with_retry(&self.config.retry, "release", move || ledger.release(reservation)).await
    }

    /// Gives back a reservation whose booking write failed
    async fn compensate(&self, reservation: &Reservation, cause: &AppError) -> AppResult<()> {
        match self.release(reservation).await {
            Ok(_) => {
                tracing::warn!(
                    token = %reservation.token,
                    date = %reservation.service_date,
                    slot_id = reservation.slot_id,
                    "Booking write failed, reservation released: {}",
                    cause
                );
                Ok(())
            }
            Err(e) => {
                tracing::error!(
                    token = %reservation.token,
                    date = %reservation.service_date,
                    slot_id = reservation.slot_id,
                    "Compensating release failed, hold left for the reconciliation sweep: {} (after: {})",
                    e,
                    cause
                );
                Err(AppError::ReservationRollback(format!(
                    "Reservation {} could not be released: {}",
                    reservation.token, e
                )))
            }
        }
    }

    fn held_by(appointment: &Appointment) -> Reservation {
        Reservation {
            token: appointment.hold_token,
            service_date: appointment.service_date,
            slot_id: appointment.slot_id,
            created_at: appointment.created_at,
        }
    }

    // ---- Operations ----

    /// Book an appointment for an order
    pub async fn schedule(&self, order_id: i32, request: &BookingRequest, actor: &Actor) -> AppResult<Appointment> {
        request.validate()?;
        let order = self.load_order(order_id, actor).await?;
        fulfillment::transition(&order, FulfillmentTrigger::Schedule)?;

        if self.repository.appointments.find_active_for_order(order.id).await?.is_some() {
            return Err(AppError::state_conflict(
                order.id,
                order.status,
                "Order already has an active appointment",
            ));
        }

        let date = parse_date(&request.date, "date")?;
        let specific_time = request
            .specific_time
            .as_deref()
            .map(|t| parse_time(t, "specific_time"))
            .transpose()?;
        let slot = self.validate_booking(&order, date, request.slot_id, specific_time).await?;

        let draft = AppointmentDraft {
            order_id: order.id,
            service_date: date,
            slot_id: slot.id,
            details: BookingDetails {
                specific_time,
                delivery_location: request.delivery_location,
                access_instructions: request.access_instructions.clone(),
                alternate_recipient: request.alternate_recipient.clone(),
                alternate_phone: request.alternate_phone.clone(),
                customer_notes: request.customer_notes.clone(),
                notification_prefs: request.notification_prefs,
            },
        };

        let reservation = self.reserve(date, slot.id).await?;

        let appointment = match self
            .repository
            .appointments
            .create(&draft, &reservation, order.status, actor)
            .await
        {
            Ok(appointment) => appointment,
            Err(e) => {
                self.compensate(&reservation, &e).await?;
                return Err(e);
            }
        };

        tracing::info!(
            order_id = order.id,
            appointment_id = appointment.id,
            date = %date,
            slot_id = slot.id,
            token = %reservation.token,
            actor = actor.role.as_str(),
            "Appointment scheduled"
        );

        self.reminders.schedule(&appointment, &slot).await;
        Ok(appointment)
    }

    /// Move a scheduled appointment to another (date, slot).
    ///
    /// The new slot is reserved first; if that fails the appointment and its
    /// capacity are left untouched.
    pub async fn reschedule(
        &self,
        appointment_id: i32,
        request: &RescheduleAppointment,
        actor: &Actor,
    ) -> AppResult<Appointment> {
        let appointment = self.repository.appointments.get(appointment_id).await?;
        let order = self.load_order(appointment.order_id, actor).await?;

        if !appointment.is_active() {
            return Err(AppError::state_conflict(
                order.id,
                order.status,
                format!("Cannot reschedule an appointment that is {}", appointment.status),
            ));
        }
        fulfillment::transition(&order, FulfillmentTrigger::Reschedule)?;

        let date = parse_date(&request.date, "date")?;
        if date == appointment.service_date && request.slot_id == appointment.slot_id {
            return Ok(appointment);
        }

        let slot = self.validate_booking(&order, date, request.slot_id, None).await?;
        let specific_time = appointment
            .specific_time_requested
            .filter(|t| slot.allows_specific_time && slot.contains_time(*t));

        let reservation = self.reserve(date, slot.id).await?;

        let moved = match self
            .repository
            .appointments
            .move_to(&appointment, &reservation, specific_time, actor)
            .await
        {
            Ok(moved) => moved,
            Err(e) => {
                self.compensate(&reservation, &e).await?;
                return Err(e);
            }
        };

        let previous = Self::held_by(&appointment);
        if let Err(e) = self.release(&previous).await {
            tracing::error!(
                appointment_id = appointment.id,
                token = %previous.token,
                date = %previous.service_date,
                slot_id = previous.slot_id,
                "Old slot not released, hold left for the reconciliation sweep: {}",
                e
            );
        }

        tracing::info!(
            order_id = order.id,
            appointment_id = moved.id,
            from_date = %appointment.service_date,
            from_slot = appointment.slot_id,
            date = %moved.service_date,
            slot_id = moved.slot_id,
            token = %reservation.token,
            "Appointment rescheduled"
        );

        self.reminders.reschedule(&moved, &slot).await;
        Ok(moved)
    }

    /// Cancel an appointment and give its capacity back.
    ///
    /// Cancelling an already cancelled appointment retries the release of its
    /// hold and returns it unchanged.
    pub async fn cancel(&self, appointment_id: i32, reason: Option<&str>, actor: &Actor) -> AppResult<Appointment> {
        let appointment = self.repository.appointments.get(appointment_id).await?;
        let order = self.load_order(appointment.order_id, actor).await?;

        let closed = match appointment.status {
            AppointmentStatus::Cancelled => appointment,
            AppointmentStatus::Completed | AppointmentStatus::NoShow => {
                return Err(AppError::state_conflict(
                    order.id,
                    order.status,
                    format!("Appointment is already {}", appointment.status),
                ))
            }
            AppointmentStatus::Scheduled => {
                let target = fulfillment::transition(&order, FulfillmentTrigger::CancelAppointment)?;
                let closed = self
                    .repository
                    .appointments
                    .close(appointment.id, AppointmentStatus::Cancelled, target, reason, actor)
                    .await?;

                match closed {
                    Some(closed) => closed,
                    None => {
                        let current = self.repository.appointments.get(appointment.id).await?;
                        if current.status != AppointmentStatus::Cancelled {
                            return Err(AppError::state_conflict(
                                order.id,
                                order.status,
                                format!("Appointment is already {}", current.status),
                            ));
                        }
                        current
                    }
                }
            }
        };

        let hold = Self::held_by(&closed);
        match self.release(&hold).await {
            Ok(released) => tracing::info!(
                order_id = closed.order_id,
                appointment_id = closed.id,
                date = %closed.service_date,
                slot_id = closed.slot_id,
                released,
                "Appointment cancelled"
            ),
            Err(e) => tracing::error!(
                appointment_id = closed.id,
                token = %hold.token,
                "Cancelled appointment's hold not released, left for the reconciliation sweep: {}",
                e
            ),
        }

        self.reminders.invalidate(closed.id).await;
        Ok(closed)
    }

    /// Decline professional installation for an order
    pub async fn mark_diy(&self, order_id: i32, reason: Option<&str>, actor: &Actor) -> AppResult<FulfillmentOrder> {
        let order = self.load_order(order_id, actor).await?;
        let target = fulfillment::transition(&order, FulfillmentTrigger::MarkDiy)?;

        let event = NewFulfillmentEvent::new(order.id, FulfillmentEventKind::MarkedDiy)
            .reason(reason.map(str::to_string));
        let updated = self
            .repository
            .orders
            .transition(order.id, order.status, target, event, actor)
            .await?;

        tracing::info!(order_id = order.id, actor = actor.role.as_str(), "Order marked DIY");
        Ok(updated)
    }

    /// Installer's report after the visit. Capacity stays consumed either way.
    pub async fn record_visit(
        &self,
        appointment_id: i32,
        outcome: VisitOutcome,
        notes: Option<&str>,
        actor: &Actor,
    ) -> AppResult<Appointment> {
        if actor.role == Role::Customer {
            return Err(AppError::Authorization("Installer account required".to_string()));
        }

        let appointment = self.repository.appointments.get(appointment_id).await?;
        let order = self.load_order(appointment.order_id, actor).await?;

        if !appointment.is_active() {
            return Err(AppError::state_conflict(
                order.id,
                order.status,
                format!("Appointment is already {}", appointment.status),
            ));
        }

        let (trigger, status) = match outcome {
            VisitOutcome::Completed => (FulfillmentTrigger::MarkInstalled, AppointmentStatus::Completed),
            VisitOutcome::NoShow => (FulfillmentTrigger::NoShow, AppointmentStatus::NoShow),
        };
        let target = fulfillment::transition(&order, trigger)?;

        let closed = self
            .repository
            .appointments
            .close(appointment.id, status, target, notes, actor)
            .await?
            .ok_or_else(|| {
                AppError::state_conflict(order.id, order.status, "Appointment changed while updating")
            })?;

        tracing::info!(
            order_id = order.id,
            appointment_id = closed.id,
            status = %closed.status,
            order_status = %target,
            "Visit recorded"
        );

        self.reminders.invalidate(closed.id).await;
        Ok(closed)
    }

    // ---- Reads ----

    pub async fn get_appointment(&self, appointment_id: i32, actor: &Actor) -> AppResult<Appointment> {
        let appointment = self.repository.appointments.get(appointment_id).await?;
        self.load_order(appointment.order_id, actor).await?;
        Ok(appointment)
    }

    pub async fn order_appointments(&self, order_id: i32, actor: &Actor) -> AppResult<Vec<Appointment>> {
        self.load_order(order_id, actor).await?;
        self.repository.appointments.list_for_order(order_id).await
    }

    pub async fn order_history(&self, order_id: i32, actor: &Actor) -> AppResult<Vec<FulfillmentEvent>> {
        self.load_order(order_id, actor).await?;
        self.repository.orders.history(order_id).await
    }
}
