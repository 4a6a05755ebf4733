//! Appointment reminders
//!
//! Reminder times are computed here; delivery belongs to whatever sits behind
//! the [`Notifier`] port (the Redis queue in production).

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    clock::Clock,
    config::SchedulingConfig,
    error::AppResult,
    models::{appointment::Appointment, enums::text_enum, schedule::TimeSlotTemplate},
};

text_enum! {
    /// When a reminder fires relative to the appointment
    ReminderKind {
        DayBefore => "day_before",
        DayOf => "day_of",
        OneHourBefore => "one_hour_before",
    }
}

/// One reminder to deliver at `fire_at`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reminder {
    pub appointment_id: i32,
    pub order_id: i32,
    pub kind: ReminderKind,
    pub fire_at: DateTime<Utc>,
    pub service_date: NaiveDate,
    pub slot_id: i32,
}

impl Reminder {
    /// Queue member identifying this reminder
    pub fn key(&self) -> String {
        format!("{}:{}", self.appointment_id, self.kind)
    }
}

fn to_utc(local: NaiveDateTime, offset: FixedOffset) -> Option<DateTime<Utc>> {
    offset
        .from_local_datetime(&local)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Reminders the appointment's preferences ask for that are still in the future.
///
/// The appointment starts at its requested specific time if any, otherwise at
/// the slot start. The day-of reminder fires at `day_of_time` but no later than
/// two hours before the start.
pub fn compute_reminders(
    appointment: &Appointment,
    slot: &TimeSlotTemplate,
    offset: FixedOffset,
    day_of_time: NaiveTime,
    now: DateTime<Utc>,
) -> Vec<Reminder> {
    let start_time = appointment.specific_time_requested.unwrap_or(slot.start_time);
    let Some(start) = to_utc(appointment.service_date.and_time(start_time), offset) else {
        return Vec::new();
    };
    let prefs = appointment.notification_prefs;

    let before = |hours: i64| start.checked_sub_signed(Duration::hours(hours));

    let mut planned = Vec::new();
    if prefs.day_before {
        planned.push((ReminderKind::DayBefore, before(24)));
    }
    if prefs.day_of {
        let morning = to_utc(appointment.service_date.and_time(day_of_time), offset);
        planned.push((ReminderKind::DayOf, morning.zip(before(2)).map(|(m, latest)| m.min(latest))));
    }
    if prefs.one_hour_before {
        planned.push((ReminderKind::OneHourBefore, before(1)));
    }

    planned
        .into_iter()
        .filter_map(|(kind, fire_at)| fire_at.map(|at| (kind, at)))
        .filter(|(_, fire_at)| *fire_at > now)
        .map(|(kind, fire_at)| Reminder {
            appointment_id: appointment.id,
            order_id: appointment.order_id,
            kind,
            fire_at,
            service_date: appointment.service_date,
            slot_id: appointment.slot_id,
        })
        .collect()
}

/// Port to the external reminder dispatcher
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn enqueue(&self, reminder: &Reminder) -> AppResult<()>;

    /// Drops every pending reminder of the appointment
    async fn invalidate(&self, appointment_id: i32) -> AppResult<()>;
}

/// Notifier that only logs; used when no queue is configured
#[derive(Debug, Clone, Default)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn enqueue(&self, reminder: &Reminder) -> AppResult<()> {
        tracing::info!(
            appointment_id = reminder.appointment_id,
            kind = %reminder.kind,
            fire_at = %reminder.fire_at,
            "Reminder scheduled"
        );
        Ok(())
    }

    async fn invalidate(&self, appointment_id: i32) -> AppResult<()> {
        tracing::info!(appointment_id, "Reminders invalidated");
        Ok(())
    }
}

/// Keeps an appointment's reminders in step with its bookings.
///
/// Failures are logged and swallowed: a lost reminder never fails a booking.
#[derive(Clone)]
pub struct ReminderScheduler {
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    offset: FixedOffset,
    day_of_time: NaiveTime,
}

impl ReminderScheduler {
    pub fn new(notifier: Arc<dyn Notifier>, clock: Arc<dyn Clock>, config: &SchedulingConfig) -> Self {
        Self {
            notifier,
            clock,
            offset: config.local_offset(),
            day_of_time: config.day_of_time(),
        }
    }

    /// Enqueues the appointment's reminders, returns how many were accepted
    pub async fn schedule(&self, appointment: &Appointment, slot: &TimeSlotTemplate) -> usize {
        let reminders = compute_reminders(appointment, slot, self.offset, self.day_of_time, self.clock.now());
        let mut accepted = 0;
        for reminder in &reminders {
            match self.notifier.enqueue(reminder).await {
                Ok(()) => accepted += 1,
                Err(e) => tracing::warn!(
                    appointment_id = appointment.id,
                    kind = %reminder.kind,
                    "Reminder dropped: {}",
                    e
                ),
            }
        }
        accepted
    }

    pub async fn reschedule(&self, appointment: &Appointment, slot: &TimeSlotTemplate) -> usize {
        self.invalidate(appointment.id).await;
        self.schedule(appointment, slot).await
    }

    pub async fn invalidate(&self, appointment_id: i32) {
        if let Err(e) = self.notifier.invalidate(appointment_id).await {
            tracing::warn!(appointment_id, "Failed to invalidate reminders: {}", e);
        }
    }
}
