//! Availability calculator
//!
//! `compute_availability` is a pure function of the slot catalog, the blackout
//! rules and a ledger snapshot; `AvailabilityService` only gathers those inputs.

use std::sync::Arc;

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime};

use crate::{
    clock::Clock,
    config::SchedulingConfig,
    error::{AppError, AppResult},
    models::{
        availability::{DateAvailability, SlotAvailability},
        ledger::CapacitySnapshot,
        schedule::{BlackoutRule, TimeSlotTemplate},
    },
    repository::Repository,
};

/// Whether `slot` on `date` may still be booked at local time `now`.
///
/// Past dates never are; today's slots close `cutoff` before they start.
pub fn slot_open_for_booking(
    date: NaiveDate,
    slot: &TimeSlotTemplate,
    now: NaiveDateTime,
    cutoff: Duration,
) -> bool {
    let today = now.date();
    if date < today {
        return false;
    }
    if date > today {
        return true;
    }
    date.and_time(slot.start_time) - now >= cutoff
}

/// Per-date, per-slot availability for `[from, to]` (inclusive).
///
/// Inactive templates are ignored, and a slot is left out of any date outside
/// its weekdays or (from today on) its booking window. A full-day blackout removes every slot but the
/// date is still listed with the rule's message; dates without any bookable slot
/// are listed with `has_availability = false`.
pub fn compute_availability(
    from: NaiveDate,
    to: NaiveDate,
    catalog: &[TimeSlotTemplate],
    blackouts: &[BlackoutRule],
    booked: &CapacitySnapshot,
    now: NaiveDateTime,
    cutoff: Duration,
) -> Vec<DateAvailability> {
    let mut slots: Vec<&TimeSlotTemplate> = catalog.iter().filter(|s| s.is_active).collect();
    slots.sort_by_key(|s| (s.display_order, s.start_time));
    let today = now.date();

    let mut days = Vec::new();
    let mut date = from;
    while date <= to {
        let rules: Vec<BlackoutRule> = blackouts.iter().filter(|b| b.covers(date)).cloned().collect();
        let is_blacked_out = rules.iter().any(|b| b.is_full_day());

        let day_slots: Vec<SlotAvailability> = if is_blacked_out {
            Vec::new()
        } else {
            slots
                .iter()
                .filter(|slot| {
                    if date < today {
                        slot.runs_on(date)
                    } else {
                        slot.calendar_violation(date, today).is_none()
                    }
                })
                .filter(|slot| !rules.iter().any(|b| b.slot_ids.contains(&slot.id)))
                .map(|slot| {
                    let available_capacity = (slot.total_capacity - booked.booked(date, slot.id)).max(0);
                    SlotAvailability {
                        slot: (*slot).clone(),
                        available_capacity,
                        is_available: available_capacity > 0
                            && slot_open_for_booking(date, slot, now, cutoff),
                    }
                })
                .collect()
        };

        days.push(DateAvailability {
            date,
            day_of_week: date.weekday().num_days_from_sunday(),
            has_availability: day_slots.iter().any(|s| s.is_available),
            slots: day_slots,
            blackouts: rules,
            is_blacked_out,
        });

        match date.succ_opt() {
            Some(next) => date = next,
            None => break,
        }
    }
    days
}

#[derive(Clone)]
pub struct AvailabilityService {
    repository: Repository,
    clock: Arc<dyn Clock>,
    config: SchedulingConfig,
}

impl AvailabilityService {
    pub fn new(repository: Repository, clock: Arc<dyn Clock>, config: SchedulingConfig) -> Self {
        Self { repository, clock, config }
    }

    /// Availability for a date range, truncated to the configured horizon
    pub async fn get_availability(
        &self,
        from: NaiveDate,
        to: NaiveDate,
        zip: Option<&str>,
    ) -> AppResult<Vec<DateAvailability>> {
        if to < from {
            return Err(AppError::Validation("End date must not be before start date".to_string()));
        }
        let horizon = self.config.horizon_days.max(1);
        let last = from
            .checked_add_signed(Duration::days(horizon - 1))
            .unwrap_or(NaiveDate::MAX);
        let to = to.min(last);

        if let Some(zip) = zip.map(str::trim).filter(|z| !z.is_empty()) {
            if !self.repository.orders.is_zip_serviced(zip).await? {
                return Err(AppError::Validation(
                    "Installation service not available in your area".to_string(),
                ));
            }
        }

        let catalog = self.repository.catalog.list_slots(false).await?;
        let blackouts = self.repository.catalog.list_blackouts(Some(from), Some(to)).await?;
        let booked = self.repository.ledger.booked_counts(from, to).await?;

        let now = self.clock.local_now(self.config.local_offset());
        let cutoff = Duration::minutes(self.config.same_day_cutoff_minutes);

        Ok(compute_availability(from, to, &catalog, &blackouts, &booked, now, cutoff))
    }
}
