//! Slot catalog and blackout administration

use std::{collections::HashSet, sync::Arc};

use rust_decimal::Decimal;
use validator::Validate;

use crate::{
    clock::Clock,
    config::SchedulingConfig,
    error::{AppError, AppResult},
    models::schedule::{
        all_weekdays, parse_date, parse_time, BlackoutDraft, BlackoutQuery, BlackoutRule,
        CreateBlackout, CreateTimeSlot, TimeSlotDraft, TimeSlotTemplate, UpdateTimeSlot,
        DEFAULT_MAX_ADVANCE_DAYS,
    },
    repository::Repository,
};

#[derive(Clone)]
pub struct SchedulesService {
    repository: Repository,
    clock: Arc<dyn Clock>,
    config: SchedulingConfig,
}

fn check_window(draft: &TimeSlotDraft) -> AppResult<()> {
    if draft.end_time <= draft.start_time {
        return Err(AppError::Validation("Slot end time must be after its start time".to_string()));
    }
    if draft.additional_fee < Decimal::ZERO {
        return Err(AppError::Validation("Additional fee cannot be negative".to_string()));
    }
    if draft.available_days.is_empty() {
        return Err(AppError::Validation("A slot must run on at least one weekday".to_string()));
    }
    if draft.min_lead_days > draft.max_advance_days {
        return Err(AppError::Validation(
            "Minimum lead days cannot exceed maximum advance days".to_string(),
        ));
    }
    Ok(())
}

/// Sorted, deduplicated weekday numbers (0 = Sunday)
fn weekdays(days: &[i32]) -> AppResult<Vec<i32>> {
    if let Some(day) = days.iter().find(|d| !(0..7).contains(*d)) {
        return Err(AppError::Validation(format!(
            "Invalid weekday {}, expected 0 (Sunday) to 6 (Saturday)",
            day
        )));
    }
    let mut days = days.to_vec();
    days.sort_unstable();
    days.dedup();
    Ok(days)
}

impl SchedulesService {
    pub fn new(repository: Repository, clock: Arc<dyn Clock>, config: SchedulingConfig) -> Self {
        Self { repository, clock, config }
    }

    // ---- Slots ----

    pub async fn list_slots(&self, include_inactive: bool) -> AppResult<Vec<TimeSlotTemplate>> {
        self.repository.catalog.list_slots(include_inactive).await
    }

    pub async fn create_slot(&self, data: &CreateTimeSlot) -> AppResult<TimeSlotTemplate> {
        data.validate()?;
        let draft = TimeSlotDraft {
            name: data.name.trim().to_string(),
            code: data.code.trim().to_uppercase(),
            start_time: parse_time(&data.start_time, "start_time")?,
            end_time: parse_time(&data.end_time, "end_time")?,
            total_capacity: data.total_capacity,
            additional_fee: data.additional_fee.unwrap_or(Decimal::ZERO),
            requires_signature: data.requires_signature.unwrap_or(false),
            allows_specific_time: data.allows_specific_time.unwrap_or(false),
            available_days: match &data.available_days {
                Some(days) => weekdays(days)?,
                None => all_weekdays(),
            },
            min_lead_days: data.min_lead_days.unwrap_or(0),
            max_advance_days: data.max_advance_days.unwrap_or(DEFAULT_MAX_ADVANCE_DAYS),
            is_active: true,
            display_order: data.display_order.unwrap_or(0),
        };
        check_window(&draft)?;

        let slot = self.repository.catalog.create_slot(&draft).await?;
        tracing::info!(slot_id = slot.id, code = %slot.code, "Time slot created");
        Ok(slot)
    }

    /// Partial update.
    ///
    /// Capacity cannot drop below what is already booked on today or any later
    /// date.
    pub async fn update_slot(&self, id: i32, data: &UpdateTimeSlot) -> AppResult<TimeSlotTemplate> {
        data.validate()?;
        let current = self.repository.catalog.get_slot(id).await?;

        let draft = TimeSlotDraft {
            name: data.name.as_deref().map(str::trim).map(str::to_string).unwrap_or(current.name),
            code: data
                .code
                .as_deref()
                .map(|c| c.trim().to_uppercase())
                .unwrap_or(current.code),
            start_time: match &data.start_time {
                Some(t) => parse_time(t, "start_time")?,
                None => current.start_time,
            },
            end_time: match &data.end_time {
                Some(t) => parse_time(t, "end_time")?,
                None => current.end_time,
            },
            total_capacity: data.total_capacity.unwrap_or(current.total_capacity),
            additional_fee: data.additional_fee.unwrap_or(current.additional_fee),
            requires_signature: data.requires_signature.unwrap_or(current.requires_signature),
            allows_specific_time: data.allows_specific_time.unwrap_or(current.allows_specific_time),
            available_days: match &data.available_days {
                Some(days) => weekdays(days)?,
                None => current.available_days,
            },
            min_lead_days: data.min_lead_days.unwrap_or(current.min_lead_days),
            max_advance_days: data.max_advance_days.unwrap_or(current.max_advance_days),
            is_active: data.is_active.unwrap_or(current.is_active),
            display_order: data.display_order.unwrap_or(current.display_order),
        };
        check_window(&draft)?;

        let today = self.clock.local_now(self.config.local_offset()).date();
        let slot = self.repository.catalog.update_slot(id, &draft, today).await?;
        tracing::info!(slot_id = slot.id, active = slot.is_active, "Time slot updated");
        Ok(slot)
    }

    // ---- Blackouts ----

    pub async fn list_blackouts(&self, query: &BlackoutQuery) -> AppResult<Vec<BlackoutRule>> {
        let start_date = query.start_date.as_deref().map(|d| parse_date(d, "start_date")).transpose()?;
        let end_date = query.end_date.as_deref().map(|d| parse_date(d, "end_date")).transpose()?;
        self.repository.catalog.list_blackouts(start_date, end_date).await
    }

    pub async fn create_blackout(&self, data: &CreateBlackout) -> AppResult<BlackoutRule> {
        data.validate()?;
        let start_date = parse_date(&data.start_date, "start_date")?;
        let end_date = match &data.end_date {
            Some(d) => parse_date(d, "end_date")?,
            None => start_date,
        };
        if end_date < start_date {
            return Err(AppError::Validation("Blackout end date must not be before its start date".to_string()));
        }

        let mut slot_ids = data.slot_ids.clone().unwrap_or_default();
        slot_ids.sort_unstable();
        slot_ids.dedup();
        if !slot_ids.is_empty() {
            let known: HashSet<i32> = self
                .repository
                .catalog
                .list_slots(true)
                .await?
                .into_iter()
                .map(|s| s.id)
                .collect();
            if let Some(unknown) = slot_ids.iter().find(|id| !known.contains(id)) {
                return Err(AppError::Validation(format!("Time slot {} does not exist", unknown)));
            }
        }

        let draft = BlackoutDraft {
            name: data.name.trim().to_string(),
            start_date,
            end_date,
            slot_ids,
            message: data.message.clone(),
        };
        let rule = self.repository.catalog.create_blackout(&draft).await?;
        tracing::info!(
            blackout_id = rule.id,
            start_date = %rule.start_date,
            end_date = %rule.end_date,
            full_day = rule.is_full_day(),
            "Blackout created"
        );
        Ok(rule)
    }

    pub async fn delete_blackout(&self, id: i32) -> AppResult<()> {
        self.repository.catalog.delete_blackout(id).await?;
        tracing::info!(blackout_id = id, "Blackout deleted");
        Ok(())
    }
}
