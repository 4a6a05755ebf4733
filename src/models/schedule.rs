//! Slot catalog and blackout models

use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

use crate::error::{AppError, AppResult};

/// Parse a `YYYY-MM-DD` request field
pub fn parse_date(value: &str, field: &str) -> AppResult<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .map_err(|_| AppError::Validation(format!("Invalid {} '{}', expected YYYY-MM-DD", field, value)))
}

/// Parse an `HH:MM` request field
pub fn parse_time(value: &str, field: &str) -> AppResult<NaiveTime> {
    NaiveTime::parse_from_str(value.trim(), "%H:%M")
        .map_err(|_| AppError::Validation(format!("Invalid {} '{}', expected HH:MM", field, value)))
}

// ---------------------------------------------------------------------------
// TimeSlotTemplate
// ---------------------------------------------------------------------------

/// A recurring daily delivery/installation window (e.g. "Morning 8am-12pm")
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct TimeSlotTemplate {
    pub id: i32,
    pub name: String,
    /// Short code (e.g. "AM")
    pub code: String,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    /// Appointments the slot can hold on a single date
    pub total_capacity: i32,
    #[schema(value_type = String)]
    pub additional_fee: Decimal,
    pub requires_signature: bool,
    /// Whether a specific time within the window may be requested
    pub allows_specific_time: bool,
    /// Weekdays the slot runs on, 0 = Sunday
    pub available_days: Vec<i32>,
    /// Minimum days between today and the appointment date
    pub min_lead_days: i32,
    /// Maximum days between today and the appointment date
    pub max_advance_days: i32,
    pub is_active: bool,
    pub display_order: i16,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl TimeSlotTemplate {
    pub fn contains_time(&self, time: NaiveTime) -> bool {
        time >= self.start_time && time < self.end_time
    }

    pub fn runs_on(&self, date: NaiveDate) -> bool {
        let weekday = date.weekday().num_days_from_sunday() as i32;
        self.available_days.contains(&weekday)
    }

    /// Why `date` is outside the slot's weekday and booking-window rules, as
    /// seen from `today`
    pub fn calendar_violation(&self, date: NaiveDate, today: NaiveDate) -> Option<String> {
        if !self.runs_on(date) {
            return Some(format!("{} is not offered on {}s", self.name, date.format("%A")));
        }
        let lead = date.signed_duration_since(today).num_days();
        if lead < i64::from(self.min_lead_days) {
            return Some(format!(
                "{} must be booked at least {} days in advance",
                self.name, self.min_lead_days
            ));
        }
        if lead > i64::from(self.max_advance_days) {
            return Some(format!(
                "{} cannot be booked more than {} days in advance",
                self.name, self.max_advance_days
            ));
        }
        None
    }
}

/// Every day of the week
pub fn all_weekdays() -> Vec<i32> {
    (0..7).collect()
}

pub const DEFAULT_MAX_ADVANCE_DAYS: i32 = 60;

/// Query parameters for the admin slot listing
#[derive(Debug, Default, Deserialize, IntoParams, ToSchema)]
pub struct SlotListQuery {
    /// Include deactivated templates
    pub include_inactive: Option<bool>,
}

/// Create slot template request
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateTimeSlot {
    #[validate(length(min = 1, max = 100))]
    pub name: String,
    #[validate(length(min = 1, max = 20))]
    pub code: String,
    /// Window start (HH:MM)
    pub start_time: String,
    /// Window end (HH:MM)
    pub end_time: String,
    #[validate(range(min = 0, max = 1000))]
    pub total_capacity: i32,
    #[schema(value_type = Option<String>)]
    pub additional_fee: Option<Decimal>,
    pub requires_signature: Option<bool>,
    pub allows_specific_time: Option<bool>,
    /// Weekdays offered (0 = Sunday), defaults to every day
    pub available_days: Option<Vec<i32>>,
    #[validate(range(min = 0, max = 365))]
    pub min_lead_days: Option<i32>,
    #[validate(range(min = 0, max = 730))]
    pub max_advance_days: Option<i32>,
    pub display_order: Option<i16>,
}

/// Update slot template request
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct UpdateTimeSlot {
    #[validate(length(min = 1, max = 100))]
    pub name: Option<String>,
    #[validate(length(min = 1, max = 20))]
    pub code: Option<String>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    #[validate(range(min = 0, max = 1000))]
    pub total_capacity: Option<i32>,
    #[schema(value_type = Option<String>)]
    pub additional_fee: Option<Decimal>,
    pub requires_signature: Option<bool>,
    pub allows_specific_time: Option<bool>,
    pub available_days: Option<Vec<i32>>,
    #[validate(range(min = 0, max = 365))]
    pub min_lead_days: Option<i32>,
    #[validate(range(min = 0, max = 730))]
    pub max_advance_days: Option<i32>,
    pub is_active: Option<bool>,
    pub display_order: Option<i16>,
}

/// Validated slot template fields, as written by the repository
#[derive(Debug, Clone)]
pub struct TimeSlotDraft {
    pub name: String,
    pub code: String,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub total_capacity: i32,
    pub additional_fee: Decimal,
    pub requires_signature: bool,
    pub allows_specific_time: bool,
    pub available_days: Vec<i32>,
    pub min_lead_days: i32,
    pub max_advance_days: i32,
    pub is_active: bool,
    pub display_order: i16,
}

// ---------------------------------------------------------------------------
// BlackoutRule
// ---------------------------------------------------------------------------

/// A date or date range on which some or all slots are not offered
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct BlackoutRule {
    pub id: i32,
    pub name: String,
    pub start_date: NaiveDate,
    /// Inclusive; equal to start_date for a single day
    pub end_date: NaiveDate,
    /// Affected slots, empty means the whole day
    pub slot_ids: Vec<i32>,
    /// Customer-facing message
    pub message: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

impl BlackoutRule {
    pub fn covers(&self, date: NaiveDate) -> bool {
        date >= self.start_date && date <= self.end_date
    }

    pub fn is_full_day(&self) -> bool {
        self.slot_ids.is_empty()
    }

    pub fn blocks(&self, date: NaiveDate, slot_id: i32) -> bool {
        self.covers(date) && (self.is_full_day() || self.slot_ids.contains(&slot_id))
    }
}

/// Create blackout request
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateBlackout {
    #[validate(length(min = 1, max = 100))]
    pub name: String,
    /// First blacked-out date (YYYY-MM-DD)
    pub start_date: String,
    /// Last blacked-out date (YYYY-MM-DD), defaults to start_date
    pub end_date: Option<String>,
    /// Affected slot IDs, omit or leave empty for all slots
    pub slot_ids: Option<Vec<i32>>,
    #[validate(length(max = 500))]
    pub message: Option<String>,
}

#[derive(Debug, Clone)]
pub struct BlackoutDraft {
    pub name: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub slot_ids: Vec<i32>,
    pub message: Option<String>,
}

/// Query parameters for blackout listing
#[derive(Debug, Deserialize, IntoParams, ToSchema)]
pub struct BlackoutQuery {
    /// Rules ending on or after this date (YYYY-MM-DD)
    pub start_date: Option<String>,
    /// Rules starting on or before this date (YYYY-MM-DD)
    pub end_date: Option<String>,
}
