//! Availability listing types

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use super::schedule::{BlackoutRule, TimeSlotTemplate};

/// One slot on one date
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SlotAvailability {
    pub slot: TimeSlotTemplate,
    pub available_capacity: i32,
    pub is_available: bool,
}

/// Offerable slots for one calendar day
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct DateAvailability {
    pub date: NaiveDate,
    /// 0 = Sunday .. 6 = Saturday
    pub day_of_week: u32,
    pub slots: Vec<SlotAvailability>,
    /// Rules covering this date, with their customer messages
    pub blackouts: Vec<BlackoutRule>,
    pub is_blacked_out: bool,
    /// False when every remaining slot is full, blocked or too soon
    pub has_availability: bool,
}

/// Query parameters for availability
#[derive(Debug, Deserialize, IntoParams, ToSchema)]
pub struct AvailabilityQuery {
    /// First date (YYYY-MM-DD)
    pub from: String,
    /// Last date, inclusive (YYYY-MM-DD)
    pub to: String,
    /// Service zip code
    pub zip: Option<String>,
}
