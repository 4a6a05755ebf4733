//! Appointment (booking) model and related types

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use super::enums::text_enum;

text_enum! {
    /// Appointment lifecycle status
    AppointmentStatus {
        Scheduled => "scheduled",
        Completed => "completed",
        Cancelled => "cancelled",
        NoShow => "no_show",
    }
}

text_enum! {
    /// Where the delivery crew leaves or installs the order
    DeliveryLocation {
        FrontDoor => "front_door",
        BackDoor => "back_door",
        Garage => "garage",
        Reception => "reception",
        Mailroom => "mailroom",
        Other => "other",
    }
}

impl Default for DeliveryLocation {
    fn default() -> Self {
        DeliveryLocation::FrontDoor
    }
}

/// Which reminders the customer wants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, FromRow, ToSchema)]
#[serde(default)]
pub struct NotificationPrefs {
    #[sqlx(rename = "notify_day_before")]
    pub day_before: bool,
    #[sqlx(rename = "notify_day_of")]
    pub day_of: bool,
    #[sqlx(rename = "notify_one_hour_before")]
    pub one_hour_before: bool,
}

impl Default for NotificationPrefs {
    fn default() -> Self {
        Self {
            day_before: true,
            day_of: true,
            one_hour_before: true,
        }
    }
}

/// A confirmed booking of one order against one (date, slot)
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Appointment {
    pub id: i32,
    pub order_id: i32,
    pub service_date: NaiveDate,
    pub slot_id: i32,
    #[sqlx(try_from = "String")]
    pub status: AppointmentStatus,
    pub specific_time_requested: Option<NaiveTime>,
    #[sqlx(try_from = "String")]
    pub delivery_location: DeliveryLocation,
    pub access_instructions: Option<String>,
    pub alternate_recipient: Option<String>,
    pub alternate_phone: Option<String>,
    pub customer_notes: Option<String>,
    #[sqlx(flatten)]
    pub notification_prefs: NotificationPrefs,
    /// Ledger reservation currently held by this appointment
    #[serde(skip)]
    pub hold_token: Uuid,
    pub cancel_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Appointment {
    pub fn is_active(&self) -> bool {
        self.status == AppointmentStatus::Scheduled
    }
}

/// Customer-supplied booking details
#[derive(Debug, Clone, Default)]
pub struct BookingDetails {
    pub specific_time: Option<NaiveTime>,
    pub delivery_location: DeliveryLocation,
    pub access_instructions: Option<String>,
    pub alternate_recipient: Option<String>,
    pub alternate_phone: Option<String>,
    pub customer_notes: Option<String>,
    pub notification_prefs: NotificationPrefs,
}

/// Appointment row before it is persisted
#[derive(Debug, Clone)]
pub struct AppointmentDraft {
    pub order_id: i32,
    pub service_date: NaiveDate,
    pub slot_id: i32,
    pub details: BookingDetails,
}

/// Date, slot and delivery details of a booking request
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct BookingRequest {
    /// Service date (YYYY-MM-DD)
    pub date: String,
    pub slot_id: i32,
    /// Requested arrival time within the slot window (HH:MM)
    pub specific_time: Option<String>,
    #[serde(default)]
    pub delivery_location: DeliveryLocation,
    #[validate(length(max = 1000))]
    pub access_instructions: Option<String>,
    #[validate(length(max = 200))]
    pub alternate_recipient: Option<String>,
    #[validate(length(max = 50))]
    pub alternate_phone: Option<String>,
    #[validate(length(max = 1000))]
    pub customer_notes: Option<String>,
    #[serde(default)]
    pub notification_prefs: NotificationPrefs,
}

/// Create appointment request
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct CreateAppointment {
    pub order_id: i32,
    #[serde(flatten)]
    pub booking: BookingRequest,
}

/// Reschedule request
#[derive(Debug, Deserialize, ToSchema)]
pub struct RescheduleAppointment {
    /// New service date (YYYY-MM-DD)
    pub date: String,
    pub slot_id: i32,
}

/// Cancel request
#[derive(Debug, Default, Deserialize, Validate, ToSchema)]
pub struct CancelAppointment {
    #[validate(length(max = 500))]
    pub reason: Option<String>,
}

/// Outcome reported by the installer after the visit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum VisitOutcome {
    Completed,
    NoShow,
}

/// Installer status update request
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct UpdateAppointmentStatus {
    pub status: VisitOutcome,
    #[validate(length(max = 1000))]
    pub notes: Option<String>,
}
