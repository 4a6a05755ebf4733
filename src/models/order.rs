//! Fulfillment order and history models

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

use super::enums::text_enum;

text_enum! {
    /// Order-level fulfillment status
    FulfillmentStatus {
        Shipped => "shipped",
        PendingInstallation => "pending_installation",
        Scheduled => "scheduled",
        Diy => "diy",
        Installed => "installed",
        Cancelled => "cancelled",
    }
}

text_enum! {
    /// Kind of entry in an order's fulfillment history
    FulfillmentEventKind {
        Scheduled => "scheduled",
        Rescheduled => "rescheduled",
        Cancelled => "cancelled",
        MarkedDiy => "marked_diy",
        Installed => "installed",
        NoShow => "no_show",
    }
}

/// Order as seen by the scheduling core
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct FulfillmentOrder {
    pub id: i32,
    pub order_number: String,
    pub customer_id: i32,
    #[sqlx(try_from = "String")]
    pub status: FulfillmentStatus,
    /// Earliest bookable date (shipment date + lead time)
    pub ready_for_installation_date: NaiveDate,
    pub service_zip_code: String,
    /// Set once the order has been declined for professional installation
    pub diy_flagged: bool,
    pub diy_reason: Option<String>,
    pub customer_name: String,
    pub customer_email: Option<String>,
    pub customer_phone: Option<String>,
    pub shipped_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Order waiting for an installer to schedule it
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PendingOrder {
    #[serde(flatten)]
    pub order: FulfillmentOrder,
    pub has_appointment: bool,
}

/// Installer pending list filter
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum PendingFilter {
    #[default]
    Pending,
    Diy,
    All,
}

impl PendingFilter {
    /// Order statuses the filter selects
    pub fn statuses(&self) -> &'static [FulfillmentStatus] {
        match self {
            PendingFilter::Pending => &[FulfillmentStatus::Shipped, FulfillmentStatus::PendingInstallation],
            PendingFilter::Diy => &[FulfillmentStatus::Diy],
            PendingFilter::All => &[
                FulfillmentStatus::Shipped,
                FulfillmentStatus::PendingInstallation,
                FulfillmentStatus::Diy,
            ],
        }
    }
}

/// Query parameters for the installer pending list
#[derive(Debug, Deserialize, IntoParams, ToSchema)]
pub struct PendingOrdersQuery {
    pub filter: Option<PendingFilter>,
    /// Matches order number, customer name, email or phone
    pub search: Option<String>,
}

/// Mark-DIY request
#[derive(Debug, Default, Deserialize, Validate, ToSchema)]
pub struct MarkDiyRequest {
    #[validate(length(max = 500))]
    pub reason: Option<String>,
}

/// Installer pending list response
#[derive(Debug, Serialize, ToSchema)]
pub struct PendingOrdersResponse {
    pub orders: Vec<PendingOrder>,
    pub service_zip_codes: Vec<String>,
}

/// One transition in an order's fulfillment history
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct FulfillmentEvent {
    pub id: i64,
    pub order_id: i32,
    pub appointment_id: Option<i32>,
    #[sqlx(try_from = "String")]
    pub kind: FulfillmentEventKind,
    pub old_date: Option<NaiveDate>,
    pub old_slot_id: Option<i32>,
    pub new_date: Option<NaiveDate>,
    pub new_slot_id: Option<i32>,
    pub reason: Option<String>,
    pub actor_role: String,
    pub actor_id: i32,
    pub created_at: DateTime<Utc>,
}

/// History entry before it is persisted
#[derive(Debug, Clone)]
pub struct NewFulfillmentEvent {
    pub order_id: i32,
    pub appointment_id: Option<i32>,
    pub kind: FulfillmentEventKind,
    pub old_date: Option<NaiveDate>,
    pub old_slot_id: Option<i32>,
    pub new_date: Option<NaiveDate>,
    pub new_slot_id: Option<i32>,
    pub reason: Option<String>,
}

impl NewFulfillmentEvent {
    pub fn new(order_id: i32, kind: FulfillmentEventKind) -> Self {
        Self {
            order_id,
            appointment_id: None,
            kind,
            old_date: None,
            old_slot_id: None,
            new_date: None,
            new_slot_id: None,
            reason: None,
        }
    }

    pub fn appointment(mut self, appointment_id: i32) -> Self {
        self.appointment_id = Some(appointment_id);
        self
    }

    pub fn from_slot(mut self, date: NaiveDate, slot_id: i32) -> Self {
        self.old_date = Some(date);
        self.old_slot_id = Some(slot_id);
        self
    }

    pub fn to_slot(mut self, date: NaiveDate, slot_id: i32) -> Self {
        self.new_date = Some(date);
        self.new_slot_id = Some(slot_id);
        self
    }

    pub fn reason(mut self, reason: Option<String>) -> Self {
        self.reason = reason;
        self
    }
}
