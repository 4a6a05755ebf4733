//! Order fulfillment state machine
//!
//! ```text
//! shipped ──┬─> pending_installation ──> scheduled ──> installed
//!           │            ^                  │  ^
//!           │            └──── cancel ──────┘  │
//!           └──────────> diy ── schedule ──────┘
//! ```
//!
//! Transitions are only applied by the scheduling service (or the installer's
//! completion event routed through it).

use crate::{
    error::{AppError, AppResult},
    models::order::{FulfillmentOrder, FulfillmentStatus},
};

/// Something that moves an order through its fulfillment lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FulfillmentTrigger {
    Schedule,
    Reschedule,
    CancelAppointment,
    NoShow,
    MarkDiy,
    MarkInstalled,
}

impl FulfillmentTrigger {
    fn describe(&self) -> &'static str {
        match self {
            FulfillmentTrigger::Schedule => "schedule an appointment for",
            FulfillmentTrigger::Reschedule => "reschedule",
            FulfillmentTrigger::CancelAppointment => "cancel the appointment of",
            FulfillmentTrigger::NoShow => "record a no-show for",
            FulfillmentTrigger::MarkDiy => "mark as DIY",
            FulfillmentTrigger::MarkInstalled => "mark as installed",
        }
    }
}

/// Target status for `trigger` from `current`, or `None` if the move is not allowed.
///
/// `diy_flagged` decides where an order falls back to when its appointment
/// goes away: orders an installer scheduled "anyway" return to `diy`.
pub fn next_status(
    current: FulfillmentStatus,
    diy_flagged: bool,
    trigger: FulfillmentTrigger,
) -> Option<FulfillmentStatus> {
    use FulfillmentStatus::*;
    use FulfillmentTrigger::*;

    let fallback = if diy_flagged { Diy } else { PendingInstallation };

    match (current, trigger) {
        (Shipped | PendingInstallation | Diy, Schedule) => Some(Scheduled),
        (Scheduled, Reschedule) => Some(Scheduled),
        (Scheduled, CancelAppointment | NoShow) => Some(fallback),
        (Shipped | PendingInstallation, MarkDiy) => Some(Diy),
        (Scheduled, MarkInstalled) => Some(Installed),
        _ => None,
    }
}

/// Like [`next_status`] but reports a rejected move as an order state conflict
pub fn transition(order: &FulfillmentOrder, trigger: FulfillmentTrigger) -> AppResult<FulfillmentStatus> {
    next_status(order.status, order.diy_flagged, trigger).ok_or_else(|| {
        AppError::state_conflict(
            order.id,
            order.status,
            format!("Cannot {} an order that is {}", trigger.describe(), order.status),
        )
    })
}
