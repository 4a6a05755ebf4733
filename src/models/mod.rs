//! Data models for the scheduling server

pub mod appointment;
pub mod availability;
pub mod enums;
pub mod ledger;
pub mod order;
pub mod schedule;
pub mod user;

// Re-export commonly used types
pub use appointment::{Appointment, AppointmentStatus, BookingDetails, DeliveryLocation, NotificationPrefs};
pub use availability::{DateAvailability, SlotAvailability};
pub use ledger::{CapacitySnapshot, Reservation, SweepReport};
pub use order::{FulfillmentEvent, FulfillmentEventKind, FulfillmentOrder, FulfillmentStatus};
pub use schedule::{BlackoutRule, TimeSlotTemplate};
pub use user::{Actor, Role, UserClaims};
