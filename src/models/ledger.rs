//! Capacity ledger types

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

/// One unit of slot capacity held by the ledger
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct Reservation {
    pub token: Uuid,
    pub service_date: NaiveDate,
    pub slot_id: i32,
    pub created_at: DateTime<Utc>,
}

/// Booked counts per (date, slot) for a date range; missing keys mean zero
#[derive(Debug, Clone, Default)]
pub struct CapacitySnapshot {
    booked: HashMap<(NaiveDate, i32), i32>,
}

impl CapacitySnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, date: NaiveDate, slot_id: i32, booked: i32) {
        self.booked.insert((date, slot_id), booked);
    }

    pub fn booked(&self, date: NaiveDate, slot_id: i32) -> i32 {
        self.booked.get(&(date, slot_id)).copied().unwrap_or(0)
    }
}

impl FromIterator<(NaiveDate, i32, i32)> for CapacitySnapshot {
    fn from_iter<I: IntoIterator<Item = (NaiveDate, i32, i32)>>(iter: I) -> Self {
        let mut snapshot = Self::new();
        for (date, slot_id, booked) in iter {
            snapshot.set(date, slot_id, booked);
        }
        snapshot
    }
}

/// Outcome of a consistency sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct SweepReport {
    /// Orphaned holds released
    pub released: u64,
    /// Counters corrected to match live holds
    pub resynced: u64,
}
