//! Time source for booking rules

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, Utc};

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// Wall-clock time in the service territory
    fn local_now(&self, offset: FixedOffset) -> NaiveDateTime {
        self.now().with_timezone(&offset).naive_local()
    }

    fn today(&self, offset: FixedOffset) -> NaiveDate {
        self.local_now(offset).date()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock pinned to one instant
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}
