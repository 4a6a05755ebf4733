//! Ledger consistency sweep
//!
//! Reclaims capacity held by reservations that no live appointment accounts
//! for (a crash between reserve and write, or a failed release), then recounts
//! every counter from the surviving holds.

use std::sync::Arc;

use chrono::Duration;

use crate::{
    clock::Clock, config::SchedulingConfig, error::AppResult, models::ledger::SweepReport,
    repository::Repository,
};

#[derive(Clone)]
pub struct ReconciliationService {
    repository: Repository,
    clock: Arc<dyn Clock>,
    config: SchedulingConfig,
}

impl ReconciliationService {
    pub fn new(repository: Repository, clock: Arc<dyn Clock>, config: SchedulingConfig) -> Self {
        Self { repository, clock, config }
    }

    pub async fn sweep(&self) -> AppResult<SweepReport> {
        let stale_before = self.clock.now() - Duration::seconds(self.config.reservation_ttl_seconds.max(0));
        let orphans = self.repository.ledger.orphaned_reservations(stale_before).await?;

        let mut report = SweepReport::default();
        for reservation in &orphans {
            match self.repository.ledger.release(reservation).await {
                Ok(true) => {
                    report.released += 1;
                    tracing::warn!(
                        token = %reservation.token,
                        date = %reservation.service_date,
                        slot_id = reservation.slot_id,
                        "Orphaned reservation released"
                    );
                }
                Ok(false) => {}
                Err(e) => tracing::warn!(
                    token = %reservation.token,
                    "Failed to release orphaned reservation: {}",
                    e
                ),
            }
        }

        report.resynced = self.repository.ledger.resync_counters().await?;

        if report.released > 0 || report.resynced > 0 {
            tracing::warn!(released = report.released, resynced = report.resynced, "Ledger reconciled");
        } else {
            tracing::debug!("Ledger consistent");
        }
        Ok(report)
    }
}
