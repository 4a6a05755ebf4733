//! Installer work queue

use std::sync::Arc;

use crate::{
    clock::Clock,
    config::SchedulingConfig,
    error::AppResult,
    models::order::{PendingFilter, PendingOrdersResponse},
    repository::Repository,
};

#[derive(Clone)]
pub struct InstallerService {
    repository: Repository,
    clock: Arc<dyn Clock>,
    config: SchedulingConfig,
}

impl InstallerService {
    pub fn new(repository: Repository, clock: Arc<dyn Clock>, config: SchedulingConfig) -> Self {
        Self { repository, clock, config }
    }

    /// Orders in the installer's zip codes that are ready to be scheduled
    pub async fn pending_orders(
        &self,
        installer_id: i32,
        filter: PendingFilter,
        search: Option<&str>,
    ) -> AppResult<PendingOrdersResponse> {
        let service_zip_codes = self.repository.orders.installer_zip_codes(installer_id).await?;
        let today = self.clock.today(self.config.local_offset());

        let orders = self
            .repository
            .orders
            .list_pending(&service_zip_codes, filter, search, today)
            .await?;

        Ok(PendingOrdersResponse {
            orders,
            service_zip_codes,
        })
    }
}
