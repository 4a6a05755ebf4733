//! Business logic services

pub mod availability;
pub mod fulfillment;
pub mod installer;
pub mod notifications;
pub mod reconciliation;
pub mod redis;
pub mod retry;
pub mod scheduling;
pub mod schedules;

use std::sync::Arc;

use crate::{clock::Clock, config::SchedulingConfig, repository::Repository};

use notifications::{Notifier, ReminderScheduler};

/// Container for all services
#[derive(Clone)]
pub struct Services {
    pub availability: availability::AvailabilityService,
    pub scheduling: scheduling::SchedulingService,
    pub installer: installer::InstallerService,
    pub schedules: schedules::SchedulesService,
    pub reconciliation: reconciliation::ReconciliationService,
}

impl Services {
    /// Create all services over one repository, reminder port and clock
    pub fn new(
        repository: Repository,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        config: SchedulingConfig,
    ) -> Self {
        let reminders = ReminderScheduler::new(notifier, clock.clone(), &config);
        Self {
            availability: availability::AvailabilityService::new(repository.clone(), clock.clone(), config.clone()),
            scheduling: scheduling::SchedulingService::new(
                repository.clone(),
                reminders,
                clock.clone(),
                config.clone(),
            ),
            installer: installer::InstallerService::new(repository.clone(), clock.clone(), config.clone()),
            schedules: schedules::SchedulesService::new(repository.clone(), clock.clone(), config.clone()),
            reconciliation: reconciliation::ReconciliationService::new(repository, clock, config),
        }
    }
}
