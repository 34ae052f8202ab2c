use std::sync::Arc;
use tokio::time::{interval, Duration};
use tracing::{error, info};

pub mod tasks;

/// Job scheduler for background tasks
pub struct JobScheduler {
    context: Arc<crate::context::AppContext>,
}

impl JobScheduler {
    pub fn new(context: Arc<crate::context::AppContext>) -> Self {
        Self { context }
    }

    /// Start all background jobs
    pub fn start(self: Arc<Self>) {
        info!("Starting background job scheduler");

        if self.context.config.backup.enabled {
            tokio::spawn(Self::backup_job(Arc::clone(&self)));
        } else {
            info!("Automated backups are disabled");
        }

        tokio::spawn(Self::health_check_job(Arc::clone(&self)));

        info!("Background jobs started");
    }

    /// Write a JSON backup and prune old ones (runs every `interval_hours`)
    async fn backup_job(scheduler: Arc<Self>) {
        let config = &scheduler.context.config.backup;
        info!(
            "Starting backup job (interval: {} hours, retention: {} days)",
            config.interval_hours, config.retain_days
        );

        let mut interval = interval(Duration::from_secs(config.interval_hours.max(1) * 3600));

        loop {
            interval.tick().await;
            info!("Running scheduled backup");

            match tasks::run_backup(&scheduler.context).await {
                Ok((path, pruned)) => {
                    info!("Scheduled backup written to {:?}", path);
                    if pruned > 0 {
                        info!("Pruned {} old backups", pruned);
                    }
                }
                Err(e) => error!("Scheduled backup failed: {}", e),
            }
        }
    }

    /// Health check job (runs every 5 minutes)
    async fn health_check_job(scheduler: Arc<Self>) {
        let mut interval = interval(Duration::from_secs(300));

        loop {
            interval.tick().await;

            if let Err(e) = tasks::health_check(&scheduler.context).await {
                error!("Health check failed: {}", e);
            }
        }
    }
}
