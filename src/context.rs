/// Application context and dependency injection
use crate::{
    account::AccountManager,
    backup::BackupManager,
    clock::{SharedClock, SystemClock},
    config::ServerConfig,
    db,
    error::{DeskError, DeskResult},
    locations::LocationManager,
    mailer::{EmailTransport, Mailer},
    notify::{EmailSettingsManager, NotificationDispatcher},
    quick_links::QuickLinkManager,
    schedule::ScheduleManager,
    tickets::{CategoryManager, TicketManager},
};
use sqlx::SqlitePool;
use std::sync::Arc;

/// Application context holding all shared services
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<ServerConfig>,
    pub db: SqlitePool,
    pub clock: SharedClock,
    pub account_manager: Arc<AccountManager>,
    pub location_manager: Arc<LocationManager>,
    pub schedule_manager: Arc<ScheduleManager>,
    pub ticket_manager: Arc<TicketManager>,
    pub category_manager: Arc<CategoryManager>,
    pub quick_link_manager: Arc<QuickLinkManager>,
    pub email_settings_manager: Arc<EmailSettingsManager>,
    pub backup_manager: Arc<BackupManager>,
    pub dispatcher: Arc<NotificationDispatcher>,
}

impl AppContext {
    /// Create a new application context from configuration
    pub async fn new(config: ServerConfig) -> DeskResult<Self> {
        config.validate()?;

        Self::ensure_directories(&config).await?;

        let pool = db::create_pool(&config.storage.database, db::DatabaseOptions::default()).await?;
        db::run_migrations(&pool).await?;
        db::test_connection(&pool).await?;

        let mailer = Mailer::new(config.email.clone())?;
        if !mailer.is_configured() {
            tracing::warn!("Email is not configured; notifications will be logged as failed");
        }

        Ok(Self::from_parts(
            config,
            pool,
            Arc::new(SystemClock),
            Arc::new(mailer),
        ))
    }

    /// Wire every service over an existing pool, clock and email transport
    pub fn from_parts(
        config: ServerConfig,
        db: SqlitePool,
        clock: SharedClock,
        transport: Arc<dyn EmailTransport>,
    ) -> Self {
        let default_tz = config.default_timezone();

        let dispatcher = Arc::new(NotificationDispatcher::new(
            db.clone(),
            transport,
            clock.clone(),
        ));

        let account_manager = Arc::new(AccountManager::new(db.clone(), default_tz, clock.clone()));
        let location_manager = Arc::new(LocationManager::new(db.clone(), clock.clone()));
        let schedule_manager = Arc::new(ScheduleManager::new(
            db.clone(),
            dispatcher.clone(),
            clock.clone(),
            default_tz,
        ));
        let ticket_manager = Arc::new(TicketManager::new(
            db.clone(),
            dispatcher.clone(),
            clock.clone(),
        ));
        let category_manager = Arc::new(CategoryManager::new(db.clone(), clock.clone()));
        let quick_link_manager = Arc::new(QuickLinkManager::new(db.clone(), clock.clone()));
        let email_settings_manager = Arc::new(EmailSettingsManager::new(db.clone(), clock.clone()));
        let backup_manager = Arc::new(BackupManager::new(db.clone(), clock.clone(), default_tz));

        Self {
            config: Arc::new(config),
            db,
            clock,
            account_manager,
            location_manager,
            schedule_manager,
            ticket_manager,
            category_manager,
            quick_link_manager,
            email_settings_manager,
            backup_manager,
            dispatcher,
        }
    }

    /// Ensure required directories exist
    async fn ensure_directories(config: &ServerConfig) -> DeskResult<()> {
        let mut dirs = vec![&config.storage.data_directory];
        if config.backup.enabled {
            dirs.push(&config.backup.backup_dir);
        }

        for dir in dirs {
            if !dir.exists() {
                tokio::fs::create_dir_all(dir).await.map_err(|e| {
                    DeskError::Internal(format!("Failed to create directory {:?}: {}", dir, e))
                })?;
            }
        }

        Ok(())
    }

    /// Get service URL
    pub fn service_url(&self) -> String {
        format!(
            "http://{}:{}",
            self.config.service.hostname, self.config.service.port
        )
    }
}
