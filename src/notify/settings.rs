/// Notification recipient group and per-event toggles
use crate::{
    account::Actor,
    clock::SharedClock,
    db::{decode_ts, encode_ts},
    error::{DeskError, DeskResult},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqliteConnection, SqlitePool};
use validator::{Validate, ValidateEmail};

/// Recipient group used until an administrator sets one
pub const DEFAULT_ADMIN_GROUP: &str = "alerts@example.com";

/// The singleton settings row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailSettings {
    pub admin_email_group: String,
    pub notify_on_create: bool,
    pub notify_on_update: bool,
    pub notify_on_delete: bool,
    pub updated_at: DateTime<Utc>,
}

impl EmailSettings {
    /// Addresses in the admin group. Several may be given separated by
    /// commas or semicolons.
    pub fn admin_recipients(&self) -> Vec<String> {
        self.admin_email_group
            .split([',', ';'])
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct EmailSettingsUpdate {
    #[validate(length(min = 3, max = 500))]
    pub admin_email_group: Option<String>,
    pub notify_on_create: Option<bool>,
    pub notify_on_update: Option<bool>,
    pub notify_on_delete: Option<bool>,
}

/// Read the settings row, inserting defaults on first use
pub async fn load_settings(
    conn: &mut SqliteConnection,
    now: DateTime<Utc>,
) -> DeskResult<EmailSettings> {
    sqlx::query(
        "INSERT OR IGNORE INTO email_settings (id, admin_email_group, notify_on_create, notify_on_update, notify_on_delete, updated_at)
         VALUES (1, ?1, 1, 1, 1, ?2)",
    )
    .bind(DEFAULT_ADMIN_GROUP)
    .bind(encode_ts(&now))
    .execute(&mut *conn)
    .await?;

    let row = sqlx::query(
        "SELECT admin_email_group, notify_on_create, notify_on_update, notify_on_delete, updated_at
         FROM email_settings WHERE id = 1",
    )
    .fetch_one(&mut *conn)
    .await?;

    let updated_at: String = row.try_get("updated_at")?;
    Ok(EmailSettings {
        admin_email_group: row.try_get("admin_email_group")?,
        notify_on_create: row.try_get("notify_on_create")?,
        notify_on_update: row.try_get("notify_on_update")?,
        notify_on_delete: row.try_get("notify_on_delete")?,
        updated_at: decode_ts(&updated_at)?,
    })
}

/// Overwrite the settings row
pub async fn store_settings(
    conn: &mut SqliteConnection,
    settings: &EmailSettings,
) -> DeskResult<()> {
    sqlx::query(
        "INSERT INTO email_settings (id, admin_email_group, notify_on_create, notify_on_update, notify_on_delete, updated_at)
         VALUES (1, ?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(id) DO UPDATE SET
            admin_email_group = excluded.admin_email_group,
            notify_on_create = excluded.notify_on_create,
            notify_on_update = excluded.notify_on_update,
            notify_on_delete = excluded.notify_on_delete,
            updated_at = excluded.updated_at",
    )
    .bind(&settings.admin_email_group)
    .bind(settings.notify_on_create)
    .bind(settings.notify_on_update)
    .bind(settings.notify_on_delete)
    .bind(encode_ts(&settings.updated_at))
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Admin access to the settings singleton
pub struct EmailSettingsManager {
    db: SqlitePool,
    clock: SharedClock,
}

impl EmailSettingsManager {
    pub fn new(db: SqlitePool, clock: SharedClock) -> Self {
        Self { db, clock }
    }

    pub async fn get(&self) -> DeskResult<EmailSettings> {
        let mut conn = self.db.acquire().await?;
        load_settings(&mut conn, self.clock.now()).await
    }

    pub async fn update(
        &self,
        actor: &Actor,
        update: EmailSettingsUpdate,
    ) -> DeskResult<EmailSettings> {
        actor.require_admin()?;
        update.validate()?;

        let now = self.clock.now();
        let mut tx = self.db.begin().await?;
        let mut settings = load_settings(&mut tx, now).await?;

        if let Some(group) = update.admin_email_group {
            let group = group.trim().to_string();
            settings.admin_email_group = group;
            let recipients = settings.admin_recipients();
            if recipients.is_empty() {
                return Err(DeskError::Validation(
                    "Admin email group must contain at least one address".to_string(),
                ));
            }
            if let Some(bad) = recipients.iter().find(|r| !r.validate_email()) {
                return Err(DeskError::Validation(format!("Invalid email address: {}", bad)));
            }
        }
        if let Some(flag) = update.notify_on_create {
            settings.notify_on_create = flag;
        }
        if let Some(flag) = update.notify_on_update {
            settings.notify_on_update = flag;
        }
        if let Some(flag) = update.notify_on_delete {
            settings.notify_on_delete = flag;
        }
        settings.updated_at = now;

        store_settings(&mut tx, &settings).await?;
        tx.commit().await?;

        tracing::info!(
            "Email settings updated by {}: group={} create={} update={} delete={}",
            actor.username,
            settings.admin_email_group,
            settings.notify_on_create,
            settings.notify_on_update,
            settings.notify_on_delete
        );
        Ok(settings)
    }
}
