/// Account manager implementation using runtime queries
use crate::{
    account::{
        hash_password, verify_password, Actor, NewUser, ReassignmentPlan, User, UserUpdate,
        DEFAULT_COLOR, SYSTEM_USERNAME,
    },
    clock::SharedClock,
    db::{decode_ts, encode_ts},
    error::{DeskError, DeskResult},
    timezone,
};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use rand::{distributions::Alphanumeric, Rng};
use sqlx::{sqlite::SqliteRow, Row, SqliteConnection, SqlitePool};
use validator::Validate;

const USER_COLUMNS: &str =
    "id, username, email, password_hash, is_admin, color, timezone, theme, is_system, created_at";

/// Account manager service
pub struct AccountManager {
    db: SqlitePool,
    default_tz: Tz,
    clock: SharedClock,
}

impl AccountManager {
    /// Create a new account manager
    pub fn new(db: SqlitePool, default_tz: Tz, clock: SharedClock) -> Self {
        Self {
            db,
            default_tz,
            clock,
        }
    }

    /// Process-wide fallback timezone
    pub fn default_tz(&self) -> Tz {
        self.default_tz
    }

    /// Create the first administrator if none exists yet
    pub async fn bootstrap_admin(
        &self,
        username: &str,
        email: &str,
        password: &str,
    ) -> DeskResult<Option<User>> {
        let admins: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE is_admin = 1 AND is_system = 0")
                .fetch_one(&self.db)
                .await?;
        if admins > 0 {
            return Ok(None);
        }

        let user = self
            .insert_user(NewUser {
                username: username.to_string(),
                email: email.to_string(),
                password: password.to_string(),
                is_admin: true,
                color: None,
                timezone: None,
                theme: None,
            })
            .await?;
        tracing::info!("Bootstrapped administrator account {}", user.username);
        Ok(Some(user))
    }

    /// Create a user (admin only)
    pub async fn create_user(&self, actor: &Actor, req: NewUser) -> DeskResult<User> {
        actor.require_admin()?;
        let user = self.insert_user(req).await?;
        tracing::info!(
            "Created user {} <{}> (admin: {}) by {}",
            user.username,
            user.email,
            user.is_admin,
            actor.username
        );
        Ok(user)
    }

    async fn insert_user(&self, req: NewUser) -> DeskResult<User> {
        req.validate()?;
        ensure_not_reserved(&req.username)?;

        let timezone = match req.timezone {
            Some(ref name) => timezone::validate_name(name)?.name().to_string(),
            None => self.default_tz.name().to_string(),
        };

        if self.username_taken(&req.username, None).await? {
            return Err(DeskError::Conflict(format!(
                "Username {} already taken",
                req.username
            )));
        }
        if self.email_taken(&req.email, None).await? {
            return Err(DeskError::Conflict("Email already registered".to_string()));
        }

        let password_hash = hash_password(&req.password)?;
        let now = self.clock.now();

        let result = sqlx::query(
            "INSERT INTO users (username, email, password_hash, is_admin, color, timezone, theme, is_system, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, ?8)",
        )
        .bind(req.username.trim())
        .bind(req.email.trim())
        .bind(&password_hash)
        .bind(req.is_admin)
        .bind(req.color.as_deref().unwrap_or(DEFAULT_COLOR))
        .bind(&timezone)
        .bind(req.theme.as_deref().unwrap_or("dark"))
        .bind(encode_ts(&now))
        .execute(&self.db)
        .await?;

        self.get_user(result.last_insert_rowid()).await
    }

    /// Edit a user. Admins may edit anyone; other users only themselves and
    /// never their own admin flag.
    pub async fn update_user(
        &self,
        actor: &Actor,
        user_id: i64,
        update: UserUpdate,
    ) -> DeskResult<User> {
        if !actor.is_admin && actor.user_id != user_id {
            return Err(DeskError::Forbidden(
                "You can only edit your own profile".to_string(),
            ));
        }
        if !actor.is_admin && update.is_admin.is_some() {
            return Err(DeskError::Forbidden(
                "Only administrators can change admin access".to_string(),
            ));
        }
        update.validate()?;

        let mut user = self.get_user(user_id).await?;

        if let Some(username) = update.username {
            if !username.trim().eq_ignore_ascii_case(&user.username) {
                ensure_not_reserved(&username)?;
            }
            if !username.eq_ignore_ascii_case(&user.username)
                && self.username_taken(&username, Some(user_id)).await?
            {
                return Err(DeskError::Conflict(format!(
                    "Username {} already taken",
                    username
                )));
            }
            user.username = username.trim().to_string();
        }
        if let Some(email) = update.email {
            if self.email_taken(&email, Some(user_id)).await? {
                return Err(DeskError::Conflict("Email already registered".to_string()));
            }
            user.email = email.trim().to_string();
        }
        if let Some(password) = update.password {
            user.password_hash = hash_password(&password)?;
        }
        if let Some(is_admin) = update.is_admin {
            user.is_admin = is_admin;
        }
        if let Some(color) = update.color {
            user.color = color;
        }
        if let Some(name) = update.timezone {
            user.timezone = timezone::validate_name(&name)?.name().to_string();
        }
        if let Some(theme) = update.theme {
            user.theme = theme;
        }

        sqlx::query(
            "UPDATE users SET username = ?1, email = ?2, password_hash = ?3, is_admin = ?4,
                    color = ?5, timezone = ?6, theme = ?7
             WHERE id = ?8",
        )
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.is_admin)
        .bind(&user.color)
        .bind(&user.timezone)
        .bind(&user.theme)
        .bind(user_id)
        .execute(&self.db)
        .await?;

        tracing::info!("User {} updated by {}", user.username, actor.username);
        Ok(user)
    }

    /// Change the acting user's display timezone
    pub async fn set_timezone(&self, actor: &Actor, name: &str) -> DeskResult<User> {
        self.update_user(
            actor,
            actor.user_id,
            UserUpdate {
                timezone: Some(name.to_string()),
                ..UserUpdate::default()
            },
        )
        .await
    }

    /// Change the acting user's password after checking the current one
    pub async fn change_password(
        &self,
        actor: &Actor,
        current_password: &str,
        new_password: &str,
    ) -> DeskResult<()> {
        let user = self.get_user(actor.user_id).await?;
        if !verify_password(current_password, &user.password_hash) {
            return Err(DeskError::Validation(
                "Current password is incorrect".to_string(),
            ));
        }
        self.update_user(
            actor,
            actor.user_id,
            UserUpdate {
                password: Some(new_password.to_string()),
                ..UserUpdate::default()
            },
        )
        .await?;
        Ok(())
    }

    /// Verify credentials. `identifier` is a username, or an email if it
    /// contains `@`; both match case-insensitively.
    pub async fn authenticate(&self, identifier: &str, password: &str) -> DeskResult<User> {
        let identifier = identifier.trim();
        let user = if identifier.contains('@') {
            self.find_by_email(identifier).await?
        } else {
            self.find_by_username(identifier).await?
        };

        let user = match user {
            Some(user) if !user.is_system => user,
            _ => {
                tracing::warn!("Login failed: no user found for {}", identifier);
                return Err(DeskError::Authentication(
                    "Invalid username/email or password".to_string(),
                ));
            }
        };

        if !verify_password(password, &user.password_hash) {
            tracing::warn!("Login failed: wrong password for {}", user.username);
            return Err(DeskError::Authentication(
                "Invalid username/email or password".to_string(),
            ));
        }

        tracing::info!("Successful login for {} ({})", user.username, user.email);
        Ok(user)
    }

    /// Get user by id
    pub async fn get_user(&self, user_id: i64) -> DeskResult<User> {
        let row = sqlx::query(&format!("SELECT {} FROM users WHERE id = ?1", USER_COLUMNS))
            .bind(user_id)
            .fetch_optional(&self.db)
            .await?
            .ok_or_else(|| DeskError::NotFound(format!("User {} not found", user_id)))?;

        user_from_row(&row)
    }

    /// Case-insensitive username lookup
    pub async fn find_by_username(&self, username: &str) -> DeskResult<Option<User>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM users WHERE username = ?1 COLLATE NOCASE",
            USER_COLUMNS
        ))
        .bind(username)
        .fetch_optional(&self.db)
        .await?;

        row.as_ref().map(user_from_row).transpose()
    }

    /// Case-insensitive email lookup
    pub async fn find_by_email(&self, email: &str) -> DeskResult<Option<User>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM users WHERE email = ?1 COLLATE NOCASE",
            USER_COLUMNS
        ))
        .bind(email)
        .fetch_optional(&self.db)
        .await?;

        row.as_ref().map(user_from_row).transpose()
    }

    /// All users ordered by username; the sentinel account is left out
    pub async fn list_users(&self) -> DeskResult<Vec<User>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM users WHERE is_system = 0 ORDER BY username COLLATE NOCASE",
            USER_COLUMNS
        ))
        .fetch_all(&self.db)
        .await?;

        rows.iter().map(user_from_row).collect()
    }

    /// Delete a user after reassigning everything that references them
    pub async fn delete_user(&self, actor: &Actor, user_id: i64) -> DeskResult<ReassignmentPlan> {
        actor.require_admin()?;
        if actor.user_id == user_id {
            return Err(DeskError::Forbidden(
                "Cannot delete your own account".to_string(),
            ));
        }

        let user = self.get_user(user_id).await?;
        if user.is_system {
            return Err(DeskError::Validation(
                "The System account cannot be deleted".to_string(),
            ));
        }

        let mut tx = self.db.begin().await?;
        let sentinel_id = ensure_system_user(&mut *tx, self.clock.now()).await?;
        let plan = ReassignmentPlan::build(&mut *tx, user_id, sentinel_id).await?;
        plan.execute(&mut *tx).await?;
        tx.commit().await?;

        tracing::info!(
            "User {} deleted by {}: {} schedules removed, {} tickets reassigned, {} unassigned",
            user.username,
            actor.username,
            plan.schedules_deleted,
            plan.tickets_reassigned,
            plan.tickets_unassigned
        );
        Ok(plan)
    }

    async fn username_taken(&self, username: &str, except: Option<i64>) -> DeskResult<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM users WHERE username = ?1 COLLATE NOCASE AND id != ?2",
        )
        .bind(username.trim())
        .bind(except.unwrap_or(-1))
        .fetch_one(&self.db)
        .await?;

        Ok(count > 0)
    }

    async fn email_taken(&self, email: &str, except: Option<i64>) -> DeskResult<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM users WHERE email = ?1 COLLATE NOCASE AND id != ?2",
        )
        .bind(email.trim())
        .bind(except.unwrap_or(-1))
        .fetch_one(&self.db)
        .await?;

        Ok(count > 0)
    }
}

/// Id of the sentinel "System" account, creating it if needed
pub(crate) async fn ensure_system_user(
    conn: &mut SqliteConnection,
    now: DateTime<Utc>,
) -> DeskResult<i64> {
    let existing: Option<i64> =
        sqlx::query_scalar("SELECT id FROM users WHERE is_system = 1 LIMIT 1")
            .fetch_optional(&mut *conn)
            .await?;
    if let Some(id) = existing {
        return Ok(id);
    }

    let username = free_sentinel_name(conn).await?;
    let unusable: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(48)
        .map(char::from)
        .collect();

    let result = sqlx::query(
        "INSERT INTO users (username, email, password_hash, is_admin, color, timezone, theme, is_system, created_at)
         VALUES (?1, ?2, ?3, 0, ?4, 'UTC', 'dark', 1, ?5)",
    )
    .bind(&username)
    .bind(format!(
        "{}@shiftdesk.invalid",
        username.to_lowercase().replace(' ', "-")
    ))
    .bind(hash_password(&unusable)?)
    .bind("#7f8c8d")
    .bind(encode_ts(&now))
    .execute(&mut *conn)
    .await?;

    tracing::info!("Created sentinel account {}", username);
    Ok(result.last_insert_rowid())
}

/// `System`, or `System 2`, `System 3`... when older data already holds the
/// name. Existing accounts are never taken over.
async fn free_sentinel_name(conn: &mut SqliteConnection) -> DeskResult<String> {
    let mut suffix = 1;
    loop {
        let candidate = if suffix == 1 {
            SYSTEM_USERNAME.to_string()
        } else {
            format!("{} {}", SYSTEM_USERNAME, suffix)
        };
        let taken: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE username = ?1 COLLATE NOCASE")
                .bind(&candidate)
                .fetch_one(&mut *conn)
                .await?;
        if taken == 0 {
            return Ok(candidate);
        }
        suffix += 1;
    }
}

fn ensure_not_reserved(username: &str) -> DeskResult<()> {
    if username.trim().eq_ignore_ascii_case(SYSTEM_USERNAME) {
        return Err(DeskError::Validation(format!(
            "The username {} is reserved",
            SYSTEM_USERNAME
        )));
    }
    Ok(())
}

pub(crate) fn user_from_row(row: &SqliteRow) -> DeskResult<User> {
    let created_at: String = row.try_get("created_at")?;
    Ok(User {
        id: row.try_get("id")?,
        username: row.try_get("username")?,
        email: row.try_get("email")?,
        password_hash: row.try_get("password_hash")?,
        is_admin: row.try_get("is_admin")?,
        color: row.try_get("color")?,
        timezone: row.try_get("timezone")?,
        theme: row.try_get("theme")?,
        is_system: row.try_get("is_system")?,
        created_at: decode_ts(&created_at)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::db::test_support::temp_pool;
    use chrono::TimeZone;
    use std::sync::Arc;
    use tempfile::TempDir;

    async fn create_test_manager() -> (TempDir, AccountManager) {
        let (dir, pool) = temp_pool().await;
        let clock = Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()));
        (dir, AccountManager::new(pool, chrono_tz::America::Los_Angeles, clock))
    }

    fn new_user(username: &str, email: &str) -> NewUser {
        NewUser {
            username: username.to_string(),
            email: email.to_string(),
            password: "password123".to_string(),
            is_admin: false,
            color: None,
            timezone: Some("America/Chicago".to_string()),
            theme: None,
        }
    }

    async fn admin(manager: &AccountManager) -> Actor {
        let user = manager
            .bootstrap_admin("admin", "admin@example.com", "adminpass")
            .await
            .unwrap()
            .unwrap();
        Actor::from_user(&user, manager.default_tz())
    }

    #[tokio::test]
    async fn test_bootstrap_admin_only_once() {
        let (_dir, manager) = create_test_manager().await;
        let first = manager
            .bootstrap_admin("admin", "admin@example.com", "adminpass")
            .await
            .unwrap();
        assert!(first.is_some());
        assert!(first.unwrap().is_admin);

        let second = manager
            .bootstrap_admin("other", "other@example.com", "adminpass")
            .await
            .unwrap();
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn test_create_user_requires_admin() {
        let (_dir, manager) = create_test_manager().await;
        let admin = admin(&manager).await;
        let tech = manager
            .create_user(&admin, new_user("tech1", "tech1@example.com"))
            .await
            .unwrap();
        assert_eq!(tech.timezone, "America/Chicago");
        assert_eq!(tech.color, DEFAULT_COLOR);

        let tech_actor = Actor::from_user(&tech, manager.default_tz());
        let result = manager
            .create_user(&tech_actor, new_user("tech2", "tech2@example.com"))
            .await;
        assert!(matches!(result, Err(DeskError::Forbidden(_))));
    }

    #[tokio::test]
    async fn test_username_and_email_unique_case_insensitive() {
        let (_dir, manager) = create_test_manager().await;
        let admin = admin(&manager).await;
        manager
            .create_user(&admin, new_user("tech1", "tech1@example.com"))
            .await
            .unwrap();

        let dup_name = manager
            .create_user(&admin, new_user("TECH1", "someone@example.com"))
            .await;
        assert!(matches!(dup_name, Err(DeskError::Conflict(_))));

        let dup_email = manager
            .create_user(&admin, new_user("tech9", "Tech1@Example.com"))
            .await;
        assert!(matches!(dup_email, Err(DeskError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_create_user_validation() {
        let (_dir, manager) = create_test_manager().await;
        let admin = admin(&manager).await;

        let mut bad_email = new_user("tech1", "not-an-email");
        assert!(matches!(
            manager.create_user(&admin, bad_email.clone()).await,
            Err(DeskError::Validation(_))
        ));

        bad_email.email = "tech1@example.com".to_string();
        bad_email.timezone = Some("Atlantis/Capital".to_string());
        assert!(matches!(
            manager.create_user(&admin, bad_email).await,
            Err(DeskError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_authenticate_by_username_or_email() {
        let (_dir, manager) = create_test_manager().await;
        let admin = admin(&manager).await;
        manager
            .create_user(&admin, new_user("Tech1", "tech1@example.com"))
            .await
            .unwrap();

        let by_name = manager.authenticate("tech1", "password123").await.unwrap();
        assert_eq!(by_name.username, "Tech1");

        let by_email = manager
            .authenticate("TECH1@EXAMPLE.COM", "password123")
            .await
            .unwrap();
        assert_eq!(by_email.id, by_name.id);

        let wrong = manager.authenticate("tech1", "nope").await;
        assert!(matches!(wrong, Err(DeskError::Authentication(_))));

        let missing = manager.authenticate("ghost", "password123").await;
        assert!(matches!(missing, Err(DeskError::Authentication(_))));
    }

    #[tokio::test]
    async fn test_non_admin_cannot_promote_self() {
        let (_dir, manager) = create_test_manager().await;
        let admin = admin(&manager).await;
        let tech = manager
            .create_user(&admin, new_user("tech1", "tech1@example.com"))
            .await
            .unwrap();
        let actor = Actor::from_user(&tech, manager.default_tz());

        let result = manager
            .update_user(
                &actor,
                tech.id,
                UserUpdate {
                    is_admin: Some(true),
                    ..UserUpdate::default()
                },
            )
            .await;
        assert!(matches!(result, Err(DeskError::Forbidden(_))));

        let updated = manager.set_timezone(&actor, "Europe/London").await.unwrap();
        assert_eq!(updated.timezone, "Europe/London");

        let invalid = manager.set_timezone(&actor, "Europe/Gondor").await;
        assert!(matches!(invalid, Err(DeskError::Validation(_))));
    }

    #[tokio::test]
    async fn test_change_password() {
        let (_dir, manager) = create_test_manager().await;
        let admin = admin(&manager).await;
        let tech = manager
            .create_user(&admin, new_user("tech1", "tech1@example.com"))
            .await
            .unwrap();
        let actor = Actor::from_user(&tech, manager.default_tz());

        assert!(manager
            .change_password(&actor, "wrong", "newpassword")
            .await
            .is_err());
        manager
            .change_password(&actor, "password123", "newpassword")
            .await
            .unwrap();
        assert!(manager.authenticate("tech1", "newpassword").await.is_ok());
    }

    #[tokio::test]
    async fn test_cannot_delete_self() {
        let (_dir, manager) = create_test_manager().await;
        let admin = admin(&manager).await;
        let result = manager.delete_user(&admin, admin.user_id).await;
        assert!(matches!(result, Err(DeskError::Forbidden(_))));
    }

    #[tokio::test]
    async fn test_delete_user_runs_reassignment_plan() {
        let (_dir, manager) = create_test_manager().await;
        let admin = admin(&manager).await;
        let tech = manager
            .create_user(&admin, new_user("tech1", "tech1@example.com"))
            .await
            .unwrap();

        // Seed dependent rows directly
        sqlx::query(
            "INSERT INTO ticket_category (name, created_at)
             VALUES ('Network', '2024-03-01T12:00:00Z')",
        )
        .execute(&manager.db)
        .await
        .unwrap();
        sqlx::query(
            "INSERT INTO schedule (technician_id, start_time, end_time, created_at)
             VALUES (?1, '2024-03-04T15:00:00Z', '2024-03-04T23:00:00Z', '2024-03-01T12:00:00Z')",
        )
        .bind(tech.id)
        .execute(&manager.db)
        .await
        .unwrap();
        sqlx::query(
            "INSERT INTO ticket (title, description, category_id, created_by, assigned_to, created_at, updated_at)
             VALUES ('Printer', 'Jammed', 1, ?1, NULL, '2024-03-01T12:00:00Z', '2024-03-01T12:00:00Z'),
                    ('VPN', 'Down', 1, ?2, ?1, '2024-03-01T12:00:00Z', '2024-03-01T12:00:00Z')",
        )
        .bind(tech.id)
        .bind(admin.user_id)
        .execute(&manager.db)
        .await
        .unwrap();
        sqlx::query(
            "INSERT INTO ticket_history (ticket_id, user_id, action, created_at)
             VALUES (1, ?1, 'created', '2024-03-01T12:00:00Z')",
        )
        .bind(tech.id)
        .execute(&manager.db)
        .await
        .unwrap();

        let plan = manager.delete_user(&admin, tech.id).await.unwrap();
        assert_eq!(plan.schedules_deleted, 1);
        assert_eq!(plan.tickets_reassigned, 1);
        assert_eq!(plan.tickets_unassigned, 1);
        assert_eq!(plan.history_reassigned, 1);
        assert_eq!(plan.comments_reassigned, 0);

        assert!(matches!(
            manager.get_user(tech.id).await,
            Err(DeskError::NotFound(_))
        ));

        let system = manager.find_by_username("system").await.unwrap().unwrap();
        assert!(system.is_system);
        assert_eq!(plan.sentinel_id, system.id);

        let creator: i64 = sqlx::query_scalar("SELECT created_by FROM ticket WHERE id = 1")
            .fetch_one(&manager.db)
            .await
            .unwrap();
        assert_eq!(creator, system.id);

        let assignee: Option<i64> =
            sqlx::query_scalar("SELECT assigned_to FROM ticket WHERE id = 2")
                .fetch_one(&manager.db)
                .await
                .unwrap();
        assert!(assignee.is_none());

        // The sentinel never shows up as a regular user and cannot log in
        assert!(manager.list_users().await.unwrap().iter().all(|u| !u.is_system));
        assert!(manager.authenticate("System", "anything").await.is_err());
    }

    /// Inserts an ordinary account holding the sentinel name, as older data may
    async fn legacy_system_named_user(manager: &AccountManager, is_admin: bool) -> i64 {
        sqlx::query(
            "INSERT INTO users (username, email, password_hash, is_admin, color, timezone, theme,
                                is_system, created_at)
             VALUES ('system', 'ops@example.com', ?1, ?2, '#3498db', 'UTC', 'dark', 0,
                     '2024-03-01T12:00:00Z')",
        )
        .bind(hash_password("legacypass").unwrap())
        .bind(is_admin)
        .execute(&manager.db)
        .await
        .unwrap()
        .last_insert_rowid()
    }

    #[tokio::test]
    async fn test_sentinel_username_is_reserved() {
        let (_dir, manager) = create_test_manager().await;
        let admin = admin(&manager).await;

        let created = manager
            .create_user(&admin, new_user(" SYSTEM ", "sys@example.com"))
            .await;
        assert!(matches!(created, Err(DeskError::Validation(_))));

        let tech = manager
            .create_user(&admin, new_user("tech1", "tech1@example.com"))
            .await
            .unwrap();
        let renamed = manager
            .update_user(
                &admin,
                tech.id,
                UserUpdate {
                    username: Some("System".to_string()),
                    ..UserUpdate::default()
                },
            )
            .await;
        assert!(matches!(renamed, Err(DeskError::Validation(_))));
    }

    #[tokio::test]
    async fn test_delete_leaves_account_named_system_alone() {
        let (_dir, manager) = create_test_manager().await;
        let admin = admin(&manager).await;
        let legacy_id = legacy_system_named_user(&manager, true).await;
        let tech = manager
            .create_user(&admin, new_user("tech1", "tech1@example.com"))
            .await
            .unwrap();

        let plan = manager.delete_user(&admin, tech.id).await.unwrap();
        assert_ne!(plan.sentinel_id, legacy_id);

        let legacy = manager.get_user(legacy_id).await.unwrap();
        assert!(legacy.is_admin);
        assert!(!legacy.is_system);
        assert_eq!(
            manager.authenticate("system", "legacypass").await.unwrap().id,
            legacy_id
        );

        let sentinel = manager.get_user(plan.sentinel_id).await.unwrap();
        assert!(sentinel.is_system);
        assert_eq!(sentinel.username, "System 2");
    }

    #[tokio::test]
    async fn test_delete_account_named_system() {
        let (_dir, manager) = create_test_manager().await;
        let admin = admin(&manager).await;
        let legacy_id = legacy_system_named_user(&manager, false).await;

        sqlx::query(
            "INSERT INTO ticket_category (name, created_at)
             VALUES ('Network', '2024-03-01T12:00:00Z')",
        )
        .execute(&manager.db)
        .await
        .unwrap();
        sqlx::query(
            "INSERT INTO ticket (title, description, category_id, created_by, created_at, updated_at)
             VALUES ('Printer', 'Jammed', 1, ?1, '2024-03-01T12:00:00Z', '2024-03-01T12:00:00Z')",
        )
        .bind(legacy_id)
        .execute(&manager.db)
        .await
        .unwrap();

        let plan = manager.delete_user(&admin, legacy_id).await.unwrap();
        assert_ne!(plan.sentinel_id, legacy_id);
        assert_eq!(plan.tickets_reassigned, 1);

        assert!(matches!(
            manager.get_user(legacy_id).await,
            Err(DeskError::NotFound(_))
        ));
        let creator: i64 = sqlx::query_scalar("SELECT created_by FROM ticket WHERE id = 1")
            .fetch_one(&manager.db)
            .await
            .unwrap();
        assert_eq!(creator, plan.sentinel_id);
    }

    #[tokio::test]
    async fn test_plan_rejects_reassigning_to_deleted_user() {
        let (_dir, manager) = create_test_manager().await;
        let admin = admin(&manager).await;
        let mut conn = manager.db.acquire().await.unwrap();

        let plan = ReassignmentPlan::build(&mut conn, admin.user_id, admin.user_id).await;
        assert!(matches!(plan, Err(DeskError::Validation(_))));
    }
}
