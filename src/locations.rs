/// Work locations that schedules can be attached to
use crate::{
    account::Actor,
    clock::SharedClock,
    db::{decode_ts, encode_ts},
    error::{DeskError, DeskResult},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use validator::Validate;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Location {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct NewLocation {
    #[validate(length(min = 1, max = 100))]
    pub name: String,
    #[serde(default)]
    #[validate(length(max = 200))]
    pub description: String,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct LocationUpdate {
    #[validate(length(min = 1, max = 100))]
    pub name: Option<String>,
    #[validate(length(max = 200))]
    pub description: Option<String>,
    pub active: Option<bool>,
}

pub struct LocationManager {
    db: SqlitePool,
    clock: SharedClock,
}

impl LocationManager {
    pub fn new(db: SqlitePool, clock: SharedClock) -> Self {
        Self { db, clock }
    }

    /// Locations ordered by name; inactive ones only on request
    pub async fn list(&self, include_inactive: bool) -> DeskResult<Vec<Location>> {
        let rows = sqlx::query(
            "SELECT id, name, description, active, created_at, updated_at FROM location
             WHERE active = 1 OR ?1
             ORDER BY name COLLATE NOCASE",
        )
        .bind(include_inactive)
        .fetch_all(&self.db)
        .await?;

        rows.iter().map(location_from_row).collect()
    }

    pub async fn get(&self, id: i64) -> DeskResult<Location> {
        let row = sqlx::query(
            "SELECT id, name, description, active, created_at, updated_at FROM location WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| DeskError::NotFound(format!("Location {} not found", id)))?;

        location_from_row(&row)
    }

    pub async fn create(&self, actor: &Actor, req: NewLocation) -> DeskResult<Location> {
        actor.require_admin()?;
        req.validate()?;
        let name = req.name.trim();
        self.ensure_name_free(name, None).await?;

        let now = encode_ts(&self.clock.now());
        let result = sqlx::query(
            "INSERT INTO location (name, description, active, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)",
        )
        .bind(name)
        .bind(req.description.trim())
        .bind(req.active)
        .bind(&now)
        .execute(&self.db)
        .await?;

        tracing::info!("Location {} created by {}", name, actor.username);
        self.get(result.last_insert_rowid()).await
    }

    pub async fn update(
        &self,
        actor: &Actor,
        id: i64,
        update: LocationUpdate,
    ) -> DeskResult<Location> {
        actor.require_admin()?;
        update.validate()?;
        let mut location = self.get(id).await?;

        if let Some(name) = update.name {
            let name = name.trim().to_string();
            self.ensure_name_free(&name, Some(id)).await?;
            location.name = name;
        }
        if let Some(description) = update.description {
            location.description = description.trim().to_string();
        }
        if let Some(active) = update.active {
            location.active = active;
        }
        location.updated_at = self.clock.now();

        sqlx::query(
            "UPDATE location SET name = ?1, description = ?2, active = ?3, updated_at = ?4 WHERE id = ?5",
        )
        .bind(&location.name)
        .bind(&location.description)
        .bind(location.active)
        .bind(encode_ts(&location.updated_at))
        .bind(id)
        .execute(&self.db)
        .await?;

        tracing::info!("Location {} updated by {}", location.name, actor.username);
        Ok(location)
    }

    /// Delete a location that no schedule references
    pub async fn delete(&self, actor: &Actor, id: i64) -> DeskResult<()> {
        actor.require_admin()?;

        let mut tx = self.db.begin().await?;
        let name: String = sqlx::query_scalar("SELECT name FROM location WHERE id = ?1")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| DeskError::NotFound(format!("Location {} not found", id)))?;

        let in_use: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM schedule WHERE location_id = ?1")
            .bind(id)
            .fetch_one(&mut *tx)
            .await?;
        if in_use > 0 {
            return Err(DeskError::Conflict(format!(
                "Cannot delete location {}: it is used by {} schedule(s)",
                name, in_use
            )));
        }

        sqlx::query("DELETE FROM location WHERE id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        tracing::info!("Location {} deleted by {}", name, actor.username);
        Ok(())
    }

    async fn ensure_name_free(&self, name: &str, except: Option<i64>) -> DeskResult<()> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM location WHERE name = ?1 COLLATE NOCASE AND id != ?2",
        )
        .bind(name)
        .bind(except.unwrap_or(-1))
        .fetch_one(&self.db)
        .await?;

        if count > 0 {
            return Err(DeskError::Conflict(format!("Location {} already exists", name)));
        }
        Ok(())
    }
}

fn location_from_row(row: &SqliteRow) -> DeskResult<Location> {
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;
    Ok(Location {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        active: row.try_get("active")?,
        created_at: decode_ts(&created_at)?,
        updated_at: decode_ts(&updated_at)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::db::test_support::temp_pool;
    use chrono::TimeZone;
    use std::sync::Arc;

    fn admin() -> Actor {
        Actor {
            user_id: 1,
            username: "admin".to_string(),
            is_admin: true,
            timezone: chrono_tz::Tz::UTC,
        }
    }

    fn new_location(name: &str) -> NewLocation {
        NewLocation {
            name: name.to_string(),
            description: String::new(),
            active: true,
        }
    }

    async fn setup() -> (tempfile::TempDir, SqlitePool, LocationManager) {
        let (dir, pool) = temp_pool().await;
        let clock = Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()));
        let manager = LocationManager::new(pool.clone(), clock);
        (dir, pool, manager)
    }

    #[tokio::test]
    async fn test_create_and_list() {
        let (_dir, _pool, manager) = setup().await;
        manager.create(&admin(), new_location("Main Office")).await.unwrap();
        let annex = manager.create(&admin(), new_location("Annex")).await.unwrap();

        manager
            .update(
                &admin(),
                annex.id,
                LocationUpdate {
                    active: Some(false),
                    ..LocationUpdate::default()
                },
            )
            .await
            .unwrap();

        let active = manager.list(false).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].name, "Main Office");

        let all = manager.list(true).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].name, "Annex");
    }

    #[tokio::test]
    async fn test_duplicate_name_conflicts() {
        let (_dir, _pool, manager) = setup().await;
        manager.create(&admin(), new_location("Main Office")).await.unwrap();
        let result = manager.create(&admin(), new_location("main office")).await;
        assert!(matches!(result, Err(DeskError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_non_admin_forbidden() {
        let (_dir, _pool, manager) = setup().await;
        let mut actor = admin();
        actor.is_admin = false;
        let result = manager.create(&actor, new_location("Main Office")).await;
        assert!(matches!(result, Err(DeskError::Forbidden(_))));
    }

    #[tokio::test]
    async fn test_delete_guarded_while_referenced() {
        let (_dir, pool, manager) = setup().await;
        let location = manager.create(&admin(), new_location("Main Office")).await.unwrap();

        sqlx::query(
            "INSERT INTO users (username, email, password_hash, created_at)
             VALUES ('tech1', 'tech1@example.com', 'x', '2024-03-01T09:00:00Z')",
        )
        .execute(&pool)
        .await
        .unwrap();
        sqlx::query(
            "INSERT INTO schedule (technician_id, start_time, end_time, location_id, created_at)
             VALUES (1, '2024-03-04T15:00:00Z', '2024-03-04T23:00:00Z', ?1, '2024-03-01T09:00:00Z')",
        )
        .bind(location.id)
        .execute(&pool)
        .await
        .unwrap();

        let result = manager.delete(&admin(), location.id).await;
        assert!(matches!(result, Err(DeskError::Conflict(_))));

        sqlx::query("DELETE FROM schedule").execute(&pool).await.unwrap();
        manager.delete(&admin(), location.id).await.unwrap();
        assert!(matches!(
            manager.get(location.id).await,
            Err(DeskError::NotFound(_))
        ));
    }
}
