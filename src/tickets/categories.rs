/// Ticket categories
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
pub struct Category {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub icon: String,
    /// Default priority level for tickets in this category
    pub priority_level: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct NewCategory {
    #[validate(length(min = 1, max = 50))]
    pub name: String,
    #[serde(default)]
    #[validate(length(max = 200))]
    pub description: String,
    #[validate(length(min = 1, max = 50))]
    pub icon: Option<String>,
    #[serde(default)]
    #[validate(range(min = 0, max = 3))]
    pub priority_level: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct CategoryUpdate {
    #[validate(length(min = 1, max = 50))]
    pub name: Option<String>,
    #[validate(length(max = 200))]
    pub description: Option<String>,
    #[validate(length(min = 1, max = 50))]
    pub icon: Option<String>,
    #[validate(range(min = 0, max = 3))]
    pub priority_level: Option<i64>,
}

pub struct CategoryManager {
    db: SqlitePool,
    clock: SharedClock,
}

impl CategoryManager {
    pub fn new(db: SqlitePool, clock: SharedClock) -> Self {
        Self { db, clock }
    }

    pub async fn list(&self) -> DeskResult<Vec<Category>> {
        let rows = sqlx::query(
            "SELECT id, name, description, icon, priority_level, created_at
             FROM ticket_category ORDER BY name COLLATE NOCASE",
        )
        .fetch_all(&self.db)
        .await?;

        rows.iter().map(category_from_row).collect()
    }

    pub async fn get(&self, id: i64) -> DeskResult<Category> {
        let row = sqlx::query(
            "SELECT id, name, description, icon, priority_level, created_at
             FROM ticket_category WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| DeskError::NotFound(format!("Category {} not found", id)))?;

        category_from_row(&row)
    }

    pub async fn create(&self, actor: &Actor, req: NewCategory) -> DeskResult<Category> {
        actor.require_admin()?;
        req.validate()?;
        let name = req.name.trim();
        self.ensure_name_free(name, None).await?;

        let result = sqlx::query(
            "INSERT INTO ticket_category (name, description, icon, priority_level, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(name)
        .bind(req.description.trim())
        .bind(req.icon.as_deref().unwrap_or("tag"))
        .bind(req.priority_level)
        .bind(encode_ts(&self.clock.now()))
        .execute(&self.db)
        .await?;

        tracing::info!("Ticket category {} created by {}", name, actor.username);
        self.get(result.last_insert_rowid()).await
    }

    pub async fn update(
        &self,
        actor: &Actor,
        id: i64,
        update: CategoryUpdate,
    ) -> DeskResult<Category> {
        actor.require_admin()?;
        update.validate()?;
        let mut category = self.get(id).await?;

        if let Some(name) = update.name {
            let name = name.trim().to_string();
            self.ensure_name_free(&name, Some(id)).await?;
            category.name = name;
        }
        if let Some(description) = update.description {
            category.description = description.trim().to_string();
        }
        if let Some(icon) = update.icon {
            category.icon = icon;
        }
        if let Some(level) = update.priority_level {
            category.priority_level = level;
        }

        sqlx::query(
            "UPDATE ticket_category SET name = ?1, description = ?2, icon = ?3, priority_level = ?4
             WHERE id = ?5",
        )
        .bind(&category.name)
        .bind(&category.description)
        .bind(&category.icon)
        .bind(category.priority_level)
        .bind(id)
        .execute(&self.db)
        .await?;

        tracing::info!("Ticket category {} updated by {}", category.name, actor.username);
        Ok(category)
    }

    /// Delete a category no ticket uses
    pub async fn delete(&self, actor: &Actor, id: i64) -> DeskResult<()> {
        actor.require_admin()?;
        let mut tx = self.db.begin().await?;

        let name: String = sqlx::query_scalar("SELECT name FROM ticket_category WHERE id = ?1")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| DeskError::NotFound(format!("Category {} not found", id)))?;

        let in_use: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM ticket WHERE category_id = ?1")
            .bind(id)
            .fetch_one(&mut *tx)
            .await?;
        if in_use > 0 {
            return Err(DeskError::Conflict(format!(
                "Cannot delete category {}: {} ticket(s) use it",
                name, in_use
            )));
        }

        sqlx::query("DELETE FROM ticket_category WHERE id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        tracing::info!("Ticket category {} deleted by {}", name, actor.username);
        Ok(())
    }

    async fn ensure_name_free(&self, name: &str, except: Option<i64>) -> DeskResult<()> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM ticket_category WHERE name = ?1 COLLATE NOCASE AND id != ?2",
        )
        .bind(name)
        .bind(except.unwrap_or(-1))
        .fetch_one(&self.db)
        .await?;

        if count > 0 {
            return Err(DeskError::Conflict(format!("Category {} already exists", name)));
        }
        Ok(())
    }
}

fn category_from_row(row: &SqliteRow) -> DeskResult<Category> {
    let created_at: String = row.try_get("created_at")?;
    Ok(Category {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        icon: row.try_get("icon")?,
        priority_level: row.try_get("priority_level")?,
        created_at: decode_ts(&created_at)?,
    })
}
