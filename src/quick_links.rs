/// Admin-curated shortcut links shown in the navigation
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

/// Offset applied to every link before renumbering
const REORDER_OFFSET: i64 = 10_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuickLink {
    pub id: i64,
    pub title: String,
    pub url: String,
    pub icon: String,
    pub category: String,
    pub display_order: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct QuickLinkInput {
    #[validate(length(min = 1, max = 100))]
    pub title: String,
    #[validate(url, length(max = 500))]
    pub url: String,
    #[validate(length(min = 1, max = 50))]
    pub icon: Option<String>,
    #[validate(length(min = 1, max = 100))]
    pub category: String,
    #[serde(default)]
    pub display_order: i64,
}

/// New position for one link
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LinkPosition {
    pub id: i64,
    pub order: i64,
}

pub struct QuickLinkManager {
    db: SqlitePool,
    clock: SharedClock,
}

impl QuickLinkManager {
    pub fn new(db: SqlitePool, clock: SharedClock) -> Self {
        Self { db, clock }
    }

    /// All links by display order, then category
    pub async fn list(&self) -> DeskResult<Vec<QuickLink>> {
        let rows = sqlx::query(
            "SELECT id, title, url, icon, category, display_order, created_at, updated_at
             FROM quick_link ORDER BY display_order, category, id",
        )
        .fetch_all(&self.db)
        .await?;

        rows.iter().map(link_from_row).collect()
    }

    pub async fn get(&self, id: i64) -> DeskResult<QuickLink> {
        let row = sqlx::query(
            "SELECT id, title, url, icon, category, display_order, created_at, updated_at
             FROM quick_link WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| DeskError::NotFound(format!("Quick link {} not found", id)))?;

        link_from_row(&row)
    }

    pub async fn create(&self, actor: &Actor, input: QuickLinkInput) -> DeskResult<QuickLink> {
        actor.require_admin()?;
        input.validate()?;

        let now = encode_ts(&self.clock.now());
        let result = sqlx::query(
            "INSERT INTO quick_link (title, url, icon, category, display_order, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
        )
        .bind(input.title.trim())
        .bind(input.url.trim())
        .bind(input.icon.as_deref().unwrap_or("link"))
        .bind(input.category.trim())
        .bind(input.display_order)
        .bind(&now)
        .execute(&self.db)
        .await?;

        tracing::info!("Quick link {} created by {}", input.title, actor.username);
        self.get(result.last_insert_rowid()).await
    }

    pub async fn update(
        &self,
        actor: &Actor,
        id: i64,
        input: QuickLinkInput,
    ) -> DeskResult<QuickLink> {
        actor.require_admin()?;
        input.validate()?;

        let result = sqlx::query(
            "UPDATE quick_link SET title = ?1, url = ?2, icon = ?3, category = ?4,
                    display_order = ?5, updated_at = ?6
             WHERE id = ?7",
        )
        .bind(input.title.trim())
        .bind(input.url.trim())
        .bind(input.icon.as_deref().unwrap_or("link"))
        .bind(input.category.trim())
        .bind(input.display_order)
        .bind(encode_ts(&self.clock.now()))
        .bind(id)
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DeskError::NotFound(format!("Quick link {} not found", id)));
        }

        tracing::info!("Quick link {} updated by {}", id, actor.username);
        self.get(id).await
    }

    pub async fn delete(&self, actor: &Actor, id: i64) -> DeskResult<()> {
        actor.require_admin()?;
        let result = sqlx::query("DELETE FROM quick_link WHERE id = ?1")
            .bind(id)
            .execute(&self.db)
            .await?;
        if result.rows_affected() == 0 {
            return Err(DeskError::NotFound(format!("Quick link {} not found", id)));
        }

        tracing::info!("Quick link {} deleted by {}", id, actor.username);
        Ok(())
    }

    /// Apply new positions. Every link is first pushed past the offset, then
    /// the listed ones take their new order; unlisted links sort after them.
    /// Unknown ids are ignored.
    pub async fn reorder(
        &self,
        actor: &Actor,
        positions: &[LinkPosition],
    ) -> DeskResult<Vec<QuickLink>> {
        actor.require_admin()?;
        let now = encode_ts(&self.clock.now());

        let mut tx = self.db.begin().await?;
        sqlx::query("UPDATE quick_link SET display_order = display_order + ?1")
            .bind(REORDER_OFFSET)
            .execute(&mut *tx)
            .await?;

        for position in positions {
            sqlx::query("UPDATE quick_link SET display_order = ?1, updated_at = ?2 WHERE id = ?3")
                .bind(position.order)
                .bind(&now)
                .bind(position.id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        tracing::info!("{} reordered {} quick links", actor.username, positions.len());
        self.list().await
    }
}

fn link_from_row(row: &SqliteRow) -> DeskResult<QuickLink> {
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;
    Ok(QuickLink {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        url: row.try_get("url")?,
        icon: row.try_get("icon")?,
        category: row.try_get("category")?,
        display_order: row.try_get("display_order")?,
        created_at: decode_ts(&created_at)?,
        updated_at: decode_ts(&updated_at)?,
    })
}
