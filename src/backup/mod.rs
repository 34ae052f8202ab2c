/// Backup export and restore
///
/// The export is a single JSON document keyed by entity type. Restore is an
/// idempotent merge: records already present (by natural key) are skipped,
/// and a record that cannot be restored is logged and skipped without
/// aborting the rest of the import.

mod files;
mod records;

pub use files::{
    backup_file_name, cleanup_old_backups, list_backups, write_backup_file, BackupFile,
};
pub use records::{
    parse_record_ts, BackupDocument, CategoryRecord, CommentRecord, EmailSettingsRecord,
    HistoryRecord, LocationRecord, QuickLinkRecord, ScheduleRecord, TicketRecord, UserRecord,
};

use crate::{
    account::{Actor, DEFAULT_COLOR},
    clock::SharedClock,
    db::{encode_date, encode_ts},
    error::{DeskError, DeskResult},
    notify::{store_settings, EmailSettings},
    tickets::{Priority, TicketStatus},
    timezone,
};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use records::{parse_optional_ts, parse_record_date};
use serde::Serialize;
use sqlx::{Row, SqliteConnection, SqlitePool};
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Result of restoring one record
enum Restore {
    Restored,
    Existing,
}

/// Restored/skipped tally for one entity type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EntityCounts {
    pub restored: usize,
    pub skipped: usize,
}

impl EntityCounts {
    fn record(&mut self, kind: &str, key: &str, outcome: DeskResult<Restore>) {
        match outcome {
            Ok(Restore::Restored) => self.restored += 1,
            Ok(Restore::Existing) => {
                self.skipped += 1;
                debug!("Skipping {} {}: already present", kind, key);
            }
            Err(e) => {
                self.skipped += 1;
                warn!("Skipping {} {}: {}", kind, key, e);
            }
        }
    }
}

/// Per-entity outcome of an import
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    pub users: EntityCounts,
    pub locations: EntityCounts,
    pub ticket_categories: EntityCounts,
    pub schedules: EntityCounts,
    pub tickets: EntityCounts,
    pub comments: EntityCounts,
    pub history: EntityCounts,
    pub quick_links: EntityCounts,
    pub email_settings: EntityCounts,
}

impl ImportReport {
    fn all(&self) -> [EntityCounts; 9] {
        [
            self.users,
            self.locations,
            self.ticket_categories,
            self.schedules,
            self.tickets,
            self.comments,
            self.history,
            self.quick_links,
            self.email_settings,
        ]
    }

    pub fn total_restored(&self) -> usize {
        self.all().iter().map(|c| c.restored).sum()
    }

    pub fn total_skipped(&self) -> usize {
        self.all().iter().map(|c| c.skipped).sum()
    }
}

pub struct BackupManager {
    db: SqlitePool,
    clock: SharedClock,
    default_tz: Tz,
}

impl BackupManager {
    pub fn new(db: SqlitePool, clock: SharedClock, default_tz: Tz) -> Self {
        Self {
            db,
            clock,
            default_tz,
        }
    }

    /// Export everything (admin only)
    pub async fn export(&self, actor: &Actor) -> DeskResult<BackupDocument> {
        actor.require_admin()?;
        let doc = self.snapshot().await?;
        info!(
            "Backup exported by {}: {} users, {} schedules, {} tickets",
            actor.username,
            doc.users.len(),
            doc.schedules.len(),
            doc.tickets.len()
        );
        Ok(doc)
    }

    /// Build the export document without an authorization check. Used by the
    /// periodic file backup.
    pub async fn snapshot(&self) -> DeskResult<BackupDocument> {
        Ok(BackupDocument {
            users: self.export_users().await?,
            locations: self.export_locations().await?,
            schedules: self.export_schedules().await?,
            quick_links: self.export_quick_links().await?,
            ticket_categories: self.export_categories().await?,
            tickets: self.export_tickets().await?,
            email_settings: self.export_email_settings().await?,
        })
    }

    async fn export_users(&self) -> DeskResult<Vec<UserRecord>> {
        let rows = sqlx::query(
            "SELECT username, email, password_hash, is_admin, color, timezone, theme, is_system, created_at
             FROM users ORDER BY id",
        )
        .fetch_all(&self.db)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(UserRecord {
                    username: row.try_get("username")?,
                    email: row.try_get("email")?,
                    password_hash: row.try_get("password_hash")?,
                    is_admin: row.try_get("is_admin")?,
                    color: Some(row.try_get("color")?),
                    timezone: Some(row.try_get("timezone")?),
                    theme: Some(row.try_get("theme")?),
                    is_system: row.try_get("is_system")?,
                    created_at: Some(row.try_get("created_at")?),
                })
            })
            .collect()
    }

    async fn export_locations(&self) -> DeskResult<Vec<LocationRecord>> {
        let rows = sqlx::query(
            "SELECT name, description, active, created_at, updated_at FROM location ORDER BY id",
        )
        .fetch_all(&self.db)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(LocationRecord {
                    name: row.try_get("name")?,
                    description: row.try_get("description")?,
                    active: row.try_get("active")?,
                    created_at: Some(row.try_get("created_at")?),
                    updated_at: Some(row.try_get("updated_at")?),
                })
            })
            .collect()
    }

    async fn export_schedules(&self) -> DeskResult<Vec<ScheduleRecord>> {
        let rows = sqlx::query(
            "SELECT u.username AS technician_username, s.start_time, s.end_time, s.description,
                    l.name AS location_name, s.time_off, s.created_at
             FROM schedule s
             JOIN users u ON u.id = s.technician_id
             LEFT JOIN location l ON l.id = s.location_id
             ORDER BY s.start_time, s.id",
        )
        .fetch_all(&self.db)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(ScheduleRecord {
                    technician_username: row.try_get("technician_username")?,
                    start_time: row.try_get("start_time")?,
                    end_time: row.try_get("end_time")?,
                    description: row.try_get("description")?,
                    location_name: row.try_get("location_name")?,
                    time_off: row.try_get("time_off")?,
                    created_at: Some(row.try_get("created_at")?),
                })
            })
            .collect()
    }

    async fn export_quick_links(&self) -> DeskResult<Vec<QuickLinkRecord>> {
        let rows = sqlx::query(
            "SELECT title, url, icon, category, display_order FROM quick_link
             ORDER BY display_order, id",
        )
        .fetch_all(&self.db)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(QuickLinkRecord {
                    title: row.try_get("title")?,
                    url: row.try_get("url")?,
                    icon: Some(row.try_get("icon")?),
                    category: row.try_get("category")?,
                    order: row.try_get("display_order")?,
                })
            })
            .collect()
    }

    async fn export_categories(&self) -> DeskResult<Vec<CategoryRecord>> {
        let rows = sqlx::query(
            "SELECT name, description, icon, priority_level, created_at FROM ticket_category ORDER BY id",
        )
        .fetch_all(&self.db)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(CategoryRecord {
                    name: row.try_get("name")?,
                    description: row.try_get("description")?,
                    icon: Some(row.try_get("icon")?),
                    priority_level: row.try_get("priority_level")?,
                    created_at: Some(row.try_get("created_at")?),
                })
            })
            .collect()
    }

    async fn export_tickets(&self) -> DeskResult<Vec<TicketRecord>> {
        let mut comments: HashMap<i64, Vec<CommentRecord>> = HashMap::new();
        let rows = sqlx::query(
            "SELECT c.ticket_id, u.username, c.content, c.created_at, c.updated_at
             FROM ticket_comment c JOIN users u ON u.id = c.user_id
             ORDER BY c.id",
        )
        .fetch_all(&self.db)
        .await?;
        for row in rows {
            comments
                .entry(row.try_get("ticket_id")?)
                .or_default()
                .push(CommentRecord {
                    username: row.try_get("username")?,
                    content: row.try_get("content")?,
                    created_at: Some(row.try_get("created_at")?),
                    updated_at: Some(row.try_get("updated_at")?),
                });
        }

        let mut history: HashMap<i64, Vec<HistoryRecord>> = HashMap::new();
        let rows = sqlx::query(
            "SELECT h.ticket_id, u.username, h.action, h.details, h.created_at
             FROM ticket_history h JOIN users u ON u.id = h.user_id
             ORDER BY h.id",
        )
        .fetch_all(&self.db)
        .await?;
        for row in rows {
            history
                .entry(row.try_get("ticket_id")?)
                .or_default()
                .push(HistoryRecord {
                    username: row.try_get("username")?,
                    action: row.try_get("action")?,
                    details: row.try_get("details")?,
                    created_at: Some(row.try_get("created_at")?),
                });
        }

        let rows = sqlx::query(
            "SELECT t.id, t.title, t.description, c.name AS category_name, t.status, t.priority,
                    a.username AS assignee, cr.username AS creator, t.due_date, t.archived,
                    t.created_at, t.updated_at
             FROM ticket t
             JOIN ticket_category c ON c.id = t.category_id
             JOIN users cr ON cr.id = t.created_by
             LEFT JOIN users a ON a.id = t.assigned_to
             ORDER BY t.id",
        )
        .fetch_all(&self.db)
        .await?;

        rows.iter()
            .map(|row| {
                let id: i64 = row.try_get("id")?;
                Ok(TicketRecord {
                    id: Some(id),
                    title: row.try_get("title")?,
                    description: row.try_get("description")?,
                    category_name: row.try_get("category_name")?,
                    status: row.try_get("status")?,
                    priority: row.try_get("priority")?,
                    assigned_to_username: row.try_get("assignee")?,
                    created_by_username: row.try_get("creator")?,
                    due_date: row.try_get("due_date")?,
                    archived: row.try_get("archived")?,
                    created_at: Some(row.try_get("created_at")?),
                    updated_at: Some(row.try_get("updated_at")?),
                    comments: comments.remove(&id).unwrap_or_default(),
                    history: history.remove(&id).unwrap_or_default(),
                })
            })
            .collect()
    }

    async fn export_email_settings(&self) -> DeskResult<Option<EmailSettingsRecord>> {
        let row = sqlx::query(
            "SELECT admin_email_group, notify_on_create, notify_on_update, notify_on_delete
             FROM email_settings WHERE id = 1",
        )
        .fetch_optional(&self.db)
        .await?;

        row.map(|row| {
            Ok(EmailSettingsRecord {
                admin_email_group: row.try_get("admin_email_group")?,
                notify_on_create: row.try_get("notify_on_create")?,
                notify_on_update: row.try_get("notify_on_update")?,
                notify_on_delete: row.try_get("notify_on_delete")?,
            })
        })
        .transpose()
    }

    /// Parse and import a backup file (admin only)
    pub async fn import_json(&self, actor: &Actor, bytes: &[u8]) -> DeskResult<ImportReport> {
        actor.require_admin()?;
        let doc: BackupDocument = serde_json::from_slice(bytes)
            .map_err(|e| DeskError::Validation(format!("Invalid backup file: {}", e)))?;
        self.import(actor, &doc).await
    }

    /// Merge a backup document into the database (admin only).
    ///
    /// Sections run in dependency order inside one transaction. Per-record
    /// failures are counted as skipped.
    pub async fn import(&self, actor: &Actor, doc: &BackupDocument) -> DeskResult<ImportReport> {
        actor.require_admin()?;
        let now = self.clock.now();
        let mut report = ImportReport::default();
        let mut tx = self.db.begin().await?;

        for record in &doc.users {
            let outcome = self.restore_user(&mut tx, record, now).await;
            report.users.record("user", &record.username, outcome);
        }
        for record in &doc.locations {
            let outcome = restore_location(&mut tx, record, now).await;
            report.locations.record("location", &record.name, outcome);
        }
        for record in &doc.ticket_categories {
            let outcome = restore_category(&mut tx, record, now).await;
            report.ticket_categories.record("category", &record.name, outcome);
        }
        for record in &doc.schedules {
            let outcome = restore_schedule(&mut tx, record, now).await;
            let key = format!("{} {}", record.technician_username, record.start_time);
            report.schedules.record("schedule", &key, outcome);
        }
        for record in &doc.tickets {
            let outcome = restore_ticket(&mut tx, record, now, &mut report).await;
            report.tickets.record("ticket", &record.title, outcome);
        }
        for record in &doc.quick_links {
            let outcome = restore_quick_link(&mut tx, record, now).await;
            report.quick_links.record("quick link", &record.title, outcome);
        }
        if let Some(record) = &doc.email_settings {
            let outcome = restore_email_settings(&mut tx, record, now).await;
            report
                .email_settings
                .record("email settings", &record.admin_email_group, outcome);
        }

        tx.commit().await?;

        info!(
            "Backup imported by {}: {} restored, {} skipped",
            actor.username,
            report.total_restored(),
            report.total_skipped()
        );
        Ok(report)
    }

    async fn restore_user(
        &self,
        conn: &mut SqliteConnection,
        record: &UserRecord,
        now: DateTime<Utc>,
    ) -> DeskResult<Restore> {
        let username = record.username.trim();
        let email = record.email.trim();
        if username.is_empty() || email.is_empty() {
            return Err(DeskError::Validation("username and email are required".to_string()));
        }

        let existing: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE username = ?1 OR email = ?2")
                .bind(username)
                .bind(email)
                .fetch_one(&mut *conn)
                .await?;
        if existing > 0 {
            return Ok(Restore::Existing);
        }
        if record.is_system {
            let sentinels: i64 =
                sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE is_system = 1")
                    .fetch_one(&mut *conn)
                    .await?;
            if sentinels > 0 {
                return Ok(Restore::Existing);
            }
        }
        if record.password_hash.is_empty() {
            return Err(DeskError::Validation("missing password hash".to_string()));
        }

        let tz = match record.timezone.as_deref() {
            Some(name) => timezone::resolve(name, self.default_tz),
            None => self.default_tz,
        };
        let created_at = parse_optional_ts(record.created_at.as_deref(), now)?;

        sqlx::query(
            "INSERT INTO users (username, email, password_hash, is_admin, color, timezone, theme, is_system, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        )
        .bind(username)
        .bind(email)
        .bind(&record.password_hash)
        .bind(record.is_admin)
        .bind(record.color.as_deref().unwrap_or(DEFAULT_COLOR))
        .bind(tz.name())
        .bind(record.theme.as_deref().unwrap_or("dark"))
        .bind(record.is_system)
        .bind(encode_ts(&created_at))
        .execute(&mut *conn)
        .await?;

        Ok(Restore::Restored)
    }
}

async fn user_id_by_name(conn: &mut SqliteConnection, username: &str) -> DeskResult<Option<i64>> {
    Ok(sqlx::query_scalar("SELECT id FROM users WHERE username = ?1")
        .bind(username.trim())
        .fetch_optional(&mut *conn)
        .await?)
}

async fn restore_location(
    conn: &mut SqliteConnection,
    record: &LocationRecord,
    now: DateTime<Utc>,
) -> DeskResult<Restore> {
    let name = record.name.trim();
    if name.is_empty() {
        return Err(DeskError::Validation("location name is required".to_string()));
    }

    let existing: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM location WHERE name = ?1")
        .bind(name)
        .fetch_one(&mut *conn)
        .await?;
    if existing > 0 {
        return Ok(Restore::Existing);
    }

    let created_at = parse_optional_ts(record.created_at.as_deref(), now)?;
    let updated_at = parse_optional_ts(record.updated_at.as_deref(), created_at)?;
    sqlx::query(
        "INSERT INTO location (name, description, active, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
    )
    .bind(name)
    .bind(&record.description)
    .bind(record.active)
    .bind(encode_ts(&created_at))
    .bind(encode_ts(&updated_at))
    .execute(&mut *conn)
    .await?;

    Ok(Restore::Restored)
}

async fn restore_category(
    conn: &mut SqliteConnection,
    record: &CategoryRecord,
    now: DateTime<Utc>,
) -> DeskResult<Restore> {
    let name = record.name.trim();
    if name.is_empty() {
        return Err(DeskError::Validation("category name is required".to_string()));
    }
    Priority::try_from(record.priority_level)?;

    let existing: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM ticket_category WHERE name = ?1")
        .bind(name)
        .fetch_one(&mut *conn)
        .await?;
    if existing > 0 {
        return Ok(Restore::Existing);
    }

    let created_at = parse_optional_ts(record.created_at.as_deref(), now)?;
    sqlx::query(
        "INSERT INTO ticket_category (name, description, icon, priority_level, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
    )
    .bind(name)
    .bind(&record.description)
    .bind(record.icon.as_deref().unwrap_or("tag"))
    .bind(record.priority_level)
    .bind(encode_ts(&created_at))
    .execute(&mut *conn)
    .await?;

    Ok(Restore::Restored)
}

async fn restore_schedule(
    conn: &mut SqliteConnection,
    record: &ScheduleRecord,
    now: DateTime<Utc>,
) -> DeskResult<Restore> {
    let technician_id = user_id_by_name(conn, &record.technician_username)
        .await?
        .ok_or_else(|| {
            DeskError::NotFound(format!("technician {} not found", record.technician_username))
        })?;

    let start = parse_record_ts(&record.start_time)?;
    let end = parse_record_ts(&record.end_time)?;
    if end <= start {
        return Err(DeskError::Validation("end time must be after start time".to_string()));
    }
    let (start, end) = (encode_ts(&start), encode_ts(&end));

    let location_id: Option<i64> = match record.location_name.as_deref().map(str::trim) {
        Some(name) if !name.is_empty() => {
            let id = sqlx::query_scalar("SELECT id FROM location WHERE name = ?1")
                .bind(name)
                .fetch_optional(&mut *conn)
                .await?;
            if id.is_none() {
                warn!("Location {} not found, restoring schedule without location", name);
            }
            id
        }
        _ => None,
    };

    let existing: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM schedule
         WHERE technician_id = ?1 AND start_time = ?2 AND end_time = ?3 AND location_id IS ?4",
    )
    .bind(technician_id)
    .bind(&start)
    .bind(&end)
    .bind(location_id)
    .fetch_one(&mut *conn)
    .await?;
    if existing > 0 {
        return Ok(Restore::Existing);
    }

    if !record.time_off {
        let overlapping: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM schedule
             WHERE technician_id = ?1 AND time_off = 0 AND start_time < ?3 AND end_time > ?2",
        )
        .bind(technician_id)
        .bind(&start)
        .bind(&end)
        .fetch_one(&mut *conn)
        .await?;
        if overlapping > 0 {
            return Err(DeskError::Conflict(format!(
                "overlaps an existing schedule for {}",
                record.technician_username
            )));
        }
    }

    let created_at = parse_optional_ts(record.created_at.as_deref(), now)?;
    sqlx::query(
        "INSERT INTO schedule (technician_id, start_time, end_time, description, location_id, time_off, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
    )
    .bind(technician_id)
    .bind(&start)
    .bind(&end)
    .bind(&record.description)
    .bind(location_id)
    .bind(record.time_off)
    .bind(encode_ts(&created_at))
    .execute(&mut *conn)
    .await?;

    Ok(Restore::Restored)
}

/// Restore a ticket with its comments and history. The source id is reused
/// when no other ticket holds it.
async fn restore_ticket(
    conn: &mut SqliteConnection,
    record: &TicketRecord,
    now: DateTime<Utc>,
    report: &mut ImportReport,
) -> DeskResult<Restore> {
    let title = record.title.trim();
    if title.is_empty() {
        return Err(DeskError::Validation("ticket title is required".to_string()));
    }

    let category_id: i64 = sqlx::query_scalar("SELECT id FROM ticket_category WHERE name = ?1")
        .bind(record.category_name.trim())
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| {
            DeskError::NotFound(format!("category {} not found", record.category_name))
        })?;
    let created_by = user_id_by_name(conn, &record.created_by_username)
        .await?
        .ok_or_else(|| {
            DeskError::NotFound(format!("creator {} not found", record.created_by_username))
        })?;
    let assigned_to = match record.assigned_to_username.as_deref().map(str::trim) {
        Some(name) if !name.is_empty() => {
            let id = user_id_by_name(conn, name).await?;
            if id.is_none() {
                warn!("Assignee {} not found, restoring ticket {} unassigned", name, title);
            }
            id
        }
        _ => None,
    };

    let status = if record.status.trim().is_empty() {
        TicketStatus::Open
    } else {
        record.status.parse::<TicketStatus>()?
    };
    let priority = Priority::try_from(record.priority)?;
    let due_date = match record.due_date.as_deref().map(str::trim) {
        Some(raw) if !raw.is_empty() => Some(encode_date(&parse_record_date(raw)?)),
        _ => None,
    };
    let created_at = parse_optional_ts(record.created_at.as_deref(), now)?;
    let updated_at = parse_optional_ts(record.updated_at.as_deref(), created_at)?;
    let created_at = encode_ts(&created_at);

    let existing: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM ticket WHERE title = ?1 AND created_by = ?2 AND created_at = ?3",
    )
    .bind(title)
    .bind(created_by)
    .bind(&created_at)
    .fetch_one(&mut *conn)
    .await?;
    if existing > 0 {
        report.comments.skipped += record.comments.len();
        report.history.skipped += record.history.len();
        return Ok(Restore::Existing);
    }

    let reuse_id = match record.id {
        Some(id) => {
            let taken: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM ticket WHERE id = ?1")
                .bind(id)
                .fetch_one(&mut *conn)
                .await?;
            (taken == 0).then_some(id)
        }
        None => None,
    };

    // A NULL id lets SQLite allocate the next one
    let ticket_id = sqlx::query(
        "INSERT INTO ticket (id, title, description, category_id, status, priority, assigned_to,
                             created_by, due_date, archived, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
    )
    .bind(reuse_id)
    .bind(title)
    .bind(&record.description)
    .bind(category_id)
    .bind(status.as_str())
    .bind(priority.level())
    .bind(assigned_to)
    .bind(created_by)
    .bind(due_date)
    .bind(record.archived)
    .bind(&created_at)
    .bind(encode_ts(&updated_at))
    .execute(&mut *conn)
    .await?
    .last_insert_rowid();

    for comment in &record.comments {
        let outcome = restore_comment(conn, ticket_id, comment, now).await;
        report.comments.record("comment by", &comment.username, outcome);
    }
    for entry in &record.history {
        let outcome = restore_history(conn, ticket_id, entry, now).await;
        report.history.record("history entry by", &entry.username, outcome);
    }

    Ok(Restore::Restored)
}

async fn restore_comment(
    conn: &mut SqliteConnection,
    ticket_id: i64,
    record: &CommentRecord,
    now: DateTime<Utc>,
) -> DeskResult<Restore> {
    let user_id = user_id_by_name(conn, &record.username)
        .await?
        .ok_or_else(|| DeskError::NotFound(format!("user {} not found", record.username)))?;
    let created_at = parse_optional_ts(record.created_at.as_deref(), now)?;
    let updated_at = parse_optional_ts(record.updated_at.as_deref(), created_at)?;

    sqlx::query(
        "INSERT INTO ticket_comment (ticket_id, user_id, content, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
    )
    .bind(ticket_id)
    .bind(user_id)
    .bind(&record.content)
    .bind(encode_ts(&created_at))
    .bind(encode_ts(&updated_at))
    .execute(&mut *conn)
    .await?;

    Ok(Restore::Restored)
}

async fn restore_history(
    conn: &mut SqliteConnection,
    ticket_id: i64,
    record: &HistoryRecord,
    now: DateTime<Utc>,
) -> DeskResult<Restore> {
    if record.action.trim().is_empty() {
        return Err(DeskError::Validation("history action is required".to_string()));
    }
    let user_id = user_id_by_name(conn, &record.username)
        .await?
        .ok_or_else(|| DeskError::NotFound(format!("user {} not found", record.username)))?;
    let created_at = parse_optional_ts(record.created_at.as_deref(), now)?;

    sqlx::query(
        "INSERT INTO ticket_history (ticket_id, user_id, action, details, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
    )
    .bind(ticket_id)
    .bind(user_id)
    .bind(record.action.trim())
    .bind(&record.details)
    .bind(encode_ts(&created_at))
    .execute(&mut *conn)
    .await?;

    Ok(Restore::Restored)
}

async fn restore_quick_link(
    conn: &mut SqliteConnection,
    record: &QuickLinkRecord,
    now: DateTime<Utc>,
) -> DeskResult<Restore> {
    let (title, url) = (record.title.trim(), record.url.trim());
    if title.is_empty() || url.is_empty() {
        return Err(DeskError::Validation("title and url are required".to_string()));
    }

    let existing: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM quick_link WHERE lower(title) = lower(?1) AND lower(url) = lower(?2)",
    )
    .bind(title)
    .bind(url)
    .fetch_one(&mut *conn)
    .await?;
    if existing > 0 {
        return Ok(Restore::Existing);
    }

    let now = encode_ts(&now);
    sqlx::query(
        "INSERT INTO quick_link (title, url, icon, category, display_order, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
    )
    .bind(title)
    .bind(url)
    .bind(record.icon.as_deref().unwrap_or("link"))
    .bind(&record.category)
    .bind(record.order)
    .bind(&now)
    .execute(&mut *conn)
    .await?;

    Ok(Restore::Restored)
}

/// The settings row is only written when the target has none yet
async fn restore_email_settings(
    conn: &mut SqliteConnection,
    record: &EmailSettingsRecord,
    now: DateTime<Utc>,
) -> DeskResult<Restore> {
    let existing: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM email_settings")
        .fetch_one(&mut *conn)
        .await?;
    if existing > 0 {
        return Ok(Restore::Existing);
    }
    if record.admin_email_group.trim().is_empty() {
        return Err(DeskError::Validation("admin email group is required".to_string()));
    }

    store_settings(
        conn,
        &EmailSettings {
            admin_email_group: record.admin_email_group.trim().to_string(),
            notify_on_create: record.notify_on_create,
            notify_on_update: record.notify_on_update,
            notify_on_delete: record.notify_on_delete,
            updated_at: now,
        },
    )
    .await?;

    Ok(Restore::Restored)
}
