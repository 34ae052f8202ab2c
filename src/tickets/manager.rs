/// Ticket lifecycle engine
use crate::{
    account::Actor,
    clock::SharedClock,
    db::{decode_date, decode_ts, encode_date, encode_ts},
    error::{DeskError, DeskResult},
    notify::{
        Notification, NotificationDispatcher, Outbox, Recipient, TicketEvent, TicketNotice,
        TicketSummary,
    },
    tickets::{
        DashboardFilter, HistoryEntry, NewTicket, Priority, Ticket, TicketComment, TicketEdit,
        TicketStatus,
    },
};
use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row, SqliteConnection, SqlitePool};
use std::sync::Arc;
use validator::Validate;

const TICKET_SELECT: &str = "SELECT t.id, t.title, t.description, t.category_id,
        c.name AS category_name, t.status, t.priority, t.assigned_to,
        a.username AS assignee_name, t.created_by, cr.username AS creator_name,
        t.due_date, t.archived, t.created_at, t.updated_at
    FROM ticket t
    JOIN ticket_category c ON c.id = t.category_id
    JOIN users cr ON cr.id = t.created_by
    LEFT JOIN users a ON a.id = t.assigned_to";

/// Ticket manager service
pub struct TicketManager {
    db: SqlitePool,
    dispatcher: Arc<NotificationDispatcher>,
    clock: SharedClock,
}

impl TicketManager {
    pub fn new(
        db: SqlitePool,
        dispatcher: Arc<NotificationDispatcher>,
        clock: SharedClock,
    ) -> Self {
        Self {
            db,
            dispatcher,
            clock,
        }
    }

    /// Open a ticket. The row and its "created" history entry commit together.
    pub async fn create(&self, actor: &Actor, req: NewTicket) -> DeskResult<Ticket> {
        let req = req.normalized();
        req.validate()?;
        if let Some(assignee) = req.assigned_to {
            if assignee != actor.user_id && !actor.is_admin {
                return Err(DeskError::Forbidden(
                    "Only administrators can assign tickets to others".to_string(),
                ));
            }
        }

        let now = self.clock.now();
        let mut tx = self.db.begin().await?;

        ensure_category(&mut tx, req.category_id).await?;
        let assignee = match req.assigned_to {
            Some(id) => Some(load_recipient(&mut tx, id).await?),
            None => None,
        };

        let result = sqlx::query(
            "INSERT INTO ticket (title, description, category_id, status, priority, assigned_to,
                                 created_by, due_date, archived, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0, ?9, ?9)",
        )
        .bind(&req.title)
        .bind(&req.description)
        .bind(req.category_id)
        .bind(TicketStatus::Open.as_str())
        .bind(req.priority.level())
        .bind(req.assigned_to)
        .bind(actor.user_id)
        .bind(req.due_date.as_ref().map(encode_date))
        .bind(encode_ts(&now))
        .execute(&mut *tx)
        .await?;
        let id = result.last_insert_rowid();

        let details = assignee
            .as_ref()
            .map(|a| format!("Assigned to {}", a.username));
        log_history(&mut tx, id, actor.user_id, "created", details.as_deref(), now).await?;

        let ticket = fetch_ticket(&mut tx, id).await?;
        tx.commit().await?;

        tracing::info!("Ticket #{} created by {}: {}", ticket.id, actor.username, ticket.title);

        if assignee.is_some() {
            let mut outbox = Outbox::new();
            outbox.push(ticket_notice(
                &ticket,
                assignee,
                actor,
                TicketEvent::Assigned { note: None },
            ));
            self.dispatcher.flush(outbox).await;
        }

        Ok(ticket)
    }

    /// A ticket the actor may see
    pub async fn get(&self, actor: &Actor, id: i64) -> DeskResult<Ticket> {
        let mut conn = self.db.acquire().await?;
        let ticket = fetch_ticket(&mut conn, id).await?;
        ensure_visible(actor, &ticket)?;
        Ok(ticket)
    }

    pub async fn comments(&self, actor: &Actor, id: i64) -> DeskResult<Vec<TicketComment>> {
        self.get(actor, id).await?;
        let rows = sqlx::query(
            "SELECT c.id, c.ticket_id, c.user_id, u.username, c.content, c.created_at, c.updated_at
             FROM ticket_comment c JOIN users u ON u.id = c.user_id
             WHERE c.ticket_id = ?1 ORDER BY c.created_at, c.id",
        )
        .bind(id)
        .fetch_all(&self.db)
        .await?;

        rows.iter().map(comment_from_row).collect()
    }

    /// History in the order it was written
    pub async fn history(&self, actor: &Actor, id: i64) -> DeskResult<Vec<HistoryEntry>> {
        self.get(actor, id).await?;
        let rows = sqlx::query(
            "SELECT h.id, h.ticket_id, h.user_id, u.username, h.action, h.details, h.created_at
             FROM ticket_history h JOIN users u ON u.id = h.user_id
             WHERE h.ticket_id = ?1 ORDER BY h.id",
        )
        .bind(id)
        .fetch_all(&self.db)
        .await?;

        rows.iter().map(history_from_row).collect()
    }

    pub async fn add_comment(
        &self,
        actor: &Actor,
        id: i64,
        content: &str,
    ) -> DeskResult<TicketComment> {
        let content = content.trim();
        if content.is_empty() {
            return Err(DeskError::Validation("Comment cannot be empty".to_string()));
        }

        let now = self.clock.now();
        let mut tx = self.db.begin().await?;
        let ticket = fetch_ticket(&mut tx, id).await?;
        ensure_visible(actor, &ticket)?;

        let comment_id = insert_comment(&mut tx, id, actor.user_id, content, now).await?;
        log_history(&mut tx, id, actor.user_id, "commented", None, now).await?;
        touch(&mut tx, id, now).await?;
        let comment = fetch_comment(&mut tx, comment_id).await?;
        let assignee = self.other_assignee(&mut tx, &ticket, actor).await?;
        tx.commit().await?;

        tracing::info!("{} commented on ticket #{}", actor.username, id);

        if assignee.is_some() {
            let mut outbox = Outbox::new();
            outbox.push(ticket_notice(
                &ticket,
                assignee,
                actor,
                TicketEvent::Commented {
                    content: content.to_string(),
                },
            ));
            self.dispatcher.flush(outbox).await;
        }

        Ok(comment)
    }

    /// Move a ticket to any of the known statuses. A non-empty `comment` is
    /// stored as a regular comment alongside the transition.
    pub async fn change_status(
        &self,
        actor: &Actor,
        id: i64,
        new_status: &str,
        comment: Option<&str>,
    ) -> DeskResult<Ticket> {
        let new_status: TicketStatus = new_status.parse()?;
        let comment = comment.map(str::trim).filter(|c| !c.is_empty());

        let now = self.clock.now();
        let mut tx = self.db.begin().await?;
        let before = fetch_ticket(&mut tx, id).await?;
        ensure_visible(actor, &before)?;

        sqlx::query("UPDATE ticket SET status = ?1, updated_at = ?2 WHERE id = ?3")
            .bind(new_status.as_str())
            .bind(encode_ts(&now))
            .bind(id)
            .execute(&mut *tx)
            .await?;

        let details = format!("Status changed from {} to {}", before.status, new_status);
        log_history(&mut tx, id, actor.user_id, "status_changed", Some(&details), now).await?;
        if let Some(text) = comment {
            insert_comment(&mut tx, id, actor.user_id, text, now).await?;
        }

        let ticket = fetch_ticket(&mut tx, id).await?;
        let assignee = self.other_assignee(&mut tx, &ticket, actor).await?;
        tx.commit().await?;

        tracing::info!("Ticket #{}: {} ({})", id, details, actor.username);

        if assignee.is_some() {
            let mut outbox = Outbox::new();
            outbox.push(ticket_notice(
                &ticket,
                assignee,
                actor,
                TicketEvent::StatusChanged {
                    from: before.status.to_string(),
                    to: new_status.to_string(),
                    comment: comment.map(str::to_string),
                },
            ));
            self.dispatcher.flush(outbox).await;
        }

        Ok(ticket)
    }

    /// Assign to a user, or unassign with `None`. Creator or admin only.
    pub async fn assign(
        &self,
        actor: &Actor,
        id: i64,
        assignee_id: Option<i64>,
        note: Option<&str>,
    ) -> DeskResult<Ticket> {
        let note = note.map(str::trim).filter(|n| !n.is_empty());
        let now = self.clock.now();
        let mut tx = self.db.begin().await?;

        let before = fetch_ticket(&mut tx, id).await?;
        if before.created_by != actor.user_id && !actor.is_admin {
            return Err(DeskError::Forbidden(
                "Only the ticket creator or an administrator can assign it".to_string(),
            ));
        }

        let assignee = match assignee_id {
            Some(user_id) => Some(load_recipient(&mut tx, user_id).await?),
            None => None,
        };

        sqlx::query("UPDATE ticket SET assigned_to = ?1, updated_at = ?2 WHERE id = ?3")
            .bind(assignee_id)
            .bind(encode_ts(&now))
            .bind(id)
            .execute(&mut *tx)
            .await?;

        match &assignee {
            Some(recipient) => {
                let mut details = format!("Assigned to {}", recipient.username);
                if let Some(note) = note {
                    details.push_str(&format!(": {}", note));
                }
                log_history(&mut tx, id, actor.user_id, "assigned", Some(&details), now).await?;
            }
            None => {
                log_history(&mut tx, id, actor.user_id, "unassigned", note, now).await?;
            }
        }

        let ticket = fetch_ticket(&mut tx, id).await?;
        tx.commit().await?;

        match &assignee {
            Some(recipient) => tracing::info!(
                "Ticket #{} assigned to {} by {}",
                id,
                recipient.username,
                actor.username
            ),
            None => tracing::info!("Ticket #{} unassigned by {}", id, actor.username),
        }

        if assignee.is_some() {
            let mut outbox = Outbox::new();
            outbox.push(ticket_notice(
                &ticket,
                assignee,
                actor,
                TicketEvent::Assigned {
                    note: note.map(str::to_string),
                },
            ));
            self.dispatcher.flush(outbox).await;
        }

        Ok(ticket)
    }

    /// Change descriptive fields. Writes one "edited" entry listing what
    /// changed, or nothing at all when no field differs.
    pub async fn edit(&self, actor: &Actor, id: i64, edit: TicketEdit) -> DeskResult<Ticket> {
        let edit = edit.normalized();
        edit.validate()?;
        let now = self.clock.now();
        let mut tx = self.db.begin().await?;

        let before = fetch_ticket(&mut tx, id).await?;
        if before.created_by != actor.user_id && !actor.is_admin {
            return Err(DeskError::Forbidden(
                "Only the ticket creator or an administrator can edit it".to_string(),
            ));
        }

        let mut after = before.clone();
        let mut changes = Vec::new();

        if let Some(title) = edit.title {
            if title != before.title {
                changes.push(format!("title changed from \"{}\" to \"{}\"", before.title, title));
                after.title = title;
            }
        }
        if let Some(description) = edit.description {
            if description != before.description {
                changes.push("description updated".to_string());
                after.description = description;
            }
        }
        if let Some(category_id) = edit.category_id {
            if category_id != before.category_id {
                let name = ensure_category(&mut tx, category_id).await?;
                changes.push(format!(
                    "category changed from {} to {}",
                    before.category_name, name
                ));
                after.category_id = category_id;
                after.category_name = name;
            }
        }
        if let Some(priority) = edit.priority {
            if priority != before.priority {
                changes.push(format!(
                    "priority changed from {} to {}",
                    before.priority.label(),
                    priority.label()
                ));
                after.priority = priority;
            }
        }
        let due_date = if edit.clear_due_date {
            None
        } else {
            edit.due_date.or(before.due_date)
        };
        if due_date != before.due_date {
            changes.push(format!(
                "due date changed from {} to {}",
                describe_date(before.due_date),
                describe_date(due_date)
            ));
            after.due_date = due_date;
        }

        if changes.is_empty() {
            return Ok(before);
        }

        sqlx::query(
            "UPDATE ticket SET title = ?1, description = ?2, category_id = ?3, priority = ?4,
                    due_date = ?5, updated_at = ?6
             WHERE id = ?7",
        )
        .bind(&after.title)
        .bind(&after.description)
        .bind(after.category_id)
        .bind(after.priority.level())
        .bind(after.due_date.as_ref().map(encode_date))
        .bind(encode_ts(&now))
        .bind(id)
        .execute(&mut *tx)
        .await?;

        let details = changes.join("; ");
        log_history(&mut tx, id, actor.user_id, "edited", Some(&details), now).await?;
        let ticket = fetch_ticket(&mut tx, id).await?;
        tx.commit().await?;

        tracing::info!("Ticket #{} edited by {}: {}", id, actor.username, details);
        Ok(ticket)
    }

    pub async fn archive(&self, actor: &Actor, id: i64) -> DeskResult<Ticket> {
        self.set_archived(actor, id, true).await
    }

    pub async fn unarchive(&self, actor: &Actor, id: i64) -> DeskResult<Ticket> {
        self.set_archived(actor, id, false).await
    }

    /// Archiving hides a ticket from the default dashboard without touching
    /// its status. Admin, creator or assignee only.
    async fn set_archived(&self, actor: &Actor, id: i64, archived: bool) -> DeskResult<Ticket> {
        let now = self.clock.now();
        let mut tx = self.db.begin().await?;

        let before = fetch_ticket(&mut tx, id).await?;
        let involved =
            before.created_by == actor.user_id || before.assigned_to == Some(actor.user_id);
        if !involved && !actor.is_admin {
            return Err(DeskError::Forbidden(
                "You do not have permission to archive this ticket".to_string(),
            ));
        }
        if before.archived == archived {
            return Ok(before);
        }

        sqlx::query("UPDATE ticket SET archived = ?1, updated_at = ?2 WHERE id = ?3")
            .bind(archived)
            .bind(encode_ts(&now))
            .bind(id)
            .execute(&mut *tx)
            .await?;

        let action = if archived { "archived" } else { "unarchived" };
        log_history(&mut tx, id, actor.user_id, action, None, now).await?;
        let ticket = fetch_ticket(&mut tx, id).await?;
        tx.commit().await?;

        tracing::info!("Ticket #{} {} by {}", id, action, actor.username);
        Ok(ticket)
    }

    /// Remove a ticket with its comments and history. Admin only.
    pub async fn delete(&self, actor: &Actor, id: i64) -> DeskResult<()> {
        actor.require_admin()?;
        let result = sqlx::query("DELETE FROM ticket WHERE id = ?1")
            .bind(id)
            .execute(&self.db)
            .await?;
        if result.rows_affected() == 0 {
            return Err(DeskError::NotFound(format!("Ticket {} not found", id)));
        }

        tracing::info!("Ticket #{} deleted by {}", id, actor.username);
        Ok(())
    }

    /// Filtered ticket list, newest first. Non-admins only see tickets they
    /// created or are assigned to.
    pub async fn dashboard(
        &self,
        actor: &Actor,
        filter: &DashboardFilter,
    ) -> DeskResult<Vec<Ticket>> {
        let scope = if actor.is_admin {
            None
        } else {
            Some(actor.user_id)
        };

        let rows = sqlx::query(&format!(
            "{} WHERE t.archived = ?1
                AND (?2 IS NULL OR t.status = ?2)
                AND (?3 IS NULL OR t.category_id = ?3)
                AND (?4 IS NULL OR t.priority = ?4)
                AND (?5 IS NULL OR t.assigned_to = ?5)
                AND (?6 IS NULL OR t.created_by = ?6 OR t.assigned_to = ?6)
             ORDER BY t.created_at DESC, t.id DESC",
            TICKET_SELECT
        ))
        .bind(filter.archived)
        .bind(filter.effective_status().map(|s| s.as_str()))
        .bind(filter.category_id)
        .bind(filter.priority.map(|p| p.level()))
        .bind(filter.assigned_to)
        .bind(scope)
        .fetch_all(&self.db)
        .await?;

        rows.iter().map(ticket_from_row).collect()
    }

    /// The assignee to notify, unless there is none or it is the actor
    async fn other_assignee(
        &self,
        conn: &mut SqliteConnection,
        ticket: &Ticket,
        actor: &Actor,
    ) -> DeskResult<Option<Recipient>> {
        match ticket.assigned_to {
            Some(id) if id != actor.user_id => Ok(Some(load_recipient(conn, id).await?)),
            _ => Ok(None),
        }
    }
}

fn ensure_visible(actor: &Actor, ticket: &Ticket) -> DeskResult<()> {
    if actor.is_admin
        || ticket.created_by == actor.user_id
        || ticket.assigned_to == Some(actor.user_id)
    {
        Ok(())
    } else {
        Err(DeskError::Forbidden(
            "You do not have permission to view this ticket".to_string(),
        ))
    }
}

fn describe_date(date: Option<chrono::NaiveDate>) -> String {
    date.map(|d| encode_date(&d))
        .unwrap_or_else(|| "none".to_string())
}

fn ticket_notice(
    ticket: &Ticket,
    assignee: Option<Recipient>,
    actor: &Actor,
    event: TicketEvent,
) -> Notification {
    Notification::Ticket(TicketNotice {
        event,
        ticket: TicketSummary {
            id: ticket.id,
            title: ticket.title.clone(),
            status: ticket.status.to_string(),
            priority: ticket.priority.label().to_string(),
            category: ticket.category_name.clone(),
        },
        assignee,
        actor: actor.username.clone(),
    })
}

pub(crate) async fn log_history(
    conn: &mut SqliteConnection,
    ticket_id: i64,
    user_id: i64,
    action: &str,
    details: Option<&str>,
    now: DateTime<Utc>,
) -> DeskResult<()> {
    sqlx::query(
        "INSERT INTO ticket_history (ticket_id, user_id, action, details, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
    )
    .bind(ticket_id)
    .bind(user_id)
    .bind(action)
    .bind(details)
    .bind(encode_ts(&now))
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn insert_comment(
    conn: &mut SqliteConnection,
    ticket_id: i64,
    user_id: i64,
    content: &str,
    now: DateTime<Utc>,
) -> DeskResult<i64> {
    let result = sqlx::query(
        "INSERT INTO ticket_comment (ticket_id, user_id, content, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?4)",
    )
    .bind(ticket_id)
    .bind(user_id)
    .bind(content)
    .bind(encode_ts(&now))
    .execute(&mut *conn)
    .await?;
    Ok(result.last_insert_rowid())
}

async fn touch(conn: &mut SqliteConnection, id: i64, now: DateTime<Utc>) -> DeskResult<()> {
    sqlx::query("UPDATE ticket SET updated_at = ?1 WHERE id = ?2")
        .bind(encode_ts(&now))
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Name of an existing category
async fn ensure_category(conn: &mut SqliteConnection, id: i64) -> DeskResult<String> {
    sqlx::query_scalar("SELECT name FROM ticket_category WHERE id = ?1")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| DeskError::NotFound(format!("Category {} not found", id)))
}

async fn load_recipient(conn: &mut SqliteConnection, id: i64) -> DeskResult<Recipient> {
    let row = sqlx::query("SELECT username, email FROM users WHERE id = ?1 AND is_system = 0")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| DeskError::NotFound(format!("User {} not found", id)))?;

    Ok(Recipient {
        username: row.try_get("username")?,
        email: row.try_get("email")?,
    })
}

async fn fetch_ticket(conn: &mut SqliteConnection, id: i64) -> DeskResult<Ticket> {
    let row = sqlx::query(&format!("{} WHERE t.id = ?1", TICKET_SELECT))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| DeskError::NotFound(format!("Ticket {} not found", id)))?;

    ticket_from_row(&row)
}

async fn fetch_comment(conn: &mut SqliteConnection, id: i64) -> DeskResult<TicketComment> {
    let row = sqlx::query(
        "SELECT c.id, c.ticket_id, c.user_id, u.username, c.content, c.created_at, c.updated_at
         FROM ticket_comment c JOIN users u ON u.id = c.user_id WHERE c.id = ?1",
    )
    .bind(id)
    .fetch_one(&mut *conn)
    .await?;

    comment_from_row(&row)
}

fn ticket_from_row(row: &SqliteRow) -> DeskResult<Ticket> {
    let status: String = row.try_get("status")?;
    let priority: i64 = row.try_get("priority")?;
    let due_date: Option<String> = row.try_get("due_date")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;

    Ok(Ticket {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        category_id: row.try_get("category_id")?,
        category_name: row.try_get("category_name")?,
        status: status
            .parse()
            .map_err(|_| DeskError::Internal(format!("Unknown stored status {:?}", status)))?,
        priority: Priority::try_from(priority)
            .map_err(|_| DeskError::Internal(format!("Unknown stored priority {}", priority)))?,
        assigned_to: row.try_get("assigned_to")?,
        assignee_name: row.try_get("assignee_name")?,
        created_by: row.try_get("created_by")?,
        creator_name: row.try_get("creator_name")?,
        due_date: due_date.as_deref().map(decode_date).transpose()?,
        archived: row.try_get("archived")?,
        created_at: decode_ts(&created_at)?,
        updated_at: decode_ts(&updated_at)?,
    })
}

fn comment_from_row(row: &SqliteRow) -> DeskResult<TicketComment> {
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;
    Ok(TicketComment {
        id: row.try_get("id")?,
        ticket_id: row.try_get("ticket_id")?,
        user_id: row.try_get("user_id")?,
        username: row.try_get("username")?,
        content: row.try_get("content")?,
        created_at: decode_ts(&created_at)?,
        updated_at: decode_ts(&updated_at)?,
    })
}

fn history_from_row(row: &SqliteRow) -> DeskResult<HistoryEntry> {
    let created_at: String = row.try_get("created_at")?;
    Ok(HistoryEntry {
        id: row.try_get("id")?,
        ticket_id: row.try_get("ticket_id")?,
        user_id: row.try_get("user_id")?,
        username: row.try_get("username")?,
        action: row.try_get("action")?,
        details: row.try_get("details")?,
        created_at: decode_ts(&created_at)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::db::test_support::temp_pool;
    use crate::mailer::MemoryMailer;
    use chrono::{Duration, NaiveDate, TimeZone};
    use chrono_tz::Tz;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        pool: SqlitePool,
        manager: TicketManager,
        mailer: MemoryMailer,
        clock: Arc<FixedClock>,
        admin: Actor,
        tech: Actor,
        other: Actor,
        category_id: i64,
    }

    async fn add_user(pool: &SqlitePool, name: &str, is_admin: bool) -> Actor {
        let id = sqlx::query(
            "INSERT INTO users (username, email, password_hash, is_admin, created_at)
             VALUES (?1, ?2, 'x', ?3, '2024-01-01T00:00:00Z')",
        )
        .bind(name)
        .bind(format!("{}@example.com", name))
        .bind(is_admin)
        .execute(pool)
        .await
        .unwrap()
        .last_insert_rowid();

        Actor {
            user_id: id,
            username: name.to_string(),
            is_admin,
            timezone: Tz::UTC,
        }
    }

    async fn setup() -> Fixture {
        let (dir, pool) = temp_pool().await;
        let clock = Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()));
        let mailer = MemoryMailer::new();
        let dispatcher = Arc::new(NotificationDispatcher::new(
            pool.clone(),
            Arc::new(mailer.clone()),
            clock.clone(),
        ));
        let manager = TicketManager::new(pool.clone(), dispatcher, clock.clone());

        let admin = add_user(&pool, "admin", true).await;
        let tech = add_user(&pool, "tech1", false).await;
        let other = add_user(&pool, "tech2", false).await;
        let category_id = sqlx::query(
            "INSERT INTO ticket_category (name, created_at) VALUES ('Network', '2024-01-01T00:00:00Z')",
        )
        .execute(&pool)
        .await
        .unwrap()
        .last_insert_rowid();

        Fixture {
            _dir: dir,
            pool,
            manager,
            mailer,
            clock,
            admin,
            tech,
            other,
            category_id,
        }
    }

    fn new_ticket(category_id: i64, assigned_to: Option<i64>) -> NewTicket {
        NewTicket {
            title: "VPN down".to_string(),
            description: "Cannot connect from home".to_string(),
            category_id,
            priority: Priority::High,
            assigned_to,
            due_date: None,
        }
    }

    async fn actions(f: &Fixture, id: i64) -> Vec<String> {
        f.manager
            .history(&f.admin, id)
            .await
            .unwrap()
            .into_iter()
            .map(|h| h.action)
            .collect()
    }

    #[tokio::test]
    async fn test_create_writes_history() {
        let f = setup().await;
        let ticket = f.manager.create(&f.tech, new_ticket(f.category_id, None)).await.unwrap();
        assert_eq!(ticket.status, TicketStatus::Open);
        assert_eq!(ticket.priority, Priority::High);
        assert_eq!(ticket.creator_name, "tech1");
        assert_eq!(actions(&f, ticket.id).await, vec!["created"]);
        assert!(f.mailer.sent().is_empty());
    }

    #[tokio::test]
    async fn test_create_validation() {
        let f = setup().await;
        let missing_category = f.manager.create(&f.tech, new_ticket(999, None)).await;
        assert!(matches!(missing_category, Err(DeskError::NotFound(_))));

        let mut blank = new_ticket(f.category_id, None);
        blank.title = String::new();
        assert!(matches!(
            f.manager.create(&f.tech, blank).await,
            Err(DeskError::Validation(_))
        ));

        let assign_other = f
            .manager
            .create(&f.tech, new_ticket(f.category_id, Some(f.other.user_id)))
            .await;
        assert!(matches!(assign_other, Err(DeskError::Forbidden(_))));
    }

    #[tokio::test]
    async fn test_whitespace_only_text_rejected() {
        let f = setup().await;

        let mut blank_title = new_ticket(f.category_id, None);
        blank_title.title = "   ".to_string();
        assert!(matches!(
            f.manager.create(&f.tech, blank_title).await,
            Err(DeskError::Validation(_))
        ));

        let mut blank_description = new_ticket(f.category_id, None);
        blank_description.description = "\n\t ".to_string();
        assert!(matches!(
            f.manager.create(&f.tech, blank_description).await,
            Err(DeskError::Validation(_))
        ));

        let mut padded = new_ticket(f.category_id, None);
        padded.title = "  VPN down  ".to_string();
        let ticket = f.manager.create(&f.tech, padded).await.unwrap();
        assert_eq!(ticket.title, "VPN down");

        let blank_edit = f
            .manager
            .edit(
                &f.tech,
                ticket.id,
                TicketEdit {
                    title: Some(" ".to_string()),
                    ..TicketEdit::default()
                },
            )
            .await;
        assert!(matches!(blank_edit, Err(DeskError::Validation(_))));
        assert_eq!(actions(&f, ticket.id).await, vec!["created"]);
    }

    #[tokio::test]
    async fn test_create_with_assignee_notifies() {
        let f = setup().await;
        let ticket = f
            .manager
            .create(&f.admin, new_ticket(f.category_id, Some(f.tech.user_id)))
            .await
            .unwrap();
        assert_eq!(ticket.assignee_name.as_deref(), Some("tech1"));

        let sent = f.mailer.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].to.contains(&"tech1@example.com".to_string()));
        assert_eq!(sent[0].subject, format!("Ticket #{} assigned: VPN down", ticket.id));
    }

    #[tokio::test]
    async fn test_status_change_with_comment() {
        let f = setup().await;
        let ticket = f.manager.create(&f.tech, new_ticket(f.category_id, None)).await.unwrap();

        let updated = f
            .manager
            .change_status(&f.tech, ticket.id, "in_progress", Some("investigating"))
            .await
            .unwrap();
        assert_eq!(updated.status, TicketStatus::InProgress);

        let history = f.manager.history(&f.tech, ticket.id).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].action, "status_changed");
        assert_eq!(
            history[1].details.as_deref(),
            Some("Status changed from open to in_progress")
        );

        let comments = f.manager.comments(&f.tech, ticket.id).await.unwrap();
        assert_eq!(comments.len(), 1);
        assert_eq!(comments[0].content, "investigating");

        let invalid = f.manager.change_status(&f.tech, ticket.id, "done", None).await;
        assert!(matches!(invalid, Err(DeskError::Validation(_))));

        // Closed tickets can be reopened
        f.manager.change_status(&f.tech, ticket.id, "closed", None).await.unwrap();
        let reopened = f.manager.change_status(&f.tech, ticket.id, "open", None).await.unwrap();
        assert_eq!(reopened.status, TicketStatus::Open);
    }

    #[tokio::test]
    async fn test_comment_notifies_assignee_but_not_self() {
        let f = setup().await;
        let ticket = f
            .manager
            .create(&f.admin, new_ticket(f.category_id, Some(f.tech.user_id)))
            .await
            .unwrap();

        f.manager.add_comment(&f.tech, ticket.id, "Looking now").await.unwrap();
        assert_eq!(f.mailer.sent().len(), 1);

        f.manager.add_comment(&f.admin, ticket.id, "Thanks").await.unwrap();
        let sent = f.mailer.sent();
        assert_eq!(sent.len(), 2);
        assert!(sent[1].subject.starts_with("New comment on ticket"));

        let empty = f.manager.add_comment(&f.admin, ticket.id, "   ").await;
        assert!(matches!(empty, Err(DeskError::Validation(_))));

        let outsider = f.manager.add_comment(&f.other, ticket.id, "hi").await;
        assert!(matches!(outsider, Err(DeskError::Forbidden(_))));
    }

    #[tokio::test]
    async fn test_assign_and_unassign() {
        let f = setup().await;
        let ticket = f.manager.create(&f.tech, new_ticket(f.category_id, None)).await.unwrap();

        let denied = f.manager.assign(&f.other, ticket.id, Some(f.other.user_id), None).await;
        assert!(matches!(denied, Err(DeskError::Forbidden(_))));

        let assigned = f
            .manager
            .assign(&f.tech, ticket.id, Some(f.other.user_id), Some("please check"))
            .await
            .unwrap();
        assert_eq!(assigned.assigned_to, Some(f.other.user_id));

        // The assignee can now see it
        f.manager.get(&f.other, ticket.id).await.unwrap();

        f.manager.assign(&f.admin, ticket.id, None, None).await.unwrap();
        let history = f.manager.history(&f.admin, ticket.id).await.unwrap();
        let actions: Vec<&str> = history.iter().map(|h| h.action.as_str()).collect();
        assert_eq!(actions, vec!["created", "assigned", "unassigned"]);
        assert_eq!(
            history[1].details.as_deref(),
            Some("Assigned to tech2: please check")
        );

        let missing = f.manager.assign(&f.admin, ticket.id, Some(999), None).await;
        assert!(matches!(missing, Err(DeskError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_assignment_survives_delivery_failure() {
        let (dir, pool) = temp_pool().await;
        let clock: SharedClock =
            Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()));
        let dispatcher = Arc::new(NotificationDispatcher::new(
            pool.clone(),
            Arc::new(MemoryMailer::failing("sender identity not verified")),
            clock.clone(),
        ));
        let manager = TicketManager::new(pool.clone(), dispatcher, clock);
        let admin = add_user(&pool, "admin", true).await;
        let tech = add_user(&pool, "tech1", false).await;
        let category_id = sqlx::query(
            "INSERT INTO ticket_category (name, created_at) VALUES ('Network', '2024-01-01T00:00:00Z')",
        )
        .execute(&pool)
        .await
        .unwrap()
        .last_insert_rowid();

        let ticket = manager.create(&admin, new_ticket(category_id, None)).await.unwrap();
        let assigned = manager
            .assign(&admin, ticket.id, Some(tech.user_id), None)
            .await
            .unwrap();
        assert_eq!(assigned.assigned_to, Some(tech.user_id));
        assert_eq!(manager.history(&admin, ticket.id).await.unwrap().len(), 2);
        drop(dir);
    }

    #[tokio::test]
    async fn test_edit_records_single_diff() {
        let f = setup().await;
        let ticket = f.manager.create(&f.tech, new_ticket(f.category_id, None)).await.unwrap();
        let hardware = sqlx::query(
            "INSERT INTO ticket_category (name, created_at) VALUES ('Hardware', '2024-01-01T00:00:00Z')",
        )
        .execute(&f.pool)
        .await
        .unwrap()
        .last_insert_rowid();

        // Nothing actually changes
        f.manager
            .edit(
                &f.tech,
                ticket.id,
                TicketEdit {
                    title: Some("VPN down".to_string()),
                    priority: Some(Priority::High),
                    ..TicketEdit::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(actions(&f, ticket.id).await, vec!["created"]);

        let edited = f
            .manager
            .edit(
                &f.tech,
                ticket.id,
                TicketEdit {
                    title: Some("VPN unstable".to_string()),
                    category_id: Some(hardware),
                    priority: Some(Priority::Urgent),
                    due_date: NaiveDate::from_ymd_opt(2024, 3, 8),
                    ..TicketEdit::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(edited.category_name, "Hardware");
        assert_eq!(edited.priority, Priority::Urgent);

        let history = f.manager.history(&f.tech, ticket.id).await.unwrap();
        assert_eq!(history.len(), 2);
        let details = history[1].details.clone().unwrap();
        assert!(details.contains("title changed from \"VPN down\" to \"VPN unstable\""));
        assert!(details.contains("category changed from Network to Hardware"));
        assert!(details.contains("priority changed from High to Urgent"));
        assert!(details.contains("due date changed from none to 2024-03-08"));
        assert!(!details.contains("description"));

        let cleared = f
            .manager
            .edit(
                &f.tech,
                ticket.id,
                TicketEdit {
                    clear_due_date: true,
                    ..TicketEdit::default()
                },
            )
            .await
            .unwrap();
        assert!(cleared.due_date.is_none());

        let denied = f.manager.edit(&f.other, ticket.id, TicketEdit::default()).await;
        assert!(matches!(denied, Err(DeskError::Forbidden(_))));
    }

    #[tokio::test]
    async fn test_archive_hides_from_default_dashboard() {
        let f = setup().await;
        let ticket = f.manager.create(&f.tech, new_ticket(f.category_id, None)).await.unwrap();

        let denied = f.manager.archive(&f.other, ticket.id).await;
        assert!(matches!(denied, Err(DeskError::Forbidden(_))));

        let archived = f.manager.archive(&f.tech, ticket.id).await.unwrap();
        assert!(archived.archived);
        assert_eq!(archived.status, TicketStatus::Open);

        let default_view = f
            .manager
            .dashboard(&f.admin, &DashboardFilter::default())
            .await
            .unwrap();
        assert!(default_view.is_empty());

        let archived_view = f
            .manager
            .dashboard(
                &f.admin,
                &DashboardFilter {
                    archived: true,
                    ..DashboardFilter::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(archived_view.len(), 1);

        // Archiving twice writes nothing new
        f.manager.archive(&f.admin, ticket.id).await.unwrap();
        f.manager.unarchive(&f.admin, ticket.id).await.unwrap();
        assert_eq!(
            actions(&f, ticket.id).await,
            vec!["created", "archived", "unarchived"]
        );
    }

    #[tokio::test]
    async fn test_dashboard_scope_and_filters() {
        let f = setup().await;
        let mine = f.manager.create(&f.tech, new_ticket(f.category_id, None)).await.unwrap();
        f.clock.advance(Duration::minutes(5));
        let theirs = f.manager.create(&f.other, new_ticket(f.category_id, None)).await.unwrap();
        f.clock.advance(Duration::minutes(5));
        let mut low = new_ticket(f.category_id, Some(f.tech.user_id));
        low.priority = Priority::Low;
        let assigned = f.manager.create(&f.admin, low).await.unwrap();

        let admin_view = f.manager.dashboard(&f.admin, &DashboardFilter::default()).await.unwrap();
        let ids: Vec<i64> = admin_view.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![assigned.id, theirs.id, mine.id]);

        let tech_view = f.manager.dashboard(&f.tech, &DashboardFilter::default()).await.unwrap();
        let ids: Vec<i64> = tech_view.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![assigned.id, mine.id]);

        let high_only = f
            .manager
            .dashboard(
                &f.admin,
                &DashboardFilter {
                    priority: Some(Priority::High),
                    ..DashboardFilter::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(high_only.len(), 2);

        let hidden = f.manager.get(&f.other, mine.id).await;
        assert!(matches!(hidden, Err(DeskError::Forbidden(_))));
    }

    #[tokio::test]
    async fn test_delete_cascades() {
        let f = setup().await;
        let ticket = f.manager.create(&f.tech, new_ticket(f.category_id, None)).await.unwrap();
        f.manager.add_comment(&f.tech, ticket.id, "first").await.unwrap();

        let denied = f.manager.delete(&f.tech, ticket.id).await;
        assert!(matches!(denied, Err(DeskError::Forbidden(_))));

        f.manager.delete(&f.admin, ticket.id).await.unwrap();
        let remaining: i64 = sqlx::query_scalar(
            "SELECT (SELECT COUNT(*) FROM ticket_comment) + (SELECT COUNT(*) FROM ticket_history)",
        )
        .fetch_one(&f.pool)
        .await
        .unwrap();
        assert_eq!(remaining, 0);

        assert!(matches!(
            f.manager.delete(&f.admin, ticket.id).await,
            Err(DeskError::NotFound(_))
        ));
    }
}
