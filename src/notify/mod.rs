/// Best-effort email notifications for schedule and ticket events
///
/// Engines collect events into an [`Outbox`] while their transaction is open
/// and hand it to [`NotificationDispatcher::flush`] only after commit. The
/// dispatcher never returns an error: delivery problems are logged and
/// reported as `false`.

mod render;
mod settings;

pub use render::{escape_html, render};
pub use settings::{
    load_settings, store_settings, EmailSettings, EmailSettingsManager, EmailSettingsUpdate,
    DEFAULT_ADMIN_GROUP,
};

use crate::{clock::SharedClock, mailer::EmailTransport};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use sqlx::SqlitePool;
use std::sync::Arc;

/// Someone who can receive a notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recipient {
    pub username: String,
    pub email: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleAction {
    Created,
    Updated,
    Deleted,
}

impl ScheduleAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduleAction::Created => "created",
            ScheduleAction::Updated => "updated",
            ScheduleAction::Deleted => "deleted",
        }
    }

    fn enabled(&self, settings: &EmailSettings) -> bool {
        match self {
            ScheduleAction::Created => settings.notify_on_create,
            ScheduleAction::Updated => settings.notify_on_update,
            ScheduleAction::Deleted => settings.notify_on_delete,
        }
    }
}

/// A schedule mutation, captured with everything needed to render it
#[derive(Debug, Clone)]
pub struct ScheduleNotice {
    pub action: ScheduleAction,
    pub technician: Recipient,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// Timezone the times are rendered in (the technician's)
    pub tz: Tz,
    pub location: Option<String>,
    pub description: String,
    pub time_off: bool,
    pub additional_info: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TicketSummary {
    pub id: i64,
    pub title: String,
    pub status: String,
    pub priority: String,
    pub category: String,
}

#[derive(Debug, Clone)]
pub enum TicketEvent {
    Assigned { note: Option<String> },
    Commented { content: String },
    StatusChanged {
        from: String,
        to: String,
        comment: Option<String>,
    },
}

#[derive(Debug, Clone)]
pub struct TicketNotice {
    pub event: TicketEvent,
    pub ticket: TicketSummary,
    /// Current assignee; without one there is nobody to notify
    pub assignee: Option<Recipient>,
    /// Username of whoever triggered the event
    pub actor: String,
}

#[derive(Debug, Clone)]
pub enum Notification {
    Schedule(ScheduleNotice),
    Ticket(TicketNotice),
}

/// Events waiting for their transaction to commit
#[derive(Debug, Default)]
pub struct Outbox {
    pending: Vec<Notification>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, notification: Notification) {
        self.pending.push(notification);
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Sends rendered notifications through an [`EmailTransport`]
pub struct NotificationDispatcher {
    db: SqlitePool,
    transport: Arc<dyn EmailTransport>,
    clock: SharedClock,
}

impl NotificationDispatcher {
    pub fn new(db: SqlitePool, transport: Arc<dyn EmailTransport>, clock: SharedClock) -> Self {
        Self {
            db,
            transport,
            clock,
        }
    }

    /// Deliver every event in a committed outbox. Returns how many were sent.
    pub async fn flush(&self, outbox: Outbox) -> usize {
        let mut delivered = 0;
        for notification in &outbox.pending {
            if self.dispatch(notification).await {
                delivered += 1;
            }
        }
        delivered
    }

    /// Deliver one notification. `false` means it was skipped or failed.
    pub async fn dispatch(&self, notification: &Notification) -> bool {
        let settings = match self.settings().await {
            Some(settings) => settings,
            None => return false,
        };

        let extra = match notification {
            Notification::Schedule(notice) => {
                if !notice.action.enabled(&settings) {
                    tracing::debug!(
                        "Schedule {} notifications disabled, skipping",
                        notice.action.as_str()
                    );
                    return false;
                }
                &notice.technician
            }
            Notification::Ticket(notice) => match &notice.assignee {
                Some(assignee) => assignee,
                None => {
                    tracing::debug!(
                        "Ticket #{} has no assignee, skipping notification",
                        notice.ticket.id
                    );
                    return false;
                }
            },
        };

        let recipients = build_recipients(&settings, &extra.email);
        let (subject, html) = render(notification);

        match self.transport.send(&recipients, &subject, &html).await {
            Ok(()) => {
                tracing::info!("Notification sent to {}: {}", recipients.join(", "), subject);
                true
            }
            Err(e) => {
                tracing::error!(
                    "Failed to send notification to {} (subject: {:?}): {}",
                    recipients.join(", "),
                    subject,
                    e
                );
                false
            }
        }
    }

    async fn settings(&self) -> Option<EmailSettings> {
        let mut conn = match self.db.acquire().await {
            Ok(conn) => conn,
            Err(e) => {
                tracing::error!("Cannot read email settings: {}", e);
                return None;
            }
        };
        match load_settings(&mut conn, self.clock.now()).await {
            Ok(settings) => Some(settings),
            Err(e) => {
                tracing::error!("Cannot read email settings: {}", e);
                None
            }
        }
    }
}

/// Admin group first, then the event's own recipient, without duplicates
fn build_recipients(settings: &EmailSettings, extra: &str) -> Vec<String> {
    let mut recipients = settings.admin_recipients();
    let extra = extra.trim();
    if !extra.is_empty() && !recipients.iter().any(|r| r.eq_ignore_ascii_case(extra)) {
        recipients.push(extra.to_string());
    }
    recipients
}
