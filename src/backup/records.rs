/// Backup document schema
///
/// Records reference each other by natural key (username, location name,
/// category name) rather than numeric id. Every field has a default so older
/// or partial documents still load; unknown fields are ignored.
use crate::error::{DeskError, DeskResult};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

fn default_true() -> bool {
    true
}

/// Whole-database export
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupDocument {
    pub users: Vec<UserRecord>,
    pub locations: Vec<LocationRecord>,
    pub schedules: Vec<ScheduleRecord>,
    pub quick_links: Vec<QuickLinkRecord>,
    pub ticket_categories: Vec<CategoryRecord>,
    pub tickets: Vec<TicketRecord>,
    pub email_settings: Option<EmailSettingsRecord>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UserRecord {
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub is_admin: bool,
    pub color: Option<String>,
    pub timezone: Option<String>,
    pub theme: Option<String>,
    pub is_system: bool,
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocationRecord {
    pub name: String,
    pub description: String,
    #[serde(default = "default_true")]
    pub active: bool,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
}

impl Default for LocationRecord {
    fn default() -> Self {
        Self {
            name: String::new(),
            description: String::new(),
            active: true,
            created_at: None,
            updated_at: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleRecord {
    pub technician_username: String,
    pub start_time: String,
    pub end_time: String,
    pub description: String,
    pub location_name: Option<String>,
    pub time_off: bool,
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct QuickLinkRecord {
    pub title: String,
    pub url: String,
    pub icon: Option<String>,
    pub category: String,
    #[serde(alias = "display_order")]
    pub order: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CategoryRecord {
    pub name: String,
    pub description: String,
    pub icon: Option<String>,
    pub priority_level: i64,
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TicketRecord {
    /// Numeric id in the source database, reused when free
    pub id: Option<i64>,
    pub title: String,
    pub description: String,
    pub category_name: String,
    pub status: String,
    pub priority: i64,
    pub assigned_to_username: Option<String>,
    pub created_by_username: String,
    pub due_date: Option<String>,
    pub archived: bool,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
    pub comments: Vec<CommentRecord>,
    pub history: Vec<HistoryRecord>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CommentRecord {
    pub username: String,
    pub content: String,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryRecord {
    pub username: String,
    pub action: String,
    pub details: Option<String>,
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmailSettingsRecord {
    pub admin_email_group: String,
    pub notify_on_create: bool,
    pub notify_on_update: bool,
    pub notify_on_delete: bool,
}

impl Default for EmailSettingsRecord {
    fn default() -> Self {
        Self {
            admin_email_group: crate::notify::DEFAULT_ADMIN_GROUP.to_string(),
            notify_on_create: true,
            notify_on_update: true,
            notify_on_delete: true,
        }
    }
}

/// Parse a timestamp from a backup file.
///
/// Accepts RFC 3339 with any offset, or a bare ISO 8601 date-time which is
/// taken as UTC.
pub fn parse_record_ts(raw: &str) -> DeskResult<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Ok(parsed.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .map(|naive| naive.and_utc())
        .ok_or_else(|| DeskError::Validation(format!("Malformed timestamp {:?}", raw)))
}

/// Optional timestamp, falling back to `now` when absent
pub fn parse_optional_ts(raw: Option<&str>, now: DateTime<Utc>) -> DeskResult<DateTime<Utc>> {
    match raw {
        Some(raw) if !raw.trim().is_empty() => parse_record_ts(raw),
        _ => Ok(now),
    }
}

pub fn parse_record_date(raw: &str) -> DeskResult<NaiveDate> {
    let raw = raw.trim();
    let date_part = raw.get(..10).unwrap_or(raw);
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d")
        .map_err(|_| DeskError::Validation(format!("Malformed date {:?}", raw)))
}
