/// Helpdesk tickets
///
/// Tickets carry an ordered comment thread and an append-only history log.
/// Any status may follow any other; `closed` tickets can be reopened.

mod categories;
mod manager;

pub use categories::{Category, CategoryManager, CategoryUpdate, NewCategory};
pub use manager::TicketManager;

use crate::error::{DeskError, DeskResult};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use validator::Validate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    Open,
    InProgress,
    Pending,
    Resolved,
    Closed,
}

impl TicketStatus {
    pub const ALL: [TicketStatus; 5] = [
        TicketStatus::Open,
        TicketStatus::InProgress,
        TicketStatus::Pending,
        TicketStatus::Resolved,
        TicketStatus::Closed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TicketStatus::Open => "open",
            TicketStatus::InProgress => "in_progress",
            TicketStatus::Pending => "pending",
            TicketStatus::Resolved => "resolved",
            TicketStatus::Closed => "closed",
        }
    }
}

impl FromStr for TicketStatus {
    type Err = DeskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TicketStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s.trim())
            .ok_or_else(|| DeskError::Validation(format!("Invalid status: {}", s)))
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ticket priority, stored and serialized as its level 0..=3
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum Priority {
    Low,
    Medium,
    High,
    Urgent,
}

impl Priority {
    pub fn level(&self) -> i64 {
        match self {
            Priority::Low => 0,
            Priority::Medium => 1,
            Priority::High => 2,
            Priority::Urgent => 3,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Priority::Low => "Low",
            Priority::Medium => "Medium",
            Priority::High => "High",
            Priority::Urgent => "Urgent",
        }
    }
}

impl TryFrom<i64> for Priority {
    type Error = DeskError;

    fn try_from(level: i64) -> DeskResult<Self> {
        match level {
            0 => Ok(Priority::Low),
            1 => Ok(Priority::Medium),
            2 => Ok(Priority::High),
            3 => Ok(Priority::Urgent),
            other => Err(DeskError::Validation(format!("Invalid priority: {}", other))),
        }
    }
}

impl From<Priority> for i64 {
    fn from(priority: Priority) -> Self {
        priority.level()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticket {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub category_id: i64,
    pub category_name: String,
    pub status: TicketStatus,
    pub priority: Priority,
    pub assigned_to: Option<i64>,
    pub assignee_name: Option<String>,
    pub created_by: i64,
    pub creator_name: String,
    pub due_date: Option<NaiveDate>,
    pub archived: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketComment {
    pub id: i64,
    pub ticket_id: i64,
    pub user_id: i64,
    pub username: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One audit log row. Never updated once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: i64,
    pub ticket_id: i64,
    pub user_id: i64,
    pub username: String,
    pub action: String,
    pub details: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct NewTicket {
    #[validate(length(min = 1, max = 200))]
    pub title: String,
    #[validate(length(min = 1))]
    pub description: String,
    pub category_id: i64,
    pub priority: Priority,
    pub assigned_to: Option<i64>,
    pub due_date: Option<NaiveDate>,
}

impl NewTicket {
    /// Trim free text so whitespace-only values fail validation
    pub fn normalized(mut self) -> Self {
        self.title = self.title.trim().to_string();
        self.description = self.description.trim().to_string();
        self
    }
}

/// Fields to change; unset fields keep their value
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct TicketEdit {
    #[validate(length(min = 1, max = 200))]
    pub title: Option<String>,
    #[validate(length(min = 1))]
    pub description: Option<String>,
    pub category_id: Option<i64>,
    pub priority: Option<Priority>,
    pub due_date: Option<NaiveDate>,
    /// Remove the due date
    #[serde(default)]
    pub clear_due_date: bool,
}

impl TicketEdit {
    pub fn normalized(mut self) -> Self {
        self.title = self.title.map(|t| t.trim().to_string());
        self.description = self.description.map(|d| d.trim().to_string());
        self
    }
}

/// Dashboard filters. With nothing set the view is open, unarchived tickets.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DashboardFilter {
    pub status: Option<TicketStatus>,
    pub category_id: Option<i64>,
    pub priority: Option<Priority>,
    pub assigned_to: Option<i64>,
    /// Show archived tickets instead of active ones
    #[serde(default)]
    pub archived: bool,
    /// Ignore the implicit `open` status default
    #[serde(default)]
    pub all_statuses: bool,
}

impl DashboardFilter {
    /// Status actually filtered on
    pub fn effective_status(&self) -> Option<TicketStatus> {
        if self.status.is_some() || self.all_statuses {
            return self.status;
        }
        let unfiltered =
            self.category_id.is_none() && self.priority.is_none() && self.assigned_to.is_none();
        unfiltered.then_some(TicketStatus::Open)
    }
}
