/// Technician shifts and time off
///
/// Windows are stored in UTC as half-open `[start, end)` intervals. For any
/// technician, no two working (non time-off) windows overlap; time-off entries
/// neither block nor are blocked.

mod manager;

pub use manager::ScheduleManager;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

/// Upcoming time-off lookahead
pub const TIME_OFF_LOOKAHEAD_DAYS: i64 = 14;

/// A stored schedule with its technician and location names
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schedule {
    pub id: i64,
    pub technician_id: i64,
    pub technician_name: String,
    pub technician_color: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub description: String,
    pub location_id: Option<i64>,
    pub location_name: Option<String>,
    pub time_off: bool,
    pub created_at: DateTime<Utc>,
}

impl Schedule {
    /// Whether two windows share any instant
    pub fn overlaps(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        self.start_time < end && self.end_time > start
    }
}

/// Create or edit one window. Times are wall-clock in the acting user's
/// timezone.
#[derive(Debug, Clone)]
pub struct ScheduleRequest {
    /// Defaults to the acting user; only admins may name someone else
    pub technician_id: Option<i64>,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub location_id: Option<i64>,
    pub description: String,
    pub time_off: bool,
}

/// The same local time-of-day window on several dates
#[derive(Debug, Clone)]
pub struct BatchRequest {
    pub technician_id: Option<i64>,
    pub dates: Vec<NaiveDate>,
    pub start_time: NaiveTime,
    /// An end earlier than the start finishes on the following day
    pub end_time: NaiveTime,
    pub location_id: Option<i64>,
    pub description: String,
    pub time_off: bool,
}

/// Result of a batch create: conflicting dates are skipped, not fatal
#[derive(Debug, Clone, Serialize)]
pub struct BatchOutcome {
    pub created: Vec<Schedule>,
    pub skipped: Vec<NaiveDate>,
}

impl BatchOutcome {
    pub fn created_count(&self) -> usize {
        self.created.len()
    }

    pub fn skipped_count(&self) -> usize {
        self.skipped.len()
    }
}

/// Schedules for one local calendar week
#[derive(Debug, Clone, Serialize)]
pub struct WeekView {
    pub week_start: NaiveDate,
    pub range_start: DateTime<Utc>,
    pub range_end: DateTime<Utc>,
    pub schedules: Vec<Schedule>,
}

/// Someone working right now
#[derive(Debug, Clone, Serialize)]
pub struct ActiveShift {
    pub username: String,
    pub color: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub description: String,
    pub location_name: Option<String>,
    pub location_description: Option<String>,
}

/// Consecutive days off for one user
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimeOffRun {
    pub username: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub description: String,
}

impl TimeOffRun {
    /// Inclusive length in days
    pub fn duration_days(&self) -> i64 {
        (self.end_date - self.start_date).num_days() + 1
    }
}

/// Merge per-user entries whose local dates touch or are one day apart.
///
/// Input is `(username, start_date, end_date, description)` in start order;
/// users come out in order of their first entry.
pub fn consolidate_time_off(
    entries: Vec<(String, NaiveDate, NaiveDate, String)>,
) -> Vec<TimeOffRun> {
    let mut per_user: Vec<(String, Vec<TimeOffRun>)> = Vec::new();

    for (username, start_date, end_date, description) in entries {
        let run = TimeOffRun {
            username: username.clone(),
            start_date,
            end_date,
            description: if description.trim().is_empty() {
                "Time Off".to_string()
            } else {
                description
            },
        };
        match per_user.iter_mut().find(|(name, _)| *name == username) {
            Some((_, runs)) => runs.push(run),
            None => per_user.push((username, vec![run])),
        }
    }

    let mut consolidated = Vec::new();
    for (_, mut runs) in per_user {
        runs.sort_by_key(|r| r.start_date);
        let mut iter = runs.into_iter();
        let Some(mut current) = iter.next() else {
            continue;
        };
        for run in iter {
            if (run.start_date - current.end_date).num_days() <= 1 {
                current.end_date = current.end_date.max(run.end_date);
            } else {
                consolidated.push(current);
                current = run;
            }
        }
        consolidated.push(current);
    }
    consolidated
}
