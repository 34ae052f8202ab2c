/// Schedule conflict engine and calendar queries
use crate::{
    account::Actor,
    clock::SharedClock,
    db::{decode_ts, encode_ts},
    error::{DeskError, DeskResult},
    notify::{
        Notification, NotificationDispatcher, Outbox, Recipient, ScheduleAction, ScheduleNotice,
    },
    schedule::{
        consolidate_time_off, ActiveShift, BatchOutcome, BatchRequest, Schedule, ScheduleRequest,
        TimeOffRun, WeekView, TIME_OFF_LOOKAHEAD_DAYS,
    },
    timezone,
};
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use chrono_tz::Tz;
use sqlx::{sqlite::SqliteRow, Row, SqliteConnection, SqlitePool};
use std::sync::Arc;

const SCHEDULE_SELECT: &str = "SELECT s.id, s.technician_id, u.username AS technician_name,
        u.color AS technician_color, s.start_time, s.end_time, s.description,
        s.location_id, l.name AS location_name, s.time_off, s.created_at
    FROM schedule s
    JOIN users u ON u.id = s.technician_id
    LEFT JOIN location l ON l.id = s.location_id";

/// Schedule manager service
pub struct ScheduleManager {
    db: SqlitePool,
    dispatcher: Arc<NotificationDispatcher>,
    clock: SharedClock,
    default_tz: Tz,
}

impl ScheduleManager {
    pub fn new(
        db: SqlitePool,
        dispatcher: Arc<NotificationDispatcher>,
        clock: SharedClock,
        default_tz: Tz,
    ) -> Self {
        Self {
            db,
            dispatcher,
            clock,
            default_tz,
        }
    }

    pub async fn get(&self, id: i64) -> DeskResult<Schedule> {
        let mut conn = self.db.acquire().await?;
        fetch_schedule(&mut conn, id).await
    }

    /// Create a window, or edit the one named by `schedule_id`.
    ///
    /// The overlap check and the write share one transaction.
    pub async fn create_or_update(
        &self,
        actor: &Actor,
        schedule_id: Option<i64>,
        req: ScheduleRequest,
    ) -> DeskResult<Schedule> {
        check_technician(actor, req.technician_id)?;
        let (start_utc, end_utc) = timezone::normalize_window(req.start, req.end, actor.timezone)?;

        let mut tx = self.db.begin().await?;

        let existing = match schedule_id {
            Some(id) => {
                let existing = fetch_schedule(&mut tx, id).await?;
                if existing.technician_id != actor.user_id && !actor.is_admin {
                    return Err(DeskError::Forbidden(
                        "You do not have permission to edit this schedule".to_string(),
                    ));
                }
                Some(existing)
            }
            None => None,
        };

        let technician_id = req
            .technician_id
            .or(existing.as_ref().map(|e| e.technician_id))
            .unwrap_or(actor.user_id);
        let (technician, technician_tz) =
            load_technician(&mut tx, technician_id, self.default_tz).await?;
        location_name(&mut tx, req.location_id).await?;

        if !req.time_off {
            if let Some((other_start, other_end)) =
                find_overlap(&mut tx, technician_id, start_utc, end_utc, schedule_id).await?
            {
                return Err(conflict_error(other_start, other_end, actor.timezone));
            }
        }

        let id = match schedule_id {
            Some(id) => {
                sqlx::query(
                    "UPDATE schedule SET technician_id = ?1, start_time = ?2, end_time = ?3,
                            description = ?4, location_id = ?5, time_off = ?6
                     WHERE id = ?7",
                )
                .bind(technician_id)
                .bind(encode_ts(&start_utc))
                .bind(encode_ts(&end_utc))
                .bind(req.description.trim())
                .bind(req.location_id)
                .bind(req.time_off)
                .bind(id)
                .execute(&mut *tx)
                .await?;
                id
            }
            None => {
                insert_schedule(
                    &mut tx,
                    technician_id,
                    start_utc,
                    end_utc,
                    req.description.trim(),
                    req.location_id,
                    req.time_off,
                    self.clock.now(),
                )
                .await?
            }
        };

        let schedule = fetch_schedule(&mut tx, id).await?;
        tx.commit().await?;

        let action = if schedule_id.is_some() {
            ScheduleAction::Updated
        } else {
            ScheduleAction::Created
        };
        tracing::info!(
            "Schedule {} {} for {} by {} ({} to {})",
            schedule.id,
            action.as_str(),
            schedule.technician_name,
            actor.username,
            schedule.start_time,
            schedule.end_time
        );

        let mut outbox = Outbox::new();
        outbox.push(schedule_notice(action, &schedule, technician, technician_tz, actor));
        self.dispatcher.flush(outbox).await;

        Ok(schedule)
    }

    /// Project one local time-of-day window onto several dates. Dates whose
    /// window conflicts are skipped; the rest are committed together.
    pub async fn create_batch(&self, actor: &Actor, req: BatchRequest) -> DeskResult<BatchOutcome> {
        check_technician(actor, req.technician_id)?;

        let mut dates = req.dates.clone();
        dates.sort();
        dates.dedup();
        if dates.is_empty() {
            return Err(DeskError::Validation(
                "Select at least one date".to_string(),
            ));
        }

        let windows = dates
            .iter()
            .map(|date| {
                let (start, end) =
                    project_window(*date, req.start_time, req.end_time, actor.timezone)?;
                Ok((*date, start, end))
            })
            .collect::<DeskResult<Vec<_>>>()?;

        let technician_id = req.technician_id.unwrap_or(actor.user_id);
        let now = self.clock.now();

        let mut tx = self.db.begin().await?;
        let (technician, technician_tz) =
            load_technician(&mut tx, technician_id, self.default_tz).await?;
        location_name(&mut tx, req.location_id).await?;

        let mut created = Vec::new();
        let mut skipped = Vec::new();
        for (date, start_utc, end_utc) in windows {
            if !req.time_off
                && find_overlap(&mut tx, technician_id, start_utc, end_utc, None)
                    .await?
                    .is_some()
            {
                tracing::info!(
                    "Skipping {} for {}: conflicts with an existing schedule",
                    date,
                    technician.username
                );
                skipped.push(date);
                continue;
            }

            let id = insert_schedule(
                &mut tx,
                technician_id,
                start_utc,
                end_utc,
                req.description.trim(),
                req.location_id,
                req.time_off,
                now,
            )
            .await?;
            created.push(fetch_schedule(&mut tx, id).await?);
        }

        tx.commit().await?;

        tracing::info!(
            "Batch schedule for {} by {}: {} created, {} skipped",
            technician.username,
            actor.username,
            created.len(),
            skipped.len()
        );

        let mut outbox = Outbox::new();
        for schedule in &created {
            outbox.push(schedule_notice(
                ScheduleAction::Created,
                schedule,
                technician.clone(),
                technician_tz,
                actor,
            ));
        }
        self.dispatcher.flush(outbox).await;

        Ok(BatchOutcome { created, skipped })
    }

    /// Delete a window. Only its technician or an admin may do this.
    pub async fn delete(&self, actor: &Actor, id: i64) -> DeskResult<()> {
        let mut tx = self.db.begin().await?;
        let schedule = fetch_schedule(&mut tx, id).await?;
        if schedule.technician_id != actor.user_id && !actor.is_admin {
            return Err(DeskError::Forbidden(
                "You do not have permission to delete this schedule".to_string(),
            ));
        }
        let (technician, technician_tz) =
            load_technician(&mut tx, schedule.technician_id, self.default_tz).await?;

        sqlx::query("DELETE FROM schedule WHERE id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        tracing::info!(
            "Schedule {} for {} deleted by {}",
            id,
            schedule.technician_name,
            actor.username
        );

        let mut outbox = Outbox::new();
        outbox.push(schedule_notice(
            ScheduleAction::Deleted,
            &schedule,
            technician,
            technician_tz,
            actor,
        ));
        self.dispatcher.flush(outbox).await;
        Ok(())
    }

    /// Replace the target week with the source week's schedules.
    ///
    /// Both weeks are local to the acting admin. Entries move by the UTC
    /// distance between the two week starts. If the source week is empty the
    /// target week is left alone. Returns the number of schedules copied.
    pub async fn copy_week(
        &self,
        actor: &Actor,
        source_week_start: NaiveDate,
        target_week_start: NaiveDate,
    ) -> DeskResult<usize> {
        actor.require_admin()?;
        if source_week_start == target_week_start {
            return Err(DeskError::Validation(
                "Source and target weeks must differ".to_string(),
            ));
        }

        let tz = actor.timezone;
        let (source_start, source_end) = timezone::week_range_utc(source_week_start, tz);
        let (target_start, target_end) = timezone::week_range_utc(target_week_start, tz);
        let shift = target_start - source_start;
        let now = self.clock.now();

        let mut tx = self.db.begin().await?;

        let rows = sqlx::query(
            "SELECT technician_id, start_time, end_time, description, location_id, time_off
             FROM schedule WHERE start_time >= ?1 AND start_time < ?2
             ORDER BY start_time",
        )
        .bind(encode_ts(&source_start))
        .bind(encode_ts(&source_end))
        .fetch_all(&mut *tx)
        .await?;

        if rows.is_empty() {
            tracing::info!("No schedules in week of {} to copy", source_week_start);
            return Ok(0);
        }

        let removed = sqlx::query("DELETE FROM schedule WHERE start_time >= ?1 AND start_time < ?2")
            .bind(encode_ts(&target_start))
            .bind(encode_ts(&target_end))
            .execute(&mut *tx)
            .await?
            .rows_affected();

        let mut copied = 0;
        for row in &rows {
            let technician_id: i64 = row.try_get("technician_id")?;
            let start: String = row.try_get("start_time")?;
            let end: String = row.try_get("end_time")?;
            let time_off: bool = row.try_get("time_off")?;
            let description: String = row.try_get("description")?;
            let location_id: Option<i64> = row.try_get("location_id")?;

            let start = decode_ts(&start)? + shift;
            let end = decode_ts(&end)? + shift;

            // Entries reaching in from outside the target week can still collide
            if !time_off
                && find_overlap(&mut tx, technician_id, start, end, None)
                    .await?
                    .is_some()
            {
                tracing::warn!(
                    "Not copying schedule for technician {} at {}: overlaps an existing entry",
                    technician_id,
                    start
                );
                continue;
            }

            insert_schedule(
                &mut tx,
                technician_id,
                start,
                end,
                &description,
                location_id,
                time_off,
                now,
            )
            .await?;
            copied += 1;
        }

        tx.commit().await?;

        tracing::info!(
            "{} copied {} schedules from week of {} to week of {} (replaced {})",
            actor.username,
            copied,
            source_week_start,
            target_week_start,
            removed
        );
        Ok(copied)
    }

    /// Every technician's schedules starting in a local week
    pub async fn list_week(
        &self,
        viewer: &Actor,
        week_start: Option<NaiveDate>,
        location_id: Option<i64>,
    ) -> DeskResult<WeekView> {
        self.week_view(viewer, week_start, None, location_id).await
    }

    /// The acting user's own schedules for a local week
    pub async fn personal_week(
        &self,
        actor: &Actor,
        week_start: Option<NaiveDate>,
    ) -> DeskResult<WeekView> {
        self.week_view(actor, week_start, Some(actor.user_id), None)
            .await
    }

    async fn week_view(
        &self,
        viewer: &Actor,
        week_start: Option<NaiveDate>,
        technician_id: Option<i64>,
        location_id: Option<i64>,
    ) -> DeskResult<WeekView> {
        let week_start = week_start
            .unwrap_or_else(|| timezone::current_week_start(self.clock.now(), viewer.timezone));
        let (range_start, range_end) = timezone::week_range_utc(week_start, viewer.timezone);

        let rows = sqlx::query(&format!(
            "{} WHERE s.start_time >= ?1 AND s.start_time < ?2
                AND (?3 IS NULL OR s.technician_id = ?3)
                AND (?4 IS NULL OR s.location_id = ?4)
             ORDER BY s.start_time, u.username COLLATE NOCASE",
            SCHEDULE_SELECT
        ))
        .bind(encode_ts(&range_start))
        .bind(encode_ts(&range_end))
        .bind(technician_id)
        .bind(location_id)
        .fetch_all(&self.db)
        .await?;

        let schedules = rows.iter().map(schedule_from_row).collect::<DeskResult<_>>()?;
        Ok(WeekView {
            week_start,
            range_start,
            range_end,
            schedules,
        })
    }

    /// Working (non time-off) windows containing the current instant
    pub async fn active_now(&self) -> DeskResult<Vec<ActiveShift>> {
        let now = encode_ts(&self.clock.now());
        let rows = sqlx::query(
            "SELECT u.username, u.color, s.start_time, s.end_time, s.description,
                    l.name AS location_name, l.description AS location_description
             FROM schedule s
             JOIN users u ON u.id = s.technician_id
             LEFT JOIN location l ON l.id = s.location_id
             WHERE s.start_time <= ?1 AND s.end_time > ?1 AND s.time_off = 0
             ORDER BY u.username COLLATE NOCASE",
        )
        .bind(&now)
        .fetch_all(&self.db)
        .await?;

        rows.iter()
            .map(|row| {
                let start: String = row.try_get("start_time")?;
                let end: String = row.try_get("end_time")?;
                Ok(ActiveShift {
                    username: row.try_get("username")?,
                    color: row.try_get("color")?,
                    start_time: decode_ts(&start)?,
                    end_time: decode_ts(&end)?,
                    description: row.try_get("description")?,
                    location_name: row.try_get("location_name")?,
                    location_description: row.try_get("location_description")?,
                })
            })
            .collect()
    }

    /// Time off starting within the lookahead window, merged into runs of
    /// consecutive local days in the viewer's timezone
    pub async fn upcoming_time_off(&self, viewer: &Actor) -> DeskResult<Vec<TimeOffRun>> {
        let now = self.clock.now();
        let until = now + Duration::days(TIME_OFF_LOOKAHEAD_DAYS);

        let rows = sqlx::query(
            "SELECT u.username, s.start_time, s.end_time, s.description
             FROM schedule s
             JOIN users u ON u.id = s.technician_id
             WHERE s.time_off = 1 AND s.start_time >= ?1 AND s.start_time <= ?2
             ORDER BY s.start_time",
        )
        .bind(encode_ts(&now))
        .bind(encode_ts(&until))
        .fetch_all(&self.db)
        .await?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in &rows {
            let start: String = row.try_get("start_time")?;
            let end: String = row.try_get("end_time")?;
            let start_local = timezone::utc_to_local(decode_ts(&start)?, viewer.timezone);
            let end_local = timezone::utc_to_local(decode_ts(&end)?, viewer.timezone);

            let start_date = start_local.date_naive();
            // An entry ending at local midnight does not occupy the next day
            let mut end_date = end_local.date_naive();
            if end_local.time() == NaiveTime::MIN {
                end_date = end_date.pred_opt().unwrap_or(end_date);
            }

            entries.push((
                row.try_get::<String, _>("username")?,
                start_date,
                end_date.max(start_date),
                row.try_get::<String, _>("description")?,
            ));
        }

        Ok(consolidate_time_off(entries))
    }
}

/// Non-admins may only schedule themselves
fn check_technician(actor: &Actor, technician_id: Option<i64>) -> DeskResult<()> {
    match technician_id {
        Some(id) if id != actor.user_id && !actor.is_admin => Err(DeskError::Forbidden(
            "Only administrators can manage other technicians' schedules".to_string(),
        )),
        _ => Ok(()),
    }
}

/// The UTC window for `date` at the given local times. An end time earlier
/// than the start runs into the next day.
fn project_window(
    date: NaiveDate,
    start_time: NaiveTime,
    end_time: NaiveTime,
    tz: Tz,
) -> DeskResult<(DateTime<Utc>, DateTime<Utc>)> {
    let end_date = if end_time < start_time {
        date.succ_opt()
            .ok_or_else(|| DeskError::Validation(format!("Date out of range: {}", date)))?
    } else {
        date
    };
    timezone::normalize_window(date.and_time(start_time), end_date.and_time(end_time), tz)
}

fn conflict_error(start: DateTime<Utc>, end: DateTime<Utc>, tz: Tz) -> DeskError {
    DeskError::Conflict(format!(
        "Schedule conflicts with an existing entry from {} to {}",
        timezone::utc_to_local(start, tz).format("%Y-%m-%d %H:%M"),
        timezone::utc_to_local(end, tz).format("%Y-%m-%d %H:%M")
    ))
}

fn schedule_notice(
    action: ScheduleAction,
    schedule: &Schedule,
    technician: Recipient,
    tz: Tz,
    actor: &Actor,
) -> Notification {
    Notification::Schedule(ScheduleNotice {
        action,
        technician,
        start: schedule.start_time,
        end: schedule.end_time,
        tz,
        location: schedule.location_name.clone(),
        description: schedule.description.clone(),
        time_off: schedule.time_off,
        additional_info: Some(format!(
            "Schedule {} by {}",
            action.as_str(),
            actor.username
        )),
    })
}

/// First working window of the technician overlapping `[start, end)`
async fn find_overlap(
    conn: &mut SqliteConnection,
    technician_id: i64,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    exclude_id: Option<i64>,
) -> DeskResult<Option<(DateTime<Utc>, DateTime<Utc>)>> {
    let row = sqlx::query(
        "SELECT start_time, end_time FROM schedule
         WHERE technician_id = ?1 AND time_off = 0
           AND start_time < ?2 AND end_time > ?3
           AND id != ?4
         ORDER BY start_time LIMIT 1",
    )
    .bind(technician_id)
    .bind(encode_ts(&end))
    .bind(encode_ts(&start))
    .bind(exclude_id.unwrap_or(-1))
    .fetch_optional(&mut *conn)
    .await?;

    match row {
        Some(row) => {
            let start: String = row.try_get("start_time")?;
            let end: String = row.try_get("end_time")?;
            Ok(Some((decode_ts(&start)?, decode_ts(&end)?)))
        }
        None => Ok(None),
    }
}

#[allow(clippy::too_many_arguments)]
async fn insert_schedule(
    conn: &mut SqliteConnection,
    technician_id: i64,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    description: &str,
    location_id: Option<i64>,
    time_off: bool,
    now: DateTime<Utc>,
) -> DeskResult<i64> {
    let result = sqlx::query(
        "INSERT INTO schedule (technician_id, start_time, end_time, description, location_id, time_off, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
    )
    .bind(technician_id)
    .bind(encode_ts(&start))
    .bind(encode_ts(&end))
    .bind(description)
    .bind(location_id)
    .bind(time_off)
    .bind(encode_ts(&now))
    .execute(&mut *conn)
    .await?;

    Ok(result.last_insert_rowid())
}

async fn fetch_schedule(conn: &mut SqliteConnection, id: i64) -> DeskResult<Schedule> {
    let row = sqlx::query(&format!("{} WHERE s.id = ?1", SCHEDULE_SELECT))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| DeskError::NotFound(format!("Schedule {} not found", id)))?;

    schedule_from_row(&row)
}

async fn load_technician(
    conn: &mut SqliteConnection,
    id: i64,
    default_tz: Tz,
) -> DeskResult<(Recipient, Tz)> {
    let row = sqlx::query(
        "SELECT username, email, timezone FROM users WHERE id = ?1 AND is_system = 0",
    )
    .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| DeskError::NotFound(format!("Technician {} not found", id)))?;

    let tz_name: String = row.try_get("timezone")?;
    Ok((
        Recipient {
            username: row.try_get("username")?,
            email: row.try_get("email")?,
        },
        timezone::resolve(&tz_name, default_tz),
    ))
}

async fn location_name(conn: &mut SqliteConnection, id: Option<i64>) -> DeskResult<Option<String>> {
    let Some(id) = id else {
        return Ok(None);
    };
    let name: String = sqlx::query_scalar("SELECT name FROM location WHERE id = ?1")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| DeskError::NotFound(format!("Location {} not found", id)))?;
    Ok(Some(name))
}

fn schedule_from_row(row: &SqliteRow) -> DeskResult<Schedule> {
    let start: String = row.try_get("start_time")?;
    let end: String = row.try_get("end_time")?;
    let created_at: String = row.try_get("created_at")?;
    Ok(Schedule {
        id: row.try_get("id")?,
        technician_id: row.try_get("technician_id")?,
        technician_name: row.try_get("technician_name")?,
        technician_color: row.try_get("technician_color")?,
        start_time: decode_ts(&start)?,
        end_time: decode_ts(&end)?,
        description: row.try_get("description")?,
        location_id: row.try_get("location_id")?,
        location_name: row.try_get("location_name")?,
        time_off: row.try_get("time_off")?,
        created_at: decode_ts(&created_at)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::db::test_support::temp_pool;
    use crate::mailer::MemoryMailer;
    use crate::timezone::{parse_date, parse_local_datetime, parse_time};
    use chrono::TimeZone;
    use chrono_tz::America::Chicago;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        pool: SqlitePool,
        manager: ScheduleManager,
        mailer: MemoryMailer,
        clock: Arc<FixedClock>,
        admin: Actor,
        tech: Actor,
        other: Actor,
    }

    async fn add_user(pool: &SqlitePool, name: &str, is_admin: bool) -> Actor {
        let id = sqlx::query(
            "INSERT INTO users (username, email, password_hash, is_admin, timezone, created_at)
             VALUES (?1, ?2, 'x', ?3, 'America/Chicago', '2024-01-01T00:00:00Z')",
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
            timezone: Chicago,
        }
    }

    async fn setup() -> Fixture {
        let (dir, pool) = temp_pool().await;
        let clock = Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()));
        let mailer = MemoryMailer::new();
        let dispatcher = Arc::new(NotificationDispatcher::new(
            pool.clone(),
            Arc::new(mailer.clone()),
            clock.clone(),
        ));
        let manager = ScheduleManager::new(pool.clone(), dispatcher, clock.clone(), Tz::UTC);

        let admin = add_user(&pool, "admin", true).await;
        let tech = add_user(&pool, "tech1", false).await;
        let other = add_user(&pool, "tech2", false).await;

        Fixture {
            _dir: dir,
            pool,
            manager,
            mailer,
            clock,
            admin,
            tech,
            other,
        }
    }

    fn request(start: &str, end: &str) -> ScheduleRequest {
        ScheduleRequest {
            technician_id: None,
            start: parse_local_datetime(start).unwrap(),
            end: parse_local_datetime(end).unwrap(),
            location_id: None,
            description: String::new(),
            time_off: false,
        }
    }

    fn utc(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_overnight_window_and_conflict() {
        let f = setup().await;
        let schedule = f
            .manager
            .create_or_update(&f.tech, None, request("2024-03-10 22:00", "2024-03-11 02:00"))
            .await
            .unwrap();

        // 22:00 on the spring-forward date is already CDT (-5)
        assert_eq!(schedule.start_time, utc(2024, 3, 11, 3));
        assert_eq!(schedule.end_time, utc(2024, 3, 11, 7));
        assert_eq!((schedule.end_time - schedule.start_time).num_hours(), 4);

        let conflict = f
            .manager
            .create_or_update(&f.tech, None, request("2024-03-10 23:00", "2024-03-11 01:00"))
            .await;
        assert!(matches!(conflict, Err(DeskError::Conflict(_))));

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM schedule")
            .fetch_one(&f.pool)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_back_to_back_windows_do_not_conflict() {
        let f = setup().await;
        f.manager
            .create_or_update(&f.tech, None, request("2024-03-04 09:00", "2024-03-04 13:00"))
            .await
            .unwrap();
        f.manager
            .create_or_update(&f.tech, None, request("2024-03-04 13:00", "2024-03-04 17:00"))
            .await
            .unwrap();

        // A different technician may overlap freely
        f.manager
            .create_or_update(&f.other, None, request("2024-03-04 10:00", "2024-03-04 12:00"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_time_off_neither_blocks_nor_is_blocked() {
        let f = setup().await;
        f.manager
            .create_or_update(&f.tech, None, request("2024-03-04 09:00", "2024-03-04 17:00"))
            .await
            .unwrap();

        let mut time_off = request("2024-03-04 00:00", "2024-03-05 00:00");
        time_off.time_off = true;
        f.manager.create_or_update(&f.tech, None, time_off).await.unwrap();

        f.manager
            .create_or_update(&f.tech, None, request("2024-03-04 18:00", "2024-03-04 20:00"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_midnight_end_is_next_day() {
        let f = setup().await;
        let schedule = f
            .manager
            .create_or_update(&f.tech, None, request("2024-01-01 09:00", "2024-01-01 00:00"))
            .await
            .unwrap();
        assert_eq!(schedule.start_time, utc(2024, 1, 1, 15));
        assert_eq!(schedule.end_time, utc(2024, 1, 2, 6));
    }

    #[tokio::test]
    async fn test_invalid_window_rejected() {
        let f = setup().await;
        let result = f
            .manager
            .create_or_update(&f.tech, None, request("2024-03-04 17:00", "2024-03-04 09:00"))
            .await;
        assert!(matches!(result, Err(DeskError::Validation(_))));
    }

    #[tokio::test]
    async fn test_edit_permissions_and_self_exclusion() {
        let f = setup().await;
        let schedule = f
            .manager
            .create_or_update(&f.tech, None, request("2024-03-04 09:00", "2024-03-04 17:00"))
            .await
            .unwrap();

        // Editing a window onto itself is not a conflict
        let moved = f
            .manager
            .create_or_update(
                &f.tech,
                Some(schedule.id),
                request("2024-03-04 10:00", "2024-03-04 18:00"),
            )
            .await
            .unwrap();
        assert_eq!(moved.id, schedule.id);
        assert_eq!(moved.start_time, utc(2024, 3, 4, 16));

        let stranger = f
            .manager
            .create_or_update(
                &f.other,
                Some(schedule.id),
                request("2024-03-04 10:00", "2024-03-04 11:00"),
            )
            .await;
        assert!(matches!(stranger, Err(DeskError::Forbidden(_))));

        let mut for_other = request("2024-03-05 10:00", "2024-03-05 11:00");
        for_other.technician_id = Some(f.tech.user_id);
        let result = f.manager.create_or_update(&f.other, None, for_other.clone()).await;
        assert!(matches!(result, Err(DeskError::Forbidden(_))));

        let by_admin = f.manager.create_or_update(&f.admin, None, for_other).await.unwrap();
        assert_eq!(by_admin.technician_id, f.tech.user_id);
    }

    #[tokio::test]
    async fn test_batch_skips_conflicting_days() {
        let f = setup().await;
        f.manager
            .create_or_update(&f.tech, None, request("2024-03-06 12:00", "2024-03-06 14:00"))
            .await
            .unwrap();

        let dates = ["2024-03-04", "2024-03-05", "2024-03-06", "2024-03-07", "2024-03-08"]
            .iter()
            .map(|d| parse_date(d).unwrap())
            .collect();
        let outcome = f
            .manager
            .create_batch(
                &f.tech,
                BatchRequest {
                    technician_id: None,
                    dates,
                    start_time: parse_time("09:00").unwrap(),
                    end_time: parse_time("17:00").unwrap(),
                    location_id: None,
                    description: "Front desk".to_string(),
                    time_off: false,
                },
            )
            .await
            .unwrap();

        assert_eq!(outcome.created_count(), 4);
        assert_eq!(outcome.skipped_count(), 1);
        assert_eq!(outcome.skipped[0], parse_date("2024-03-06").unwrap());

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM schedule")
            .fetch_one(&f.pool)
            .await
            .unwrap();
        assert_eq!(count, 5);
    }

    #[tokio::test]
    async fn test_batch_overnight_projection() {
        let f = setup().await;
        let outcome = f
            .manager
            .create_batch(
                &f.tech,
                BatchRequest {
                    technician_id: None,
                    dates: vec![parse_date("2024-01-08").unwrap()],
                    start_time: parse_time("22:00").unwrap(),
                    end_time: parse_time("06:00").unwrap(),
                    location_id: None,
                    description: String::new(),
                    time_off: false,
                },
            )
            .await
            .unwrap();
        let schedule = &outcome.created[0];
        assert_eq!(schedule.start_time, utc(2024, 1, 9, 4));
        assert_eq!(schedule.end_time, utc(2024, 1, 9, 12));
    }

    #[tokio::test]
    async fn test_delete_permissions_and_notifications() {
        let f = setup().await;
        let schedule = f
            .manager
            .create_or_update(&f.tech, None, request("2024-03-04 09:00", "2024-03-04 17:00"))
            .await
            .unwrap();

        let denied = f.manager.delete(&f.other, schedule.id).await;
        assert!(matches!(denied, Err(DeskError::Forbidden(_))));

        f.manager.delete(&f.admin, schedule.id).await.unwrap();
        assert!(matches!(
            f.manager.get(schedule.id).await,
            Err(DeskError::NotFound(_))
        ));

        let subjects: Vec<String> = f.mailer.sent().into_iter().map(|m| m.subject).collect();
        assert_eq!(
            subjects,
            vec![
                "Schedule created for tech1".to_string(),
                "Schedule deleted for tech1".to_string()
            ]
        );
        let last = f.mailer.sent().pop().unwrap();
        assert!(last.html.contains("Schedule deleted by admin"));
        assert!(last.to.contains(&"tech1@example.com".to_string()));
    }

    #[tokio::test]
    async fn test_copy_week() {
        let f = setup().await;
        f.manager
            .create_or_update(&f.tech, None, request("2024-01-08 09:00", "2024-01-08 17:00"))
            .await
            .unwrap();
        let mut off = request("2024-01-10 09:00", "2024-01-10 17:00");
        off.time_off = true;
        f.manager.create_or_update(&f.other, None, off).await.unwrap();
        // Already in the target week, will be replaced
        f.manager
            .create_or_update(&f.tech, None, request("2024-01-16 09:00", "2024-01-16 10:00"))
            .await
            .unwrap();

        let denied = f
            .manager
            .copy_week(
                &f.tech,
                parse_date("2024-01-08").unwrap(),
                parse_date("2024-01-15").unwrap(),
            )
            .await;
        assert!(matches!(denied, Err(DeskError::Forbidden(_))));

        let copied = f
            .manager
            .copy_week(
                &f.admin,
                parse_date("2024-01-08").unwrap(),
                parse_date("2024-01-15").unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(copied, 2);

        let week = f
            .manager
            .list_week(&f.admin, Some(parse_date("2024-01-15").unwrap()), None)
            .await
            .unwrap();
        assert_eq!(week.schedules.len(), 2);
        assert_eq!(week.schedules[0].start_time, utc(2024, 1, 15, 15));
        assert!(week.schedules[1].time_off);

        // Empty source week leaves the target untouched
        let none = f
            .manager
            .copy_week(
                &f.admin,
                parse_date("2024-02-05").unwrap(),
                parse_date("2024-01-15").unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(none, 0);
        let week = f
            .manager
            .list_week(&f.admin, Some(parse_date("2024-01-15").unwrap()), None)
            .await
            .unwrap();
        assert_eq!(week.schedules.len(), 2);
    }

    #[tokio::test]
    async fn test_week_views_and_location_filter() {
        let f = setup().await;
        let location_id = sqlx::query(
            "INSERT INTO location (name, created_at, updated_at)
             VALUES ('Main Office', '2024-01-01T00:00:00Z', '2024-01-01T00:00:00Z')",
        )
        .execute(&f.pool)
        .await
        .unwrap()
        .last_insert_rowid();

        let mut at_office = request("2024-03-05 09:00", "2024-03-05 17:00");
        at_office.location_id = Some(location_id);
        f.manager.create_or_update(&f.tech, None, at_office).await.unwrap();
        f.manager
            .create_or_update(&f.other, None, request("2024-03-05 09:00", "2024-03-05 17:00"))
            .await
            .unwrap();

        // Clock is Friday 2024-03-01, so the default week starts Monday 2024-02-26
        let current = f.manager.list_week(&f.tech, None, None).await.unwrap();
        assert_eq!(current.week_start, parse_date("2024-02-26").unwrap());
        assert!(current.schedules.is_empty());

        let week = Some(parse_date("2024-03-04").unwrap());
        assert_eq!(f.manager.list_week(&f.tech, week, None).await.unwrap().schedules.len(), 2);

        let filtered = f.manager.list_week(&f.tech, week, Some(location_id)).await.unwrap();
        assert_eq!(filtered.schedules.len(), 1);
        assert_eq!(filtered.schedules[0].location_name.as_deref(), Some("Main Office"));

        let personal = f.manager.personal_week(&f.other, week).await.unwrap();
        assert_eq!(personal.schedules.len(), 1);
        assert_eq!(personal.schedules[0].technician_name, "tech2");
    }

    #[tokio::test]
    async fn test_active_now() {
        let f = setup().await;
        f.manager
            .create_or_update(&f.tech, None, request("2024-03-04 09:00", "2024-03-04 17:00"))
            .await
            .unwrap();
        let mut off = request("2024-03-04 09:00", "2024-03-04 17:00");
        off.time_off = true;
        f.manager.create_or_update(&f.other, None, off).await.unwrap();

        f.clock.set(utc(2024, 3, 4, 18));
        let active = f.manager.active_now().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].username, "tech1");

        // End is exclusive
        f.clock.set(utc(2024, 3, 4, 23));
        assert!(f.manager.active_now().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_upcoming_time_off_consolidates() {
        let f = setup().await;
        for day in ["2024-03-04", "2024-03-05", "2024-03-06"] {
            let mut off = request(&format!("{} 00:00", day), &format!("{} 00:00", day));
            off.end = off.end + Duration::days(1);
            off.time_off = true;
            f.manager.create_or_update(&f.tech, None, off).await.unwrap();
        }
        let mut far = request("2024-03-30 09:00", "2024-03-30 17:00");
        far.time_off = true;
        f.manager.create_or_update(&f.tech, None, far).await.unwrap();

        let runs = f.manager.upcoming_time_off(&f.admin).await.unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].start_date, parse_date("2024-03-04").unwrap());
        assert_eq!(runs[0].end_date, parse_date("2024-03-06").unwrap());
        assert_eq!(runs[0].duration_days(), 3);
    }
}
