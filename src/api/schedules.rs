/// Schedule endpoints
///
/// Date and time fields arrive as strings in the caller's local timezone and
/// are parsed here so malformed input maps to a validation error.
use crate::{
    auth::{AdminAuthContext, AuthContext},
    context::AppContext,
    error::DeskResult,
    schedule::{
        ActiveShift, BatchOutcome, BatchRequest, Schedule, ScheduleRequest, TimeOffRun, WeekView,
    },
    timezone::{parse_date, parse_local_datetime, parse_time},
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/api/schedules", post(create_schedule))
        .route(
            "/api/schedules/:id",
            put(update_schedule).get(get_schedule).delete(delete_schedule),
        )
        .route("/api/schedules/batch", post(create_batch))
        .route("/api/schedules/week", get(week))
        .route("/api/schedules/mine", get(my_week))
        .route("/api/schedules/active", get(active_now))
        .route("/api/schedules/time-off", get(upcoming_time_off))
        .route("/api/schedules/copy-week", post(copy_week))
}

#[derive(Debug, Deserialize)]
struct ScheduleForm {
    technician_id: Option<i64>,
    start: String,
    end: String,
    location_id: Option<i64>,
    #[serde(default)]
    description: String,
    #[serde(default)]
    time_off: bool,
}

impl ScheduleForm {
    fn into_request(self) -> DeskResult<ScheduleRequest> {
        Ok(ScheduleRequest {
            technician_id: self.technician_id,
            start: parse_local_datetime(&self.start)?,
            end: parse_local_datetime(&self.end)?,
            location_id: self.location_id,
            description: self.description,
            time_off: self.time_off,
        })
    }
}

async fn create_schedule(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Json(form): Json<ScheduleForm>,
) -> DeskResult<(StatusCode, Json<Schedule>)> {
    let schedule = ctx
        .schedule_manager
        .create_or_update(&auth.actor, None, form.into_request()?)
        .await?;
    Ok((StatusCode::CREATED, Json(schedule)))
}

async fn update_schedule(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Path(id): Path<i64>,
    Json(form): Json<ScheduleForm>,
) -> DeskResult<Json<Schedule>> {
    let schedule = ctx
        .schedule_manager
        .create_or_update(&auth.actor, Some(id), form.into_request()?)
        .await?;
    Ok(Json(schedule))
}

async fn get_schedule(
    State(ctx): State<AppContext>,
    _auth: AuthContext,
    Path(id): Path<i64>,
) -> DeskResult<Json<Schedule>> {
    Ok(Json(ctx.schedule_manager.get(id).await?))
}

async fn delete_schedule(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Path(id): Path<i64>,
) -> DeskResult<StatusCode> {
    ctx.schedule_manager.delete(&auth.actor, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct BatchForm {
    technician_id: Option<i64>,
    dates: Vec<String>,
    start_time: String,
    end_time: String,
    location_id: Option<i64>,
    #[serde(default)]
    description: String,
    #[serde(default)]
    time_off: bool,
}

#[derive(Debug, Serialize)]
struct BatchResponse {
    created_count: usize,
    skipped_count: usize,
    #[serde(flatten)]
    outcome: BatchOutcome,
}

async fn create_batch(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Json(form): Json<BatchForm>,
) -> DeskResult<Json<BatchResponse>> {
    let dates = form
        .dates
        .iter()
        .map(|raw| parse_date(raw))
        .collect::<DeskResult<Vec<NaiveDate>>>()?;

    let outcome = ctx
        .schedule_manager
        .create_batch(
            &auth.actor,
            BatchRequest {
                technician_id: form.technician_id,
                dates,
                start_time: parse_time(&form.start_time)?,
                end_time: parse_time(&form.end_time)?,
                location_id: form.location_id,
                description: form.description,
                time_off: form.time_off,
            },
        )
        .await?;

    Ok(Json(BatchResponse {
        created_count: outcome.created_count(),
        skipped_count: outcome.skipped_count(),
        outcome,
    }))
}

#[derive(Debug, Deserialize)]
struct WeekQuery {
    week_start: Option<String>,
    location_id: Option<i64>,
}

fn week_start(query: &WeekQuery) -> DeskResult<Option<NaiveDate>> {
    query.week_start.as_deref().map(parse_date).transpose()
}

async fn week(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Query(query): Query<WeekQuery>,
) -> DeskResult<Json<WeekView>> {
    let view = ctx
        .schedule_manager
        .list_week(&auth.actor, week_start(&query)?, query.location_id)
        .await?;
    Ok(Json(view))
}

async fn my_week(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Query(query): Query<WeekQuery>,
) -> DeskResult<Json<WeekView>> {
    let view = ctx
        .schedule_manager
        .personal_week(&auth.actor, week_start(&query)?)
        .await?;
    Ok(Json(view))
}

async fn active_now(
    State(ctx): State<AppContext>,
    _auth: AuthContext,
) -> DeskResult<Json<Vec<ActiveShift>>> {
    Ok(Json(ctx.schedule_manager.active_now().await?))
}

async fn upcoming_time_off(
    State(ctx): State<AppContext>,
    auth: AuthContext,
) -> DeskResult<Json<Vec<TimeOffRun>>> {
    Ok(Json(ctx.schedule_manager.upcoming_time_off(&auth.actor).await?))
}

#[derive(Debug, Deserialize)]
struct CopyWeekForm {
    source_week_start: String,
    target_week_start: String,
}

async fn copy_week(
    State(ctx): State<AppContext>,
    auth: AdminAuthContext,
    Json(form): Json<CopyWeekForm>,
) -> DeskResult<Json<serde_json::Value>> {
    let copied = ctx
        .schedule_manager
        .copy_week(
            &auth.actor,
            parse_date(&form.source_week_start)?,
            parse_date(&form.target_week_start)?,
        )
        .await?;
    Ok(Json(serde_json::json!({ "copied": copied })))
}
