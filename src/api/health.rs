/// Health checks
///
/// `/health/live` only proves the process answers; `/health/ready` needs the
/// database; `/health/detailed` reports the database, outgoing email and the
/// backup schedule separately.
use crate::{backup::list_backups, context::AppContext, jobs};
use axum::{extract::State, http::StatusCode, response::Json, routing::get, Router};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::time::Instant;

/// Component state, ordered from best to worst
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthState,
    pub version: &'static str,
    pub components: Vec<ComponentReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComponentReport {
    pub name: &'static str,
    pub status: HealthState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub problem: Option<String>,
    #[serde(skip_serializing_if = "serde_json::Value::is_null")]
    pub info: serde_json::Value,
}

impl ComponentReport {
    fn healthy(name: &'static str, info: serde_json::Value) -> Self {
        Self {
            name,
            status: HealthState::Healthy,
            latency_ms: None,
            problem: None,
            info,
        }
    }

    fn failing(name: &'static str, status: HealthState, problem: impl Into<String>) -> Self {
        Self {
            name,
            status,
            latency_ms: None,
            problem: Some(problem.into()),
            info: serde_json::Value::Null,
        }
    }
}

pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/health", get(liveness))
        .route("/health/live", get(liveness))
        .route("/health/ready", get(readiness))
        .route("/health/detailed", get(detailed))
}

async fn liveness() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn readiness(State(ctx): State<AppContext>) -> Result<Json<serde_json::Value>, StatusCode> {
    match jobs::tasks::health_check(&ctx).await {
        Ok(()) => Ok(Json(serde_json::json!({ "status": "ready" }))),
        Err(e) => {
            tracing::warn!(error = %e, "Not ready: database unreachable");
            Err(StatusCode::SERVICE_UNAVAILABLE)
        }
    }
}

async fn detailed(State(ctx): State<AppContext>) -> (StatusCode, Json<HealthReport>) {
    let components = vec![database(&ctx).await, email(&ctx), backups(&ctx)];
    let status = overall(&components);

    tracing::info!(status = ?status, "Detailed health check");

    let code = if status == HealthState::Unhealthy {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    (
        code,
        Json(HealthReport {
            status,
            version: env!("CARGO_PKG_VERSION"),
            components,
        }),
    )
}

async fn database(ctx: &AppContext) -> ComponentReport {
    let started = Instant::now();
    let mut report = match jobs::tasks::health_check(ctx).await {
        Ok(()) => ComponentReport::healthy(
            "database",
            serde_json::json!({ "connections": ctx.db.size() }),
        ),
        Err(e) => ComponentReport::failing("database", HealthState::Unhealthy, e.to_string()),
    };
    report.latency_ms = Some(started.elapsed().as_millis() as u64);
    report
}

/// Without SMTP the desk still works, it just cannot notify anyone
fn email(ctx: &AppContext) -> ComponentReport {
    match &ctx.config.email {
        Some(email) => {
            ComponentReport::healthy("email", serde_json::json!({ "from": email.from_address }))
        }
        None => ComponentReport::failing("email", HealthState::Degraded, "SMTP is not configured"),
    }
}

fn backups(ctx: &AppContext) -> ComponentReport {
    let config = &ctx.config.backup;
    if !config.enabled {
        return ComponentReport::healthy("backups", serde_json::json!({ "enabled": false }));
    }

    match list_backups(&config.backup_dir) {
        Ok(files) => {
            let latest = files.first().map(|f| f.timestamp);
            let status = backup_freshness(latest, ctx.clock.now(), config.interval_hours);
            let mut report = ComponentReport::healthy(
                "backups",
                serde_json::json!({ "count": files.len(), "latest": latest }),
            );
            report.status = status;
            report
        }
        Err(e) => ComponentReport::failing("backups", HealthState::Degraded, e.to_string()),
    }
}

/// Stale once the newest file is older than two backup intervals
fn backup_freshness(
    latest: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    interval_hours: u64,
) -> HealthState {
    let allowed = Duration::hours(interval_hours.max(1) as i64 * 2);
    match latest {
        Some(at) if now - at <= allowed => HealthState::Healthy,
        _ => HealthState::Degraded,
    }
}

fn overall(components: &[ComponentReport]) -> HealthState {
    components
        .iter()
        .map(|c| c.status)
        .max()
        .unwrap_or(HealthState::Healthy)
}
