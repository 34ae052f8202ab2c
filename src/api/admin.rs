/// Admin API Endpoints
///
/// Users, locations, ticket categories, quick links, notification settings
/// and backups. Every handler requires an administrator.
use crate::{
    account::{NewUser, ReassignmentPlan, User, UserUpdate},
    auth::{AdminAuthContext, AuthContext},
    backup::{list_backups, BackupDocument, BackupFile, ImportReport},
    context::AppContext,
    error::DeskResult,
    locations::{Location, LocationUpdate, NewLocation},
    notify::{EmailSettings, EmailSettingsUpdate},
    quick_links::{LinkPosition, QuickLink, QuickLinkInput},
    tickets::{Category, CategoryUpdate, NewCategory},
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use serde::Deserialize;

/// Build admin API routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        // Users
        .route("/api/admin/users", get(list_users).post(create_user))
        .route("/api/admin/users/:id", put(update_user).delete(delete_user))
        // Locations
        .route("/api/locations", get(list_locations))
        .route("/api/admin/locations", post(create_location))
        .route(
            "/api/admin/locations/:id",
            put(update_location).delete(delete_location),
        )
        // Ticket categories
        .route("/api/admin/categories", post(create_category))
        .route(
            "/api/admin/categories/:id",
            put(update_category).delete(delete_category),
        )
        // Quick links
        .route("/api/quick-links", get(list_quick_links))
        .route("/api/admin/quick-links", post(create_quick_link))
        .route("/api/admin/quick-links/reorder", post(reorder_quick_links))
        .route(
            "/api/admin/quick-links/:id",
            put(update_quick_link).delete(delete_quick_link),
        )
        // Notification settings
        .route(
            "/api/admin/email-settings",
            get(get_email_settings).put(update_email_settings),
        )
        // Backups
        .route("/api/admin/backup", get(export_backup))
        .route("/api/admin/backup/restore", post(restore_backup))
        .route("/api/admin/backups", get(list_backup_files))
}

// ============================================================================
// Users
// ============================================================================

async fn list_users(
    State(ctx): State<AppContext>,
    _auth: AdminAuthContext,
) -> DeskResult<Json<Vec<User>>> {
    Ok(Json(ctx.account_manager.list_users().await?))
}

async fn create_user(
    State(ctx): State<AppContext>,
    auth: AdminAuthContext,
    Json(req): Json<NewUser>,
) -> DeskResult<(StatusCode, Json<User>)> {
    let user = ctx.account_manager.create_user(&auth.actor, req).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

async fn update_user(
    State(ctx): State<AppContext>,
    auth: AdminAuthContext,
    Path(id): Path<i64>,
    Json(update): Json<UserUpdate>,
) -> DeskResult<Json<User>> {
    Ok(Json(
        ctx.account_manager
            .update_user(&auth.actor, id, update)
            .await?,
    ))
}

async fn delete_user(
    State(ctx): State<AppContext>,
    auth: AdminAuthContext,
    Path(id): Path<i64>,
) -> DeskResult<Json<ReassignmentPlan>> {
    Ok(Json(ctx.account_manager.delete_user(&auth.actor, id).await?))
}

// ============================================================================
// Locations
// ============================================================================

#[derive(Debug, Deserialize)]
struct LocationQuery {
    #[serde(default)]
    include_inactive: bool,
}

async fn list_locations(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Query(query): Query<LocationQuery>,
) -> DeskResult<Json<Vec<Location>>> {
    let include_inactive = query.include_inactive && auth.actor.is_admin;
    Ok(Json(ctx.location_manager.list(include_inactive).await?))
}

async fn create_location(
    State(ctx): State<AppContext>,
    auth: AdminAuthContext,
    Json(req): Json<NewLocation>,
) -> DeskResult<(StatusCode, Json<Location>)> {
    let location = ctx.location_manager.create(&auth.actor, req).await?;
    Ok((StatusCode::CREATED, Json(location)))
}

async fn update_location(
    State(ctx): State<AppContext>,
    auth: AdminAuthContext,
    Path(id): Path<i64>,
    Json(update): Json<LocationUpdate>,
) -> DeskResult<Json<Location>> {
    Ok(Json(
        ctx.location_manager
            .update(&auth.actor, id, update)
            .await?,
    ))
}

async fn delete_location(
    State(ctx): State<AppContext>,
    auth: AdminAuthContext,
    Path(id): Path<i64>,
) -> DeskResult<StatusCode> {
    ctx.location_manager.delete(&auth.actor, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// Ticket categories
// ============================================================================

async fn create_category(
    State(ctx): State<AppContext>,
    auth: AdminAuthContext,
    Json(req): Json<NewCategory>,
) -> DeskResult<(StatusCode, Json<Category>)> {
    let category = ctx.category_manager.create(&auth.actor, req).await?;
    Ok((StatusCode::CREATED, Json(category)))
}

async fn update_category(
    State(ctx): State<AppContext>,
    auth: AdminAuthContext,
    Path(id): Path<i64>,
    Json(update): Json<CategoryUpdate>,
) -> DeskResult<Json<Category>> {
    Ok(Json(
        ctx.category_manager
            .update(&auth.actor, id, update)
            .await?,
    ))
}

async fn delete_category(
    State(ctx): State<AppContext>,
    auth: AdminAuthContext,
    Path(id): Path<i64>,
) -> DeskResult<StatusCode> {
    ctx.category_manager.delete(&auth.actor, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// Quick links
// ============================================================================

async fn list_quick_links(
    State(ctx): State<AppContext>,
    _auth: AuthContext,
) -> DeskResult<Json<Vec<QuickLink>>> {
    Ok(Json(ctx.quick_link_manager.list().await?))
}

async fn create_quick_link(
    State(ctx): State<AppContext>,
    auth: AdminAuthContext,
    Json(input): Json<QuickLinkInput>,
) -> DeskResult<(StatusCode, Json<QuickLink>)> {
    let link = ctx.quick_link_manager.create(&auth.actor, input).await?;
    Ok((StatusCode::CREATED, Json(link)))
}

async fn update_quick_link(
    State(ctx): State<AppContext>,
    auth: AdminAuthContext,
    Path(id): Path<i64>,
    Json(input): Json<QuickLinkInput>,
) -> DeskResult<Json<QuickLink>> {
    Ok(Json(
        ctx.quick_link_manager
            .update(&auth.actor, id, input)
            .await?,
    ))
}

async fn delete_quick_link(
    State(ctx): State<AppContext>,
    auth: AdminAuthContext,
    Path(id): Path<i64>,
) -> DeskResult<StatusCode> {
    ctx.quick_link_manager.delete(&auth.actor, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn reorder_quick_links(
    State(ctx): State<AppContext>,
    auth: AdminAuthContext,
    Json(positions): Json<Vec<LinkPosition>>,
) -> DeskResult<Json<Vec<QuickLink>>> {
    Ok(Json(
        ctx.quick_link_manager
            .reorder(&auth.actor, &positions)
            .await?,
    ))
}

// ============================================================================
// Notification settings
// ============================================================================

async fn get_email_settings(
    State(ctx): State<AppContext>,
    _auth: AdminAuthContext,
) -> DeskResult<Json<EmailSettings>> {
    Ok(Json(ctx.email_settings_manager.get().await?))
}

async fn update_email_settings(
    State(ctx): State<AppContext>,
    auth: AdminAuthContext,
    Json(update): Json<EmailSettingsUpdate>,
) -> DeskResult<Json<EmailSettings>> {
    Ok(Json(
        ctx.email_settings_manager
            .update(&auth.actor, update)
            .await?,
    ))
}

// ============================================================================
// Backups
// ============================================================================

async fn export_backup(
    State(ctx): State<AppContext>,
    auth: AdminAuthContext,
) -> DeskResult<Json<BackupDocument>> {
    Ok(Json(ctx.backup_manager.export(&auth.actor).await?))
}

async fn restore_backup(
    State(ctx): State<AppContext>,
    auth: AdminAuthContext,
    body: axum::body::Bytes,
) -> DeskResult<Json<ImportReport>> {
    Ok(Json(
        ctx.backup_manager
            .import_json(&auth.actor, &body)
            .await?,
    ))
}

async fn list_backup_files(
    State(ctx): State<AppContext>,
    _auth: AdminAuthContext,
) -> DeskResult<Json<Vec<BackupFile>>> {
    Ok(Json(list_backups(&ctx.config.backup.backup_dir)?))
}
