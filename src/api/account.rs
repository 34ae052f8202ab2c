/// Login and self-service profile endpoints
use crate::{
    account::{LoginRequest, LoginResponse, User, UserUpdate},
    auth::{issue_token, AuthContext},
    context::AppContext,
    error::DeskResult,
};
use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use serde::Deserialize;

pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/api/auth/login", post(login))
        .route("/api/auth/me", get(me))
        .route("/api/profile", put(update_profile))
        .route("/api/profile/timezone", put(set_timezone))
        .route("/api/profile/password", put(change_password))
}

async fn login(
    State(ctx): State<AppContext>,
    Json(req): Json<LoginRequest>,
) -> DeskResult<Json<LoginResponse>> {
    let user = ctx
        .account_manager
        .authenticate(&req.identifier, &req.password)
        .await?;

    let access_jwt = issue_token(
        &user,
        &ctx.config.authentication.jwt_secret,
        ctx.config.authentication.token_ttl,
        ctx.clock.now(),
    )?;

    tracing::info!("User {} logged in", user.username);
    Ok(Json(LoginResponse { access_jwt, user }))
}

async fn me(State(ctx): State<AppContext>, auth: AuthContext) -> DeskResult<Json<User>> {
    Ok(Json(ctx.account_manager.get_user(auth.actor.user_id).await?))
}

async fn update_profile(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Json(update): Json<UserUpdate>,
) -> DeskResult<Json<User>> {
    let user = ctx
        .account_manager
        .update_user(&auth.actor, auth.actor.user_id, update)
        .await?;
    Ok(Json(user))
}

#[derive(Debug, Deserialize)]
struct TimezoneRequest {
    timezone: String,
}

async fn set_timezone(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Json(req): Json<TimezoneRequest>,
) -> DeskResult<Json<User>> {
    Ok(Json(
        ctx.account_manager
            .set_timezone(&auth.actor, &req.timezone)
            .await?,
    ))
}

#[derive(Debug, Deserialize)]
struct PasswordChangeRequest {
    current_password: String,
    new_password: String,
}

async fn change_password(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Json(req): Json<PasswordChangeRequest>,
) -> DeskResult<StatusCode> {
    ctx.account_manager
        .change_password(&auth.actor, &req.current_password, &req.new_password)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
