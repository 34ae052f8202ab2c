/// Ticket endpoints
use crate::{
    auth::AuthContext,
    context::AppContext,
    error::DeskResult,
    tickets::{
        Category, DashboardFilter, HistoryEntry, NewTicket, Ticket, TicketComment, TicketEdit,
    },
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/api/tickets", get(dashboard).post(create_ticket))
        .route(
            "/api/tickets/:id",
            get(get_ticket).put(edit_ticket).delete(delete_ticket),
        )
        .route("/api/tickets/:id/comments", post(add_comment))
        .route("/api/tickets/:id/status", post(change_status))
        .route("/api/tickets/:id/assign", post(assign))
        .route("/api/tickets/:id/archive", post(archive))
        .route("/api/tickets/:id/unarchive", post(unarchive))
        .route("/api/categories", get(list_categories))
}

async fn dashboard(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Query(filter): Query<DashboardFilter>,
) -> DeskResult<Json<Vec<Ticket>>> {
    Ok(Json(ctx.ticket_manager.dashboard(&auth.actor, &filter).await?))
}

async fn create_ticket(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Json(req): Json<NewTicket>,
) -> DeskResult<(StatusCode, Json<Ticket>)> {
    let ticket = ctx.ticket_manager.create(&auth.actor, req).await?;
    Ok((StatusCode::CREATED, Json(ticket)))
}

#[derive(Debug, Serialize)]
struct TicketDetail {
    ticket: Ticket,
    comments: Vec<TicketComment>,
    history: Vec<HistoryEntry>,
}

async fn get_ticket(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Path(id): Path<i64>,
) -> DeskResult<Json<TicketDetail>> {
    let ticket = ctx.ticket_manager.get(&auth.actor, id).await?;
    let comments = ctx.ticket_manager.comments(&auth.actor, id).await?;
    let history = ctx.ticket_manager.history(&auth.actor, id).await?;
    Ok(Json(TicketDetail {
        ticket,
        comments,
        history,
    }))
}

async fn edit_ticket(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Path(id): Path<i64>,
    Json(edit): Json<TicketEdit>,
) -> DeskResult<Json<Ticket>> {
    Ok(Json(ctx.ticket_manager.edit(&auth.actor, id, edit).await?))
}

async fn delete_ticket(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Path(id): Path<i64>,
) -> DeskResult<StatusCode> {
    ctx.ticket_manager.delete(&auth.actor, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct CommentForm {
    content: String,
}

async fn add_comment(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Path(id): Path<i64>,
    Json(form): Json<CommentForm>,
) -> DeskResult<(StatusCode, Json<TicketComment>)> {
    let comment = ctx
        .ticket_manager
        .add_comment(&auth.actor, id, &form.content)
        .await?;
    Ok((StatusCode::CREATED, Json(comment)))
}

#[derive(Debug, Deserialize)]
struct StatusForm {
    status: String,
    comment: Option<String>,
}

async fn change_status(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Path(id): Path<i64>,
    Json(form): Json<StatusForm>,
) -> DeskResult<Json<Ticket>> {
    let ticket = ctx
        .ticket_manager
        .change_status(&auth.actor, id, &form.status, form.comment.as_deref())
        .await?;
    Ok(Json(ticket))
}

#[derive(Debug, Deserialize)]
struct AssignForm {
    assigned_to: Option<i64>,
    note: Option<String>,
}

async fn assign(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Path(id): Path<i64>,
    Json(form): Json<AssignForm>,
) -> DeskResult<Json<Ticket>> {
    let ticket = ctx
        .ticket_manager
        .assign(&auth.actor, id, form.assigned_to, form.note.as_deref())
        .await?;
    Ok(Json(ticket))
}

async fn archive(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Path(id): Path<i64>,
) -> DeskResult<Json<Ticket>> {
    Ok(Json(ctx.ticket_manager.archive(&auth.actor, id).await?))
}

async fn unarchive(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Path(id): Path<i64>,
) -> DeskResult<Json<Ticket>> {
    Ok(Json(ctx.ticket_manager.unarchive(&auth.actor, id).await?))
}

async fn list_categories(
    State(ctx): State<AppContext>,
    _auth: AuthContext,
) -> DeskResult<Json<Vec<Category>>> {
    Ok(Json(ctx.category_manager.list().await?))
}
