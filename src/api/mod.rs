/// API routes and handlers
pub mod account;
pub mod admin;
pub mod health;
pub mod middleware;
pub mod schedules;
pub mod tickets;

use crate::context::AppContext;
use axum::Router;

/// Build API routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .merge(health::routes())
        .merge(account::routes())
        .merge(schedules::routes())
        .merge(tickets::routes())
        .merge(admin::routes())
}
