/// Shiftdesk server entry point
use shiftdesk::{config::ServerConfig, context::AppContext, error::DeskResult, jobs, server};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> DeskResult<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "shiftdesk=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServerConfig::from_env()?;
    let ctx = AppContext::new(config).await?;

    bootstrap_admin(&ctx).await?;

    let ctx = Arc::new(ctx);
    let scheduler = Arc::new(jobs::JobScheduler::new(Arc::clone(&ctx)));
    scheduler.start();

    server::serve((*ctx).clone()).await?;

    Ok(())
}

/// Create the first administrator from `DESK_ADMIN_*` when none exists
async fn bootstrap_admin(ctx: &AppContext) -> DeskResult<()> {
    let (Ok(username), Ok(email), Ok(password)) = (
        std::env::var("DESK_ADMIN_USERNAME"),
        std::env::var("DESK_ADMIN_EMAIL"),
        std::env::var("DESK_ADMIN_PASSWORD"),
    ) else {
        return Ok(());
    };

    if ctx
        .account_manager
        .bootstrap_admin(&username, &email, &password)
        .await?
        .is_none()
    {
        tracing::debug!("Administrator already present, skipping bootstrap");
    }
    Ok(())
}
