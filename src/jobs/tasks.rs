/// Background task implementations
use crate::{
    backup::{cleanup_old_backups, write_backup_file},
    context::AppContext,
    error::DeskResult,
};
use std::path::PathBuf;

/// Health check - verify the database answers
pub async fn health_check(ctx: &AppContext) -> DeskResult<()> {
    sqlx::query("SELECT 1").fetch_one(&ctx.db).await?;
    Ok(())
}

/// Write a backup file, then delete files past the retention window.
///
/// Returns the new file and the number of files pruned.
pub async fn run_backup(ctx: &AppContext) -> DeskResult<(PathBuf, usize)> {
    let config = &ctx.config.backup;
    let now = ctx.clock.now();

    let doc = ctx.backup_manager.snapshot().await?;
    let path = write_backup_file(&config.backup_dir, &doc, now).await?;
    tracing::info!(
        "Backup {:?}: {} users, {} schedules, {} tickets",
        path,
        doc.users.len(),
        doc.schedules.len(),
        doc.tickets.len()
    );

    let pruned = cleanup_old_backups(&config.backup_dir, config.retain_days, now)?;
    Ok((path, pruned))
}
