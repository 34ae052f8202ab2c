/// Backup files on disk
use crate::{
    backup::BackupDocument,
    error::{DeskError, DeskResult},
};
use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{error, info};

const FILE_PREFIX: &str = "backup_";
const FILE_SUFFIX: &str = ".json";
const STAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Backup file metadata
#[derive(Debug, Clone, Serialize)]
pub struct BackupFile {
    pub file_name: String,
    pub path: PathBuf,
    pub timestamp: DateTime<Utc>,
    pub size_bytes: u64,
}

/// `backup_YYYYMMDD_HHMMSS.json`
pub fn backup_file_name(at: DateTime<Utc>) -> String {
    format!("{}{}{}", FILE_PREFIX, at.format(STAMP_FORMAT), FILE_SUFFIX)
}

fn timestamp_from_name(name: &str) -> Option<DateTime<Utc>> {
    let stamp = name.strip_prefix(FILE_PREFIX)?.strip_suffix(FILE_SUFFIX)?;
    NaiveDateTime::parse_from_str(stamp, STAMP_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

/// Write `doc` into `backup_dir`, creating the directory if needed
pub async fn write_backup_file(
    backup_dir: &Path,
    doc: &BackupDocument,
    at: DateTime<Utc>,
) -> DeskResult<PathBuf> {
    tokio::fs::create_dir_all(backup_dir).await?;
    let path = backup_dir.join(backup_file_name(at));
    let body = serde_json::to_vec_pretty(doc)?;
    tokio::fs::write(&path, body).await?;
    Ok(path)
}

/// List backup files in the backup directory, newest first
pub fn list_backups(backup_dir: &Path) -> DeskResult<Vec<BackupFile>> {
    if !backup_dir.exists() {
        return Ok(Vec::new());
    }

    let mut backups = Vec::new();

    for entry in std::fs::read_dir(backup_dir)
        .map_err(|e| DeskError::Internal(format!("Failed to read backup dir: {}", e)))?
    {
        let entry = entry
            .map_err(|e| DeskError::Internal(format!("Failed to read dir entry: {}", e)))?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }

        let file_name = entry.file_name().to_string_lossy().into_owned();
        if let Some(timestamp) = timestamp_from_name(&file_name) {
            let size_bytes = entry.metadata().map(|m| m.len()).unwrap_or(0);
            backups.push(BackupFile {
                file_name,
                path,
                timestamp,
                size_bytes,
            });
        }
    }

    backups.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

    Ok(backups)
}

/// Delete backups older than the retention window
pub fn cleanup_old_backups(
    backup_dir: &Path,
    retain_days: u32,
    now: DateTime<Utc>,
) -> DeskResult<usize> {
    let cutoff = now - Duration::days(retain_days as i64);
    let mut deleted_count = 0;

    for backup in list_backups(backup_dir)? {
        if backup.timestamp < cutoff {
            info!(
                "Deleting old backup {} (created: {})",
                backup.file_name, backup.timestamp
            );

            match std::fs::remove_file(&backup.path) {
                Ok(_) => deleted_count += 1,
                Err(e) => error!("Failed to delete backup {}: {}", backup.file_name, e),
            }
        }
    }

    Ok(deleted_count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_file_name_round_trip() {
        let at = Utc.with_ymd_and_hms(2024, 3, 11, 4, 5, 6).unwrap();
        let name = backup_file_name(at);
        assert_eq!(name, "backup_20240311_040506.json");
        assert_eq!(timestamp_from_name(&name), Some(at));
        assert_eq!(timestamp_from_name("notes.json"), None);
        assert_eq!(timestamp_from_name("backup_yesterday.json"), None);
    }

    #[test]
    fn test_list_backups_nonexistent_dir() {
        let result = list_backups(Path::new("/nonexistent/path"));
        assert!(result.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_write_list_and_cleanup() {
        let dir = tempfile::tempdir().unwrap();
        let doc = BackupDocument::default();
        let now = Utc.with_ymd_and_hms(2024, 3, 31, 12, 0, 0).unwrap();

        write_backup_file(dir.path(), &doc, now - Duration::days(40)).await.unwrap();
        write_backup_file(dir.path(), &doc, now - Duration::days(2)).await.unwrap();
        let latest = write_backup_file(dir.path(), &doc, now).await.unwrap();
        std::fs::write(dir.path().join("README.txt"), "not a backup").unwrap();

        let listed = list_backups(dir.path()).unwrap();
        assert_eq!(listed.len(), 3);
        assert_eq!(listed[0].path, latest);
        assert!(listed[0].size_bytes > 0);

        assert_eq!(cleanup_old_backups(dir.path(), 30, now).unwrap(), 1);
        assert_eq!(list_backups(dir.path()).unwrap().len(), 2);
        assert!(dir.path().join("README.txt").exists());

        let written: BackupDocument =
            serde_json::from_slice(&std::fs::read(&latest).unwrap()).unwrap();
        assert!(written.users.is_empty());
    }
}
