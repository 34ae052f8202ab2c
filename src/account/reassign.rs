/// Dependent-record handling for user deletion
use crate::error::{DeskError, DeskResult};
use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;

/// What deleting a user does to the records that reference them.
///
/// Schedules are deleted. Tickets the user created, their comments and their
/// history entries move to the sentinel account. Tickets assigned to the user
/// become unassigned. Counts are captured when the plan is built and must be
/// executed on the same transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReassignmentPlan {
    pub user_id: i64,
    pub sentinel_id: i64,
    pub schedules_deleted: i64,
    pub tickets_reassigned: i64,
    pub tickets_unassigned: i64,
    pub comments_reassigned: i64,
    pub history_reassigned: i64,
}

impl ReassignmentPlan {
    /// Count everything that will change
    pub async fn build(
        conn: &mut SqliteConnection,
        user_id: i64,
        sentinel_id: i64,
    ) -> DeskResult<Self> {
        if user_id == sentinel_id {
            return Err(DeskError::Validation(
                "Records cannot be reassigned to the account being deleted".to_string(),
            ));
        }

        let schedules_deleted =
            count(conn, "SELECT COUNT(*) FROM schedule WHERE technician_id = ?1", user_id).await?;
        let tickets_reassigned =
            count(conn, "SELECT COUNT(*) FROM ticket WHERE created_by = ?1", user_id).await?;
        let tickets_unassigned =
            count(conn, "SELECT COUNT(*) FROM ticket WHERE assigned_to = ?1", user_id).await?;
        let comments_reassigned =
            count(conn, "SELECT COUNT(*) FROM ticket_comment WHERE user_id = ?1", user_id).await?;
        let history_reassigned =
            count(conn, "SELECT COUNT(*) FROM ticket_history WHERE user_id = ?1", user_id).await?;

        Ok(Self {
            user_id,
            sentinel_id,
            schedules_deleted,
            tickets_reassigned,
            tickets_unassigned,
            comments_reassigned,
            history_reassigned,
        })
    }

    /// Apply the plan and remove the user row
    pub async fn execute(&self, conn: &mut SqliteConnection) -> DeskResult<()> {
        sqlx::query("DELETE FROM schedule WHERE technician_id = ?1")
            .bind(self.user_id)
            .execute(&mut *conn)
            .await?;

        sqlx::query("UPDATE ticket SET assigned_to = NULL WHERE assigned_to = ?1")
            .bind(self.user_id)
            .execute(&mut *conn)
            .await?;

        sqlx::query("UPDATE ticket SET created_by = ?1 WHERE created_by = ?2")
            .bind(self.sentinel_id)
            .bind(self.user_id)
            .execute(&mut *conn)
            .await?;

        sqlx::query("UPDATE ticket_comment SET user_id = ?1 WHERE user_id = ?2")
            .bind(self.sentinel_id)
            .bind(self.user_id)
            .execute(&mut *conn)
            .await?;

        sqlx::query("UPDATE ticket_history SET user_id = ?1 WHERE user_id = ?2")
            .bind(self.sentinel_id)
            .bind(self.user_id)
            .execute(&mut *conn)
            .await?;

        sqlx::query("DELETE FROM users WHERE id = ?1")
            .bind(self.user_id)
            .execute(&mut *conn)
            .await?;

        Ok(())
    }
}

async fn count(conn: &mut SqliteConnection, sql: &str, user_id: i64) -> DeskResult<i64> {
    let n: i64 = sqlx::query_scalar(sql)
        .bind(user_id)
        .fetch_one(&mut *conn)
        .await?;
    Ok(n)
}
