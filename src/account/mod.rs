/// User account management
///
/// Handles user creation and editing, login, timezone preferences, and the
/// reassignment plan executed when a user is deleted.

mod manager;
mod password;
mod reassign;

pub use manager::AccountManager;
pub use password::{hash_password, verify_password};
pub use reassign::ReassignmentPlan;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Username of the placeholder account that absorbs records of deleted users
pub const SYSTEM_USERNAME: &str = "System";

/// Default calendar color for new users
pub const DEFAULT_COLOR: &str = "#3498db";

/// User record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub is_admin: bool,
    pub color: String,
    pub timezone: String,
    pub theme: String,
    pub is_system: bool,
    pub created_at: DateTime<Utc>,
}

impl User {
    /// The user's display timezone, or `default` if the stored name is unknown
    pub fn tz(&self, default: Tz) -> Tz {
        crate::timezone::resolve(&self.timezone, default)
    }
}

/// The authenticated user on whose behalf an operation runs.
///
/// Passed explicitly into every engine call; engines trust it and apply their
/// own creator/assignee/admin checks on top.
#[derive(Debug, Clone)]
pub struct Actor {
    pub user_id: i64,
    pub username: String,
    pub is_admin: bool,
    pub timezone: Tz,
}

impl Actor {
    pub fn from_user(user: &User, default_tz: Tz) -> Self {
        Self {
            user_id: user.id,
            username: user.username.clone(),
            is_admin: user.is_admin,
            timezone: user.tz(default_tz),
        }
    }

    /// Fail with Forbidden unless the actor is an administrator
    pub fn require_admin(&self) -> crate::error::DeskResult<()> {
        if self.is_admin {
            Ok(())
        } else {
            Err(crate::error::DeskError::Forbidden(
                "Administrator access required".to_string(),
            ))
        }
    }
}

/// Admin request to create a user
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct NewUser {
    #[validate(length(min = 1, max = 64))]
    pub username: String,
    #[validate(email, length(max = 120))]
    pub email: String,
    #[validate(length(min = 6))]
    pub password: String,
    #[serde(default)]
    pub is_admin: bool,
    #[validate(length(equal = 7))]
    pub color: Option<String>,
    pub timezone: Option<String>,
    pub theme: Option<String>,
}

/// Admin or self-service edit; unset fields are left unchanged
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct UserUpdate {
    #[validate(length(min = 1, max = 64))]
    pub username: Option<String>,
    #[validate(email, length(max = 120))]
    pub email: Option<String>,
    #[validate(length(min = 6))]
    pub password: Option<String>,
    pub is_admin: Option<bool>,
    #[validate(length(equal = 7))]
    pub color: Option<String>,
    pub timezone: Option<String>,
    pub theme: Option<String>,
}

/// Login request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    /// Username or email, matched case-insensitively
    pub identifier: String,
    pub password: String,
}

/// Issued access token
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub access_jwt: String,
    pub user: User,
}
