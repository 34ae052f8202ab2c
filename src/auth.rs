/// Authentication extractors and token utilities
use crate::{
    account::{Actor, User},
    api::middleware::extract_bearer_token,
    context::AppContext,
    error::{DeskError, DeskResult},
};
use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

/// Access token claims
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User id
    pub sub: String,
    pub username: String,
    pub iat: i64,
    pub exp: i64,
}

/// Issue an HS256 access token for `user`
pub fn issue_token(
    user: &User,
    jwt_secret: &str,
    ttl_seconds: i64,
    now: DateTime<Utc>,
) -> DeskResult<String> {
    let claims = Claims {
        sub: user.id.to_string(),
        username: user.username.clone(),
        iat: now.timestamp(),
        exp: (now + Duration::seconds(ttl_seconds)).timestamp(),
    };

    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(jwt_secret.as_bytes()),
    )
    .map_err(|e| DeskError::Jwt(format!("Failed to sign token: {}", e)))
}

/// Verify a JWT token: signature, expiry and claims shape
pub fn verify_token(token: &str, jwt_secret: &str) -> DeskResult<Claims> {
    let decoding_key = DecodingKey::from_secret(jwt_secret.as_bytes());
    let mut validation = Validation::new(Algorithm::HS256);
    // Allow some clock skew (5 minutes)
    validation.leeway = 300;

    decode::<Claims>(token, &decoding_key, &validation)
        .map(|data| data.claims)
        .map_err(|e| {
            tracing::warn!("JWT verification failed: {}", e);
            match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                    DeskError::Authentication("Token has expired".to_string())
                }
                jsonwebtoken::errors::ErrorKind::InvalidSignature => {
                    DeskError::Authentication("Invalid token signature".to_string())
                }
                _ => DeskError::Authentication(format!("Invalid token: {}", e)),
            }
        })
}

/// Resolve a bearer token to the current state of its user
async fn actor_from_parts(parts: &Parts, state: &AppContext) -> DeskResult<Actor> {
    let token = extract_bearer_token(&parts.headers)
        .ok_or_else(|| DeskError::Authentication("Missing authorization header".to_string()))?;
    let claims = verify_token(&token, &state.config.authentication.jwt_secret)?;

    let user_id: i64 = claims
        .sub
        .parse()
        .map_err(|_| DeskError::Authentication("Invalid token subject".to_string()))?;

    // Deleted users and the System account cannot act
    let user = match state.account_manager.get_user(user_id).await {
        Ok(user) if !user.is_system => user,
        Ok(_) | Err(DeskError::NotFound(_)) => {
            return Err(DeskError::Authentication("Account no longer exists".to_string()))
        }
        Err(e) => return Err(e),
    };

    Ok(Actor::from_user(&user, state.account_manager.default_tz()))
}

/// Authenticated user making the request
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub actor: Actor,
}

#[async_trait]
impl FromRequestParts<AppContext> for AuthContext {
    type Rejection = DeskError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppContext,
    ) -> Result<Self, Self::Rejection> {
        let actor = actor_from_parts(parts, state).await?;
        Ok(AuthContext { actor })
    }
}

/// Authenticated administrator
#[derive(Debug, Clone)]
pub struct AdminAuthContext {
    pub actor: Actor,
}

#[async_trait]
impl FromRequestParts<AppContext> for AdminAuthContext {
    type Rejection = DeskError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppContext,
    ) -> Result<Self, Self::Rejection> {
        let actor = actor_from_parts(parts, state).await?;
        if !actor.is_admin {
            tracing::warn!("AdminAuthContext: {} is not an admin", actor.username);
            return Err(DeskError::Forbidden("Administrator access required".to_string()));
        }
        Ok(AdminAuthContext { actor })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    fn user() -> User {
        User {
            id: 7,
            username: "tech1".to_string(),
            email: "tech1@example.com".to_string(),
            password_hash: String::new(),
            is_admin: false,
            color: "#3498db".to_string(),
            timezone: "America/Chicago".to_string(),
            theme: "dark".to_string(),
            is_system: false,
            created_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_issue_and_verify() {
        let token = issue_token(&user(), SECRET, 3600, Utc::now()).unwrap();
        let claims = verify_token(&token, SECRET).unwrap();
        assert_eq!(claims.sub, "7");
        assert_eq!(claims.username, "tech1");
    }

    #[test]
    fn test_rejects_wrong_secret() {
        let token = issue_token(&user(), SECRET, 3600, Utc::now()).unwrap();
        assert!(matches!(
            verify_token(&token, "ffffffffffffffffffffffffffffffff"),
            Err(DeskError::Authentication(_))
        ));
    }

    #[test]
    fn test_rejects_expired() {
        let issued = Utc::now() - Duration::hours(3);
        let token = issue_token(&user(), SECRET, 3600, issued).unwrap();
        assert!(matches!(
            verify_token(&token, SECRET),
            Err(DeskError::Authentication(_))
        ));
    }
}
