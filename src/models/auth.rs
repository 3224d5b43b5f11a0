//! Authentication-related models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use super::permission::{ActionKey, PageKey};

/// Login request
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 1))]
    pub password: String,
}

/// Login response
#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: u64,
    pub user: super::user::UserResponse,
}

/// Token refresh request
#[derive(Debug, Deserialize)]
pub struct RefreshTokenRequest {
    pub refresh_token: String,
}

/// Logout request
#[derive(Debug, Deserialize)]
pub struct LogoutRequest {
    pub refresh_token: String,
}

/// Refresh token record. Only the SHA-256 hash of the token is stored.
#[derive(Debug, Clone)]
pub struct RefreshTokenRecord {
    pub id: Uuid,
    pub token_hash: String,
    pub user_id: Uuid,
    /// Session chain shared by every rotation of one login
    pub family_id: Uuid,
    pub expires_at: DateTime<Utc>,
    /// Set when the token is rotated away; a second use is a replay
    pub used_at: Option<DateTime<Utc>>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub replaced_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl RefreshTokenRecord {
    /// Unused, unrevoked and unexpired at `now`
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        self.used_at.is_none() && self.revoked_at.is_none() && self.expires_at > now
    }
}

/// Successor token written by a rotation
#[derive(Debug, Clone)]
pub struct NewRefreshToken {
    pub id: Uuid,
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
}

impl NewRefreshToken {
    /// Builds the successor record in the same family as `previous`
    pub fn into_record(self, previous: &RefreshTokenRecord, now: DateTime<Utc>) -> RefreshTokenRecord {
        RefreshTokenRecord {
            id: self.id,
            token_hash: self.token_hash,
            user_id: previous.user_id,
            family_id: previous.family_id,
            expires_at: self.expires_at,
            used_at: None,
            revoked_at: None,
            replaced_by: None,
            created_at: now,
        }
    }
}

/// Authorization check used by the dashboard to toggle controls
#[derive(Debug, Deserialize)]
pub struct AuthzCheckRequest {
    pub page: PageKey,
    pub action: ActionKey,
    pub company_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct AuthzCheckResponse {
    pub allowed: bool,
}

/// `?company_id=` query
#[derive(Debug, Default, Deserialize)]
pub struct CompanyQuery {
    pub company_id: Option<Uuid>,
}
