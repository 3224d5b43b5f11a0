//! Persistent store contracts
//!
//! Every store method returns `StoreError` on I/O failure. Callers must treat
//! that as "unavailable", never as a denial.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Postgres, QueryBuilder};
use std::collections::BTreeSet;
use uuid::Uuid;

use crate::models::{
    audit::DecisionEvent,
    auth::{NewRefreshToken, RefreshTokenRecord},
    company::Company,
    device::DeviceCredential,
    role::RoleBinding,
    user::{User, UserStatus, UserType},
};

/// 存储层错误
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Row content that does not map onto the domain model
    #[error("corrupt record: {0}")]
    Corrupt(String),

    /// Uniqueness violation (email, active device key, ...)
    #[error("conflict: {0}")]
    Conflict(String),
}

/// Set of companies a query may touch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum CompanyScope {
    #[default]
    All,
    Only(BTreeSet<Uuid>),
}

impl CompanyScope {
    pub fn single(company_id: Uuid) -> Self {
        CompanyScope::Only(BTreeSet::from([company_id]))
    }

    pub fn contains(&self, company_id: Uuid) -> bool {
        match self {
            CompanyScope::All => true,
            CompanyScope::Only(ids) => ids.contains(&company_id),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, CompanyScope::Only(ids) if ids.is_empty())
    }

    /// Appends ` AND <column> = ANY(...)`; an empty scope matches nothing
    pub fn push_sql(&self, builder: &mut QueryBuilder<'_, Postgres>, column: &str) {
        match self {
            CompanyScope::All => {}
            CompanyScope::Only(ids) if ids.is_empty() => {
                builder.push(" AND FALSE");
            }
            CompanyScope::Only(ids) => {
                builder.push(format!(" AND {} = ANY(", column));
                builder.push_bind(ids.iter().copied().collect::<Vec<Uuid>>());
                builder.push(")");
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct UserFilter {
    /// Users holding an active binding in one of these companies
    pub scope: CompanyScope,
    pub user_type: Option<UserType>,
    pub status: Option<UserStatus>,
}

#[derive(Debug, Clone, Default)]
pub struct RoleBindingFilter {
    pub user_id: Option<Uuid>,
    pub company_id: Option<Uuid>,
    pub active_only: bool,
}

#[derive(Debug, Clone, Default)]
pub struct CompanyFilter {
    pub scope: CompanyScope,
    pub include_deleted: bool,
}

#[derive(Debug, Clone, Default)]
pub struct DeviceFilter {
    pub scope: CompanyScope,
    pub device_id: Option<Uuid>,
    pub active_only: bool,
}

/// Result of a conditional refresh-token rotation
#[derive(Debug, Clone)]
pub enum RotationOutcome {
    /// Old record marked used, successor stored in the same family
    Rotated {
        previous: RefreshTokenRecord,
        successor: RefreshTokenRecord,
    },
    /// Token was already rotated; a replay
    Reused(RefreshTokenRecord),
    Expired(RefreshTokenRecord),
    Revoked(RefreshTokenRecord),
    Unknown,
}

impl RotationOutcome {
    /// Classifies a record that failed the rotation condition
    pub(crate) fn classify(record: RefreshTokenRecord, now: DateTime<Utc>) -> Self {
        if record.used_at.is_some() {
            RotationOutcome::Reused(record)
        } else if record.revoked_at.is_some() {
            RotationOutcome::Revoked(record)
        } else if record.expires_at <= now {
            RotationOutcome::Expired(record)
        } else {
            RotationOutcome::Unknown
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RotationOutcome::Rotated { .. } => "rotated",
            RotationOutcome::Reused(_) => "reused",
            RotationOutcome::Expired(_) => "expired",
            RotationOutcome::Revoked(_) => "revoked",
            RotationOutcome::Unknown => "unknown",
        }
    }
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn get_user(&self, id: Uuid) -> Result<Option<User>, StoreError>;

    /// `email` must already be normalized
    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;

    /// Insert or update; `Conflict` when another user owns the email
    async fn upsert_user(&self, user: &User) -> Result<(), StoreError>;

    /// Writes a new user together with its first binding
    async fn create_user_with_binding(
        &self,
        user: &User,
        binding: &RoleBinding,
    ) -> Result<(), StoreError>;

    async fn find_users(&self, filter: &UserFilter) -> Result<Vec<User>, StoreError>;

    async fn get_role_binding(&self, id: Uuid) -> Result<Option<RoleBinding>, StoreError>;

    async fn find_role_bindings(
        &self,
        filter: &RoleBindingFilter,
    ) -> Result<Vec<RoleBinding>, StoreError>;

    /// Insert or update; a primary binding demotes the user's other primaries
    async fn upsert_role_binding(&self, binding: &RoleBinding) -> Result<(), StoreError>;

    /// Revokes a binding. When it was primary, the oldest remaining active
    /// binding of the same user is promoted.
    async fn revoke_role_binding(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Option<RoleBinding>, StoreError>;
}

#[async_trait]
pub trait CompanyStore: Send + Sync {
    async fn get_company(&self, id: Uuid) -> Result<Option<Company>, StoreError>;

    async fn upsert_company(&self, company: &Company) -> Result<(), StoreError>;

    async fn find_companies(&self, filter: &CompanyFilter) -> Result<Vec<Company>, StoreError>;
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn insert_refresh_token(&self, record: &RefreshTokenRecord) -> Result<(), StoreError>;

    /// Read-only lookup; never consumes the token
    async fn find_refresh_token(
        &self,
        token_hash: &str,
    ) -> Result<Option<RefreshTokenRecord>, StoreError>;

    /// Atomically consumes `token_hash` (only if unused, unrevoked and unexpired)
    /// and stores `successor` in the same family
    async fn rotate_refresh_token(
        &self,
        token_hash: &str,
        successor: NewRefreshToken,
        now: DateTime<Utc>,
    ) -> Result<RotationOutcome, StoreError>;

    /// Returns the number of tokens revoked
    async fn revoke_refresh_family(
        &self,
        family_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<u64, StoreError>;

    /// Revokes the family of the token, if it belongs to `user_id`
    async fn revoke_refresh_token(
        &self,
        token_hash: &str,
        user_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    async fn revoke_user_refresh_tokens(
        &self,
        user_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<u64, StoreError>;

    /// Stores `credential` as the device's only active key; returns the key it replaced.
    /// `Conflict` when the device holds an active key of another company; the
    /// ownership check and the replacement are one atomic step.
    async fn replace_device_key(
        &self,
        credential: &DeviceCredential,
    ) -> Result<Option<DeviceCredential>, StoreError>;

    async fn find_device_key_by_hash(
        &self,
        key_hash: &str,
    ) -> Result<Option<DeviceCredential>, StoreError>;

    async fn touch_device(&self, credential_id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError>;

    async fn revoke_device_key(
        &self,
        device_id: Uuid,
        company_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    async fn find_device_credentials(
        &self,
        filter: &DeviceFilter,
    ) -> Result<Vec<DeviceCredential>, StoreError>;
}

#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn insert_decision_event(&self, event: &DecisionEvent) -> Result<(), StoreError>;
}

/// Everything the service needs from persistence
#[async_trait]
pub trait Store: UserStore + CompanyStore + CredentialStore + AuditStore {
    /// Connectivity check for readiness
    async fn ping(&self) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record(now: DateTime<Utc>) -> RefreshTokenRecord {
        RefreshTokenRecord {
            id: Uuid::new_v4(),
            token_hash: "h".to_string(),
            user_id: Uuid::new_v4(),
            family_id: Uuid::new_v4(),
            expires_at: now + Duration::hours(1),
            used_at: None,
            revoked_at: None,
            replaced_by: None,
            created_at: now,
        }
    }

    #[test]
    fn test_classify_prefers_reuse() {
        let now = Utc::now();
        let mut used = record(now);
        used.used_at = Some(now);
        used.revoked_at = Some(now);
        used.expires_at = now - Duration::hours(1);
        assert!(matches!(RotationOutcome::classify(used, now), RotationOutcome::Reused(_)));

        let mut revoked = record(now);
        revoked.revoked_at = Some(now);
        assert!(matches!(RotationOutcome::classify(revoked, now), RotationOutcome::Revoked(_)));

        let mut expired = record(now);
        expired.expires_at = now;
        assert!(matches!(RotationOutcome::classify(expired, now), RotationOutcome::Expired(_)));
    }

    #[test]
    fn test_company_scope() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        assert!(CompanyScope::All.contains(a));
        assert!(CompanyScope::single(a).contains(a));
        assert!(!CompanyScope::single(a).contains(b));
        assert!(CompanyScope::Only(BTreeSet::new()).is_empty());
        assert!(!CompanyScope::All.is_empty());
    }

    #[test]
    fn test_company_scope_sql() {
        let mut builder = QueryBuilder::<Postgres>::new("SELECT * FROM companies WHERE TRUE");
        CompanyScope::Only(BTreeSet::new()).push_sql(&mut builder, "id");
        assert_eq!(builder.sql(), "SELECT * FROM companies WHERE TRUE AND FALSE");

        let mut builder = QueryBuilder::<Postgres>::new("SELECT * FROM companies WHERE TRUE");
        CompanyScope::single(Uuid::new_v4()).push_sql(&mut builder, "id");
        assert_eq!(builder.sql(), "SELECT * FROM companies WHERE TRUE AND id = ANY($1)");

        let mut builder = QueryBuilder::<Postgres>::new("SELECT 1");
        CompanyScope::All.push_sql(&mut builder, "id");
        assert_eq!(builder.sql(), "SELECT 1");
    }
}
