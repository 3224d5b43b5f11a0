//! 可注入故障的存储：包装 MemoryStore，按开关让用户或凭证读写失败

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use signage_auth::{
    models::{
        audit::DecisionEvent,
        auth::{NewRefreshToken, RefreshTokenRecord},
        company::Company,
        device::DeviceCredential,
        role::RoleBinding,
        user::User,
    },
    repository::{
        AuditStore, CompanyFilter, CompanyStore, CredentialStore, DeviceFilter, MemoryStore,
        RoleBindingFilter, RotationOutcome, Store, StoreError, UserFilter, UserStore,
    },
};
use std::sync::atomic::{AtomicBool, Ordering};
use uuid::Uuid;

#[derive(Default)]
pub struct OutageStore {
    inner: MemoryStore,
    users_down: AtomicBool,
    credentials_down: AtomicBool,
}

fn unavailable() -> StoreError {
    StoreError::Database(sqlx::Error::PoolTimedOut)
}

impl OutageStore {
    /// Users and role bindings become unreachable
    pub fn set_users_down(&self, down: bool) {
        self.users_down.store(down, Ordering::SeqCst);
    }

    /// Refresh tokens and device keys become unreachable
    pub fn set_credentials_down(&self, down: bool) {
        self.credentials_down.store(down, Ordering::SeqCst);
    }

    fn users(&self) -> Result<&MemoryStore, StoreError> {
        if self.users_down.load(Ordering::SeqCst) {
            return Err(unavailable());
        }
        Ok(&self.inner)
    }

    fn credentials(&self) -> Result<&MemoryStore, StoreError> {
        if self.credentials_down.load(Ordering::SeqCst) {
            return Err(unavailable());
        }
        Ok(&self.inner)
    }
}

#[async_trait]
impl UserStore for OutageStore {
    async fn get_user(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        self.users()?.get_user(id).await
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        self.users()?.get_user_by_email(email).await
    }

    async fn upsert_user(&self, user: &User) -> Result<(), StoreError> {
        self.users()?.upsert_user(user).await
    }

    async fn create_user_with_binding(
        &self,
        user: &User,
        binding: &RoleBinding,
    ) -> Result<(), StoreError> {
        self.users()?.create_user_with_binding(user, binding).await
    }

    async fn find_users(&self, filter: &UserFilter) -> Result<Vec<User>, StoreError> {
        self.users()?.find_users(filter).await
    }

    async fn get_role_binding(&self, id: Uuid) -> Result<Option<RoleBinding>, StoreError> {
        self.users()?.get_role_binding(id).await
    }

    async fn find_role_bindings(
        &self,
        filter: &RoleBindingFilter,
    ) -> Result<Vec<RoleBinding>, StoreError> {
        self.users()?.find_role_bindings(filter).await
    }

    async fn upsert_role_binding(&self, binding: &RoleBinding) -> Result<(), StoreError> {
        self.users()?.upsert_role_binding(binding).await
    }

    async fn revoke_role_binding(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Option<RoleBinding>, StoreError> {
        self.users()?.revoke_role_binding(id, at).await
    }
}

#[async_trait]
impl CompanyStore for OutageStore {
    async fn get_company(&self, id: Uuid) -> Result<Option<Company>, StoreError> {
        self.inner.get_company(id).await
    }

    async fn upsert_company(&self, company: &Company) -> Result<(), StoreError> {
        self.inner.upsert_company(company).await
    }

    async fn find_companies(&self, filter: &CompanyFilter) -> Result<Vec<Company>, StoreError> {
        self.inner.find_companies(filter).await
    }
}

#[async_trait]
impl CredentialStore for OutageStore {
    async fn insert_refresh_token(&self, record: &RefreshTokenRecord) -> Result<(), StoreError> {
        self.credentials()?.insert_refresh_token(record).await
    }

    async fn find_refresh_token(
        &self,
        token_hash: &str,
    ) -> Result<Option<RefreshTokenRecord>, StoreError> {
        self.credentials()?.find_refresh_token(token_hash).await
    }

    async fn rotate_refresh_token(
        &self,
        token_hash: &str,
        successor: NewRefreshToken,
        now: DateTime<Utc>,
    ) -> Result<RotationOutcome, StoreError> {
        self.credentials()?
            .rotate_refresh_token(token_hash, successor, now)
            .await
    }

    async fn revoke_refresh_family(
        &self,
        family_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        self.credentials()?.revoke_refresh_family(family_id, at).await
    }

    async fn revoke_refresh_token(
        &self,
        token_hash: &str,
        user_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        self.credentials()?
            .revoke_refresh_token(token_hash, user_id, at)
            .await
    }

    async fn revoke_user_refresh_tokens(
        &self,
        user_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        self.credentials()?.revoke_user_refresh_tokens(user_id, at).await
    }

    async fn replace_device_key(
        &self,
        credential: &DeviceCredential,
    ) -> Result<Option<DeviceCredential>, StoreError> {
        self.credentials()?.replace_device_key(credential).await
    }

    async fn find_device_key_by_hash(
        &self,
        key_hash: &str,
    ) -> Result<Option<DeviceCredential>, StoreError> {
        self.credentials()?.find_device_key_by_hash(key_hash).await
    }

    async fn touch_device(&self, credential_id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.credentials()?.touch_device(credential_id, at).await
    }

    async fn revoke_device_key(
        &self,
        device_id: Uuid,
        company_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        self.credentials()?
            .revoke_device_key(device_id, company_id, at)
            .await
    }

    async fn find_device_credentials(
        &self,
        filter: &DeviceFilter,
    ) -> Result<Vec<DeviceCredential>, StoreError> {
        self.credentials()?.find_device_credentials(filter).await
    }
}

#[async_trait]
impl AuditStore for OutageStore {
    async fn insert_decision_event(&self, event: &DecisionEvent) -> Result<(), StoreError> {
        self.inner.insert_decision_event(event).await
    }
}

#[async_trait]
impl Store for OutageStore {
    async fn ping(&self) -> Result<(), StoreError> {
        self.users()?;
        self.credentials()?;
        self.inner.ping().await
    }
}
