//! In-process store backed by `DashMap`, used by tests and local runs
//!
//! Multi-row invariants (one primary binding, one active device key, single-use
//! refresh tokens) are kept by holding a map entry for the whole critical
//! section. No guard is held while writing another entry of the same map.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::{mapref::entry::Entry, DashMap};
use uuid::Uuid;

use crate::models::{
    audit::DecisionEvent,
    auth::{NewRefreshToken, RefreshTokenRecord},
    company::Company,
    device::{CredentialStatus, DeviceCredential},
    role::{BindingStatus, RoleBinding},
    user::User,
};

use super::store::{
    AuditStore, CompanyFilter, CompanyScope, CompanyStore, CredentialStore, DeviceFilter,
    RoleBindingFilter, RotationOutcome, Store, StoreError, UserFilter, UserStore,
};

#[derive(Default)]
pub struct MemoryStore {
    users: DashMap<Uuid, User>,
    /// normalized email -> user id
    emails: DashMap<String, Uuid>,
    bindings: DashMap<Uuid, RoleBinding>,
    /// per-user lock for binding mutations
    binding_locks: DashMap<Uuid, ()>,
    companies: DashMap<Uuid, Company>,
    /// token hash -> record
    refresh_tokens: DashMap<String, RefreshTokenRecord>,
    devices: DashMap<Uuid, DeviceCredential>,
    /// device id -> active credential id
    active_devices: DashMap<Uuid, Uuid>,
    /// key hash -> credential id
    device_hashes: DashMap<String, Uuid>,
    events: DashMap<Uuid, DecisionEvent>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Recorded authorization events, oldest first
    pub fn decision_events(&self) -> Vec<DecisionEvent> {
        let mut events: Vec<DecisionEvent> = self.events.iter().map(|e| e.value().clone()).collect();
        events.sort_by_key(|e| e.occurred_at);
        events
    }

    fn claim_email(&self, user: &User) -> Result<(), StoreError> {
        match self.emails.entry(user.email.clone()) {
            Entry::Occupied(entry) if *entry.get() != user.id => Err(StoreError::Conflict(format!(
                "email already registered: {}",
                user.email
            ))),
            Entry::Occupied(_) => Ok(()),
            Entry::Vacant(entry) => {
                entry.insert(user.id);
                Ok(())
            }
        }
    }

    fn demote_other_primaries(&self, user_id: Uuid, keep: Uuid) {
        for mut binding in self.bindings.iter_mut() {
            if binding.user_id == user_id && binding.id != keep && binding.is_primary {
                binding.is_primary = false;
            }
        }
    }

    fn mark_family_revoked(&self, family_id: Uuid, at: DateTime<Utc>) -> u64 {
        let mut count = 0;
        for mut record in self.refresh_tokens.iter_mut() {
            if record.family_id == family_id && record.revoked_at.is_none() {
                record.revoked_at = Some(at);
                count += 1;
            }
        }
        count
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn get_user(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        Ok(self.users.get(&id).map(|u| u.clone()))
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let id = match self.emails.get(email) {
            Some(id) => *id,
            None => return Ok(None),
        };
        Ok(self.users.get(&id).map(|u| u.clone()))
    }

    async fn upsert_user(&self, user: &User) -> Result<(), StoreError> {
        self.claim_email(user)?;

        let previous = self.users.insert(user.id, user.clone());
        if let Some(previous) = previous {
            if previous.email != user.email {
                self.emails.remove(&previous.email);
            }
        }
        Ok(())
    }

    async fn create_user_with_binding(
        &self,
        user: &User,
        binding: &RoleBinding,
    ) -> Result<(), StoreError> {
        if self.users.contains_key(&user.id) {
            return Err(StoreError::Conflict(format!("user exists: {}", user.id)));
        }
        self.claim_email(user)?;
        self.users.insert(user.id, user.clone());
        self.bindings.insert(binding.id, binding.clone());
        Ok(())
    }

    async fn find_users(&self, filter: &UserFilter) -> Result<Vec<User>, StoreError> {
        let mut users: Vec<User> = self
            .users
            .iter()
            .filter(|u| filter.user_type.map_or(true, |t| u.user_type == t))
            .filter(|u| filter.status.map_or(true, |s| u.status == s))
            .map(|u| u.clone())
            .collect();

        if filter.scope != CompanyScope::All {
            users.retain(|u| {
                self.bindings.iter().any(|b| {
                    b.user_id == u.id
                        && b.is_active()
                        && b.company_id.map_or(false, |c| filter.scope.contains(c))
                })
            });
        }

        users.sort_by(|a, b| a.email.cmp(&b.email));
        Ok(users)
    }

    async fn get_role_binding(&self, id: Uuid) -> Result<Option<RoleBinding>, StoreError> {
        Ok(self.bindings.get(&id).map(|b| b.clone()))
    }

    async fn find_role_bindings(
        &self,
        filter: &RoleBindingFilter,
    ) -> Result<Vec<RoleBinding>, StoreError> {
        let mut bindings: Vec<RoleBinding> = self
            .bindings
            .iter()
            .filter(|b| filter.user_id.map_or(true, |id| b.user_id == id))
            .filter(|b| filter.company_id.map_or(true, |id| b.company_id == Some(id)))
            .filter(|b| !filter.active_only || b.is_active())
            .map(|b| b.clone())
            .collect();

        bindings.sort_by_key(|b| b.created_at);
        Ok(bindings)
    }

    async fn upsert_role_binding(&self, binding: &RoleBinding) -> Result<(), StoreError> {
        let _guard = self.binding_locks.entry(binding.user_id).or_default();

        if binding.is_primary {
            self.demote_other_primaries(binding.user_id, binding.id);
        }
        self.bindings.insert(binding.id, binding.clone());
        Ok(())
    }

    async fn revoke_role_binding(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Option<RoleBinding>, StoreError> {
        let user_id = match self.bindings.get(&id) {
            Some(binding) => binding.user_id,
            None => return Ok(None),
        };
        let _guard = self.binding_locks.entry(user_id).or_default();

        let (revoked, was_primary) = match self.bindings.get_mut(&id) {
            Some(mut binding) => {
                if binding.status == BindingStatus::Revoked {
                    return Ok(Some(binding.clone()));
                }
                let was_primary = binding.is_primary;
                binding.status = BindingStatus::Revoked;
                binding.revoked_at = Some(at);
                binding.is_primary = false;
                (binding.clone(), was_primary)
            }
            None => return Ok(None),
        };

        if was_primary {
            let successor = self
                .bindings
                .iter()
                .filter(|b| b.user_id == user_id && b.is_active())
                .min_by_key(|b| b.created_at)
                .map(|b| b.id);
            if let Some(successor) = successor {
                if let Some(mut binding) = self.bindings.get_mut(&successor) {
                    binding.is_primary = true;
                }
            }
        }

        Ok(Some(revoked))
    }
}

#[async_trait]
impl CompanyStore for MemoryStore {
    async fn get_company(&self, id: Uuid) -> Result<Option<Company>, StoreError> {
        Ok(self.companies.get(&id).map(|c| c.clone()))
    }

    async fn upsert_company(&self, company: &Company) -> Result<(), StoreError> {
        self.companies.insert(company.id, company.clone());
        Ok(())
    }

    async fn find_companies(&self, filter: &CompanyFilter) -> Result<Vec<Company>, StoreError> {
        let mut companies: Vec<Company> = self
            .companies
            .iter()
            .filter(|c| filter.scope.contains(c.id))
            .filter(|c| filter.include_deleted || c.is_active())
            .map(|c| c.clone())
            .collect();

        companies.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(companies)
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn insert_refresh_token(&self, record: &RefreshTokenRecord) -> Result<(), StoreError> {
        match self.refresh_tokens.entry(record.token_hash.clone()) {
            Entry::Occupied(_) => Err(StoreError::Conflict("refresh token hash collision".to_string())),
            Entry::Vacant(entry) => {
                entry.insert(record.clone());
                Ok(())
            }
        }
    }

    async fn find_refresh_token(
        &self,
        token_hash: &str,
    ) -> Result<Option<RefreshTokenRecord>, StoreError> {
        Ok(self.refresh_tokens.get(token_hash).map(|r| r.clone()))
    }

    async fn rotate_refresh_token(
        &self,
        token_hash: &str,
        successor: NewRefreshToken,
        now: DateTime<Utc>,
    ) -> Result<RotationOutcome, StoreError> {
        // 条件更新：未使用、未撤销、未过期，整个检查在条目锁内完成
        let previous = {
            let mut record = match self.refresh_tokens.get_mut(token_hash) {
                Some(record) => record,
                None => return Ok(RotationOutcome::Unknown),
            };

            if !record.is_usable(now) {
                return Ok(RotationOutcome::classify(record.clone(), now));
            }

            record.used_at = Some(now);
            record.replaced_by = Some(successor.id);
            record.clone()
        };

        let successor = successor.into_record(&previous, now);
        self.refresh_tokens
            .insert(successor.token_hash.clone(), successor.clone());

        Ok(RotationOutcome::Rotated { previous, successor })
    }

    async fn revoke_refresh_family(
        &self,
        family_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        Ok(self.mark_family_revoked(family_id, at))
    }

    async fn revoke_refresh_token(
        &self,
        token_hash: &str,
        user_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let family_id = match self.refresh_tokens.get(token_hash) {
            Some(record) if record.user_id == user_id => record.family_id,
            _ => return Ok(false),
        };
        self.mark_family_revoked(family_id, at);
        Ok(true)
    }

    async fn revoke_user_refresh_tokens(
        &self,
        user_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let mut count = 0;
        for mut record in self.refresh_tokens.iter_mut() {
            if record.user_id == user_id && record.revoked_at.is_none() {
                record.revoked_at = Some(at);
                count += 1;
            }
        }
        Ok(count)
    }

    async fn replace_device_key(
        &self,
        credential: &DeviceCredential,
    ) -> Result<Option<DeviceCredential>, StoreError> {
        if self.device_hashes.contains_key(&credential.key_hash) {
            return Err(StoreError::Conflict("device key hash collision".to_string()));
        }

        // 设备条目锁保证同一设备只有一个有效密钥，归属检查也在锁内完成
        let mut active = self.active_devices.entry(credential.device_id).or_insert(credential.id);
        let previous_id = *active;

        let previous = if previous_id != credential.id {
            match self.devices.get_mut(&previous_id) {
                Some(previous) if previous.company_id != credential.company_id => {
                    return Err(StoreError::Conflict(
                        "device is registered to another company".to_string(),
                    ));
                }
                Some(mut previous) => {
                    previous.status = CredentialStatus::Revoked;
                    previous.revoked_at = Some(credential.created_at);
                    Some(previous.clone())
                }
                None => None,
            }
        } else {
            None
        };
        *active = credential.id;

        self.devices.insert(credential.id, credential.clone());
        self.device_hashes
            .insert(credential.key_hash.clone(), credential.id);

        Ok(previous)
    }

    async fn find_device_key_by_hash(
        &self,
        key_hash: &str,
    ) -> Result<Option<DeviceCredential>, StoreError> {
        let id = match self.device_hashes.get(key_hash) {
            Some(id) => *id,
            None => return Ok(None),
        };
        Ok(self.devices.get(&id).map(|d| d.clone()))
    }

    async fn touch_device(&self, credential_id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError> {
        if let Some(mut credential) = self.devices.get_mut(&credential_id) {
            credential.last_seen_at = Some(at);
        }
        Ok(())
    }

    async fn revoke_device_key(
        &self,
        device_id: Uuid,
        company_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        match self.active_devices.entry(device_id) {
            Entry::Occupied(entry) => {
                let revoked = match self.devices.get_mut(entry.get()) {
                    Some(mut credential) if credential.company_id == company_id => {
                        credential.status = CredentialStatus::Revoked;
                        credential.revoked_at = Some(at);
                        true
                    }
                    _ => false,
                };
                if revoked {
                    entry.remove();
                }
                Ok(revoked)
            }
            Entry::Vacant(_) => Ok(false),
        }
    }

    async fn find_device_credentials(
        &self,
        filter: &DeviceFilter,
    ) -> Result<Vec<DeviceCredential>, StoreError> {
        let mut credentials: Vec<DeviceCredential> = self
            .devices
            .iter()
            .filter(|d| filter.scope.contains(d.company_id))
            .filter(|d| filter.device_id.map_or(true, |id| d.device_id == id))
            .filter(|d| !filter.active_only || d.is_active())
            .map(|d| d.clone())
            .collect();

        credentials.sort_by_key(|d| d.created_at);
        Ok(credentials)
    }
}

#[async_trait]
impl AuditStore for MemoryStore {
    async fn insert_decision_event(&self, event: &DecisionEvent) -> Result<(), StoreError> {
        self.events.insert(event.id, event.clone());
        Ok(())
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
