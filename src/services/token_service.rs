//! 令牌服务：访问令牌、单次使用的刷新令牌、设备 API Key
//!
//! Every failure reaches callers as `Unauthenticated` or `InvalidToken`; the
//! precise cause is only logged.

use chrono::{Duration, Utc};
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    auth::{
        api_key::{DEVICE_KEY_PREFIX, REFRESH_TOKEN_PREFIX},
        ApiKeyGenerator, AuthError, JwtService, Principal, TokenPair,
    },
    config::AppConfig,
    error::AppError,
    models::{
        auth::{NewRefreshToken, RefreshTokenRecord},
        device::{CredentialStatus, DeviceCredential, IssuedDeviceKey},
        role::RoleBinding,
        user::{User, UserType},
    },
    repository::{RoleBindingFilter, RotationOutcome, Store},
};

pub struct TokenService {
    jwt: JwtService,
    store: Arc<dyn Store>,
    refresh_token_exp_secs: u64,
    revoke_family_on_reuse: bool,
}

impl TokenService {
    pub fn new(config: &AppConfig, store: Arc<dyn Store>) -> Result<Self, AppError> {
        Ok(Self {
            jwt: JwtService::from_config(config)?,
            store,
            refresh_token_exp_secs: config.security.refresh_token_exp_secs,
            revoke_family_on_reuse: config.security.revoke_family_on_reuse,
        })
    }

    pub fn access_token_exp_secs(&self) -> u64 {
        self.jwt.access_token_exp_secs()
    }

    fn refresh_expiry(&self) -> chrono::DateTime<Utc> {
        Utc::now() + Duration::seconds(self.refresh_token_exp_secs as i64)
    }

    fn token_pair(&self, access_token: String, refresh_token: String) -> TokenPair {
        TokenPair {
            access_token,
            refresh_token,
            expires_in: self.jwt.access_token_exp_secs(),
        }
    }

    /// Starts a new session (new refresh-token family)
    pub async fn issue_session(
        &self,
        user: &User,
        bindings: &[RoleBinding],
    ) -> Result<TokenPair, AuthError> {
        let access_token = self.jwt.generate_access_token(user, bindings)?;
        let refresh_token = ApiKeyGenerator::refresh_token();
        let now = Utc::now();

        let record = RefreshTokenRecord {
            id: Uuid::new_v4(),
            token_hash: ApiKeyGenerator::hash(&refresh_token),
            user_id: user.id,
            family_id: Uuid::new_v4(),
            expires_at: self.refresh_expiry(),
            used_at: None,
            revoked_at: None,
            replaced_by: None,
            created_at: now,
        };
        self.store.insert_refresh_token(&record).await?;

        tracing::debug!(user_id = %user.id, family_id = %record.family_id, "Session issued");
        Ok(self.token_pair(access_token, refresh_token))
    }

    /// Rotates a refresh token.
    ///
    /// The record, the user and the user's bindings are read before anything is
    /// written; the conditional rotation is the last store call, so a failed read
    /// leaves the presented token usable for a retry.
    pub async fn refresh(&self, refresh_token: &str) -> Result<(TokenPair, User), AuthError> {
        if !refresh_token.starts_with(REFRESH_TOKEN_PREFIX) {
            tracing::debug!(reason = "malformed", "Refresh rejected");
            return Err(AuthError::InvalidToken);
        }

        let token_hash = ApiKeyGenerator::hash(refresh_token);
        let record = match self.store.find_refresh_token(&token_hash).await? {
            Some(record) => record,
            None => return self.reject(RotationOutcome::Unknown).await,
        };
        let now = Utc::now();
        if !record.is_usable(now) {
            return self.reject(RotationOutcome::classify(record, now)).await;
        }

        let user = match self.store.get_user(record.user_id).await? {
            Some(user) if user.is_active() && user.user_type != UserType::DeviceUser => user,
            _ => {
                tracing::warn!(user_id = %record.user_id, "Refresh for inactive user; revoking session");
                self.store
                    .revoke_refresh_family(record.family_id, Utc::now())
                    .await?;
                return Err(AuthError::InvalidToken);
            }
        };

        // 重新加载当前绑定：撤销的角色在刷新后立即失效
        let bindings = self
            .store
            .find_role_bindings(&RoleBindingFilter {
                user_id: Some(user.id),
                active_only: true,
                ..Default::default()
            })
            .await?;
        let access_token = self.jwt.generate_access_token(&user, &bindings)?;

        let next_secret = ApiKeyGenerator::refresh_token();
        let successor = NewRefreshToken {
            id: Uuid::new_v4(),
            token_hash: ApiKeyGenerator::hash(&next_secret),
            expires_at: self.refresh_expiry(),
        };

        // 并发刷新在这里分出胜负
        match self
            .store
            .rotate_refresh_token(&token_hash, successor, Utc::now())
            .await?
        {
            RotationOutcome::Rotated { .. } => {
                metrics::counter!("token_refresh_total", "outcome" => "rotated").increment(1);
                Ok((self.token_pair(access_token, next_secret), user))
            }
            other => self.reject(other).await,
        }
    }

    /// Ends a refresh that did not rotate
    async fn reject<T>(&self, outcome: RotationOutcome) -> Result<T, AuthError> {
        metrics::counter!("token_refresh_total", "outcome" => outcome.as_str()).increment(1);

        match outcome {
            RotationOutcome::Reused(record) => {
                tracing::warn!(
                    user_id = %record.user_id,
                    family_id = %record.family_id,
                    revoke_family = self.revoke_family_on_reuse,
                    "Refresh token replayed"
                );
                if self.revoke_family_on_reuse {
                    self.store
                        .revoke_refresh_family(record.family_id, Utc::now())
                        .await?;
                }
            }
            other => tracing::debug!(reason = other.as_str(), "Refresh rejected"),
        }
        Err(AuthError::InvalidToken)
    }

    /// Verifies an access token without touching the store
    pub fn validate_access(&self, token: &str) -> Result<Principal, AuthError> {
        self.jwt
            .validate_access_token(token)
            .and_then(|claims| claims.into_principal())
            .map_err(|rejection| {
                tracing::debug!(reason = rejection.as_str(), "Access token rejected");
                AuthError::Unauthenticated
            })
    }

    /// Logout: revokes the session the token belongs to
    pub async fn revoke_session(&self, refresh_token: &str, user_id: Uuid) -> Result<bool, AuthError> {
        let revoked = self
            .store
            .revoke_refresh_token(&ApiKeyGenerator::hash(refresh_token), user_id, Utc::now())
            .await?;
        Ok(revoked)
    }

    /// Logout everywhere
    pub async fn revoke_all_sessions(&self, user_id: Uuid) -> Result<u64, AuthError> {
        let count = self
            .store
            .revoke_user_refresh_tokens(user_id, Utc::now())
            .await?;
        Ok(count)
    }

    /// Issues a new key for the device; the previous key stops working at once
    pub async fn issue_device_key(
        &self,
        device_id: Uuid,
        company_id: Uuid,
    ) -> Result<IssuedDeviceKey, AuthError> {
        let api_key = ApiKeyGenerator::device_key();
        let credential = DeviceCredential {
            id: Uuid::new_v4(),
            device_id,
            company_id,
            key_hash: ApiKeyGenerator::hash(&api_key),
            key_prefix: ApiKeyGenerator::key_prefix(&api_key),
            status: CredentialStatus::Active,
            last_seen_at: None,
            created_at: Utc::now(),
            revoked_at: None,
        };

        let previous = self.store.replace_device_key(&credential).await?;
        tracing::info!(
            device_id = %device_id,
            company_id = %company_id,
            key_prefix = %credential.key_prefix,
            replaced = previous.as_ref().map(|p| p.key_prefix.as_str()).unwrap_or("-"),
            "Device key issued"
        );

        Ok(IssuedDeviceKey {
            device_id,
            company_id,
            api_key,
            key_prefix: credential.key_prefix,
        })
    }

    pub async fn validate_device_key(&self, key: &str) -> Result<Principal, AuthError> {
        if !key.starts_with(DEVICE_KEY_PREFIX) {
            tracing::debug!(reason = "malformed", "Device key rejected");
            return Err(AuthError::Unauthenticated);
        }

        let credential = match self
            .store
            .find_device_key_by_hash(&ApiKeyGenerator::hash(key))
            .await?
        {
            Some(credential) if credential.is_active() => credential,
            Some(credential) => {
                tracing::debug!(reason = "revoked", key_prefix = %credential.key_prefix, "Device key rejected");
                return Err(AuthError::Unauthenticated);
            }
            None => {
                tracing::debug!(reason = "unknown", "Device key rejected");
                return Err(AuthError::Unauthenticated);
            }
        };

        // 尽力更新 last_seen_at，失败不影响认证
        if let Err(e) = self.store.touch_device(credential.id, Utc::now()).await {
            tracing::warn!(error = %e, device_id = %credential.device_id, "Failed to update last_seen_at");
        }

        Ok(Principal::Device {
            device_id: credential.device_id,
            company_id: credential.company_id,
        })
    }

    pub async fn revoke_device_key(&self, device_id: Uuid, company_id: Uuid) -> Result<bool, AuthError> {
        let revoked = self
            .store
            .revoke_device_key(device_id, company_id, Utc::now())
            .await?;
        if revoked {
            tracing::info!(device_id = %device_id, company_id = %company_id, "Device key revoked");
        }
        Ok(revoked)
    }
}
