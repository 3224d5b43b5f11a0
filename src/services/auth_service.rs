//! 认证服务：登录、刷新、登出

use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use crate::{
    auth::{PasswordHasher, TokenPair},
    error::AppError,
    models::{
        auth::{LoginRequest, LoginResponse},
        user::{normalize_email, User, UserType},
    },
    repository::{RoleBindingFilter, Store},
};

use super::token_service::TokenService;

pub struct AuthService {
    store: Arc<dyn Store>,
    tokens: Arc<TokenService>,
    hasher: Arc<PasswordHasher>,
}

impl AuthService {
    pub fn new(store: Arc<dyn Store>, tokens: Arc<TokenService>, hasher: Arc<PasswordHasher>) -> Self {
        Self {
            store,
            tokens,
            hasher,
        }
    }

    /// 用户登录
    pub async fn login(&self, req: LoginRequest) -> Result<LoginResponse, AppError> {
        req.validate()?;
        let email = normalize_email(&req.email);

        // 获取用户；不存在、设备账号、非激活状态统一返回认证失败
        let user = match self.store.get_user_by_email(&email).await? {
            Some(user) => user,
            None => {
                self.record_login("unknown_user");
                return Err(AppError::Unauthorized);
            }
        };

        if user.user_type == UserType::DeviceUser {
            self.record_login("device_user");
            return Err(AppError::Unauthorized);
        }

        // 验证密码
        if let Err(e) = self.hasher.verify(&req.password, &user.password_hash) {
            self.record_login("bad_password");
            return Err(e);
        }

        // 检查账户状态（密码正确后再检查，避免泄露账户状态）
        if !user.is_active() {
            tracing::info!(user_id = %user.id, status = %user.status, "Login refused for inactive user");
            self.record_login("inactive");
            return Err(AppError::Unauthorized);
        }

        let tokens = self.issue_for(&user).await?;
        self.record_login("success");
        tracing::info!(user_id = %user.id, user_type = %user.user_type, "User logged in");

        Ok(LoginResponse {
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
            expires_in: tokens.expires_in,
            user: user.into(),
        })
    }

    /// 刷新令牌（旧令牌立即失效）
    pub async fn refresh(&self, refresh_token: &str) -> Result<LoginResponse, AppError> {
        let (tokens, user) = self.tokens.refresh(refresh_token).await?;

        Ok(LoginResponse {
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
            expires_in: tokens.expires_in,
            user: user.into(),
        })
    }

    /// 登出当前会话
    pub async fn logout(&self, user_id: Uuid, refresh_token: &str) -> Result<(), AppError> {
        if !self.tokens.revoke_session(refresh_token, user_id).await? {
            tracing::debug!(user_id = %user_id, "Logout with unknown refresh token");
        }
        tracing::info!(user_id = %user_id, "User logged out");
        Ok(())
    }

    /// 登出所有会话
    pub async fn logout_all(&self, user_id: Uuid) -> Result<u64, AppError> {
        let count = self.tokens.revoke_all_sessions(user_id).await?;
        tracing::info!(user_id = %user_id, sessions = count, "User logged out everywhere");
        Ok(count)
    }

    async fn issue_for(&self, user: &User) -> Result<TokenPair, AppError> {
        let bindings = self
            .store
            .find_role_bindings(&RoleBindingFilter {
                user_id: Some(user.id),
                active_only: true,
                ..Default::default()
            })
            .await?;

        Ok(self.tokens.issue_session(user, &bindings).await?)
    }

    fn record_login(&self, outcome: &'static str) {
        metrics::counter!("login_attempts_total", "outcome" => outcome).increment(1);
        if outcome != "success" {
            tracing::debug!(outcome, "Login failed");
        }
    }
}
