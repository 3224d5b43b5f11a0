//! 用户与角色绑定管理

use chrono::Utc;
use std::collections::BTreeSet;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use crate::{
    auth::PasswordHasher,
    config::SecurityConfig,
    error::AppError,
    models::{
        permission::GrantSet,
        role::{AssignRoleRequest, RoleBinding, RoleName},
        user::{normalize_email, CreateCompanyUserRequest, User, UserStatus, UserType},
    },
    repository::{RoleBindingFilter, Store, UserFilter},
};

use super::{isolation::ScopedQuery, permission_model::grants_beyond_template};

pub struct UserService {
    store: Arc<dyn Store>,
    hasher: Arc<PasswordHasher>,
    policy: SecurityConfig,
}

impl UserService {
    pub fn new(store: Arc<dyn Store>, hasher: Arc<PasswordHasher>, policy: SecurityConfig) -> Self {
        Self {
            store,
            hasher,
            policy,
        }
    }

    pub async fn get_user(&self, id: Uuid) -> Result<User, AppError> {
        self.store
            .get_user(id)
            .await?
            .ok_or_else(|| AppError::not_found("user"))
    }

    /// Active bindings of a user
    pub async fn active_bindings(&self, user_id: Uuid) -> Result<Vec<RoleBinding>, AppError> {
        Ok(self
            .store
            .find_role_bindings(&RoleBindingFilter {
                user_id: Some(user_id),
                active_only: true,
                ..Default::default()
            })
            .await?)
    }

    /// Companies the user currently holds an active binding in
    pub async fn member_companies(&self, user_id: Uuid) -> Result<BTreeSet<Uuid>, AppError> {
        Ok(self
            .active_bindings(user_id)
            .await?
            .into_iter()
            .filter_map(|b| b.company_id)
            .collect())
    }

    /// 启动时创建首个平台管理员；已存在则原样返回
    pub async fn ensure_super_user(
        &self,
        email: &str,
        password: &str,
        display_name: &str,
    ) -> Result<User, AppError> {
        if let Some(existing) = self.store.get_user_by_email(&normalize_email(email)).await? {
            if existing.user_type != UserType::SuperUser {
                return Err(AppError::Conflict(format!(
                    "bootstrap email belongs to a {} account",
                    existing.user_type
                )));
            }
            return Ok(existing);
        }

        PasswordHasher::validate_password_policy(password, &self.policy)?;
        let user = User::new(
            email,
            self.hasher.hash(password)?,
            display_name,
            UserType::SuperUser,
        );
        self.store.upsert_user(&user).await?;

        tracing::info!(user_id = %user.id, email = %user.email, "Bootstrap super user created");
        Ok(user)
    }

    /// Creates a company user with its first, primary binding in one store write
    pub async fn create_company_user(
        &self,
        company_id: Uuid,
        req: CreateCompanyUserRequest,
    ) -> Result<(User, RoleBinding), AppError> {
        req.validate()?;
        PasswordHasher::validate_password_policy(&req.password, &self.policy)?;
        ensure_company_role(req.role)?;
        self.ensure_active_company(company_id).await?;

        let user = User::new(
            &req.email,
            self.hasher.hash(&req.password)?,
            &req.display_name,
            UserType::CompanyUser,
        );
        let binding = RoleBinding::new(user.id, Some(company_id), req.role, true);

        self.store.create_user_with_binding(&user, &binding).await?;

        tracing::info!(
            user_id = %user.id,
            company_id = %company_id,
            role = %binding.role,
            "Company user created"
        );
        Ok((user, binding))
    }

    /// Adds a role binding; a primary binding demotes the user's previous primary
    pub async fn assign_role(
        &self,
        user_id: Uuid,
        req: AssignRoleRequest,
    ) -> Result<RoleBinding, AppError> {
        let user = self.get_user(user_id).await?;
        if user.user_type != UserType::CompanyUser {
            return Err(AppError::BadRequest(
                "Roles can only be assigned to company users".to_string(),
            ));
        }
        ensure_company_role(req.role)?;
        if let Some(company_id) = req.company_id {
            self.ensure_active_company(company_id).await?;
        }

        let existing = self.active_bindings(user_id).await?;
        if existing
            .iter()
            .any(|b| b.company_id == req.company_id && b.role == req.role)
        {
            return Err(AppError::Conflict(format!(
                "User already holds {} in this scope",
                req.role
            )));
        }

        let overrides: GrantSet = req.overrides.unwrap_or_default().into_iter().collect();
        let extra = grants_beyond_template(req.role, &overrides);
        if !extra.is_empty() {
            return Err(AppError::BadRequest(format!(
                "Overrides may only narrow the {} template; not in template: {}",
                req.role,
                extra.iter().map(|g| g.to_string()).collect::<Vec<_>>().join(", ")
            )));
        }

        // 没有有效主绑定时，新绑定自动成为主绑定
        let is_primary = req.is_primary || !existing.iter().any(|b| b.is_primary);
        let binding = RoleBinding::new(user_id, req.company_id, req.role, is_primary)
            .with_overrides(overrides);

        self.store.upsert_role_binding(&binding).await?;

        tracing::info!(
            binding_id = %binding.id,
            user_id = %user_id,
            company_id = ?binding.company_id,
            role = %binding.role,
            primary = binding.is_primary,
            overrides = binding.overrides.as_ref().map(|o| o.len()).unwrap_or(0),
            "Role assigned"
        );
        Ok(binding)
    }

    pub async fn get_role_binding(&self, binding_id: Uuid) -> Result<RoleBinding, AppError> {
        self.store
            .get_role_binding(binding_id)
            .await?
            .ok_or_else(|| AppError::not_found("role binding"))
    }

    /// Revokes (never deletes) a binding. Takes effect for the user at their next
    /// token refresh; outstanding access tokens keep their snapshot until expiry.
    pub async fn revoke_role(&self, binding_id: Uuid) -> Result<RoleBinding, AppError> {
        let revoked = self
            .store
            .revoke_role_binding(binding_id, Utc::now())
            .await?
            .ok_or_else(|| AppError::not_found("role binding"))?;

        tracing::info!(
            binding_id = %binding_id,
            user_id = %revoked.user_id,
            company_id = ?revoked.company_id,
            "Role binding revoked"
        );
        Ok(revoked)
    }

    /// Activates or deactivates a user; deactivation ends all sessions
    pub async fn set_status(&self, user_id: Uuid, status: UserStatus) -> Result<User, AppError> {
        let mut user = self.get_user(user_id).await?;
        if user.status == status {
            return Ok(user);
        }

        user.status = status;
        user.updated_at = Utc::now();
        self.store.upsert_user(&user).await?;

        if status != UserStatus::Active {
            let revoked = self
                .store
                .revoke_user_refresh_tokens(user_id, Utc::now())
                .await?;
            tracing::info!(user_id = %user_id, sessions = revoked, "Sessions revoked after deactivation");
        }

        tracing::info!(user_id = %user_id, status = %status, "User status changed");
        Ok(user)
    }

    /// Company users visible through `scope`
    pub async fn list_users(&self, scope: &ScopedQuery) -> Result<Vec<User>, AppError> {
        if scope.is_empty() {
            return Ok(Vec::new());
        }

        let users = self
            .store
            .find_users(&UserFilter {
                scope: scope.companies.clone(),
                user_type: Some(UserType::CompanyUser),
                ..Default::default()
            })
            .await?;
        Ok(users)
    }

    async fn ensure_active_company(&self, company_id: Uuid) -> Result<(), AppError> {
        match self.store.get_company(company_id).await? {
            Some(company) if company.is_active() => Ok(()),
            _ => Err(AppError::not_found("company")),
        }
    }
}

/// SUPER_ADMIN is a platform role; company users never hold it
fn ensure_company_role(role: RoleName) -> Result<(), AppError> {
    if role == RoleName::SuperAdmin {
        return Err(AppError::BadRequest(
            "SUPER_ADMIN cannot be assigned to company users".to_string(),
        ));
    }
    Ok(())
}
