//! Role binding domain models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{
    permission::{Grant, GrantSet},
    text_enum,
};

/// System-defined role templates
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoleName {
    SuperAdmin,
    CompanyAdmin,
    ContentManager,
    Reviewer,
    Editor,
    Viewer,
}

text_enum!(RoleName, "role", {
    SuperAdmin => "SUPER_ADMIN",
    CompanyAdmin => "COMPANY_ADMIN",
    ContentManager => "CONTENT_MANAGER",
    Reviewer => "REVIEWER",
    Editor => "EDITOR",
    Viewer => "VIEWER",
});

impl RoleName {
    pub const ALL: [RoleName; 6] = [
        RoleName::SuperAdmin,
        RoleName::CompanyAdmin,
        RoleName::ContentManager,
        RoleName::Reviewer,
        RoleName::Editor,
        RoleName::Viewer,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BindingStatus {
    Active,
    Revoked,
}

text_enum!(BindingStatus, "binding status", {
    Active => "active",
    Revoked => "revoked",
});

/// Role binding (user <-> role within a company, or system-wide when
/// `company_id` is `None`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleBinding {
    pub id: Uuid,
    pub user_id: Uuid,
    pub company_id: Option<Uuid>,
    pub role: RoleName,
    pub is_primary: bool,
    pub status: BindingStatus,
    /// Replaces the template grants entirely when present and non-empty
    pub overrides: Option<GrantSet>,
    pub created_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
}

impl RoleBinding {
    pub fn new(user_id: Uuid, company_id: Option<Uuid>, role: RoleName, is_primary: bool) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            company_id,
            role,
            is_primary,
            status: BindingStatus::Active,
            overrides: None,
            created_at: Utc::now(),
            revoked_at: None,
        }
    }

    pub fn with_overrides(mut self, overrides: impl IntoIterator<Item = Grant>) -> Self {
        let set: GrantSet = overrides.into_iter().collect();
        self.overrides = if set.is_empty() { None } else { Some(set) };
        self
    }

    pub fn is_active(&self) -> bool {
        self.status == BindingStatus::Active
    }

    /// 撤销（保留记录用于审计）
    pub fn revoke(&mut self) {
        self.status = BindingStatus::Revoked;
        self.revoked_at = Some(Utc::now());
    }
}

/// Assign role request
#[derive(Debug, Deserialize)]
pub struct AssignRoleRequest {
    pub company_id: Option<Uuid>,
    pub role: RoleName,
    #[serde(default)]
    pub is_primary: bool,
    /// Explicit per-binding grants; replaces the template when non-empty
    #[serde(default)]
    pub overrides: Option<Vec<Grant>>,
}
