//! Resolved request identity

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{
    permission::GrantSet,
    role::{BindingStatus, RoleBinding, RoleName},
    user::{User, UserType},
};
use crate::services::permission_model;

/// Role binding as carried by a principal (and snapshotted into access tokens)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindingSnapshot {
    pub company_id: Option<Uuid>,
    pub role: RoleName,
    pub is_primary: bool,
    pub status: BindingStatus,
    pub overrides: Option<GrantSet>,
}

impl BindingSnapshot {
    pub fn is_active(&self) -> bool {
        self.status == BindingStatus::Active
    }

    pub fn effective_grants(&self) -> &GrantSet {
        permission_model::effective_grants(self.role, self.overrides.as_ref())
    }
}

impl From<&RoleBinding> for BindingSnapshot {
    fn from(binding: &RoleBinding) -> Self {
        Self {
            company_id: binding.company_id,
            role: binding.role,
            is_primary: binding.is_primary,
            status: binding.status,
            overrides: binding.overrides.clone(),
        }
    }
}

/// Who is making the request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Principal {
    SuperUser {
        user_id: Uuid,
    },
    CompanyUser {
        user_id: Uuid,
        bindings: Vec<BindingSnapshot>,
    },
    Device {
        device_id: Uuid,
        company_id: Uuid,
    },
}

impl Principal {
    /// Builds a user principal; device rows never become interactive principals
    pub fn from_user(user: &User, bindings: &[RoleBinding]) -> Option<Self> {
        match user.user_type {
            UserType::SuperUser => Some(Principal::SuperUser { user_id: user.id }),
            UserType::CompanyUser => Some(Principal::CompanyUser {
                user_id: user.id,
                bindings: bindings
                    .iter()
                    .filter(|b| b.user_id == user.id)
                    .map(BindingSnapshot::from)
                    .collect(),
            }),
            UserType::DeviceUser => None,
        }
    }

    /// User id or device id
    pub fn id(&self) -> Uuid {
        match self {
            Principal::SuperUser { user_id } | Principal::CompanyUser { user_id, .. } => *user_id,
            Principal::Device { device_id, .. } => *device_id,
        }
    }

    pub fn user_type(&self) -> UserType {
        match self {
            Principal::SuperUser { .. } => UserType::SuperUser,
            Principal::CompanyUser { .. } => UserType::CompanyUser,
            Principal::Device { .. } => UserType::DeviceUser,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Principal::SuperUser { .. } => "super_user",
            Principal::CompanyUser { .. } => "company_user",
            Principal::Device { .. } => "device",
        }
    }

    /// Company used when a request names none: the primary binding's company
    /// for users, the owning company for devices
    pub fn home_company(&self) -> Option<Uuid> {
        match self {
            Principal::SuperUser { .. } => None,
            Principal::CompanyUser { bindings, .. } => bindings
                .iter()
                .filter(|b| b.is_active())
                .find(|b| b.is_primary)
                .or_else(|| bindings.iter().find(|b| b.is_active() && b.company_id.is_some()))
                .and_then(|b| b.company_id),
            Principal::Device { company_id, .. } => Some(*company_id),
        }
    }

    /// Target company for a request: explicit, else home company
    pub fn target_company(&self, requested: Option<Uuid>) -> Option<Uuid> {
        requested.or_else(|| self.home_company())
    }
}
