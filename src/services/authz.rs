//! 授权引擎：主体 × 页面 × 操作 × 目标公司 → 允许 / 拒绝
//!
//! `authorize` is a pure function over the principal and a fixed template table.
//! `AuthorizationEngine` wraps it with audit emission and metrics.

use chrono::Utc;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    auth::Principal,
    error::AppError,
    models::{
        audit::DecisionEvent,
        permission::{all_grants, ActionKey, Grant, GrantSet, PageKey},
    },
};

use super::audit_service::AuditSink;

/// Grants a device credential may ever exercise
pub const DEVICE_GRANTS: [Grant; 5] = [
    Grant::new(PageKey::Content, ActionKey::View),
    Grant::new(PageKey::Schedules, ActionKey::View),
    Grant::new(PageKey::Overlays, ActionKey::View),
    // heartbeat
    Grant::new(PageKey::DeviceMonitoring, ActionKey::Create),
    // playback analytics push
    Grant::new(PageKey::Analytics, ActionKey::Create),
];

/// Why a request was denied. Internal only; callers just see 403.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    /// No active binding for the target company
    NoCompanyAccess,
    /// Binding exists but lacks the grant
    InsufficientPermission,
    /// Principal type cannot perform this request at all
    NotApplicable,
}

impl DenyReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DenyReason::NoCompanyAccess => "no_company_access",
            DenyReason::InsufficientPermission => "insufficient_permission",
            DenyReason::NotApplicable => "not_applicable",
        }
    }
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny(DenyReason),
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }

    pub fn deny_reason(&self) -> Option<DenyReason> {
        match self {
            Decision::Allow => None,
            Decision::Deny(reason) => Some(*reason),
        }
    }

    /// Deny → `AppError::Forbidden`; the reason is not returned to the caller
    pub fn require(self) -> Result<(), AppError> {
        match self {
            Decision::Allow => Ok(()),
            Decision::Deny(_) => Err(AppError::Forbidden),
        }
    }
}

/// Decides whether `principal` may perform `action` on `page` within `target_company`.
///
/// `target_company` is `None` only for system-level requests; callers resolve a
/// missing company through [`Principal::target_company`] first.
pub fn authorize(
    principal: &Principal,
    page: PageKey,
    action: ActionKey,
    target_company: Option<Uuid>,
) -> Decision {
    let grant = Grant::new(page, action);

    match principal {
        Principal::SuperUser { .. } => Decision::Allow,
        Principal::Device { company_id, .. } => {
            if target_company == Some(*company_id) && DEVICE_GRANTS.contains(&grant) {
                Decision::Allow
            } else {
                Decision::Deny(DenyReason::NotApplicable)
            }
        }
        Principal::CompanyUser { bindings, .. } => {
            let mut matching = bindings
                .iter()
                .filter(|b| b.is_active())
                .filter(|b| match b.company_id {
                    Some(company_id) => target_company == Some(company_id),
                    None => page.is_system_level(),
                })
                .peekable();

            if matching.peek().is_none() {
                return Decision::Deny(DenyReason::NoCompanyAccess);
            }

            if matching.any(|b| b.effective_grants().contains(&grant)) {
                Decision::Allow
            } else {
                Decision::Deny(DenyReason::InsufficientPermission)
            }
        }
    }
}

/// Union of grants the principal holds within `target_company`
pub fn effective_permissions(principal: &Principal, target_company: Option<Uuid>) -> GrantSet {
    match principal {
        Principal::SuperUser { .. } => all_grants(),
        Principal::Device { company_id, .. } => {
            if target_company == Some(*company_id) {
                DEVICE_GRANTS.into_iter().collect()
            } else {
                GrantSet::new()
            }
        }
        Principal::CompanyUser { bindings, .. } => bindings
            .iter()
            .filter(|b| b.is_active())
            .flat_map(|b| {
                let grants = b.effective_grants().iter().copied();
                let in_target = b.company_id.is_some() && b.company_id == target_company;
                let system_level = b.company_id.is_none();
                grants.filter(move |g| in_target || (system_level && g.page.is_system_level()))
            })
            .collect(),
    }
}

/// `authorize` plus one audit event and one metric per decision
pub struct AuthorizationEngine {
    sink: Arc<dyn AuditSink>,
}

impl AuthorizationEngine {
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self { sink }
    }

    pub fn authorize(
        &self,
        principal: &Principal,
        page: PageKey,
        action: ActionKey,
        target_company: Option<Uuid>,
    ) -> Decision {
        let decision = authorize(principal, page, action, target_company);
        let reason = decision.deny_reason();

        metrics::counter!(
            "authz_decisions_total",
            "outcome" => if decision.is_allowed() { "allow" } else { "deny" },
            "reason" => reason.map(|r| r.as_str()).unwrap_or("none"),
        )
        .increment(1);

        if let Some(reason) = reason {
            tracing::debug!(
                principal = %principal.id(),
                kind = principal.kind(),
                page = %page,
                action = %action,
                target_company = ?target_company,
                reason = %reason,
                "Authorization denied"
            );
        }

        self.sink.record(DecisionEvent {
            id: Uuid::new_v4(),
            principal_id: principal.id(),
            principal_kind: principal.kind().to_string(),
            page,
            action,
            target_company,
            allowed: decision.is_allowed(),
            reason: reason.map(|r| r.to_string()),
            occurred_at: Utc::now(),
        });

        decision
    }
}
