//! 角色模板：六个系统内置角色的权限集合（固定表，不可由用户编辑）

use once_cell::sync::Lazy;
use std::collections::HashMap;

use crate::models::{
    permission::{all_grants, ActionKey, Grant, GrantSet, PageKey},
    role::RoleName,
};

use ActionKey::*;
use PageKey::*;

static TEMPLATES: Lazy<HashMap<RoleName, GrantSet>> = Lazy::new(|| {
    RoleName::ALL
        .iter()
        .map(|&role| (role, build_template(role)))
        .collect()
});

fn grants(pairs: &[(PageKey, &[ActionKey])]) -> GrantSet {
    pairs
        .iter()
        .flat_map(|(page, actions)| actions.iter().map(move |action| Grant::new(*page, *action)))
        .collect()
}

fn build_template(role: RoleName) -> GrantSet {
    match role {
        RoleName::SuperAdmin => all_grants(),
        RoleName::CompanyAdmin => all_grants()
            .into_iter()
            .filter(|g| match g.page {
                // 公司的增删改只属于平台管理员
                Companies => !matches!(g.action, Create | Edit | Delete | Manage),
                SystemSettings => false,
                _ => true,
            })
            .collect(),
        RoleName::ContentManager => grants(&[
            (Dashboard, &[View]),
            (Content, &[View, Create, Edit, Delete, Approve, Reject, Export, Import]),
            (ContentUpload, &[View, Create]),
            (ContentReview, &[View, Approve, Reject]),
            (ContentApproval, &[View, Approve, Reject]),
            (Schedules, &[View, Create, Edit, Delete]),
            (Overlays, &[View, Create, Edit, Delete]),
            (Devices, &[View]),
            (DeviceMonitoring, &[View]),
            (Analytics, &[View, Export]),
        ]),
        RoleName::Reviewer => grants(&[
            (Dashboard, &[View]),
            (Content, &[View]),
            (ContentReview, &[View, Approve, Reject]),
            (ContentApproval, &[View, Approve, Reject]),
        ]),
        RoleName::Editor => grants(&[
            (Dashboard, &[View]),
            (Content, &[View, Create, Edit]),
            (ContentUpload, &[View, Create]),
            (Schedules, &[View, Create, Edit]),
            (Overlays, &[View, Create, Edit]),
        ]),
        RoleName::Viewer => grants(&[
            (Dashboard, &[View]),
            (Analytics, &[View]),
            (Content, &[View]),
            (Devices, &[View]),
            (DeviceMonitoring, &[View]),
            (Schedules, &[View]),
            (Overlays, &[View]),
        ]),
    }
}

/// Grant set of a role template
pub fn grants_for(role: RoleName) -> &'static GrantSet {
    static EMPTY: Lazy<GrantSet> = Lazy::new(GrantSet::new);
    TEMPLATES.get(&role).unwrap_or(&EMPTY)
}

/// Grants of a binding: non-empty overrides replace the template, never merge with it
pub fn effective_grants(role: RoleName, overrides: Option<&GrantSet>) -> &GrantSet {
    match overrides {
        Some(overrides) if !overrides.is_empty() => overrides,
        _ => grants_for(role),
    }
}

/// Override grants that the role template does not contain.
/// Overrides may only narrow a template; a non-empty result must be rejected.
pub fn grants_beyond_template(role: RoleName, overrides: &GrantSet) -> GrantSet {
    overrides.difference(grants_for(role)).copied().collect()
}
