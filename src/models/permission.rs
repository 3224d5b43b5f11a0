//! Page/action permission vocabulary
//!
//! Pages and actions are closed sets. Wire strings are translated exactly once,
//! through serde or `FromStr`; an unknown string is an error, never a silent deny.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use super::text_enum;

/// Dashboard page a grant applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageKey {
    Dashboard,
    Analytics,
    Users,
    Companies,
    Roles,
    Content,
    ContentUpload,
    ContentReview,
    ContentApproval,
    Devices,
    DeviceRegistration,
    DeviceMonitoring,
    Schedules,
    Overlays,
    DigitalTwin,
    SystemSettings,
    AuditLogs,
    ApiKeys,
}

text_enum!(PageKey, "page", {
    Dashboard => "dashboard",
    Analytics => "analytics",
    Users => "users",
    Companies => "companies",
    Roles => "roles",
    Content => "content",
    ContentUpload => "content_upload",
    ContentReview => "content_review",
    ContentApproval => "content_approval",
    Devices => "devices",
    DeviceRegistration => "device_registration",
    DeviceMonitoring => "device_monitoring",
    Schedules => "schedules",
    Overlays => "overlays",
    DigitalTwin => "digital_twin",
    SystemSettings => "system_settings",
    AuditLogs => "audit_logs",
    ApiKeys => "api_keys",
});

impl PageKey {
    pub const ALL: [PageKey; 18] = [
        PageKey::Dashboard,
        PageKey::Analytics,
        PageKey::Users,
        PageKey::Companies,
        PageKey::Roles,
        PageKey::Content,
        PageKey::ContentUpload,
        PageKey::ContentReview,
        PageKey::ContentApproval,
        PageKey::Devices,
        PageKey::DeviceRegistration,
        PageKey::DeviceMonitoring,
        PageKey::Schedules,
        PageKey::Overlays,
        PageKey::DigitalTwin,
        PageKey::SystemSettings,
        PageKey::AuditLogs,
        PageKey::ApiKeys,
    ];

    /// Pages not owned by any company; system-level bindings apply to them.
    pub fn is_system_level(&self) -> bool {
        matches!(self, PageKey::Dashboard | PageKey::SystemSettings)
    }
}

/// Operation performed on a page
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKey {
    View,
    Create,
    Edit,
    Delete,
    Approve,
    Reject,
    Manage,
    Export,
    Import,
}

text_enum!(ActionKey, "action", {
    View => "view",
    Create => "create",
    Edit => "edit",
    Delete => "delete",
    Approve => "approve",
    Reject => "reject",
    Manage => "manage",
    Export => "export",
    Import => "import",
});

impl ActionKey {
    pub const ALL: [ActionKey; 9] = [
        ActionKey::View,
        ActionKey::Create,
        ActionKey::Edit,
        ActionKey::Delete,
        ActionKey::Approve,
        ActionKey::Reject,
        ActionKey::Manage,
        ActionKey::Export,
        ActionKey::Import,
    ];
}

/// A single (page, action) permission unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Grant {
    pub page: PageKey,
    pub action: ActionKey,
}

impl Grant {
    pub const fn new(page: PageKey, action: ActionKey) -> Self {
        Self { page, action }
    }
}

impl fmt::Display for Grant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.page, self.action)
    }
}

/// Grant 字符串解析错误
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseGrantError {
    #[error("malformed grant (expected page:action): {0}")]
    Malformed(String),

    #[error(transparent)]
    Unknown(#[from] super::UnknownVariant),
}

impl FromStr for Grant {
    type Err = ParseGrantError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (page, action) = s
            .split_once(':')
            .ok_or_else(|| ParseGrantError::Malformed(s.to_string()))?;

        Ok(Grant::new(page.trim().parse()?, action.trim().parse()?))
    }
}

/// Set of grants. Absence of a grant means deny.
pub type GrantSet = BTreeSet<Grant>;

/// Every grant in the vocabulary
pub fn all_grants() -> GrantSet {
    PageKey::ALL
        .iter()
        .flat_map(|page| ActionKey::ALL.iter().map(move |action| Grant::new(*page, *action)))
        .collect()
}
