//! Audit domain models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::permission::{ActionKey, PageKey};

/// One authorization decision, emitted for every `authorize` call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionEvent {
    pub id: Uuid,
    pub principal_id: Uuid,
    /// super_user, company_user or device
    pub principal_kind: String,
    pub page: PageKey,
    pub action: ActionKey,
    pub target_company: Option<Uuid>,
    pub allowed: bool,
    /// Deny reason; internal only, never returned to callers
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}
