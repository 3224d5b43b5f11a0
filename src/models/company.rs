//! Company (tenant) domain models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use super::text_enum;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CompanyType {
    Host,
    Advertiser,
}

text_enum!(CompanyType, "company type", {
    Host => "HOST",
    Advertiser => "ADVERTISER",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompanyStatus {
    Active,
    Deleted,
}

text_enum!(CompanyStatus, "company status", {
    Active => "active",
    Deleted => "deleted",
});

/// 内容共享策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentSharingPolicy {
    #[default]
    Private,
    ShareWithHosts,
    Public,
}

/// 公司设置（JSONB 存储）
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CompanySettings {
    pub content_sharing: ContentSharingPolicy,
    pub max_devices: Option<u32>,
    pub max_storage_mb: Option<u64>,
}

/// Company. Soft-deleted through `status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Company {
    pub id: Uuid,
    pub name: String,
    pub company_type: CompanyType,
    pub settings: CompanySettings,
    pub status: CompanyStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Company {
    pub fn new(name: &str, company_type: CompanyType, settings: CompanySettings) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.trim().to_string(),
            company_type,
            settings,
            status: CompanyStatus::Active,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == CompanyStatus::Active
    }
}

/// Create company request
#[derive(Debug, Deserialize, Validate)]
pub struct CreateCompanyRequest {
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    pub company_type: CompanyType,
    #[serde(default)]
    pub settings: CompanySettings,
}
