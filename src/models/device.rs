//! Device credential models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::text_enum;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialStatus {
    Active,
    Revoked,
}

text_enum!(CredentialStatus, "credential status", {
    Active => "active",
    Revoked => "revoked",
});

/// Device API key record. The plaintext key is never stored.
#[derive(Debug, Clone)]
pub struct DeviceCredential {
    pub id: Uuid,
    pub device_id: Uuid,
    pub company_id: Uuid,
    /// SHA-256 hex of the key
    pub key_hash: String,
    /// Public identifier for logs
    pub key_prefix: String,
    pub status: CredentialStatus,
    pub last_seen_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
}

impl DeviceCredential {
    pub fn is_active(&self) -> bool {
        self.status == CredentialStatus::Active
    }
}

/// Device listing entry (without key material)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceResponse {
    pub device_id: Uuid,
    pub company_id: Uuid,
    pub key_prefix: String,
    pub status: CredentialStatus,
    pub last_seen_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<DeviceCredential> for DeviceResponse {
    fn from(cred: DeviceCredential) -> Self {
        Self {
            device_id: cred.device_id,
            company_id: cred.company_id,
            key_prefix: cred.key_prefix,
            status: cred.status,
            last_seen_at: cred.last_seen_at,
            created_at: cred.created_at,
        }
    }
}

/// Freshly issued device key. The plaintext is returned exactly once.
#[derive(Debug, Clone, Serialize)]
pub struct IssuedDeviceKey {
    pub device_id: Uuid,
    pub company_id: Uuid,
    pub api_key: String,
    pub key_prefix: String,
}

/// 设备心跳响应
#[derive(Debug, Serialize)]
pub struct HeartbeatResponse {
    pub device_id: Uuid,
    pub company_id: Uuid,
    pub server_time: DateTime<Utc>,
}
