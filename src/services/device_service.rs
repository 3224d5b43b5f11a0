//! 设备凭证管理与心跳

use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    auth::Principal,
    error::AppError,
    models::device::{DeviceResponse, HeartbeatResponse, IssuedDeviceKey},
    repository::{CompanyScope, DeviceFilter, Store},
};

use super::{isolation::ScopedQuery, token_service::TokenService};

pub struct DeviceService {
    store: Arc<dyn Store>,
    tokens: Arc<TokenService>,
}

impl DeviceService {
    pub fn new(store: Arc<dyn Store>, tokens: Arc<TokenService>) -> Self {
        Self { store, tokens }
    }

    /// Issues (or rotates) the key of a device owned by `company_id`.
    ///
    /// A device belongs to exactly one company; re-keying it under another
    /// company is a conflict until its current key is revoked. The store checks
    /// ownership in the same step that replaces the key.
    pub async fn issue_key(
        &self,
        company_id: Uuid,
        device_id: Uuid,
    ) -> Result<IssuedDeviceKey, AppError> {
        let company = match self.store.get_company(company_id).await? {
            Some(company) if company.is_active() => company,
            _ => return Err(AppError::not_found("company")),
        };

        // 仅新设备计入配额，轮换已有设备的密钥不受限
        if let Some(max) = company.settings.max_devices {
            let active = self
                .store
                .find_device_credentials(&DeviceFilter {
                    scope: CompanyScope::single(company_id),
                    active_only: true,
                    ..Default::default()
                })
                .await?;
            let registered = active.iter().any(|c| c.device_id == device_id);
            if !registered && active.len() >= max as usize {
                return Err(AppError::Conflict(format!(
                    "Company device limit of {} reached",
                    max
                )));
            }
        }

        Ok(self.tokens.issue_device_key(device_id, company_id).await?)
    }

    pub async fn revoke_key(&self, company_id: Uuid, device_id: Uuid) -> Result<(), AppError> {
        if !self.tokens.revoke_device_key(device_id, company_id).await? {
            return Err(AppError::not_found("device key"));
        }
        Ok(())
    }

    pub async fn list(&self, scope: &ScopedQuery) -> Result<Vec<DeviceResponse>, AppError> {
        if scope.is_empty() {
            return Ok(Vec::new());
        }

        let credentials = self
            .store
            .find_device_credentials(&DeviceFilter {
                scope: scope.companies.clone(),
                device_id: scope.device_id,
                active_only: false,
            })
            .await?;

        Ok(credentials
            .into_iter()
            .filter(|c| scope.permits(c.company_id, Some(c.device_id)))
            .map(DeviceResponse::from)
            .collect())
    }

    /// Liveness ping from a device principal; `last_seen_at` is already
    /// updated during key validation
    pub fn heartbeat(&self, principal: &Principal) -> Result<HeartbeatResponse, AppError> {
        match principal {
            Principal::Device {
                device_id,
                company_id,
            } => {
                tracing::debug!(device_id = %device_id, company_id = %company_id, "Device heartbeat");
                Ok(HeartbeatResponse {
                    device_id: *device_id,
                    company_id: *company_id,
                    server_time: Utc::now(),
                })
            }
            _ => Err(AppError::Forbidden),
        }
    }
}
