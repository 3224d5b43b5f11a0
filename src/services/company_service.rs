//! 公司（租户）管理

use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use crate::{
    error::AppError,
    models::company::{Company, CompanyStatus, CreateCompanyRequest},
    repository::{CompanyFilter, DeviceFilter, Store},
};

use super::isolation::ScopedQuery;

pub struct CompanyService {
    store: Arc<dyn Store>,
}

impl CompanyService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn create(&self, req: CreateCompanyRequest) -> Result<Company, AppError> {
        req.validate()?;

        let company = Company::new(&req.name, req.company_type, req.settings);
        self.store.upsert_company(&company).await?;

        tracing::info!(
            company_id = %company.id,
            name = %company.name,
            company_type = %company.company_type,
            "Company created"
        );
        Ok(company)
    }

    /// Active company; deleted companies read as missing
    pub async fn get_active(&self, id: Uuid) -> Result<Company, AppError> {
        match self.store.get_company(id).await? {
            Some(company) if company.is_active() => Ok(company),
            _ => Err(AppError::not_found("company")),
        }
    }

    pub async fn list(&self, scope: &ScopedQuery) -> Result<Vec<Company>, AppError> {
        if scope.is_empty() {
            return Ok(Vec::new());
        }

        Ok(self
            .store
            .find_companies(&CompanyFilter {
                scope: scope.companies.clone(),
                include_deleted: false,
            })
            .await?)
    }

    /// Soft delete. Refused while the company still owns active device keys.
    pub async fn soft_delete(&self, id: Uuid) -> Result<Company, AppError> {
        let mut company = self.get_active(id).await?;

        let devices = self
            .store
            .find_device_credentials(&DeviceFilter {
                scope: crate::repository::CompanyScope::single(id),
                active_only: true,
                ..Default::default()
            })
            .await?;
        if !devices.is_empty() {
            return Err(AppError::Conflict(format!(
                "Company still has {} active device(s)",
                devices.len()
            )));
        }

        company.status = CompanyStatus::Deleted;
        company.updated_at = Utc::now();
        self.store.upsert_company(&company).await?;

        tracing::info!(company_id = %id, "Company deleted");
        Ok(company)
    }
}
