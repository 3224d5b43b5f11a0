//! 公司管理的 HTTP 处理器

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    auth::Principal,
    error::AppError,
    middleware::AppState,
    models::{
        auth::CompanyQuery,
        company::CreateCompanyRequest,
        permission::{ActionKey, PageKey},
    },
    services::{scope_query, DataQuery},
};

/// 列出调用方可见的公司
pub async fn list_companies(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Query(query): Query<CompanyQuery>,
) -> Result<impl IntoResponse, AppError> {
    state
        .authz
        .authorize(
            &principal,
            PageKey::Companies,
            ActionKey::View,
            principal.target_company(query.company_id),
        )
        .require()?;

    let scope = scope_query(&principal, DataQuery::new(PageKey::Companies, query.company_id));
    let companies = state.company_service.list(&scope).await?;

    Ok(Json(json!({
        "count": companies.len(),
        "companies": companies,
    })))
}

/// 创建公司（平台级操作）
pub async fn create_company(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Json(req): Json<CreateCompanyRequest>,
) -> Result<impl IntoResponse, AppError> {
    state
        .authz
        .authorize(&principal, PageKey::Companies, ActionKey::Create, None)
        .require()?;

    let company = state.company_service.create(req).await?;
    Ok((StatusCode::CREATED, Json(company)))
}

/// 软删除公司
pub async fn delete_company(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    state
        .authz
        .authorize(&principal, PageKey::Companies, ActionKey::Delete, Some(id))
        .require()?;

    state.company_service.soft_delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
