//! 设备凭证与心跳的 HTTP 处理器

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
        permission::{ActionKey, PageKey},
    },
    services::{scope_query, DataQuery},
};

pub async fn list_devices(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Query(query): Query<CompanyQuery>,
) -> Result<impl IntoResponse, AppError> {
    state
        .authz
        .authorize(
            &principal,
            PageKey::Devices,
            ActionKey::View,
            principal.target_company(query.company_id),
        )
        .require()?;

    let scope = scope_query(&principal, DataQuery::new(PageKey::Devices, query.company_id));
    let devices = state.device_service.list(&scope).await?;

    Ok(Json(json!({
        "count": devices.len(),
        "devices": devices,
    })))
}

/// 签发（或轮换）设备密钥；明文只在此响应中返回一次
pub async fn issue_device_key(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path((company_id, device_id)): Path<(Uuid, Uuid)>,
) -> Result<impl IntoResponse, AppError> {
    state
        .authz
        .authorize(
            &principal,
            PageKey::DeviceRegistration,
            ActionKey::Create,
            Some(company_id),
        )
        .require()?;

    let issued = state.device_service.issue_key(company_id, device_id).await?;
    Ok((StatusCode::CREATED, Json(issued)))
}

pub async fn revoke_device_key(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path((company_id, device_id)): Path<(Uuid, Uuid)>,
) -> Result<impl IntoResponse, AppError> {
    state
        .authz
        .authorize(
            &principal,
            PageKey::DeviceRegistration,
            ActionKey::Delete,
            Some(company_id),
        )
        .require()?;

    state.device_service.revoke_key(company_id, device_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// 设备心跳
pub async fn heartbeat(
    State(state): State<Arc<AppState>>,
    principal: Principal,
) -> Result<impl IntoResponse, AppError> {
    state
        .authz
        .authorize(
            &principal,
            PageKey::DeviceMonitoring,
            ActionKey::Create,
            principal.home_company(),
        )
        .require()?;

    Ok(Json(state.device_service.heartbeat(&principal)?))
}
