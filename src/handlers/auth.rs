//! 认证相关的 HTTP 处理器

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    auth::{BindingSnapshot, Principal},
    error::AppError,
    middleware::AppState,
    models::{
        auth::{
            AuthzCheckRequest, AuthzCheckResponse, CompanyQuery, LoginRequest, LoginResponse,
            LogoutRequest, RefreshTokenRequest,
        },
        permission::Grant,
        user::UserResponse,
    },
    services::authz::effective_permissions,
};

/// 登录
pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, AppError> {
    let response = state.auth_service.login(req).await?;
    Ok(Json(response))
}

/// 刷新令牌
pub async fn refresh_token(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RefreshTokenRequest>,
) -> Result<Json<LoginResponse>, AppError> {
    let response = state.auth_service.refresh(&req.refresh_token).await?;
    Ok(Json(response))
}

/// 当前调用方
#[derive(Debug, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MeResponse {
    SuperUser {
        user: UserResponse,
    },
    CompanyUser {
        user: UserResponse,
        home_company: Option<Uuid>,
        bindings: Vec<BindingSnapshot>,
    },
    Device {
        device_id: Uuid,
        company_id: Uuid,
    },
}

pub async fn get_current_user(
    State(state): State<Arc<AppState>>,
    principal: Principal,
) -> Result<Json<MeResponse>, AppError> {
    let home_company = principal.home_company();
    let response = match principal {
        Principal::SuperUser { user_id } => MeResponse::SuperUser {
            user: state.user_service.get_user(user_id).await?.into(),
        },
        Principal::CompanyUser { user_id, bindings } => MeResponse::CompanyUser {
            user: state.user_service.get_user(user_id).await?.into(),
            home_company,
            bindings,
        },
        Principal::Device {
            device_id,
            company_id,
        } => MeResponse::Device {
            device_id,
            company_id,
        },
    };
    Ok(Json(response))
}

/// 登出当前会话
pub async fn logout(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Json(req): Json<LogoutRequest>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = session_owner(&principal)?;
    state.auth_service.logout(user_id, &req.refresh_token).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// 登出所有会话
pub async fn logout_all(
    State(state): State<Arc<AppState>>,
    principal: Principal,
) -> Result<impl IntoResponse, AppError> {
    let user_id = session_owner(&principal)?;
    let revoked = state.auth_service.logout_all(user_id).await?;
    Ok(Json(json!({ "revoked_sessions": revoked })))
}

/// 调用方在目标公司内的有效权限（前端用来控制按钮显隐）
pub async fn get_permissions(
    principal: Principal,
    Query(query): Query<CompanyQuery>,
) -> Json<serde_json::Value> {
    let company_id = principal.target_company(query.company_id);
    let grants: Vec<Grant> = effective_permissions(&principal, company_id)
        .into_iter()
        .collect();

    Json(json!({
        "company_id": company_id,
        "grants": grants,
    }))
}

/// 单次授权探测；只返回结果，不返回拒绝原因
pub async fn check(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Json(req): Json<AuthzCheckRequest>,
) -> Json<AuthzCheckResponse> {
    let target = principal.target_company(req.company_id);
    let decision = state.authz.authorize(&principal, req.page, req.action, target);

    Json(AuthzCheckResponse {
        allowed: decision.is_allowed(),
    })
}

/// Devices have no interactive sessions
fn session_owner(principal: &Principal) -> Result<Uuid, AppError> {
    match principal {
        Principal::SuperUser { user_id } | Principal::CompanyUser { user_id, .. } => Ok(*user_id),
        Principal::Device { .. } => Err(AppError::Forbidden),
    }
}
