//! 用户与角色绑定的 HTTP 处理器

use axum::{
    extract::{Path, State},
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
        permission::{ActionKey, GrantSet, PageKey},
        role::AssignRoleRequest,
        user::{CreateCompanyUserRequest, UpdateUserStatusRequest, UserResponse},
    },
    services::{authz, permission_model, scope_query, DataQuery},
};

/// 列出公司下的用户
pub async fn list_company_users(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(company_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    state
        .authz
        .authorize(&principal, PageKey::Users, ActionKey::View, Some(company_id))
        .require()?;

    let scope = scope_query(&principal, DataQuery::new(PageKey::Users, Some(company_id)));
    let users: Vec<UserResponse> = state
        .user_service
        .list_users(&scope)
        .await?
        .into_iter()
        .map(UserResponse::from)
        .collect();

    Ok(Json(json!({
        "count": users.len(),
        "users": users,
    })))
}

/// 在公司下创建用户（同时写入主角色绑定）
pub async fn create_company_user(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(company_id): Path<Uuid>,
    Json(req): Json<CreateCompanyUserRequest>,
) -> Result<impl IntoResponse, AppError> {
    state
        .authz
        .authorize(&principal, PageKey::Users, ActionKey::Create, Some(company_id))
        .require()?;

    let (user, binding) = state.user_service.create_company_user(company_id, req).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "user": UserResponse::from(user),
            "binding": binding,
        })),
    ))
}

/// 分配角色；`company_id` 为空表示系统级绑定，仅平台管理员可操作
///
/// The caller must already manage the target user and hold every grant the new
/// binding would carry.
pub async fn assign_role(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(user_id): Path<Uuid>,
    Json(req): Json<AssignRoleRequest>,
) -> Result<impl IntoResponse, AppError> {
    state
        .authz
        .authorize(&principal, PageKey::Roles, ActionKey::Create, req.company_id)
        .require()?;
    require_user_authority(&state, &principal, user_id).await?;

    let requested: GrantSet = match &req.overrides {
        Some(overrides) if !overrides.is_empty() => overrides.iter().copied().collect(),
        _ => permission_model::grants_for(req.role).clone(),
    };
    let held = authz::effective_permissions(&principal, req.company_id);
    let missing: Vec<String> = requested
        .difference(&held)
        .map(|g| g.to_string())
        .collect();
    if !missing.is_empty() {
        tracing::warn!(
            principal = %principal.id(),
            user_id = %user_id,
            company_id = ?req.company_id,
            missing = %missing.join(","),
            "Role assignment exceeds the caller's own grants"
        );
        return Err(AppError::Forbidden);
    }

    let binding = state.user_service.assign_role(user_id, req).await?;
    Ok((StatusCode::CREATED, Json(binding)))
}

/// 撤销角色绑定
pub async fn revoke_role(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(binding_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let binding = state.user_service.get_role_binding(binding_id).await?;
    state
        .authz
        .authorize(&principal, PageKey::Roles, ActionKey::Delete, binding.company_id)
        .require()?;

    let revoked = state.user_service.revoke_role(binding_id).await?;
    Ok(Json(revoked))
}

/// 启用 / 停用用户
pub async fn update_user_status(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(user_id): Path<Uuid>,
    Json(req): Json<UpdateUserStatusRequest>,
) -> Result<impl IntoResponse, AppError> {
    if principal.id() == user_id {
        return Err(AppError::BadRequest("Cannot change your own status".to_string()));
    }
    require_user_authority(&state, &principal, user_id).await?;

    let user = state.user_service.set_status(user_id, req.status).await?;
    Ok(Json(UserResponse::from(user)))
}

/// The caller needs `users:edit` in every company the target currently
/// belongs to; users without company bindings are managed by super users only.
async fn require_user_authority(
    state: &AppState,
    principal: &Principal,
    user_id: Uuid,
) -> Result<(), AppError> {
    let companies = state.user_service.member_companies(user_id).await?;
    if companies.is_empty() {
        return state
            .authz
            .authorize(principal, PageKey::Users, ActionKey::Edit, None)
            .require();
    }
    for company_id in companies {
        state
            .authz
            .authorize(principal, PageKey::Users, ActionKey::Edit, Some(company_id))
            .require()?;
    }
    Ok(())
}
