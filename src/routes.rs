//! 路由注册
//! 创建所有 API 路由并应用中间件

use axum::{
    routing::{delete, get, post, put},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer};

use crate::{auth::require_principal, handlers, middleware::AppState};

/// 创建应用路由
pub fn create_router(state: Arc<AppState>) -> Router {
    // 公开端点
    let public_routes = Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/ready", get(handlers::health::readiness_check))
        .route("/api/v1/auth/login", post(handlers::auth::login))
        .route("/api/v1/auth/refresh", post(handlers::auth::refresh_token));

    // 需要认证的路由（Bearer 或设备密钥，二选一）
    let authenticated_routes = Router::new()
        .route("/api/v1/auth/me", get(handlers::auth::get_current_user))
        .route("/api/v1/auth/logout", post(handlers::auth::logout))
        .route("/api/v1/auth/logout-all", post(handlers::auth::logout_all))
        .route("/api/v1/auth/permissions", get(handlers::auth::get_permissions))
        .route("/api/v1/authz/check", post(handlers::auth::check))

        // 公司
        .route(
            "/api/v1/companies",
            get(handlers::company::list_companies).post(handlers::company::create_company),
        )
        .route("/api/v1/companies/{company_id}", delete(handlers::company::delete_company))

        // 用户与角色
        .route(
            "/api/v1/companies/{company_id}/users",
            get(handlers::user::list_company_users).post(handlers::user::create_company_user),
        )
        .route("/api/v1/users/{id}/roles", post(handlers::user::assign_role))
        .route("/api/v1/users/{id}/status", put(handlers::user::update_user_status))
        .route("/api/v1/role-bindings/{id}", delete(handlers::user::revoke_role))

        // 设备
        .route("/api/v1/devices", get(handlers::device::list_devices))
        .route(
            "/api/v1/companies/{company_id}/devices/{device_id}/key",
            post(handlers::device::issue_device_key).delete(handlers::device::revoke_device_key),
        )
        .route("/api/v1/device/heartbeat", post(handlers::device::heartbeat))
        .layer(axum::middleware::from_fn_with_state(
            state.resolver.clone(),
            require_principal,
        ));

    Router::new()
        .merge(public_routes)
        .merge(authenticated_routes)
        .layer(RequestBodyLimitLayer::new(state.config.server.max_body_bytes))
        .layer(CorsLayer::permissive())
        .layer(axum::middleware::from_fn(crate::middleware::request_tracking_middleware))
        .with_state(state)
}
