//! 认证中间件：从请求头解析调用方身份（Principal）

use crate::{error::AppError, services::token_service::TokenService};
use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header::AUTHORIZATION, HeaderMap, HeaderName},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;

use super::{AuthError, Principal};

/// Credential found on a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresentedCredential {
    Bearer(String),
    DeviceKey(String),
}

/// 从请求头提取凭证：恰好一种，两种同时出现视为歧义
pub fn extract_credential(
    headers: &HeaderMap,
    device_key_header: &HeaderName,
) -> Result<PresentedCredential, AuthError> {
    let authorization = headers.get(AUTHORIZATION);
    let device_key = headers.get(device_key_header);

    match (authorization, device_key) {
        (Some(_), Some(_)) => Err(AuthError::AmbiguousCredential),
        (Some(value), None) => value
            .to_str()
            .ok()
            .and_then(|s| s.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .map(|token| PresentedCredential::Bearer(token.to_string()))
            .ok_or(AuthError::Unauthenticated),
        (None, Some(value)) => value
            .to_str()
            .ok()
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .map(|key| PresentedCredential::DeviceKey(key.to_string()))
            .ok_or(AuthError::Unauthenticated),
        (None, None) => Err(AuthError::Unauthenticated),
    }
}

/// Turns request headers into a typed principal
pub struct PrincipalResolver {
    tokens: Arc<TokenService>,
    device_key_header: HeaderName,
}

impl PrincipalResolver {
    pub fn new(tokens: Arc<TokenService>, device_key_header: HeaderName) -> Self {
        Self {
            tokens,
            device_key_header,
        }
    }

    pub fn device_key_header(&self) -> &HeaderName {
        &self.device_key_header
    }

    pub async fn resolve(&self, headers: &HeaderMap) -> Result<Principal, AuthError> {
        match extract_credential(headers, &self.device_key_header)? {
            PresentedCredential::Bearer(token) => self.tokens.validate_access(&token),
            PresentedCredential::DeviceKey(key) => self.tokens.validate_device_key(&key).await,
        }
    }
}

/// 认证中间件 - 必须认证，失败即拒绝（无匿名放行）
pub async fn require_principal(
    State(resolver): State<Arc<PrincipalResolver>>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let principal = resolver.resolve(req.headers()).await.map_err(|e| {
        match &e {
            AuthError::AmbiguousCredential => {
                tracing::warn!(path = %req.uri().path(), "Rejected request with both credential types")
            }
            AuthError::Store(err) => tracing::error!(error = %err, "Credential store unavailable"),
            _ => tracing::debug!(path = %req.uri().path(), "Unauthenticated request"),
        }
        AppError::from(e)
    })?;

    tracing::Span::current().record("principal", principal.id().to_string());

    // 附加到请求扩展
    req.extensions_mut().insert(principal);

    Ok(next.run(req).await)
}

// 实现 FromRequestParts 以便在 handler 中直接提取 Principal
impl<S> FromRequestParts<S> for Principal
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut axum::http::request::Parts,
        _state: &S,
    ) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Principal>()
            .cloned()
            .ok_or(AppError::Unauthorized)
    }
}
