//! HTTP 中间件与应用状态
//! 请求追踪（trace_id / request_id / 指标）

use axum::{
    extract::Request,
    http::{HeaderMap, HeaderName, HeaderValue},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use std::time::Instant;
use tracing::Instrument;
use uuid::Uuid;

use crate::{
    auth::{PasswordHasher, PrincipalResolver},
    config::AppConfig,
    error::AppError,
    repository::Store,
    services::{
        AuditSink, AuthService, AuthorizationEngine, CompanyService, DeviceService, TokenService,
        UserService,
    },
};

/// 应用状态
///
/// Services hold `Arc`s to the shared store, so cloning the state is cheap.
#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub store: Arc<dyn Store>,
    pub tokens: Arc<TokenService>,
    pub resolver: Arc<PrincipalResolver>,
    pub authz: Arc<AuthorizationEngine>,
    pub auth_service: Arc<AuthService>,
    pub user_service: Arc<UserService>,
    pub company_service: Arc<CompanyService>,
    pub device_service: Arc<DeviceService>,
    pub started_at: Instant,
}

impl AppState {
    /// Wires every service on top of one store and one audit sink
    pub fn new(
        config: AppConfig,
        store: Arc<dyn Store>,
        audit_sink: Arc<dyn AuditSink>,
    ) -> Result<Self, AppError> {
        let tokens = Arc::new(TokenService::new(&config, store.clone())?);
        let hasher = Arc::new(PasswordHasher::from_config(&config.security)?);

        let device_key_header = HeaderName::from_bytes(config.security.device_key_header.as_bytes())
            .map_err(|e| AppError::Config(format!("invalid device_key_header: {}", e)))?;

        Ok(Self {
            resolver: Arc::new(PrincipalResolver::new(tokens.clone(), device_key_header)),
            authz: Arc::new(AuthorizationEngine::new(audit_sink)),
            auth_service: Arc::new(AuthService::new(store.clone(), tokens.clone(), hasher.clone())),
            user_service: Arc::new(UserService::new(
                store.clone(),
                hasher,
                config.security.clone(),
            )),
            company_service: Arc::new(CompanyService::new(store.clone())),
            device_service: Arc::new(DeviceService::new(store.clone(), tokens.clone())),
            tokens,
            store,
            config,
            started_at: Instant::now(),
        })
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

/// 请求追踪中间件
/// 为每个请求生成 trace_id 和 request_id，并记录指标
pub async fn request_tracking_middleware(req: Request, next: Next) -> Response {
    let trace_id = extract_or_generate_trace_id(req.headers());
    let request_id = Uuid::new_v4().to_string();

    let method = req.method().clone();
    let path = req.uri().path().to_string();

    // principal 字段由认证中间件在解析出身份后填充
    let span = tracing::info_span!(
        "http_request",
        trace_id = %trace_id,
        request_id = %request_id,
        method = %method,
        path = %path,
        principal = tracing::field::Empty,
    );

    async move {
        let start = Instant::now();
        let mut response = next.run(req).await;
        let elapsed = start.elapsed();

        let status = response.status();
        metrics::counter!(
            "http_requests_total",
            "method" => method_label(method.as_str()),
            "status" => status_label(status.as_u16()),
        )
        .increment(1);
        metrics::histogram!("http_request_duration_seconds").record(elapsed.as_secs_f64());

        tracing::info!(
            status = status.as_u16(),
            elapsed_ms = elapsed.as_millis() as u64,
            "Request completed"
        );

        // 非法字符的 trace_id 不回写
        if let Ok(value) = HeaderValue::from_str(&trace_id) {
            response.headers_mut().insert("x-trace-id", value);
        }
        if let Ok(value) = HeaderValue::from_str(&request_id) {
            response.headers_mut().insert("x-request-id", value);
        }

        response
    }
    .instrument(span)
    .await
}

/// 从请求头中提取或生成 trace_id
fn extract_or_generate_trace_id(headers: &HeaderMap) -> String {
    headers
        .get("x-trace-id")
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty() && s.len() <= 128)
        .map(|s| s.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

fn method_label(method: &str) -> &'static str {
    match method {
        "GET" => "GET",
        "POST" => "POST",
        "PUT" => "PUT",
        "DELETE" => "DELETE",
        "PATCH" => "PATCH",
        _ => "OTHER",
    }
}

fn status_label(status: u16) -> &'static str {
    match status {
        200 => "200",
        201 => "201",
        204 => "204",
        400 => "400",
        401 => "401",
        403 => "403",
        404 => "404",
        409 => "409",
        500 => "500",
        503 => "503",
        _ => "other",
    }
}
