//! 测试公共模块
//! 基于内存存储搭建完整应用，不依赖数据库

#![allow(dead_code)]

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use secrecy::Secret;
use serde_json::Value;
use signage_auth::{
    config::{
        AppConfig, BootstrapConfig, DatabaseConfig, LoggingConfig, SecurityConfig, ServerConfig,
    },
    middleware::AppState,
    models::{
        company::{Company, CompanySettings, CompanyType},
        role::RoleName,
        user::{CreateCompanyUserRequest, User},
    },
    repository::{CompanyStore, PgStore},
    routes,
    services::MemoryAuditSink,
};
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;

mod outage_store;
pub use outage_store::OutageStore;

pub const PASSWORD: &str = "Password123";
pub const DEVICE_KEY_HEADER: &str = "x-device-key";

/// 创建测试配置
pub fn create_test_config() -> AppConfig {
    AppConfig {
        server: ServerConfig {
            addr: "127.0.0.1:0".to_string(),
            graceful_shutdown_timeout_secs: 5,
            max_body_bytes: 64 * 1024,
        },
        database: DatabaseConfig {
            url: Secret::new("postgresql://localhost/unused".to_string()),
            max_connections: 5,
            min_connections: 1,
            acquire_timeout_secs: 5,
            idle_timeout_secs: 300,
            max_lifetime_secs: 1800,
        },
        logging: LoggingConfig {
            level: "debug".to_string(),
            format: "pretty".to_string(),
        },
        security: SecurityConfig {
            jwt_secret: Secret::new("test-secret-key-for-testing-only-min-32-chars".to_string()),
            access_token_exp_secs: 300,
            refresh_token_exp_secs: 3600,
            revoke_family_on_reuse: false,
            device_key_header: DEVICE_KEY_HEADER.to_string(),
            password_min_length: 8,
            password_require_uppercase: true,
            password_require_digit: true,
            password_require_special: false,
            // 测试中调低 Argon2 开销
            password_hash_memory_kib: 1024,
            password_hash_iterations: 1,
            password_hash_parallelism: 1,
        },
        bootstrap: BootstrapConfig::default(),
    }
}

/// 连接 `TEST_DATABASE_URL` 指向的测试库并执行迁移。
/// 未设置时返回 `None`，调用方跳过数据库测试；各测试使用随机数据，无需清表。
pub async fn setup_test_db() -> Option<PgStore> {
    let url = std::env::var("TEST_DATABASE_URL").ok()?;
    let mut config = create_test_config();
    config.database.url = Secret::new(url);

    let store = PgStore::connect(&config.database)
        .await
        .expect("Failed to create test database pool");
    store.migrate().await.expect("Failed to run migrations");
    Some(store)
}

pub struct TestApp {
    pub state: Arc<AppState>,
    /// 内存存储，可按需模拟故障
    pub store: Arc<OutageStore>,
    pub audit: Arc<MemoryAuditSink>,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_config(create_test_config())
    }

    pub fn with_config(config: AppConfig) -> Self {
        let store = Arc::new(OutageStore::default());
        let audit = Arc::new(MemoryAuditSink::default());
        let state = AppState::new(config, store.clone(), audit.clone())
            .expect("Failed to build app state");

        Self {
            state: Arc::new(state),
            store,
            audit,
        }
    }

    pub fn router(&self) -> Router {
        routes::create_router(self.state.clone())
    }

    pub async fn company(&self, name: &str) -> Company {
        let company = Company::new(name, CompanyType::Host, CompanySettings::default());
        self.store
            .upsert_company(&company)
            .await
            .expect("Failed to create company");
        company
    }

    pub async fn super_user(&self, email: &str) -> User {
        self.state
            .user_service
            .ensure_super_user(email, PASSWORD, "Root")
            .await
            .expect("Failed to create super user")
    }

    pub async fn company_user(&self, email: &str, company_id: Uuid, role: RoleName) -> User {
        let (user, _) = self
            .state
            .user_service
            .create_company_user(
                company_id,
                CreateCompanyUserRequest {
                    email: email.to_string(),
                    display_name: "Test User".to_string(),
                    password: PASSWORD.to_string(),
                    role,
                },
            )
            .await
            .expect("Failed to create company user");
        user
    }

    /// 登录并返回 (access_token, refresh_token)
    pub async fn login(&self, email: &str) -> (String, String) {
        let (status, body) = self
            .send(json_request(
                "POST",
                "/api/v1/auth/login",
                None,
                serde_json::json!({ "email": email, "password": PASSWORD }),
            ))
            .await;
        assert_eq!(status, StatusCode::OK, "login failed: {}", body);

        (
            body["access_token"].as_str().unwrap_or_default().to_string(),
            body["refresh_token"].as_str().unwrap_or_default().to_string(),
        )
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, body)
    }
}

pub fn json_request(method: &str, uri: &str, bearer: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = bearer {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

pub fn get(uri: &str, bearer: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(token) = bearer {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    builder.body(Body::empty()).unwrap()
}

pub fn with_device_key(method: &str, uri: &str, key: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(DEVICE_KEY_HEADER, key)
        .body(Body::empty())
        .unwrap()
}
