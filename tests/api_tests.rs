//! HTTP API 集成测试

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
};
use serde_json::json;
use signage_auth::{
    models::role::RoleName,
    repository::{CompanyStore, RoleBindingFilter, UserStore},
};
use uuid::Uuid;

mod common;
use common::{get, json_request, with_device_key, TestApp, DEVICE_KEY_HEADER};

#[tokio::test]
async fn test_health_and_readiness() {
    let app = TestApp::new();

    let (status, body) = app.send(get("/health", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert!(body["uptime_secs"].is_number());

    let (status, body) = app.send(get("/ready", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ready"], true);
}

#[tokio::test]
async fn test_missing_and_invalid_credentials_are_401() {
    let app = TestApp::new();

    let (status, body) = app.send(get("/api/v1/auth/me", None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], 401);

    let (status, invalid) = app.send(get("/api/v1/auth/me", Some("not.a.jwt"))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    // 不泄露失败原因
    assert_eq!(invalid["error"]["message"], body["error"]["message"]);

    let (status, _) = app
        .send(with_device_key("GET", "/api/v1/auth/me", "sdk_unknown"))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_both_credentials_are_rejected() {
    let app = TestApp::new();
    let acme = app.company("Acme").await;
    app.company_user("u@acme.com", acme.id, RoleName::Viewer).await;
    let (access, _) = app.login("u@acme.com").await;

    let request = Request::builder()
        .method("GET")
        .uri("/api/v1/auth/me")
        .header(header::AUTHORIZATION, format!("Bearer {}", access))
        .header(DEVICE_KEY_HEADER, "sdk_whatever")
        .body(Body::empty())
        .unwrap();

    let (status, _) = app.send(request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_login_and_me() {
    let app = TestApp::new();
    let acme = app.company("Acme").await;
    let user = app.company_user("u@acme.com", acme.id, RoleName::Editor).await;

    let (access, _) = app.login("U@Acme.com").await;
    let (status, body) = app.send(get("/api/v1/auth/me", Some(&access))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["kind"], "company_user");
    assert_eq!(body["user"]["id"], user.id.to_string());
    assert_eq!(body["home_company"], acme.id.to_string());
    assert_eq!(body["bindings"][0]["role"], "EDITOR");
    assert!(body["user"].get("password_hash").is_none());
}

#[tokio::test]
async fn test_wrong_password_is_401() {
    let app = TestApp::new();
    let acme = app.company("Acme").await;
    app.company_user("u@acme.com", acme.id, RoleName::Viewer).await;

    let (status, _) = app
        .send(json_request(
            "POST",
            "/api/v1/auth/login",
            None,
            json!({ "email": "u@acme.com", "password": "Wrong123" }),
        ))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_refresh_endpoint_rotates() {
    let app = TestApp::new();
    app.super_user("root@example.com").await;
    let (_, refresh) = app.login("root@example.com").await;

    let request = |token: &str| {
        json_request(
            "POST",
            "/api/v1/auth/refresh",
            None,
            json!({ "refresh_token": token }),
        )
    };

    let (status, body) = app.send(request(&refresh)).await;
    assert_eq!(status, StatusCode::OK);
    let next = body["refresh_token"].as_str().unwrap().to_string();

    let (status, _) = app.send(request(&refresh)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app.send(request(&next)).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_logout_ends_session() {
    let app = TestApp::new();
    app.super_user("root@example.com").await;
    let (access, refresh) = app.login("root@example.com").await;

    let (status, _) = app
        .send(json_request(
            "POST",
            "/api/v1/auth/logout",
            Some(&access),
            json!({ "refresh_token": refresh }),
        ))
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = app
        .send(json_request(
            "POST",
            "/api/v1/auth/refresh",
            None,
            json!({ "refresh_token": refresh }),
        ))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_company_admin_manages_own_company_only() {
    let app = TestApp::new();
    let acme = app.company("Acme").await;
    let globex = app.company("Globex").await;
    app.company_user("admin@acme.com", acme.id, RoleName::CompanyAdmin).await;
    app.company_user("someone@globex.com", globex.id, RoleName::Viewer).await;
    let (access, _) = app.login("admin@acme.com").await;

    let new_user = json!({
        "email": "new@acme.com",
        "display_name": "New",
        "password": "Password123",
        "role": "EDITOR",
    });

    let (status, body) = app
        .send(json_request(
            "POST",
            &format!("/api/v1/companies/{}/users", acme.id),
            Some(&access),
            new_user.clone(),
        ))
        .await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);
    assert_eq!(body["binding"]["is_primary"], true);

    let (status, body) = app
        .send(json_request(
            "POST",
            &format!("/api/v1/companies/{}/users", globex.id),
            Some(&access),
            new_user,
        ))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    // 拒绝原因不返回给调用方
    assert_eq!(body["error"]["message"], "Access denied");

    let (status, body) = app
        .send(get(&format!("/api/v1/companies/{}/users", acme.id), Some(&access)))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 2);

    let (status, _) = app
        .send(get(&format!("/api/v1/companies/{}/users", globex.id), Some(&access)))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_company_list_is_scoped() {
    let app = TestApp::new();
    let acme = app.company("Acme").await;
    app.company("Globex").await;
    app.company_user("admin@acme.com", acme.id, RoleName::CompanyAdmin).await;
    app.super_user("root@example.com").await;

    let (admin, _) = app.login("admin@acme.com").await;
    let (status, body) = app.send(get("/api/v1/companies", Some(&admin))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 1);
    assert_eq!(body["companies"][0]["id"], acme.id.to_string());

    let (root, _) = app.login("root@example.com").await;
    let (status, body) = app.send(get("/api/v1/companies", Some(&root))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 2);

    // 只有平台管理员可以创建公司
    let create = json!({ "name": "Initech", "company_type": "ADVERTISER" });
    let (status, _) = app
        .send(json_request("POST", "/api/v1/companies", Some(&admin), create.clone()))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, body) = app
        .send(json_request("POST", "/api/v1/companies", Some(&root), create))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["status"], "active");
}

#[tokio::test]
async fn test_permissions_and_check_endpoints() {
    let app = TestApp::new();
    let acme = app.company("Acme").await;
    let globex = app.company("Globex").await;
    app.company_user("reviewer@acme.com", acme.id, RoleName::Reviewer).await;
    let (access, _) = app.login("reviewer@acme.com").await;

    let (status, body) = app.send(get("/api/v1/auth/permissions", Some(&access))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["company_id"], acme.id.to_string());
    let grants = body["grants"].as_array().unwrap();
    assert!(grants.contains(&json!({ "page": "content_approval", "action": "approve" })));
    assert!(!grants.contains(&json!({ "page": "content", "action": "delete" })));

    let (_, body) = app
        .send(get(&format!("/api/v1/auth/permissions?company_id={}", globex.id), Some(&access)))
        .await;
    assert!(body["grants"].as_array().unwrap().is_empty());

    let check = |page: &str, action: &str| {
        json_request(
            "POST",
            "/api/v1/authz/check",
            Some(&access),
            json!({ "page": page, "action": action, "company_id": acme.id }),
        )
    };
    let (_, body) = app.send(check("content_approval", "approve")).await;
    assert_eq!(body["allowed"], true);
    let (_, body) = app.send(check("content", "delete")).await;
    assert_eq!(body["allowed"], false);
    assert!(body.get("reason").is_none());

    // 未知页面在边界处被拒绝，而不是静默拒绝授权
    let (status, _) = app.send(check("contnet", "view")).await;
    assert!(status.is_client_error());
    assert_ne!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_device_key_lifecycle_and_heartbeat() {
    let app = TestApp::new();
    let acme = app.company("Acme").await;
    let globex = app.company("Globex").await;
    app.company_user("admin@acme.com", acme.id, RoleName::CompanyAdmin).await;
    let (admin, _) = app.login("admin@acme.com").await;
    let device_id = Uuid::new_v4();

    let key_uri = format!("/api/v1/companies/{}/devices/{}/key", acme.id, device_id);
    let (status, issued) = app
        .send(json_request("POST", &key_uri, Some(&admin), json!({})))
        .await;
    assert_eq!(status, StatusCode::CREATED, "{}", issued);
    let api_key = issued["api_key"].as_str().unwrap().to_string();
    assert!(api_key.starts_with("sdk_"));

    // 设备心跳
    let (status, beat) = app
        .send(with_device_key("POST", "/api/v1/device/heartbeat", &api_key))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(beat["device_id"], device_id.to_string());
    assert_eq!(beat["company_id"], acme.id.to_string());

    // 设备不能访问管理接口
    let (status, _) = app
        .send(with_device_key("GET", &format!("/api/v1/companies/{}/users", acme.id), &api_key))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // 列表不包含密钥明文，last_seen_at 已更新
    let (status, body) = app.send(get("/api/v1/devices", Some(&admin))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 1);
    assert!(body["devices"][0].get("api_key").is_none());
    assert!(body["devices"][0]["last_seen_at"].is_string());

    // 其他公司的管理员无权签发
    let (status, _) = app
        .send(json_request(
            "POST",
            &format!("/api/v1/companies/{}/devices/{}/key", globex.id, Uuid::new_v4()),
            Some(&admin),
            json!({}),
        ))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let revoke = Request::builder()
        .method("DELETE")
        .uri(&key_uri)
        .header(header::AUTHORIZATION, format!("Bearer {}", admin))
        .body(Body::empty())
        .unwrap();
    let (status, _) = app.send(revoke).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = app
        .send(with_device_key("POST", "/api/v1/device/heartbeat", &api_key))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_suspending_user_requires_edit_in_their_companies() {
    let app = TestApp::new();
    let acme = app.company("Acme").await;
    let globex = app.company("Globex").await;
    app.company_user("admin@acme.com", acme.id, RoleName::CompanyAdmin).await;
    let local = app.company_user("local@acme.com", acme.id, RoleName::Viewer).await;
    let foreign = app.company_user("far@globex.com", globex.id, RoleName::Viewer).await;
    let (admin, _) = app.login("admin@acme.com").await;

    let suspend = |id: Uuid| {
        json_request(
            "PUT",
            &format!("/api/v1/users/{}/status", id),
            Some(&admin),
            json!({ "status": "suspended" }),
        )
    };

    let (status, body) = app.send(suspend(local.id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "suspended");

    let (status, _) = app.send(suspend(foreign.id)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_role_overrides_cannot_widen_grants() {
    let app = TestApp::new();
    let acme = app.company("Acme").await;
    let admin = app.company_user("admin@acme.com", acme.id, RoleName::CompanyAdmin).await;
    app.super_user("root@example.com").await;
    let (access, refresh) = app.login("admin@acme.com").await;
    let (root, _) = app.login("root@example.com").await;

    let escalation = json!({
        "company_id": acme.id,
        "role": "VIEWER",
        "overrides": [
            { "page": "companies", "action": "delete" },
            { "page": "system_settings", "action": "manage" },
        ],
    });
    let uri = format!("/api/v1/users/{}/roles", admin.id);

    // 调用者自己没有这些权限
    let (status, _) = app
        .send(json_request("POST", &uri, Some(&access), escalation.clone()))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // 平台管理员也不能让覆盖超出角色模板
    let (status, body) = app
        .send(json_request("POST", &uri, Some(&root), escalation))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{}", body);

    // 收窄模板是允许的
    let (status, body) = app
        .send(json_request(
            "POST",
            &uri,
            Some(&access),
            json!({
                "company_id": acme.id,
                "role": "VIEWER",
                "overrides": [{ "page": "dashboard", "action": "view" }],
            }),
        ))
        .await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);

    let (status, body) = app
        .send(json_request(
            "POST",
            "/api/v1/auth/refresh",
            None,
            json!({ "refresh_token": refresh }),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    let fresh = body["access_token"].as_str().unwrap_or_default().to_string();

    let (status, _) = app
        .send(json_request(
            "DELETE",
            &format!("/api/v1/companies/{}", acme.id),
            Some(&fresh),
            json!({}),
        ))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let company = app.store.get_company(acme.id).await.unwrap().unwrap();
    assert!(company.is_active());
}

#[tokio::test]
async fn test_assigning_roles_requires_authority_over_the_user() {
    let app = TestApp::new();
    let acme = app.company("Acme").await;
    let globex = app.company("Globex").await;
    app.company_user("admin@acme.com", acme.id, RoleName::CompanyAdmin).await;
    let local = app.company_user("local@acme.com", acme.id, RoleName::Viewer).await;
    let foreign = app.company_user("far@globex.com", globex.id, RoleName::Viewer).await;
    let (admin, _) = app.login("admin@acme.com").await;

    let assign = |id: Uuid| {
        json_request(
            "POST",
            &format!("/api/v1/users/{}/roles", id),
            Some(&admin),
            json!({ "company_id": acme.id, "role": "EDITOR", "is_primary": true }),
        )
    };

    let (status, _) = app.send(assign(foreign.id)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // globex 用户的绑定保持原样，主公司不变
    let bindings = app
        .store
        .find_role_bindings(&RoleBindingFilter {
            user_id: Some(foreign.id),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(bindings.len(), 1);
    assert!(bindings[0].is_primary);
    assert_eq!(bindings[0].company_id, Some(globex.id));

    let (status, body) = app.send(assign(local.id)).await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);
    assert_eq!(body["is_primary"], true);
}
