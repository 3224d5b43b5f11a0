//! 令牌生命周期集成测试：单次使用的刷新令牌、角色撤销的生效窗口

use signage_auth::{
    auth::AuthError,
    error::AppError,
    models::{
        permission::{ActionKey, PageKey},
        role::RoleName,
    },
    repository::{RoleBindingFilter, UserStore},
    services::{authz, DenyReason, Decision},
};
use std::sync::Arc;

mod common;
use common::{create_test_config, TestApp};

#[tokio::test]
async fn test_refresh_is_single_use() {
    let app = TestApp::new();
    let acme = app.company("Acme").await;
    app.company_user("u@acme.com", acme.id, RoleName::Editor).await;
    let (_, original) = app.login("u@acme.com").await;

    let first = app.state.auth_service.refresh(&original).await.unwrap();
    assert_ne!(first.refresh_token, original);

    // 原令牌第二次使用失败
    assert!(matches!(
        app.state.auth_service.refresh(&original).await,
        Err(AppError::Unauthorized)
    ));
}

#[tokio::test]
async fn test_stale_replay_does_not_kill_successor() {
    let app = TestApp::new();
    let acme = app.company("Acme").await;
    app.company_user("u@acme.com", acme.id, RoleName::Editor).await;
    let (_, token1) = app.login("u@acme.com").await;

    let (pair2, _) = app.state.tokens.refresh(&token1).await.unwrap();
    assert!(matches!(
        app.state.tokens.refresh(&token1).await,
        Err(AuthError::InvalidToken)
    ));

    let (pair3, user) = app.state.tokens.refresh(&pair2.refresh_token).await.unwrap();
    assert_eq!(user.email, "u@acme.com");
    assert!(pair3.refresh_token.starts_with("srt_"));
}

#[tokio::test]
async fn test_replay_revokes_family_when_configured() {
    let mut config = create_test_config();
    config.security.revoke_family_on_reuse = true;
    let app = TestApp::with_config(config);
    let acme = app.company("Acme").await;
    app.company_user("u@acme.com", acme.id, RoleName::Editor).await;
    let (_, token1) = app.login("u@acme.com").await;

    let (pair2, _) = app.state.tokens.refresh(&token1).await.unwrap();
    assert!(app.state.tokens.refresh(&token1).await.is_err());
    assert!(app.state.tokens.refresh(&pair2.refresh_token).await.is_err());
}

#[tokio::test]
async fn test_concurrent_refresh_has_one_winner() {
    let app = TestApp::new();
    let acme = app.company("Acme").await;
    app.company_user("u@acme.com", acme.id, RoleName::Editor).await;
    let (_, token) = app.login("u@acme.com").await;

    let tokens = app.state.tokens.clone();
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let tokens = Arc::clone(&tokens);
            let token = token.clone();
            tokio::spawn(async move { tokens.refresh(&token).await.is_ok() })
        })
        .collect();

    let mut winners = 0;
    for handle in handles {
        if handle.await.unwrap() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
}

#[tokio::test]
async fn test_revoked_binding_self_heals_after_refresh() {
    let app = TestApp::new();
    let acme = app.company("Acme").await;
    let globex = app.company("Globex").await;
    let user = app.company_user("u@acme.com", acme.id, RoleName::Viewer).await;
    let binding = app
        .state
        .user_service
        .assign_role(
            user.id,
            signage_auth::models::role::AssignRoleRequest {
                company_id: Some(globex.id),
                role: RoleName::CompanyAdmin,
                is_primary: false,
                overrides: None,
            },
        )
        .await
        .unwrap();

    let (access, refresh) = app.login("u@acme.com").await;
    let stale = app.state.tokens.validate_access(&access).unwrap();
    assert!(authz::authorize(&stale, PageKey::Content, ActionKey::Approve, Some(globex.id))
        .is_allowed());

    app.state.user_service.revoke_role(binding.id).await.unwrap();

    // 访问令牌有效期内，旧快照仍然放行
    let still_stale = app.state.tokens.validate_access(&access).unwrap();
    assert!(
        authz::authorize(&still_stale, PageKey::Content, ActionKey::Approve, Some(globex.id))
            .is_allowed()
    );

    // 刷新后重新加载绑定，撤销生效
    let (pair, _) = app.state.tokens.refresh(&refresh).await.unwrap();
    let fresh = app.state.tokens.validate_access(&pair.access_token).unwrap();
    assert_eq!(
        authz::authorize(&fresh, PageKey::Content, ActionKey::Approve, Some(globex.id)),
        Decision::Deny(DenyReason::NoCompanyAccess)
    );

    // 撤销的绑定仍保留记录
    let all = app
        .store
        .find_role_bindings(&RoleBindingFilter {
            user_id: Some(user.id),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(all.len(), 2);
}

#[tokio::test]
async fn test_suspended_user_cannot_refresh() {
    let app = TestApp::new();
    let acme = app.company("Acme").await;
    let user = app.company_user("u@acme.com", acme.id, RoleName::Viewer).await;
    let (_, refresh) = app.login("u@acme.com").await;

    app.state
        .user_service
        .set_status(user.id, signage_auth::models::user::UserStatus::Suspended)
        .await
        .unwrap();

    assert!(matches!(
        app.state.auth_service.refresh(&refresh).await,
        Err(AppError::Unauthorized)
    ));
}
