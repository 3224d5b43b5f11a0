//! 授权引擎集成测试：从签发的令牌解析主体，再做授权判定

use signage_auth::{
    auth::Principal,
    models::{
        permission::{ActionKey, Grant, PageKey},
        role::{AssignRoleRequest, RoleName},
    },
    services::{authz, Decision, DenyReason},
};

mod common;
use common::TestApp;

async fn principal_for(app: &TestApp, email: &str) -> Principal {
    let (access, _) = app.login(email).await;
    app.state.tokens.validate_access(&access).unwrap()
}

#[tokio::test]
async fn test_viewer_is_denied_by_default() {
    let app = TestApp::new();
    let acme = app.company("Acme").await;
    app.company_user("viewer@acme.com", acme.id, RoleName::Viewer).await;
    let viewer = principal_for(&app, "viewer@acme.com").await;

    assert_eq!(
        app.state
            .authz
            .authorize(&viewer, PageKey::Content, ActionKey::Delete, Some(acme.id)),
        Decision::Deny(DenyReason::InsufficientPermission)
    );
    assert!(app
        .state
        .authz
        .authorize(&viewer, PageKey::Content, ActionKey::View, Some(acme.id))
        .is_allowed());
}

#[tokio::test]
async fn test_super_user_bypass() {
    let app = TestApp::new();
    let acme = app.company("Acme").await;
    app.super_user("root@example.com").await;
    let root = principal_for(&app, "root@example.com").await;

    for page in PageKey::ALL {
        for action in ActionKey::ALL {
            assert!(authz::authorize(&root, page, action, Some(acme.id)).is_allowed());
            assert!(authz::authorize(&root, page, action, None).is_allowed());
        }
    }
}

#[tokio::test]
async fn test_company_admin_scenario() {
    let app = TestApp::new();
    let acme = app.company("Acme").await;
    let globex = app.company("Globex").await;
    app.company_user("admin@acme.com", acme.id, RoleName::CompanyAdmin).await;
    let admin = principal_for(&app, "admin@acme.com").await;

    let engine = &app.state.authz;
    assert_eq!(
        engine.authorize(&admin, PageKey::Users, ActionKey::Create, Some(acme.id)),
        Decision::Allow
    );
    assert_eq!(
        engine.authorize(&admin, PageKey::Users, ActionKey::Create, Some(globex.id)),
        Decision::Deny(DenyReason::NoCompanyAccess)
    );

    // 每次判定都产生一条审计事件
    let events = app.audit.events();
    assert_eq!(events.len(), 2);
    assert!(events[0].allowed);
    assert_eq!(events[1].reason.as_deref(), Some("no_company_access"));
    assert_eq!(events[1].target_company, Some(globex.id));
}

#[tokio::test]
async fn test_reviewer_scenario() {
    let app = TestApp::new();
    let acme = app.company("Acme").await;
    app.company_user("reviewer@acme.com", acme.id, RoleName::Reviewer).await;
    let reviewer = principal_for(&app, "reviewer@acme.com").await;

    assert_eq!(
        authz::authorize(&reviewer, PageKey::ContentApproval, ActionKey::Approve, Some(acme.id)),
        Decision::Allow
    );
    assert_eq!(
        authz::authorize(&reviewer, PageKey::Content, ActionKey::Delete, Some(acme.id)),
        Decision::Deny(DenyReason::InsufficientPermission)
    );
}

#[tokio::test]
async fn test_isolation_holds_for_every_grant() {
    let app = TestApp::new();
    let acme = app.company("Acme").await;
    let globex = app.company("Globex").await;
    app.company_user("admin@acme.com", acme.id, RoleName::CompanyAdmin).await;
    let admin = principal_for(&app, "admin@acme.com").await;

    for page in PageKey::ALL.into_iter().filter(|p| !p.is_system_level()) {
        for action in ActionKey::ALL {
            assert_eq!(
                authz::authorize(&admin, page, action, Some(globex.id)),
                Decision::Deny(DenyReason::NoCompanyAccess),
                "{}:{} leaked into another company",
                page,
                action
            );
        }
    }
}

#[tokio::test]
async fn test_overrides_replace_template() {
    let app = TestApp::new();
    let acme = app.company("Acme").await;
    let globex = app.company("Globex").await;
    let user = app.company_user("cm@acme.com", acme.id, RoleName::Viewer).await;

    app.state
        .user_service
        .assign_role(
            user.id,
            AssignRoleRequest {
                company_id: Some(globex.id),
                role: RoleName::ContentManager,
                is_primary: false,
                overrides: Some(vec![Grant::new(PageKey::Dashboard, ActionKey::View)]),
            },
        )
        .await
        .unwrap();

    let principal = principal_for(&app, "cm@acme.com").await;
    assert!(authz::authorize(&principal, PageKey::Dashboard, ActionKey::View, Some(globex.id))
        .is_allowed());
    assert_eq!(
        authz::authorize(&principal, PageKey::Content, ActionKey::View, Some(globex.id)),
        Decision::Deny(DenyReason::InsufficientPermission)
    );
    // acme 的模板权限不受影响
    assert!(authz::authorize(&principal, PageKey::Content, ActionKey::View, Some(acme.id))
        .is_allowed());
}

#[tokio::test]
async fn test_device_scoping() {
    let app = TestApp::new();
    let acme = app.company("Acme").await;
    let globex = app.company("Globex").await;
    let issued = app
        .state
        .device_service
        .issue_key(acme.id, uuid::Uuid::new_v4())
        .await
        .unwrap();
    let device = app.state.tokens.validate_device_key(&issued.api_key).await.unwrap();

    assert!(authz::authorize(&device, PageKey::Content, ActionKey::View, Some(acme.id)).is_allowed());
    assert_eq!(
        authz::authorize(&device, PageKey::Content, ActionKey::View, Some(globex.id)),
        Decision::Deny(DenyReason::NotApplicable)
    );
    assert_eq!(
        authz::authorize(&device, PageKey::Users, ActionKey::View, Some(acme.id)),
        Decision::Deny(DenyReason::NotApplicable)
    );
}
