//! Login, offline credentials and session invalidation

use serde_json::json;
use std::sync::Arc;
use wiremock::matchers::{basic_auth, method, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

use qms_sync::client::session::SessionMode;
use qms_sync::client::{FallbackProvider, ODataClient, SessionManager, SyncFacade, ViewStore};
use qms_sync::shared::{CollectionName, SyncError};

use crate::common::*;

const LOGIN_PATH: &str = r"^/ZQM_LOG_PR_CDS/ZQM_LOG_PR\(.*\)$";

fn manager(server: &MockServer) -> SessionManager {
    let config = odata_config(server);
    let client = Arc::new(ODataClient::new(config.base_url.clone()));
    SessionManager::new(config, client)
}

#[tokio::test]
async fn test_login_against_service() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path_regex(LOGIN_PATH))
        .and(basic_auth("K901900", "secret"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "d": { "bname": "K901900" } })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let sessions = manager(&server);
    let session = assert_ok!(sessions.login("K901900", "secret", DEADLINE).await);

    assert_eq!(session.username(), "K901900");
    assert_eq!(session.mode(), SessionMode::Remote);
    assert!(session.is_active());
    assert_eq!(
        sessions.current().await.map(|s| s.id()),
        Some(session.id())
    );
}

#[tokio::test]
async fn test_unknown_user_is_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path_regex(LOGIN_PATH))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let sessions = manager(&server);
    let result = sessions.login("nobody", "wrong", DEADLINE).await;

    assert_err!(result, SyncError::Validation { .. });
    assert!(sessions.current().await.is_none());
}

#[tokio::test]
async fn test_missing_login_entity_accepts_offline_credentials() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path_regex(LOGIN_PATH))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let sessions = manager(&server);
    let session = assert_ok!(sessions.login("demo", "demo", DEADLINE).await);

    assert_eq!(session.mode(), SessionMode::Offline);
    assert_eq!(session.username(), "demo");
}

#[tokio::test]
async fn test_offline_credentials_when_service_is_down() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path_regex(LOGIN_PATH))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let sessions = manager(&server);
    let session = assert_ok!(sessions.login("demo", "demo", DEADLINE).await);
    assert_eq!(session.mode(), SessionMode::Offline);

    let rejected = sessions.login("demo", "not-demo", DEADLINE).await;
    assert_err!(rejected, SyncError::Validation { .. });
}

#[tokio::test]
async fn test_blank_credentials_never_reach_the_service() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path_regex(LOGIN_PATH))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let sessions = manager(&server);
    assert_err!(sessions.login("  ", "x", DEADLINE).await, SyncError::Validation { .. });
}

#[tokio::test]
async fn test_logout_stops_facade_and_coordinator() {
    let server = MockServer::start().await;
    let sessions = manager(&server);
    let session = sessions.demo_login().await;

    let config = odata_config(&server);
    let client = Arc::new(ODataClient::new(config.base_url.clone()));
    let facade = SyncFacade::new(
        config,
        session,
        client,
        FallbackProvider::builtin(),
        ViewStore::new(),
    );
    let coordinator = qms_sync::client::MutationCoordinator::new(&facade);

    sessions.logout().await;

    assert_err!(
        facade.load(&CollectionName::lots(), DEADLINE).await,
        SyncError::NotAuthenticated
    );
    assert_err!(
        coordinator
            .submit(
                &CollectionName::lots(),
                qms_sync::shared::RecordDelta::update("50000000032").with("SampleQuantity", 0.1),
            )
            .await,
        SyncError::NotAuthenticated
    );
}
