//! Integration tests for the refresh-token grant

use chrono::{Duration, Utc};
use docwatch_core::ports::{Credential, ICredentialProvider};
use docwatch_drive::auth::{KeyringCredentialProvider, RefreshFlow};
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn mount_token_endpoint(server: &MockServer, body: serde_json::Value) {
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .and(body_string_contains("refresh_token=stored-refresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .expect(1)
        .mount(server)
        .await;
}

fn expiring_credential() -> Credential {
    Credential {
        access_token: "old-access".to_string(),
        refresh_token: Some("stored-refresh".to_string()),
        expires_at: Utc::now() + Duration::seconds(30),
    }
}

#[tokio::test]
async fn test_refresh_flow_keeps_refresh_token_when_omitted() {
    let server = MockServer::start().await;
    mount_token_endpoint(
        &server,
        serde_json::json!({
            "access_token": "new-access",
            "token_type": "Bearer",
            "expires_in": 3599
        }),
    )
    .await;

    let flow =
        RefreshFlow::with_token_url("client", "secret", format!("{}/token", server.uri())).unwrap();
    let credential = flow.refresh("stored-refresh").await.unwrap();

    assert_eq!(credential.access_token, "new-access");
    assert_eq!(credential.refresh_token.as_deref(), Some("stored-refresh"));
    assert!(!credential.expires_within(Duration::minutes(30)));
}

#[tokio::test]
async fn test_provider_refreshes_expiring_credential() {
    let server = MockServer::start().await;
    mount_token_endpoint(
        &server,
        serde_json::json!({
            "access_token": "new-access",
            "token_type": "Bearer",
            "expires_in": 3600,
            "refresh_token": "rotated-refresh"
        }),
    )
    .await;

    let flow =
        RefreshFlow::with_token_url("client", "secret", format!("{}/token", server.uri())).unwrap();
    let provider = KeyringCredentialProvider::new("test-account", Some(flow));

    let refreshed = provider
        .refresh_if_needed(&expiring_credential())
        .await
        .unwrap();
    assert_eq!(refreshed.access_token, "new-access");
    assert_eq!(refreshed.refresh_token.as_deref(), Some("rotated-refresh"));
}

#[tokio::test]
async fn test_refresh_rejected_by_token_endpoint() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
            "error": "invalid_grant"
        })))
        .mount(&server)
        .await;

    let flow =
        RefreshFlow::with_token_url("client", "secret", format!("{}/token", server.uri())).unwrap();
    assert!(flow.refresh("stored-refresh").await.is_err());
}
