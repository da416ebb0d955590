mod common;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use common::{state_of, Bridge, MockDexcom};
use dexcom_bridge::auth::{callback, AuthorizationStatus, CredentialPair};
use mockito::Matcher;
use serde_json::Value;
use tower::ServiceExt;

async fn get(app: Router, uri: &str) -> (StatusCode, String) {
    let response = app
        .oneshot(Request::get(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, String::from_utf8(body.to_vec()).unwrap())
}

fn app(bridge: &Bridge) -> Router {
    callback::router(bridge.flow.clone(), bridge.poller.subscribe())
}

#[tokio::test]
async fn missing_code_is_rejected_without_exchange() {
    let mut api = MockDexcom::new().await;
    let token = api
        .token("authorization_code", "a", "r")
        .expect(0)
        .create_async()
        .await;
    let bridge = Bridge::new(&api, CredentialPair::default());
    let url = bridge.flow.request_authorization().await;

    let (status, body) = get(app(&bridge), &format!("/dexcom?state={}", state_of(&url))).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, "Authorization code is required");
    token.assert_async().await;

    let (status, _) = get(app(&bridge), "/dexcom?code=").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn code_is_exchanged_and_stored() {
    let mut api = MockDexcom::new().await;
    let token = api
        .token("authorization_code", "access", "refresh")
        .match_body(Matcher::AllOf(vec![
            Matcher::UrlEncoded("grant_type".into(), "authorization_code".into()),
            Matcher::UrlEncoded("code".into(), "abc".into()),
            Matcher::UrlEncoded("redirect_uri".into(), "http://localhost:3000/dexcom".into()),
            Matcher::UrlEncoded("client_secret".into(), "secret".into()),
        ]))
        .create_async()
        .await;
    let bridge = Bridge::new(&api, CredentialPair::default());
    let url = bridge.flow.request_authorization().await;

    let uri = format!("/dexcom?code=abc&state={}", state_of(&url));
    let (status, body) = get(app(&bridge), &uri).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "Token received and stored");
    token.assert_async().await;

    let pair = CredentialPair::new("access", "refresh");
    assert_eq!(bridge.credentials.snapshot().await, pair);
    assert_eq!(bridge.store.load().unwrap(), pair);
    assert_eq!(bridge.flow.status().await, AuthorizationStatus::Authorized);

    // The state is single use.
    let (status, _) = get(app(&bridge), &uri).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn forged_state_is_rejected() {
    let mut api = MockDexcom::new().await;
    let token = api
        .token("authorization_code", "a", "r")
        .expect(0)
        .create_async()
        .await;
    let bridge = Bridge::new(&api, CredentialPair::default());

    // Nothing pending yet.
    let (status, _) = get(app(&bridge), "/dexcom?code=abc&state=guess").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    bridge.flow.request_authorization().await;
    let (status, _) = get(app(&bridge), "/dexcom?code=abc&state=guess").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = get(app(&bridge), "/dexcom?code=abc").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    token.assert_async().await;
    assert_eq!(bridge.flow.status().await, AuthorizationStatus::AwaitingCode);
}

#[tokio::test]
async fn failed_exchange_is_a_server_error() {
    let mut api = MockDexcom::new().await;
    api.token_rejected("authorization_code").create_async().await;
    let bridge = Bridge::new(&api, CredentialPair::default());
    let url = bridge.flow.request_authorization().await;

    let uri = format!("/dexcom?code=abc&state={}", state_of(&url));
    let (status, body) = get(app(&bridge), &uri).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, "Error fetching token");
    assert_eq!(bridge.store.load().unwrap(), CredentialPair::default());
    assert_eq!(bridge.flow.status().await, AuthorizationStatus::AwaitingCode);
}

#[tokio::test]
async fn provider_error_is_a_client_error() {
    let api = MockDexcom::new().await;
    let bridge = Bridge::new(&api, CredentialPair::default());
    bridge.flow.request_authorization().await;

    let (status, body) = get(app(&bridge), "/dexcom?error=access_denied").await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.contains("access_denied"));
}

#[tokio::test]
async fn status_reports_flow_and_latest_reading() {
    let mut api = MockDexcom::new().await;
    api.data_range("access", "2024-05-01T12:00:00")
        .create_async()
        .await;
    api.egvs(
        "2024-05-01T10:00:00",
        "2024-05-01T12:00:00",
        serde_json::json!([{ "value": 54, "systemTime": "2024-05-01T12:00:00" }]),
    )
    .create_async()
    .await;

    let mut bridge = Bridge::new(&api, CredentialPair::new("access", "refresh"));

    let (status, body) = get(app(&bridge), "/status").await;
    assert_eq!(status, StatusCode::OK);
    let body: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(body["authorization"], "authorized");
    assert!(body["latest"].is_null());

    bridge.poller.tick().await;

    let (_, body) = get(app(&bridge), "/status").await;
    let body: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(body["latest"]["value"], 54);
    assert_eq!(body["latest"]["band"], "critical_low");
}

#[tokio::test]
async fn concurrent_callbacks_exchange_once() {
    let mut api = MockDexcom::new().await;
    let token = api
        .token("authorization_code", "access", "refresh")
        .expect(1)
        .create_async()
        .await;
    let bridge = Bridge::new(&api, CredentialPair::default());
    let url = bridge.flow.request_authorization().await;

    let uri = format!("/dexcom?code=abc&state={}", state_of(&url));
    let ((first, _), (second, _)) = tokio::join!(get(app(&bridge), &uri), get(app(&bridge), &uri));

    let mut statuses = [first, second];
    statuses.sort();
    assert_eq!(statuses, [StatusCode::OK, StatusCode::BAD_REQUEST]);
    token.assert_async().await;
    assert_eq!(
        bridge.credentials.snapshot().await,
        CredentialPair::new("access", "refresh")
    );
}

#[tokio::test]
async fn status_without_credentials_is_unauthorized() {
    let api = MockDexcom::new().await;
    let bridge = Bridge::new(&api, CredentialPair::default());

    let (_, body) = get(app(&bridge), "/status").await;
    let body: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(body["authorization"], "unauthorized");

    bridge.flow.request_authorization().await;
    let (_, body) = get(app(&bridge), "/status").await;
    let body: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(body["authorization"], "awaiting_code");
}
