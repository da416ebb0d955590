// Shared fixtures for the integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use dexcom_bridge::{
    auth::{
        AuthorizationFlow, CredentialPair, CredentialStore, DexcomOAuth, OAuthConfig,
        SharedCredentials, UrlDelivery,
    },
    dexcom::{DexcomClient, DexcomConfig, DEFAULT_HTTP_TIMEOUT},
    poll::{PollConfig, Poller},
    publish::{PublishError, Publisher},
};
use mockito::{Matcher, Mock, Server, ServerGuard};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

pub const TOPICS: &[&str] = &["awtrix_1/custom/glucose", "awtrix_2/custom/glucose"];

/// Records every publish instead of sending it anywhere.
#[derive(Debug, Clone, Default)]
pub struct RecordingPublisher {
    sent: Arc<Mutex<Vec<(String, String)>>>,
}

impl RecordingPublisher {
    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Publisher for RecordingPublisher {
    async fn publish(&self, topic: &str, payload: String) -> Result<(), PublishError> {
        self.sent.lock().unwrap().push((topic.to_owned(), payload));
        Ok(())
    }
}

/// Stand-in for both the glucose API and the token endpoint. The mock
/// builders return mocks that still have to be created.
pub struct MockDexcom {
    pub server: ServerGuard,
}

impl MockDexcom {
    pub async fn new() -> Self {
        Self {
            server: Server::new_async().await,
        }
    }

    pub fn config(&self) -> DexcomConfig {
        DexcomConfig::new(false, Some(self.server.url().parse().unwrap()), DEFAULT_HTTP_TIMEOUT)
    }

    /// Data range whose last reading is at `end`.
    pub fn data_range(&mut self, access_token: &str, end: &str) -> Mock {
        let body = json!({
            "recordType": "dataRange",
            "egvs": {
                "start": { "systemTime": "2024-04-01T00:00:00", "displayTime": "2024-04-01T02:00:00" },
                "end": { "systemTime": end, "displayTime": end }
            }
        });
        self.server
            .mock("GET", "/v2/users/self/dataRange")
            .match_header("authorization", format!("Bearer {access_token}").as_str())
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(body.to_string())
    }

    /// Readings for the window `[start, end]`.
    pub fn egvs(&mut self, start: &str, end: &str, records: Value) -> Mock {
        self.server
            .mock("GET", "/v3/users/self/egvs")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("startDate".into(), start.into()),
                Matcher::UrlEncoded("endDate".into(), end.into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!({ "recordType": "egv", "records": records }).to_string())
    }

    /// Any request to `path` is answered with 401.
    pub fn unauthorized(&mut self, path: &str) -> Mock {
        self.server
            .mock("GET", path)
            .with_status(401)
            .with_header("content-type", "application/json")
            .with_body(json!({ "fault": { "faultstring": "Invalid access token" } }).to_string())
    }

    /// Token endpoint answering requests with `grant_type` with a new pair.
    pub fn token(&mut self, grant_type: &str, access: &str, refresh: &str) -> Mock {
        let body = json!({
            "access_token": access,
            "refresh_token": refresh,
            "token_type": "Bearer",
            "expires_in": 7200
        });
        self.server
            .mock("POST", "/v2/oauth2/token")
            .match_body(Matcher::UrlEncoded("grant_type".into(), grant_type.into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(body.to_string())
    }

    /// Token endpoint rejecting requests with `grant_type`.
    pub fn token_rejected(&mut self, grant_type: &str) -> Mock {
        self.server
            .mock("POST", "/v2/oauth2/token")
            .match_body(Matcher::UrlEncoded("grant_type".into(), grant_type.into()))
            .with_status(400)
            .with_header("content-type", "application/json")
            .with_body(json!({ "error": "invalid_grant" }).to_string())
    }
}

/// A poller wired to a [`MockDexcom`] and a temp credential file.
pub struct Bridge {
    pub poller: Poller<RecordingPublisher>,
    pub credentials: SharedCredentials,
    pub flow: Arc<AuthorizationFlow>,
    pub store: CredentialStore,
    _dir: TempDir,
}

impl Bridge {
    pub fn new(api: &MockDexcom, pair: CredentialPair) -> Self {
        let mut config = PollConfig::new(TOPICS.iter().map(|t| t.to_string()).collect());
        config.icon = Some("glucose".into());
        Self::with_config(api, pair, config)
    }

    pub fn with_config(api: &MockDexcom, pair: CredentialPair, config: PollConfig) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::new(dir.path().join("tokens.json"));
        store.save(&pair).unwrap();
        let credentials = SharedCredentials::load(store.clone());

        let dexcom = api.config();
        let http = dexcom.http_client().unwrap();
        let oauth = Arc::new(DexcomOAuth::new(&oauth_config(), &dexcom, http.clone()).unwrap());
        let flow = Arc::new(AuthorizationFlow::new(
            oauth.clone(),
            credentials.clone(),
            UrlDelivery::QrCode,
        ));
        let client = DexcomClient::new(dexcom.base_url().unwrap(), http);

        let poller = Poller::new(
            config,
            client,
            oauth,
            credentials.clone(),
            flow.clone(),
            RecordingPublisher::default(),
        );

        Self {
            poller,
            credentials,
            flow,
            store,
            _dir: dir,
        }
    }

    pub fn sent(&self) -> Vec<(String, String)> {
        self.poller.publisher().sent()
    }
}

pub fn oauth_config() -> OAuthConfig {
    OAuthConfig {
        client_id: "client".into(),
        client_secret: "secret".into(),
        callback_url: "http://localhost:3000/dexcom".parse().unwrap(),
        delivery: UrlDelivery::QrCode,
    }
}

/// The `state` parameter of an authorization URL.
pub fn state_of(url: &url::Url) -> String {
    url.query_pairs()
        .find(|(key, _)| key == "state")
        .map(|(_, value)| value.into_owned())
        .unwrap()
}
