//! The Dexcom glucose API.

mod client;
pub use client::DexcomClient;

mod types;
pub use types::{
    parse_system_time, DataRange, EgvRecord, EgvsResponse, QueryWindow, RangeMoment, Reading,
    TimeRange, QUERY_WINDOW,
};

use crate::{
    config::ConfigError,
    utils::from_env::{EnvItemInfo, FromEnv, FromEnvErr, FromEnvVar},
};
use reqwest::StatusCode;
use std::time::Duration;
use url::Url;

const SANDBOX: &str = "SANDBOX";
const DEXCOM_API_URL: &str = "DEXCOM_API_URL";
const HTTP_TIMEOUT: &str = "HTTP_TIMEOUT";

/// Production API host.
pub const PRODUCTION_URL: &str = "https://api.dexcom.com/";

/// Sandbox API host.
pub const SANDBOX_URL: &str = "https://sandbox-api.dexcom.com/";

/// Default timeout for outbound HTTP calls.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors fetching from the API.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// The API refused the access token (HTTP 401).
    #[error("access token rejected")]
    AuthorizationRejected,
    /// The request did not complete.
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    /// The API answered with an unexpected status.
    #[error("unexpected status {0}")]
    Status(StatusCode),
    /// The API answered, but not with what was expected.
    #[error("malformed response: {0}")]
    Malformed(String),
    /// A request URL could not be built.
    #[error("invalid request url: {0}")]
    Url(#[from] url::ParseError),
}

impl FetchError {
    /// Short label for metrics.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::AuthorizationRejected => "unauthorized",
            Self::Transport(_) => "transport",
            Self::Status(_) => "status",
            Self::Malformed(_) | Self::Url(_) => "malformed",
        }
    }
}

/// Which API host to talk to, and how.
#[derive(Debug, Clone)]
pub struct DexcomConfig {
    sandbox: bool,
    api_url: Option<Url>,
    http_timeout: Duration,
}

impl DexcomConfig {
    /// Create a config. `api_url` overrides the host `sandbox` selects.
    pub const fn new(sandbox: bool, api_url: Option<Url>, http_timeout: Duration) -> Self {
        Self {
            sandbox,
            api_url,
            http_timeout,
        }
    }

    /// True if the sandbox host is selected.
    pub const fn is_sandbox(&self) -> bool {
        self.sandbox
    }

    /// The API base URL, always ending in `/`.
    pub fn base_url(&self) -> Result<Url, url::ParseError> {
        match &self.api_url {
            Some(url) if url.path().ends_with('/') => Ok(url.clone()),
            Some(url) => {
                let mut url = url.clone();
                url.set_path(&format!("{}/", url.path()));
                Ok(url)
            }
            None if self.sandbox => Url::parse(SANDBOX_URL),
            None => Url::parse(PRODUCTION_URL),
        }
    }

    /// Build the HTTP client used for both the API and the token endpoint.
    ///
    /// Every request is bounded by the configured timeout, and redirects are
    /// not followed, as required by the oauth library.
    pub fn http_client(&self) -> reqwest::Result<reqwest::Client> {
        reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(self.http_timeout)
            .build()
    }
}

impl FromEnv for DexcomConfig {
    type Error = ConfigError;

    fn inventory() -> Vec<&'static EnvItemInfo> {
        vec![
            &EnvItemInfo {
                var: SANDBOX,
                description: "If true, use the Dexcom sandbox instead of production",
                optional: true,
            },
            &EnvItemInfo {
                var: DEXCOM_API_URL,
                description: "Overrides the Dexcom API host",
                optional: true,
            },
            &EnvItemInfo {
                var: HTTP_TIMEOUT,
                description: "Timeout for outbound HTTP calls in seconds. Defaults to 10",
                optional: true,
            },
        ]
    }

    fn from_env() -> Result<Self, FromEnvErr<Self::Error>> {
        let sandbox = Option::<bool>::from_env_var(SANDBOX)
            .map_err(FromEnvErr::infallible_into::<ConfigError>)?
            .unwrap_or_default();
        let api_url =
            Option::<Url>::from_env_var(DEXCOM_API_URL).map_err(|e| e.map(ConfigError::Url))?;
        let http_timeout = match Option::<u64>::from_env_var(HTTP_TIMEOUT)
            .map_err(|e| e.map(ConfigError::Int))?
        {
            Some(0) => return Err(FromEnvErr::ParseError(ConfigError::Zero(HTTP_TIMEOUT))),
            Some(secs) => Duration::from_secs(secs),
            None => DEFAULT_HTTP_TIMEOUT,
        };

        Ok(Self::new(sandbox, api_url, http_timeout))
    }
}
