//! OAuth2 client for the Dexcom authorization server.
//!
//! Builds authorization URLs and performs the two token exchanges the bridge
//! needs: authorization code for an initial pair, and refresh token for a
//! rotated pair. Client credentials travel in the form body.
use crate::{
    auth::{CredentialPair, UrlDelivery},
    config::ConfigError,
    dexcom::DexcomConfig,
    utils::from_env::{EnvItemInfo, FromEnv, FromEnvErr, FromEnvVar},
};
use core::error::Error;
use oauth2::{
    basic::{BasicClient, BasicErrorResponseType, BasicTokenResponse},
    AuthType, AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken, EndpointNotSet,
    EndpointSet, HttpClientError, RedirectUrl, RefreshToken, RequestTokenError, Scope,
    StandardErrorResponse, TokenResponse, TokenUrl,
};
use tracing::{debug, instrument};
use url::Url;

const CLIENT_ID: &str = "CLIENT_ID";
const CLIENT_SECRET: &str = "CLIENT_SECRET";
const CALLBACK_URL: &str = "CALLBACK_URL";
const DISPLAY_QR_CODE: &str = "DISPLAY_QR_CODE";

const LOGIN_PATH: &str = "v2/oauth2/login";
const TOKEN_PATH: &str = "v2/oauth2/token";

/// Scope that makes the provider issue a refresh token.
pub const OFFLINE_ACCESS: &str = "offline_access";

/// Error returned by the token endpoint exchanges.
pub type TokenRequestError = RequestTokenError<
    HttpClientError<reqwest::Error>,
    StandardErrorResponse<BasicErrorResponseType>,
>;

type OAuthClient =
    BasicClient<EndpointSet, EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointSet>;

/// OAuth client registration.
#[derive(Debug, Clone)]
pub struct OAuthConfig {
    /// OAuth client ID.
    pub client_id: String,
    /// OAuth client secret.
    pub client_secret: String,
    /// Redirect URI registered with the provider. The callback server must
    /// be reachable here.
    pub callback_url: Url,
    /// How authorization URLs are shown to the user.
    pub delivery: UrlDelivery,
}

impl FromEnv for OAuthConfig {
    type Error = ConfigError;

    fn inventory() -> Vec<&'static EnvItemInfo> {
        vec![
            &EnvItemInfo {
                var: CLIENT_ID,
                description: "OAuth client ID of the Dexcom application",
                optional: false,
            },
            &EnvItemInfo {
                var: CLIENT_SECRET,
                description: "OAuth client secret of the Dexcom application",
                optional: false,
            },
            &EnvItemInfo {
                var: CALLBACK_URL,
                description: "Redirect URI registered with Dexcom, served by the callback server",
                optional: false,
            },
            &EnvItemInfo {
                var: DISPLAY_QR_CODE,
                description: "If true, print the authorization URL as a terminal QR code instead of opening a browser",
                optional: true,
            },
        ]
    }

    fn from_env() -> Result<Self, FromEnvErr<Self::Error>> {
        let client_id = String::from_env_var(CLIENT_ID)
            .map_err(FromEnvErr::infallible_into::<ConfigError>)?;
        let client_secret = String::from_env_var(CLIENT_SECRET)
            .map_err(FromEnvErr::infallible_into::<ConfigError>)?;
        let callback_url = Url::from_env_var(CALLBACK_URL).map_err(|e| e.map(ConfigError::Url))?;
        let qr = Option::<bool>::from_env_var(DISPLAY_QR_CODE)
            .map_err(FromEnvErr::infallible_into::<ConfigError>)?
            .unwrap_or_default();

        Ok(Self {
            client_id,
            client_secret,
            callback_url,
            delivery: if qr {
                UrlDelivery::QrCode
            } else {
                UrlDelivery::Browser
            },
        })
    }
}

/// Errors from the token endpoint exchanges.
#[derive(Debug, thiserror::Error)]
pub enum OAuthError {
    /// A refresh was requested but there is no refresh token. No request was
    /// made.
    #[error("no refresh token available")]
    NoRefreshToken,
    /// The token request failed, either in transport or at the provider.
    #[error("token request failed: {0}")]
    Request(#[from] TokenRequestError),
    /// The provider answered without a refresh token.
    #[error("token response did not include a refresh token")]
    MissingRefreshToken,
}

impl OAuthError {
    /// True if the provider answered and refused the grant, as opposed to the
    /// request never completing. Only rejections count toward giving up on a
    /// refresh token.
    pub const fn is_rejection(&self) -> bool {
        matches!(self, Self::Request(RequestTokenError::ServerResponse(_)))
    }

    /// Short label for metrics.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::NoRefreshToken => "no_refresh_token",
            Self::Request(RequestTokenError::ServerResponse(_)) => "rejected",
            Self::Request(RequestTokenError::Request(_)) => "transport",
            Self::Request(_) | Self::MissingRefreshToken => "malformed",
        }
    }
}

/// Render an error and everything in its `source` chain on one line. The
/// oauth library nests errors deeply and the top-level message alone rarely
/// says what went wrong.
pub fn source_chain(err: &dyn Error) -> String {
    let mut chain = vec![err.to_string()];
    let mut current = err;
    while let Some(source) = current.source() {
        chain.push(source.to_string());
        current = source;
    }
    chain.join(": caused by: ")
}

/// OAuth client for the Dexcom token endpoints.
#[derive(Debug, Clone)]
pub struct DexcomOAuth {
    client: OAuthClient,
    http: reqwest::Client,
}

impl DexcomOAuth {
    /// Create a client against the host selected by `dexcom`.
    ///
    /// `http` must not follow redirects, see [`DexcomConfig::http_client`].
    pub fn new(
        config: &OAuthConfig,
        dexcom: &DexcomConfig,
        http: reqwest::Client,
    ) -> Result<Self, url::ParseError> {
        let base = dexcom.base_url()?;
        let client = BasicClient::new(ClientId::new(config.client_id.clone()))
            .set_client_secret(ClientSecret::new(config.client_secret.clone()))
            .set_auth_uri(AuthUrl::from_url(base.join(LOGIN_PATH)?))
            .set_token_uri(TokenUrl::from_url(base.join(TOKEN_PATH)?))
            .set_redirect_uri(RedirectUrl::from_url(config.callback_url.clone()))
            .set_auth_type(AuthType::RequestBody);

        Ok(Self { client, http })
    }

    /// Build a fresh authorization URL, returning it with the anti-forgery
    /// state it embeds.
    pub fn authorize_url(&self) -> (Url, CsrfToken) {
        self.client
            .authorize_url(CsrfToken::new_random)
            .add_scope(Scope::new(OFFLINE_ACCESS.to_owned()))
            .url()
    }

    /// Exchange an authorization code for an initial pair.
    #[instrument(skip_all)]
    pub async fn exchange_code(&self, code: &str) -> Result<CredentialPair, OAuthError> {
        debug!("exchanging authorization code");
        let token = self
            .client
            .exchange_code(AuthorizationCode::new(code.to_owned()))
            .request_async(&self.http)
            .await?;
        pair_from_token(&token)
    }

    /// Exchange the refresh token of `pair` for a new pair.
    ///
    /// The returned pair replaces `pair` entirely, the provider may rotate
    /// the refresh token on every use.
    #[instrument(skip_all)]
    pub async fn refresh(&self, pair: &CredentialPair) -> Result<CredentialPair, OAuthError> {
        if !pair.has_refresh_token() {
            return Err(OAuthError::NoRefreshToken);
        }

        debug!("refreshing access token");
        let refresh_token = RefreshToken::new(pair.refresh_token.clone());
        let token = self
            .client
            .exchange_refresh_token(&refresh_token)
            .request_async(&self.http)
            .await?;
        pair_from_token(&token)
    }
}

fn pair_from_token(token: &BasicTokenResponse) -> Result<CredentialPair, OAuthError> {
    let refresh_token = token
        .refresh_token()
        .ok_or(OAuthError::MissingRefreshToken)?;
    Ok(CredentialPair::new(
        token.access_token().secret().as_str(),
        refresh_token.secret().as_str(),
    ))
}
