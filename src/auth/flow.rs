use crate::{
    auth::{oauth::source_chain, DexcomOAuth, OAuthError, SharedCredentials},
    utils::metrics::AUTHORIZATIONS,
};
use oauth2::CsrfToken;
use qrcode::{render::unicode::Dense1x2, QrCode};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, instrument, warn};
use url::Url;

/// How a new authorization URL is shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UrlDelivery {
    /// Print the URL as a QR code on the terminal.
    QrCode,
    /// Open the URL in the default browser.
    Browser,
}

impl UrlDelivery {
    /// Show `url` to the user. Failures are logged, the URL is in the logs
    /// either way.
    pub fn surface(self, url: &Url) {
        match self {
            Self::QrCode => match QrCode::new(url.as_str()) {
                Ok(code) => {
                    let rendered = code
                        .render::<Dense1x2>()
                        .dark_color(Dense1x2::Light)
                        .light_color(Dense1x2::Dark)
                        .build();
                    println!("Scan this QR code to authorize the bridge:\n{rendered}");
                }
                Err(err) => warn!(%err, "failed to render authorization url as qr code"),
            },
            Self::Browser => {
                if let Err(err) = open::that_detached(url.as_str()) {
                    warn!(%err, "failed to open authorization url in a browser");
                }
            }
        }
    }
}

/// Errors completing an authorization from the callback.
#[derive(Debug, thiserror::Error)]
pub enum AuthorizationError {
    /// The callback carried no code.
    #[error("authorization code is required")]
    MissingCode,
    /// The provider redirected back with an error instead of a code.
    #[error("authorization denied by provider: {0}")]
    Denied(String),
    /// No authorization URL has been handed out, or it was already used.
    #[error("no authorization in progress")]
    NotAwaiting,
    /// The echoed state does not match the pending authorization.
    #[error("authorization state does not match")]
    StateMismatch,
    /// The code could not be exchanged for tokens.
    #[error(transparent)]
    Exchange(#[from] OAuthError),
}

/// Where the flow is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorizationStatus {
    /// There is an access token and no authorization attempt is outstanding.
    Authorized,
    /// There is no access token and no URL has been surfaced yet. The next
    /// tick requests one.
    Unauthorized,
    /// An authorization URL has been surfaced and the bridge is waiting for
    /// the callback.
    AwaitingCode,
}

#[derive(Debug)]
struct PendingAuthorization {
    url: Url,
    state: CsrfToken,
}

/// The authorization-code flow.
///
/// The poll loop calls [`Self::request_authorization`] when it has no access
/// token, the callback server calls [`Self::complete`] with what the provider
/// redirected back.
#[derive(Debug)]
pub struct AuthorizationFlow {
    oauth: Arc<DexcomOAuth>,
    credentials: SharedCredentials,
    delivery: UrlDelivery,
    pending: Mutex<Option<PendingAuthorization>>,
}

impl AuthorizationFlow {
    /// Create a flow with no authorization outstanding.
    pub fn new(
        oauth: Arc<DexcomOAuth>,
        credentials: SharedCredentials,
        delivery: UrlDelivery,
    ) -> Self {
        Self {
            oauth,
            credentials,
            delivery,
            pending: Mutex::new(None),
        }
    }

    /// Current state of the flow.
    pub async fn status(&self) -> AuthorizationStatus {
        if self.pending.lock().await.is_some() {
            return AuthorizationStatus::AwaitingCode;
        }
        if self.credentials.snapshot().await.has_access_token() {
            AuthorizationStatus::Authorized
        } else {
            AuthorizationStatus::Unauthorized
        }
    }

    /// Enter [`AuthorizationStatus::AwaitingCode`], returning the URL the
    /// user has to visit.
    ///
    /// The first call generates a new state and surfaces the URL. Later calls
    /// while still waiting only log the same URL again, so a URL that has
    /// already been shown stays valid.
    pub async fn request_authorization(&self) -> Url {
        let mut pending = self.pending.lock().await;
        if let Some(pending) = pending.as_ref() {
            info!(url = %pending.url, "still waiting for authorization");
            return pending.url.clone();
        }

        let (url, state) = self.oauth.authorize_url();
        info!(%url, delivery = ?self.delivery, "authorization required");
        self.delivery.surface(&url);

        *pending = Some(PendingAuthorization {
            url: url.clone(),
            state,
        });
        url
    }

    /// Complete the pending authorization with the `code` and `state` the
    /// provider redirected back with.
    ///
    /// The pending attempt is taken before the exchange, so a second callback
    /// with the same state is rejected even while the first is in flight. On
    /// success the new pair replaces the stored credentials. On failure the
    /// attempt is put back, and the same URL can be used again.
    #[instrument(skip_all)]
    pub async fn complete(&self, code: &str, state: Option<&str>) -> Result<(), AuthorizationError> {
        let attempt = {
            let mut pending = self.pending.lock().await;
            let attempt = pending.take().ok_or(AuthorizationError::NotAwaiting)?;
            if state != Some(attempt.state.secret().as_str()) {
                warn!("authorization callback state mismatch");
                *pending = Some(attempt);
                return Err(AuthorizationError::StateMismatch);
            }
            attempt
        };

        let pair = match self.oauth.exchange_code(code).await {
            Ok(pair) => pair,
            Err(err) => {
                metrics::counter!(AUTHORIZATIONS, "outcome" => "failed").increment(1);
                error!(err = %source_chain(&err), "failed to exchange authorization code");
                // A tick may have surfaced a new URL in the meantime.
                let mut pending = self.pending.lock().await;
                if pending.is_none() {
                    *pending = Some(attempt);
                }
                return Err(err.into());
            }
        };

        if let Err(err) = self.credentials.replace(pair).await {
            error!(%err, "authorized, but failed to persist credentials");
        }

        metrics::counter!(AUTHORIZATIONS, "outcome" => "authorized").increment(1);
        info!("authorization complete");
        Ok(())
    }
}
