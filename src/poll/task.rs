use crate::{
    auth::{
        source_chain, AuthorizationFlow, CredentialPair, DexcomOAuth, OAuthError,
        SharedCredentials,
    },
    dexcom::{DexcomClient, FetchError, Reading},
    display::{DisplayPayload, SeverityBand},
    poll::{PollConfig, SharedReading},
    publish::Publisher,
    utils::metrics::{FETCH_ERRORS, GLUCOSE_VALUE, PUBLISHES, TICKS, TOKEN_REFRESHES},
};
use std::{future::IntoFuture, pin::Pin, sync::Arc};
use tokio::{sync::watch, task::JoinHandle, time::MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn, Instrument};

/// What a single tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// There was no access token. The authorization URL was surfaced and
    /// nothing was fetched.
    AwaitingAuthorization,
    /// A reading was fetched and published.
    Published {
        /// The reading.
        reading: Reading,
        /// Its band.
        band: SeverityBand,
        /// Topics the payload was handed to.
        delivered: usize,
        /// Topics the publish failed for.
        failed: usize,
    },
    /// The API has no reading in the queried window.
    NoReadings,
    /// The fetch failed for a reason other than a rejected access token.
    FetchFailed,
    /// The access token was rejected and the refresh that followed stored a
    /// new pair.
    Refreshed,
    /// The access token was rejected and the refresh failed. The pair is
    /// unchanged and the next tick tries again.
    RefreshFailed,
    /// Refreshing is no longer possible. The access token was dropped so the
    /// next tick requests a new authorization.
    Reauthorizing,
    /// The access token was rejected, but the credentials were replaced by
    /// someone else before the refresh could start.
    RefreshSkipped,
}

/// The poll and publish loop.
///
/// Every tick reads the current credentials, fetches the most recent reading
/// and publishes its display payload to every configured topic. A rejected
/// access token is refreshed, and the refreshed pair is used from the next
/// tick on. A missing access token sends the bridge through the
/// [`AuthorizationFlow`].
///
/// Ticks never overlap. [`Self::spawn`] runs them from a single task, and
/// [`Self::tick`] takes `&mut self`.
#[derive(Debug)]
pub struct Poller<P> {
    config: PollConfig,
    api: DexcomClient,
    oauth: Arc<DexcomOAuth>,
    credentials: SharedCredentials,
    flow: Arc<AuthorizationFlow>,
    publisher: P,

    reading: watch::Sender<Option<Reading>>,
    refresh_failures: u32,
}

impl<P: Publisher> Poller<P> {
    /// Create a poller. Nothing happens until [`Self::tick`] is called or the
    /// poller is spawned.
    pub fn new(
        config: PollConfig,
        api: DexcomClient,
        oauth: Arc<DexcomOAuth>,
        credentials: SharedCredentials,
        flow: Arc<AuthorizationFlow>,
        publisher: P,
    ) -> Self {
        Self {
            config,
            api,
            oauth,
            credentials,
            flow,
            publisher,
            reading: watch::channel(None).0,
            refresh_failures: 0,
        }
    }

    /// Subscribe to the latest published reading.
    pub fn subscribe(&self) -> SharedReading {
        self.reading.subscribe().into()
    }

    /// Get a reference to the publisher.
    pub const fn publisher(&self) -> &P {
        &self.publisher
    }

    /// Run one tick.
    #[instrument(skip(self))]
    pub async fn tick(&mut self) -> TickOutcome {
        metrics::counter!(TICKS).increment(1);

        let pair = self.credentials.snapshot().await;
        if !pair.has_access_token() {
            self.flow.request_authorization().await;
            return TickOutcome::AwaitingAuthorization;
        }

        match self.api.latest_reading(&pair.access_token).await {
            Ok(Some(reading)) => self.publish(reading).await,
            Ok(None) => {
                warn!("no glucose readings available, skipping publish");
                TickOutcome::NoReadings
            }
            Err(err @ FetchError::AuthorizationRejected) => {
                metrics::counter!(FETCH_ERRORS, "kind" => err.kind()).increment(1);
                info!("access token rejected, refreshing");
                self.refresh(&pair).await
            }
            Err(err) => {
                metrics::counter!(FETCH_ERRORS, "kind" => err.kind()).increment(1);
                warn!(err = %source_chain(&err), "failed to fetch latest reading");
                TickOutcome::FetchFailed
            }
        }
    }

    async fn publish(&self, reading: Reading) -> TickOutcome {
        let band = SeverityBand::classify(reading.value);
        metrics::gauge!(GLUCOSE_VALUE).set(reading.value as f64);
        self.reading.send_replace(Some(reading));

        let topics = &self.config.topics;
        let payload = match DisplayPayload::new(&reading, self.config.icon.as_deref()).to_json() {
            Ok(payload) => payload,
            Err(err) => {
                error!(%err, "failed to serialize display payload");
                return TickOutcome::Published {
                    reading,
                    band,
                    delivered: 0,
                    failed: topics.len(),
                };
            }
        };

        let mut delivered = 0;
        for topic in topics {
            match self.publisher.publish(topic, payload.clone()).await {
                Ok(()) => {
                    metrics::counter!(PUBLISHES, "outcome" => "ok").increment(1);
                    delivered += 1;
                }
                Err(err) => {
                    metrics::counter!(PUBLISHES, "outcome" => "failed").increment(1);
                    warn!(%err, %topic, "failed to publish reading");
                }
            }
        }

        info!(value = reading.value, ?band, timestamp = %reading.timestamp, delivered, "published reading");
        TickOutcome::Published {
            reading,
            band,
            delivered,
            failed: topics.len() - delivered,
        }
    }

    /// Refresh the pair the tick started with.
    ///
    /// The credential lock is held for the whole exchange, so the callback
    /// cannot store a pair that this refresh then overwrites.
    async fn refresh(&mut self, stale: &CredentialPair) -> TickOutcome {
        let mut state = self.credentials.lock().await;
        if state.pair() != stale {
            debug!("credentials replaced since the tick started, skipping refresh");
            return TickOutcome::RefreshSkipped;
        }

        let err = match self.oauth.refresh(stale).await {
            Ok(pair) => {
                self.refresh_failures = 0;
                metrics::counter!(TOKEN_REFRESHES, "outcome" => "refreshed").increment(1);
                if let Err(err) = state.replace(pair) {
                    error!(%err, "refreshed, but failed to persist credentials");
                }
                info!("access token refreshed");
                return TickOutcome::Refreshed;
            }
            Err(err) => err,
        };

        metrics::counter!(TOKEN_REFRESHES, "outcome" => err.kind()).increment(1);
        if err.is_rejection() {
            self.refresh_failures += 1;
        }
        let exhausted = matches!(err, OAuthError::NoRefreshToken)
            || self.refresh_failures >= self.config.max_refresh_failures;

        if !exhausted {
            warn!(
                err = %source_chain(&err),
                failures = self.refresh_failures,
                "token refresh failed, retrying next tick"
            );
            return TickOutcome::RefreshFailed;
        }

        error!(err = %source_chain(&err), "token refresh exhausted, reauthorization required");
        self.refresh_failures = 0;
        if let Err(err) = state.replace(stale.without_access_token()) {
            error!(%err, "failed to persist cleared access token");
        }
        TickOutcome::Reauthorizing
    }
}

impl<P: Publisher + 'static> Poller<P> {
    async fn task_future(mut self) {
        let mut interval = tokio::time::interval(self.config.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(interval = ?self.config.interval, topics = ?self.config.topics, "starting poll loop");
        loop {
            interval.tick().await;
            let outcome = self.tick().await;
            debug!(?outcome, "tick complete");
        }
    }

    /// Spawn the poll loop in the current [`tracing`] span. The first tick
    /// runs immediately.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.task_future().in_current_span())
    }
}

impl<P: Publisher + 'static> IntoFuture for Poller<P> {
    type Output = ();

    type IntoFuture = Pin<Box<dyn std::future::Future<Output = ()> + Send>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(self.task_future())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        auth::{CredentialStore, OAuthConfig, UrlDelivery},
        dexcom::{DexcomConfig, DEFAULT_HTTP_TIMEOUT},
        publish::PublishError,
    };
    use async_trait::async_trait;

    struct Discard;

    #[async_trait]
    impl Publisher for Discard {
        async fn publish(&self, _topic: &str, _payload: String) -> Result<(), PublishError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn refresh_yields_to_newer_credentials() {
        let mut server = mockito::Server::new_async().await;
        let token = server
            .mock("POST", "/v2/oauth2/token")
            .expect(0)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::new(dir.path().join("tokens.json"));
        let stale = CredentialPair::new("access", "refresh");
        let credentials = SharedCredentials::new(stale.clone(), store.clone());

        let dexcom = DexcomConfig::new(
            false,
            Some(server.url().parse().unwrap()),
            DEFAULT_HTTP_TIMEOUT,
        );
        let http = dexcom.http_client().unwrap();
        let oauth = OAuthConfig {
            client_id: "client".into(),
            client_secret: "secret".into(),
            callback_url: "http://localhost:3000/dexcom".parse().unwrap(),
            delivery: UrlDelivery::QrCode,
        };
        let oauth = Arc::new(DexcomOAuth::new(&oauth, &dexcom, http.clone()).unwrap());
        let flow = Arc::new(AuthorizationFlow::new(
            oauth.clone(),
            credentials.clone(),
            UrlDelivery::QrCode,
        ));
        let mut poller = Poller::new(
            PollConfig::new(vec!["awtrix_1/custom/glucose".into()]),
            DexcomClient::new(dexcom.base_url().unwrap(), http),
            oauth,
            credentials.clone(),
            flow,
            Discard,
        );

        // The callback stored a new pair after the tick took its snapshot.
        let authorized = CredentialPair::new("access-2", "refresh-2");
        credentials.replace(authorized.clone()).await.unwrap();

        assert_eq!(poller.refresh(&stale).await, TickOutcome::RefreshSkipped);
        token.assert_async().await;
        assert_eq!(poller.refresh_failures, 0);
        assert_eq!(credentials.snapshot().await, authorized);
        assert_eq!(store.load().unwrap(), authorized);
    }
}
