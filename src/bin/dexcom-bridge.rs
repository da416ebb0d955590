//! Dexcom to MQTT bridge.
//!
//! Configuration is read from the environment, after loading a `.env` file
//! from the working directory if there is one. See the inventory printed
//! when a required variable is missing. Logs go to stdout, filtered by
//! `RUST_LOG`.
use dexcom_bridge::{
    auth::{callback, AuthorizationFlow, CredentialStore, DexcomOAuth, SharedCredentials},
    config::BridgeConfig,
    dexcom::DexcomClient,
    poll::Poller,
    publish::MqttPublisher,
    utils::{from_env::FromEnv, metrics::init_metrics, tracing::init_tracing},
};
use eyre::WrapErr;
use std::{future::IntoFuture, net::SocketAddr, sync::Arc};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> eyre::Result<()> {
    // Loaded before tracing so `.env` can set `RUST_LOG` and friends.
    let dotenv = dotenvy::dotenv();
    let _guard = init_tracing();
    match dotenv {
        Ok(path) => info!(path = %path.display(), "loaded .env"),
        Err(err) if err.not_found() => {}
        Err(err) => warn!(%err, "failed to load .env"),
    }

    let config = match BridgeConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            if let Err(missing) = BridgeConfig::check_inventory() {
                for item in missing {
                    error!(var = item.var, description = item.description, "missing required env var");
                }
            }
            return Err(err).wrap_err("invalid configuration");
        }
    };

    if let Some(port) = config.metrics_port {
        init_metrics(port).wrap_err("failed to start metrics exporter")?;
        info!(port, "serving metrics");
    }

    let http = config
        .dexcom
        .http_client()
        .wrap_err("failed to build http client")?;
    let credentials = SharedCredentials::load(CredentialStore::new(&config.token_file));
    let oauth = Arc::new(DexcomOAuth::new(&config.oauth, &config.dexcom, http.clone())?);
    let flow = Arc::new(AuthorizationFlow::new(
        oauth.clone(),
        credentials.clone(),
        config.oauth.delivery,
    ));
    let api = DexcomClient::new(config.dexcom.base_url()?, http);
    info!(api = %api.base_url(), sandbox = config.dexcom.is_sandbox(), "using dexcom api");

    let (publisher, mqtt) = MqttPublisher::connect(&config.mqtt, &config.poll.topics);

    let poller = Poller::new(
        config.poll.clone(),
        api,
        oauth,
        credentials,
        flow.clone(),
        publisher,
    );
    let app = callback::router(flow, poller.subscribe());
    let poll = poller.spawn();

    let addr = SocketAddr::from(([0, 0, 0, 0], config.callback_port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .wrap_err_with(|| format!("failed to bind callback server to {addr}"))?;
    info!(%addr, path = callback::CALLBACK_PATH, "callback server listening");

    let result = tokio::select! {
        result = axum::serve(listener, app).into_future() => result.wrap_err("callback server failed"),
        result = tokio::signal::ctrl_c() => {
            info!("shutting down");
            result.wrap_err("failed to listen for shutdown signal")
        }
    };

    poll.abort();
    mqtt.abort();
    result
}
