use metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use std::net::SocketAddr;

/// Ticks run.
pub const TICKS: &str = "dexcom_bridge_ticks_total";
/// Payload publishes, labelled by `outcome`.
pub const PUBLISHES: &str = "dexcom_bridge_publishes_total";
/// Failed API fetches, labelled by `kind`.
pub const FETCH_ERRORS: &str = "dexcom_bridge_fetch_errors_total";
/// Refresh attempts, labelled by `outcome`.
pub const TOKEN_REFRESHES: &str = "dexcom_bridge_token_refreshes_total";
/// Completed or failed authorization code exchanges, labelled by `outcome`.
pub const AUTHORIZATIONS: &str = "dexcom_bridge_authorizations_total";
/// Most recently fetched glucose value.
pub const GLUCOSE_VALUE: &str = "dexcom_bridge_glucose_value";

fn describe() {
    describe_counter!(TICKS, "Poll ticks run");
    describe_counter!(PUBLISHES, "Display payloads handed to the broker, by outcome");
    describe_counter!(FETCH_ERRORS, "Failed glucose API fetches, by kind");
    describe_counter!(TOKEN_REFRESHES, "Access token refresh attempts, by outcome");
    describe_counter!(AUTHORIZATIONS, "Authorization code exchanges, by outcome");
    describe_gauge!(GLUCOSE_VALUE, "Most recently fetched glucose value");
}

/// Install the Prometheus recorder and serve `/metrics` on `port` on all
/// interfaces.
///
/// Must be called from within a tokio runtime.
pub fn init_metrics(port: u16) -> Result<(), BuildError> {
    PrometheusBuilder::new()
        .with_http_listener(SocketAddr::from(([0, 0, 0, 0], port)))
        .install()?;
    describe();
    Ok(())
}
