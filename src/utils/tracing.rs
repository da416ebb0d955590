use crate::utils::{
    from_env::FromEnvVar,
    otlp::{OtelConfig, OtelGuard},
};
use tracing_subscriber::{filter::EnvFilter, layer::SubscriberExt, util::SubscriberInitExt, Layer};

const TRACING_LOG_JSON: &str = "TRACING_LOG_JSON";

/// Install the fmt layer, JSON if `TRACING_LOG_JSON` is set, and then
/// install the registry.
macro_rules! install_fmt {
    (json @ $registry:ident, $filter:ident) => {{
        let fmt = tracing_subscriber::fmt::layer().json().with_filter($filter);
        $registry.with(fmt).init();
    }};
    (log @ $registry:ident, $filter:ident) => {{
        let fmt = tracing_subscriber::fmt::layer().with_filter($filter);
        $registry.with(fmt).init();
    }};
    ($registry:ident, $filter:ident) => {{
        let json = bool::from_env_var(TRACING_LOG_JSON).unwrap_or(false);
        if json {
            install_fmt!(json @ $registry, $filter);
        } else {
            install_fmt!(log @ $registry, $filter);
        }
    }};
}

/// Init tracing, returning a guard for the OTEL provider if span export is
/// configured.
///
/// ## Env Reads
///
/// - `RUST_LOG`: log filter. Defaults to `info`.
/// - `TRACING_LOG_JSON`: if true, log JSON lines.
/// - The [`OtelConfig`] variables.
///
/// ## Panics
///
/// Panics if a global subscriber has already been set.
pub fn init_tracing() -> Option<OtelGuard> {
    let registry = tracing_subscriber::registry();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let otel = OtelConfig::load().map(|cfg| cfg.provider());
    match otel {
        Some(Ok(guard)) => {
            let registry = registry.with(guard.layer());
            install_fmt!(registry, filter);
            Some(guard)
        }
        Some(Err(err)) => {
            install_fmt!(registry, filter);
            tracing::warn!(%err, "failed to start otlp exporter, spans will not be exported");
            None
        }
        None => {
            install_fmt!(registry, filter);
            tracing::debug!("no otlp endpoint configured, spans will not be exported");
            None
        }
    }
}
