use crate::{
    config::ConfigError,
    utils::from_env::{EnvItemInfo, FromEnv, FromEnvErr, FromEnvVar},
};
use opentelemetry::{trace::TracerProvider, KeyValue};
use opentelemetry_otlp::ExporterBuildError;
use opentelemetry_sdk::{trace::SdkTracerProvider, Resource};
use opentelemetry_semantic_conventions::{
    attribute::{DEPLOYMENT_ENVIRONMENT_NAME, SERVICE_NAME, SERVICE_VERSION},
    SCHEMA_URL,
};
use tracing_subscriber::{EnvFilter, Layer};
use url::Url;

const OTEL_ENDPOINT: &str = "OTEL_EXPORTER_OTLP_ENDPOINT";
const OTEL_LEVEL: &str = "OTEL_LEVEL";
const OTEL_ENVIRONMENT: &str = "OTEL_ENVIRONMENT_NAME";

/// Drop guard for the Otel provider. Shuts the provider down when dropped,
/// so it should be held for the lifetime of `main`.
#[derive(Debug)]
pub struct OtelGuard(SdkTracerProvider, EnvFilter);

impl OtelGuard {
    /// Create a filtered tracing layer exporting to the provider.
    pub fn layer<S>(&self) -> impl Layer<S>
    where
        S: tracing::Subscriber + for<'span> tracing_subscriber::registry::LookupSpan<'span>,
    {
        let tracer = self.0.tracer(env!("CARGO_PKG_NAME"));
        tracing_opentelemetry::layer()
            .with_tracer(tracer)
            .with_filter(self.1.clone())
    }
}

impl Drop for OtelGuard {
    fn drop(&mut self) {
        if let Err(err) = self.0.shutdown() {
            eprintln!("{err:?}");
        }
    }
}

/// Span export configuration.
///
/// - `OTEL_EXPORTER_OTLP_ENDPOINT`: where spans are sent. Export is disabled
///   when unset.
/// - `OTEL_LEVEL`: [`EnvFilter`] for exported spans. Defaults to `RUST_LOG`.
/// - `OTEL_ENVIRONMENT_NAME`: `deployment.environment.name` resource value.
///   Defaults to `"unknown"`.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct OtelConfig {
    /// OTLP HTTP endpoint.
    pub endpoint: Url,

    /// Which spans are exported.
    pub level: EnvFilter,

    /// OTEL convention `deployment.environment.name`.
    pub environment: String,
}

impl FromEnv for OtelConfig {
    type Error = ConfigError;

    fn inventory() -> Vec<&'static EnvItemInfo> {
        vec![
            &EnvItemInfo {
                var: OTEL_ENDPOINT,
                description: "OTLP endpoint to send traces to, a url. If missing, disables OTLP exporting.",
                optional: true,
            },
            &EnvItemInfo {
                var: OTEL_LEVEL,
                description: "OTLP level to export, in RUST_LOG format. Defaults to RUST_LOG",
                optional: true,
            },
            &EnvItemInfo {
                var: OTEL_ENVIRONMENT,
                description: "OTLP environment name",
                optional: true,
            },
        ]
    }

    fn from_env() -> Result<Self, FromEnvErr<Self::Error>> {
        let endpoint = Url::from_env_var(OTEL_ENDPOINT).map_err(|e| e.map(ConfigError::Url))?;

        let level = match std::env::var(OTEL_LEVEL) {
            Ok(level) if !level.is_empty() => EnvFilter::from_env(OTEL_LEVEL),
            _ => EnvFilter::from_default_env(),
        };

        let environment = Option::<String>::from_env_var(OTEL_ENVIRONMENT)
            .map_err(FromEnvErr::infallible_into::<ConfigError>)?
            .unwrap_or_else(|| "unknown".into());

        Ok(Self {
            endpoint,
            level,
            environment,
        })
    }
}

impl OtelConfig {
    /// Load from the environment. Returns [`None`] if the endpoint is unset
    /// or does not parse.
    pub fn load() -> Option<Self> {
        Self::from_env().ok()
    }

    fn resource(&self) -> Resource {
        Resource::builder()
            .with_schema_url(
                [
                    KeyValue::new(SERVICE_NAME, env!("CARGO_PKG_NAME")),
                    KeyValue::new(SERVICE_VERSION, env!("CARGO_PKG_VERSION")),
                    KeyValue::new(DEPLOYMENT_ENVIRONMENT_NAME, self.environment.clone()),
                ],
                SCHEMA_URL,
            )
            .build()
    }

    /// Start the provider and its batch exporter. The returned guard shuts
    /// both down when dropped.
    pub fn provider(&self) -> Result<OtelGuard, ExporterBuildError> {
        let exporter = opentelemetry_otlp::SpanExporter::builder()
            .with_http()
            .build()?;

        let provider = SdkTracerProvider::builder()
            .with_resource(self.resource())
            .with_batch_exporter(exporter)
            .build();

        Ok(OtelGuard(provider, self.level.clone()))
    }
}
