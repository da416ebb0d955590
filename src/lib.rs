//! Bridge between the Dexcom glucose API and MQTT subscribers.
//!
//! The bridge keeps an OAuth2 access/refresh token pair alive on behalf of a
//! single user, polls the API on a fixed interval for the most recent
//! reading, maps it to a color-coded display payload, and publishes that
//! payload to every configured topic.
//!
//! The main pieces are:
//!
//! - [`auth`]: credential persistence, the authorization-code flow and the
//!   HTTP callback that completes it, and token refresh.
//! - [`dexcom`]: the bearer-authenticated API client.
//! - [`display`]: severity bands and the published payload.
//! - [`publish`]: the [`Publisher`] seam and its MQTT implementation.
//! - [`poll`]: the timer-driven [`Poller`] that ties it all together.
//!
//! [`Publisher`]: publish::Publisher
//! [`Poller`]: poll::Poller
#![warn(
    missing_copy_implementations,
    missing_debug_implementations,
    missing_docs,
    unreachable_pub,
    clippy::missing_const_for_fn,
    rustdoc::all
)]
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![deny(unused_must_use, rust_2018_idioms)]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

pub mod auth;

pub mod config;

pub mod dexcom;

pub mod display;

pub mod poll;

pub mod publish;

/// Utilities shared by the bridge binary.
pub mod utils {
    /// Loading configuration from environment variables.
    pub mod from_env;

    /// Prometheus metrics.
    pub mod metrics;

    /// OpenTelemetry span export.
    pub mod otlp;

    /// Tracing subscriber setup.
    pub mod tracing;
}

/// Re-exports of common dependencies.
pub mod deps {
    pub use metrics;
    pub use tracing;
    pub use tracing_subscriber;
}

// Used only by the binary.
use dotenvy as _;
use eyre as _;
