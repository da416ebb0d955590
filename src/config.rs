//! Process configuration, loaded once at startup.

use crate::{
    auth::OAuthConfig,
    dexcom::DexcomConfig,
    poll::PollConfig,
    publish::MqttConfig,
    utils::from_env::{EnvItemInfo, FromEnv, FromEnvErr, FromEnvVar},
};
use core::num::ParseIntError;
use std::path::PathBuf;

const TOKEN_FILE: &str = "TOKEN_FILE";
const CALLBACK_PORT: &str = "CALLBACK_PORT";
const METRICS_PORT: &str = "METRICS_PORT";

/// Default location of the credential file.
pub const DEFAULT_TOKEN_FILE: &str = "data/tokens.json";

/// Default port of the authorization callback server.
pub const DEFAULT_CALLBACK_PORT: u16 = 3000;

/// Errors produced while parsing configuration values.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// A URL variable did not parse.
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    /// A numeric variable did not parse.
    #[error("invalid number: {0}")]
    Int(#[from] ParseIntError),
    /// The broker URL parsed, but is not usable for MQTT.
    #[error("unsupported broker url {0}, expected mqtt://host[:port] or mqtts://host[:port]")]
    BrokerUrl(String),
    /// A duration that must be positive was zero.
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

/// The complete bridge configuration.
///
/// Built once by the binary and handed by reference to every constructor
/// that needs a part of it.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// OAuth client settings.
    pub oauth: OAuthConfig,
    /// API host and HTTP settings.
    pub dexcom: DexcomConfig,
    /// Broker connection settings.
    pub mqtt: MqttConfig,
    /// Poll loop settings.
    pub poll: PollConfig,
    /// Where the credential pair is persisted.
    pub token_file: PathBuf,
    /// Port the callback server listens on.
    pub callback_port: u16,
    /// Port of the Prometheus exporter. Metrics are not exported when unset.
    pub metrics_port: Option<u16>,
}

impl FromEnv for BridgeConfig {
    type Error = ConfigError;

    fn inventory() -> Vec<&'static EnvItemInfo> {
        let mut items = vec![
            &EnvItemInfo {
                var: TOKEN_FILE,
                description: "Path of the JSON credential file. Defaults to data/tokens.json",
                optional: true,
            },
            &EnvItemInfo {
                var: CALLBACK_PORT,
                description: "Port of the OAuth callback server. Defaults to 3000",
                optional: true,
            },
            &EnvItemInfo {
                var: METRICS_PORT,
                description: "Port of the Prometheus exporter. Unset disables metrics export",
                optional: true,
            },
        ];
        items.extend(OAuthConfig::inventory());
        items.extend(DexcomConfig::inventory());
        items.extend(MqttConfig::inventory());
        items.extend(PollConfig::inventory());
        items
    }

    fn from_env() -> Result<Self, FromEnvErr<Self::Error>> {
        let token_file = Option::<PathBuf>::from_env_var(TOKEN_FILE)
            .map_err(FromEnvErr::infallible_into::<ConfigError>)?
            .unwrap_or_else(|| DEFAULT_TOKEN_FILE.into());
        let callback_port = Option::<u16>::from_env_var(CALLBACK_PORT)
            .map_err(|e| e.map(ConfigError::Int))?
            .unwrap_or(DEFAULT_CALLBACK_PORT);
        let metrics_port =
            Option::<u16>::from_env_var(METRICS_PORT).map_err(|e| e.map(ConfigError::Int))?;

        Ok(Self {
            oauth: OAuthConfig::from_env()?,
            dexcom: DexcomConfig::from_env()?,
            mqtt: MqttConfig::from_env()?,
            poll: PollConfig::from_env()?,
            token_file,
            callback_port,
            metrics_port,
        })
    }
}
