//! The timer-driven poll and publish loop.

mod reading;
pub use reading::SharedReading;

mod task;
pub use task::{Poller, TickOutcome};

use crate::{
    config::ConfigError,
    utils::from_env::{EnvItemInfo, FromEnv, FromEnvErr, FromEnvVar},
};
use std::time::Duration;

const UPDATE_INTERVAL: &str = "UPDATE_INTERVAL";
const ICON: &str = "ICON";
const MQTT_TOPICS: &str = "MQTT_TOPICS";
const MAX_REFRESH_FAILURES: &str = "MAX_REFRESH_FAILURES";

/// Default time between ticks.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);

/// Default number of consecutive refresh rejections before the bridge asks
/// for a new authorization.
pub const DEFAULT_MAX_REFRESH_FAILURES: u32 = 3;

/// Poll loop settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollConfig {
    /// Time between ticks.
    pub interval: Duration,
    /// Display icon identifier included in every payload.
    pub icon: Option<String>,
    /// Topics every payload is published to.
    pub topics: Vec<String>,
    /// Consecutive refresh rejections tolerated before the access token is
    /// dropped and a new authorization is requested.
    pub max_refresh_failures: u32,
}

impl PollConfig {
    /// Config publishing to `topics` with the defaults for everything else.
    pub fn new(topics: Vec<String>) -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            icon: None,
            topics,
            max_refresh_failures: DEFAULT_MAX_REFRESH_FAILURES,
        }
    }
}

impl FromEnv for PollConfig {
    type Error = ConfigError;

    fn inventory() -> Vec<&'static EnvItemInfo> {
        vec![
            &EnvItemInfo {
                var: UPDATE_INTERVAL,
                description: "Seconds between polls. Defaults to 60",
                optional: true,
            },
            &EnvItemInfo {
                var: ICON,
                description: "Icon identifier sent with every reading",
                optional: true,
            },
            &EnvItemInfo {
                var: MQTT_TOPICS,
                description: "Comma separated topics every reading is published to",
                optional: false,
            },
            &EnvItemInfo {
                var: MAX_REFRESH_FAILURES,
                description: "Refresh rejections in a row before asking for a new authorization. Defaults to 3",
                optional: true,
            },
        ]
    }

    fn from_env() -> Result<Self, FromEnvErr<Self::Error>> {
        let interval = match Option::<u64>::from_env_var(UPDATE_INTERVAL)
            .map_err(|e| e.map(ConfigError::Int))?
        {
            Some(0) => return Err(FromEnvErr::ParseError(ConfigError::Zero(UPDATE_INTERVAL))),
            Some(secs) => Duration::from_secs(secs),
            None => DEFAULT_INTERVAL,
        };
        let icon = Option::<String>::from_env_var(ICON)
            .map_err(FromEnvErr::infallible_into::<ConfigError>)?;
        let topics = Vec::<String>::from_env_var(MQTT_TOPICS)
            .map_err(FromEnvErr::infallible_into::<ConfigError>)?;
        let max_refresh_failures = match Option::<u32>::from_env_var(MAX_REFRESH_FAILURES)
            .map_err(|e| e.map(ConfigError::Int))?
        {
            Some(0) => {
                return Err(FromEnvErr::ParseError(ConfigError::Zero(
                    MAX_REFRESH_FAILURES,
                )))
            }
            Some(max) => max,
            None => DEFAULT_MAX_REFRESH_FAILURES,
        };

        Ok(Self {
            interval,
            icon,
            topics,
            max_refresh_failures,
        })
    }
}
