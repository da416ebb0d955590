use crate::{
    config::ConfigError,
    publish::{PublishError, Publisher},
    utils::from_env::{EnvItemInfo, FromEnv, FromEnvErr, FromEnvVar},
};
use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS, Transport};
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};
use url::Url;

const MQTT_BROKER_URL: &str = "MQTT_BROKER_URL";
const MQTT_USERNAME: &str = "MQTT_USERNAME";
const MQTT_PASSWORD: &str = "MQTT_PASSWORD";
const MQTT_CLIENT_ID: &str = "MQTT_CLIENT_ID";
const AWTRIX_SETTINGS: &str = "AWTRIX_SETTINGS";

const DEFAULT_PORT: u16 = 1883;
const DEFAULT_TLS_PORT: u16 = 8883;
const KEEP_ALIVE: Duration = Duration::from_secs(30);
const RECONNECT_DELAY: Duration = Duration::from_secs(5);
const CHANNEL_CAPACITY: usize = 32;

/// Broker connection settings.
#[derive(Debug, Clone)]
pub struct MqttConfig {
    /// Broker host.
    pub host: String,
    /// Broker port.
    pub port: u16,
    /// Connect over TLS (`mqtts://`).
    pub tls: bool,
    /// Username and password, if the broker requires them.
    pub credentials: Option<(String, String)>,
    /// Client id presented to the broker.
    pub client_id: String,
    /// Settings blob published to each display once per connection.
    pub settings: Option<String>,
}

impl MqttConfig {
    /// Parse a `mqtt://host[:port]` or `mqtts://host[:port]` broker URL into
    /// a config without credentials or settings.
    pub fn from_url(url: &Url, client_id: impl Into<String>) -> Result<Self, ConfigError> {
        let (tls, default_port) = match url.scheme() {
            "mqtt" | "tcp" => (false, DEFAULT_PORT),
            "mqtts" | "ssl" => (true, DEFAULT_TLS_PORT),
            _ => return Err(ConfigError::BrokerUrl(url.to_string())),
        };
        let host = url
            .host_str()
            .filter(|host| !host.is_empty())
            .ok_or_else(|| ConfigError::BrokerUrl(url.to_string()))?;

        Ok(Self {
            host: host.to_owned(),
            port: url.port().unwrap_or(default_port),
            tls,
            credentials: None,
            client_id: client_id.into(),
            settings: None,
        })
    }

    fn options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(&self.client_id, &self.host, self.port);
        options.set_keep_alive(KEEP_ALIVE);
        if let Some((username, password)) = &self.credentials {
            options.set_credentials(username, password);
        }
        if self.tls {
            options.set_transport(Transport::tls_with_default_config());
        }
        options
    }
}

impl FromEnv for MqttConfig {
    type Error = ConfigError;

    fn inventory() -> Vec<&'static EnvItemInfo> {
        vec![
            &EnvItemInfo {
                var: MQTT_BROKER_URL,
                description: "MQTT broker, mqtt://host[:port] or mqtts://host[:port]",
                optional: false,
            },
            &EnvItemInfo {
                var: MQTT_USERNAME,
                description: "MQTT username",
                optional: true,
            },
            &EnvItemInfo {
                var: MQTT_PASSWORD,
                description: "MQTT password",
                optional: true,
            },
            &EnvItemInfo {
                var: MQTT_CLIENT_ID,
                description: "MQTT client id. Defaults to dexcom-bridge-<pid>",
                optional: true,
            },
            &EnvItemInfo {
                var: AWTRIX_SETTINGS,
                description: "Settings JSON published to <display>/settings on every connect",
                optional: true,
            },
        ]
    }

    fn from_env() -> Result<Self, FromEnvErr<Self::Error>> {
        let url = Url::from_env_var(MQTT_BROKER_URL).map_err(|e| e.map(ConfigError::Url))?;
        let client_id = Option::<String>::from_env_var(MQTT_CLIENT_ID)
            .map_err(FromEnvErr::infallible_into::<ConfigError>)?
            .unwrap_or_else(|| format!("dexcom-bridge-{}", std::process::id()));
        let mut config = Self::from_url(&url, client_id).map_err(FromEnvErr::ParseError)?;

        let username = Option::<String>::from_env_var(MQTT_USERNAME)
            .map_err(FromEnvErr::infallible_into::<ConfigError>)?;
        let password = Option::<String>::from_env_var(MQTT_PASSWORD)
            .map_err(FromEnvErr::infallible_into::<ConfigError>)?;
        config.credentials = username.map(|username| (username, password.unwrap_or_default()));
        config.settings = Option::<String>::from_env_var(AWTRIX_SETTINGS)
            .map_err(FromEnvErr::infallible_into::<ConfigError>)?;

        Ok(config)
    }
}

/// The settings topic of every distinct display among `topics`. A display is
/// identified by the first segment of its topic, e.g. `awtrix_1` in
/// `awtrix_1/custom/glucose`.
pub fn settings_topics<S: AsRef<str>>(topics: &[S]) -> Vec<String> {
    let mut settings: Vec<String> = Vec::new();
    for topic in topics {
        let prefix = topic.as_ref().split('/').next().unwrap_or_default();
        let topic = format!("{prefix}/settings");
        if !prefix.is_empty() && !settings.contains(&topic) {
            settings.push(topic);
        }
    }
    settings
}

/// [`Publisher`] backed by an MQTT connection.
///
/// The connection is driven by a background task that owns the rumqttc event
/// loop. That task reconnects on its own and pushes the display settings
/// after every successful connect.
///
/// Publishing never waits. While the broker is unreachable every publish
/// fails with [`PublishError::Disconnected`], and a full request queue fails
/// with [`PublishError::Mqtt`], so stale readings are dropped rather than
/// replayed on reconnect.
#[derive(Debug, Clone)]
pub struct MqttPublisher {
    client: AsyncClient,
    connected: Arc<AtomicBool>,
}

impl MqttPublisher {
    /// Create the client and spawn the task driving its connection. Settings,
    /// if configured, are pushed to the settings topic of every display in
    /// `topics` on connect.
    pub fn connect(config: &MqttConfig, topics: &[String]) -> (Self, JoinHandle<()>) {
        let (client, event_loop) = AsyncClient::new(config.options(), CHANNEL_CAPACITY);

        let settings = config
            .settings
            .clone()
            .map(|settings| (settings, settings_topics(topics)));
        info!(host = %config.host, port = config.port, tls = config.tls, "connecting to mqtt broker");

        let connected = Arc::new(AtomicBool::new(false));
        let task = tokio::spawn(drive(
            client.clone(),
            event_loop,
            connected.clone(),
            settings,
        ));
        (Self { client, connected }, task)
    }

    /// True while the broker has acknowledged the current connection.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }
}

async fn drive(
    client: AsyncClient,
    mut event_loop: EventLoop,
    connected: Arc<AtomicBool>,
    settings: Option<(String, Vec<String>)>,
) {
    loop {
        match event_loop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                connected.store(true, Ordering::Release);
                info!("connected to mqtt broker");
                let Some((payload, topics)) = &settings else {
                    continue;
                };
                for topic in topics {
                    // The event loop is this task, so an awaiting publish
                    // would wait on itself.
                    match client.try_publish(topic, QoS::AtMostOnce, false, payload.clone()) {
                        Ok(()) => info!(%topic, "pushed display settings"),
                        Err(err) => warn!(%err, %topic, "failed to push display settings"),
                    }
                }
            }
            Ok(event) => debug!(?event, "mqtt event"),
            Err(err) => {
                connected.store(false, Ordering::Release);
                error!(%err, "mqtt connection error, retrying");
                tokio::time::sleep(RECONNECT_DELAY).await;
            }
        }
    }
}

#[async_trait]
impl Publisher for MqttPublisher {
    #[instrument(skip(self, payload))]
    async fn publish(&self, topic: &str, payload: String) -> Result<(), PublishError> {
        if !self.is_connected() {
            return Err(PublishError::Disconnected);
        }
        self.client
            .try_publish(topic, QoS::AtMostOnce, false, payload)
            .map_err(Into::into)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn broker_url() {
        let cfg = MqttConfig::from_url(&"mqtt://broker.local".parse().unwrap(), "id").unwrap();
        assert_eq!((cfg.host.as_str(), cfg.port, cfg.tls), ("broker.local", 1883, false));

        let cfg = MqttConfig::from_url(&"mqtts://broker.local:9883".parse().unwrap(), "id").unwrap();
        assert_eq!((cfg.host.as_str(), cfg.port, cfg.tls), ("broker.local", 9883, true));

        assert!(MqttConfig::from_url(&"https://broker.local".parse().unwrap(), "id").is_err());
    }

    #[tokio::test]
    async fn unreachable_broker_fails_fast() {
        let config = MqttConfig::from_url(&"mqtt://127.0.0.1:1".parse().unwrap(), "test").unwrap();
        let (publisher, task) = MqttPublisher::connect(&config, &[]);

        // More publishes than the request queue holds.
        for _ in 0..CHANNEL_CAPACITY * 2 {
            let result = tokio::time::timeout(
                Duration::from_secs(1),
                publisher.publish("awtrix_1/custom/glucose", "{}".into()),
            )
            .await
            .expect("publish must not wait on the broker");
            assert!(matches!(result, Err(PublishError::Disconnected)));
        }
        assert!(!publisher.is_connected());

        task.abort();
    }

    #[test]
    fn one_settings_topic_per_display() {
        let topics = [
            "awtrix_1/custom/glucose",
            "awtrix_2/custom/glucose",
            "awtrix_1/custom/other",
        ];
        assert_eq!(
            settings_topics(&topics),
            vec!["awtrix_1/settings", "awtrix_2/settings"]
        );
    }
}
