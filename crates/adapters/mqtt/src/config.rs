//! MQTT broker connection settings.

use std::time::Duration;

use rumqttc::MqttOptions;
use serde::Deserialize;

/// Configuration for the MQTT transport.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    /// MQTT broker hostname or IP address.
    pub broker_host: String,
    /// MQTT broker port.
    pub broker_port: u16,
    /// MQTT client identifier.
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Keep-alive interval in seconds.
    pub keep_alive_secs: u16,
    /// Requests buffered between the client handle and the event loop.
    pub channel_capacity: usize,
    /// How long `connect` waits for the broker's acknowledgement.
    pub connect_timeout_secs: u64,
    /// Pause before polling again after a connection error.
    pub reconnect_delay_secs: u64,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            broker_host: "localhost".to_string(),
            broker_port: 1883,
            client_id: "mqttrules".to_string(),
            username: None,
            password: None,
            keep_alive_secs: 30,
            channel_capacity: 64,
            connect_timeout_secs: 10,
            reconnect_delay_secs: 5,
        }
    }
}

impl MqttConfig {
    /// Client options for rumqttc. Credentials are set only when a username
    /// is configured.
    #[must_use]
    pub fn mqtt_options(&self) -> MqttOptions {
        let mut options =
            MqttOptions::new(self.client_id.clone(), self.broker_host.clone(), self.broker_port);
        options.set_keep_alive(Duration::from_secs(u64::from(self.keep_alive_secs)));
        options.set_clean_session(true);
        if let Some(username) = &self.username {
            options.set_credentials(username.clone(), self.password.clone().unwrap_or_default());
        }
        options
    }

    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    #[must_use]
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_have_sensible_defaults() {
        let config = MqttConfig::default();
        assert_eq!(config.broker_host, "localhost");
        assert_eq!(config.broker_port, 1883);
        assert_eq!(config.client_id, "mqttrules");
        assert!(config.username.is_none());
        assert_eq!(config.keep_alive_secs, 30);
        assert_eq!(config.channel_capacity, 64);
    }

    #[test]
    fn should_deserialize_from_toml() {
        let toml = r#"
            broker_host = "mqtt.example.com"
            broker_port = 8883
            client_id = "rules-1"
            username = "agent"
            password = "secret"
            keep_alive_secs = 60
            channel_capacity = 128
        "#;
        let config: MqttConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.broker_host, "mqtt.example.com");
        assert_eq!(config.broker_port, 8883);
        assert_eq!(config.client_id, "rules-1");
        assert_eq!(config.username.as_deref(), Some("agent"));
        assert_eq!(config.password.as_deref(), Some("secret"));
        assert_eq!(config.keep_alive_secs, 60);
        assert_eq!(config.channel_capacity, 128);
    }

    #[test]
    fn should_use_defaults_for_missing_fields() {
        let toml = r#"broker_host = "192.168.1.100""#;
        let config: MqttConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.broker_host, "192.168.1.100");
        assert_eq!(config.broker_port, 1883);
        assert_eq!(config.client_id, "mqttrules");
    }

    #[test]
    fn should_build_client_options() {
        let config = MqttConfig::default();
        let options = config.mqtt_options();
        assert_eq!(options.broker_address(), ("localhost".to_string(), 1883));
        assert_eq!(options.client_id(), "mqttrules");
        assert_eq!(options.keep_alive(), Duration::from_secs(30));
    }
}
