//! Configuration loading: TOML or JSON file with environment variable overrides.
//!
//! Looks for the path in `MQTTRULES_CONFIG`, falling back to `mqttrules.toml`
//! in the working directory. Files ending in `.json` are read as JSON, which
//! also accepts the `Config`/`Parameters`/`Rules` layout of older agent
//! configuration files. Every field has a sensible default so the file is
//! optional. Environment variables take precedence over file values.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;

use mqttrules_adapter_mqtt::MqttConfig;
use mqttrules_app::config::AgentConfig;
use mqttrules_domain::parameter::Parameter;
use mqttrules_domain::rule::Rule;

const DEFAULT_PATH: &str = "mqttrules.toml";

/// Top-level configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Broker connection settings.
    pub mqtt: MqttConfig,
    /// Dispatcher settings.
    pub agent: AgentConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
    /// Parameters installed at startup, by name.
    #[serde(alias = "Parameters")]
    pub parameters: BTreeMap<String, Parameter>,
    /// Rules installed at startup, by ruleset then rule name.
    #[serde(alias = "Rules")]
    pub rules: BTreeMap<String, BTreeMap<String, Rule>>,
    #[serde(rename = "Config")]
    legacy: Option<LegacyConfig>,
}

/// Logging configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive (`RUST_LOG` syntax).
    pub filter: String,
}

/// Flat `Config` section of older JSON files.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct LegacyConfig {
    #[serde(rename = "Broker")]
    broker: String,
    #[serde(rename = "ClientID")]
    client_id: String,
    #[serde(rename = "Username")]
    username: String,
    #[serde(rename = "Password")]
    password: String,
    #[serde(rename = "Prefix")]
    prefix: String,
    #[serde(rename = "DisableRulesUpdate")]
    disable_rules_update: bool,
}

impl Config {
    /// Load configuration from `MQTTRULES_CONFIG` or `mqttrules.toml` (if
    /// present) then apply environment-variable overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but is malformed, or if the
    /// resulting configuration is invalid.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var("MQTTRULES_CONFIG").unwrap_or_else(|_| DEFAULT_PATH.to_string());
        let mut config = Self::from_file(Path::new(&path))?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(err) => return Err(ConfigError::Io(err)),
        };
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        if is_json {
            Self::from_json(&content)
        } else {
            toml::from_str(&content).map_err(ConfigError::Parse)
        }
    }

    fn from_json(content: &str) -> Result<Self, ConfigError> {
        let mut config: Self = serde_json::from_str(content)?;
        if let Some(legacy) = config.legacy.take() {
            config.apply_legacy(legacy);
        }
        Ok(config)
    }

    fn apply_legacy(&mut self, legacy: LegacyConfig) {
        if !legacy.broker.is_empty() {
            self.set_broker(&legacy.broker);
        }
        if !legacy.client_id.is_empty() {
            self.mqtt.client_id = legacy.client_id;
        }
        if !legacy.username.is_empty() {
            self.mqtt.username = Some(legacy.username);
        }
        if !legacy.password.is_empty() {
            self.mqtt.password = Some(legacy.password);
        }
        if !legacy.prefix.is_empty() {
            self.agent.prefix = legacy.prefix;
        }
        self.agent.disable_rules_update |= legacy.disable_rules_update;
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(val) = var("MQTTRULES_BROKER_HOST") {
            self.mqtt.broker_host = val;
        }
        if let Some(val) = var("MQTTRULES_BROKER_PORT")
            && let Ok(port) = val.parse()
        {
            self.mqtt.broker_port = port;
        }
        if let Some(val) = var("MQTTRULES_BROKER") {
            self.set_broker(&val);
        }
        if let Some(val) = var("MQTTRULES_CLIENT_ID") {
            self.mqtt.client_id = val;
        }
        if let Some(val) = var("MQTTRULES_USERNAME") {
            self.mqtt.username = Some(val);
        }
        if let Some(val) = var("MQTTRULES_PASSWORD") {
            self.mqtt.password = Some(val);
        }
        if let Some(val) = var("MQTTRULES_PREFIX") {
            self.agent.prefix = val;
        }
        if let Some(val) = var("MQTTRULES_LOG") {
            self.logging.filter = val;
        }
        if let Some(val) = var("RUST_LOG") {
            self.logging.filter = val;
        }
    }

    /// Accepts `host`, `host:port` or a `tcp://host:port` URI.
    fn set_broker(&mut self, address: &str) {
        let address = ["tcp://", "mqtt://"]
            .iter()
            .find_map(|scheme| address.strip_prefix(scheme))
            .unwrap_or(address);
        match address.rsplit_once(':') {
            Some((host, port)) => {
                self.mqtt.broker_host = host.to_string();
                if let Ok(port) = port.parse() {
                    self.mqtt.broker_port = port;
                }
            }
            None => self.mqtt.broker_host = address.to_string(),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.mqtt.broker_port == 0 {
            return Err(ConfigError::Validation(
                "broker port must be non-zero".to_string(),
            ));
        }
        if self.mqtt.channel_capacity == 0 {
            return Err(ConfigError::Validation(
                "mqtt channel capacity must be non-zero".to_string(),
            ));
        }
        if self.agent.queue_capacity == 0 {
            return Err(ConfigError::Validation(
                "queue capacity must be non-zero".to_string(),
            ));
        }
        self.agent
            .validate()
            .map_err(|err| ConfigError::Validation(format!("subscribe QoS: {err}")))
    }

    /// Return the `host:port` broker address.
    #[must_use]
    pub fn broker_addr(&self) -> String {
        format!("{}:{}", self.mqtt.broker_host, self.mqtt.broker_port)
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "mqttrules=info,rumqttc=warn".to_string(),
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// TOML parse failure.
    #[error("failed to parse config file")]
    Parse(#[from] toml::de::Error),
    /// JSON parse failure.
    #[error("failed to parse JSON config file")]
    Json(#[from] serde_json::Error),
    /// File I/O failure.
    #[error("failed to read config file")]
    Io(#[from] std::io::Error),
    /// Semantic validation failure.
    #[error("invalid configuration: {0}")]
    Validation(String),
}
