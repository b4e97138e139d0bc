//! Agent settings.

use serde::Deserialize;

use mqttrules_domain::error::ValidationError;
use mqttrules_domain::rule::MAX_QOS;

/// Behaviour of the dispatcher, independent of the transport.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Prepended to the control topics (`<prefix>param/...`).
    #[serde(alias = "Prefix")]
    pub prefix: String,
    /// Ignore rule definitions pushed over the bus.
    #[serde(alias = "DisableRulesUpdate")]
    pub disable_rules_update: bool,
    /// QoS used for every subscription.
    pub subscribe_qos: u8,
    /// Pending items the delivery queue holds before the transport waits.
    pub queue_capacity: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            prefix: String::new(),
            disable_rules_update: false,
            subscribe_qos: 1,
            queue_capacity: 256,
        }
    }
}

impl AgentConfig {
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidQos`] for a subscribe QoS above 2.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.subscribe_qos > MAX_QOS {
            return Err(ValidationError::InvalidQos(self.subscribe_qos));
        }
        Ok(())
    }

    #[must_use]
    pub fn param_filter(&self) -> String {
        format!("{}param/+", self.prefix)
    }

    #[must_use]
    pub fn rule_filter(&self) -> String {
        format!("{}rule/+/+", self.prefix)
    }

    #[must_use]
    pub fn command_topic(&self) -> String {
        format!("{}$AGENT", self.prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_have_sensible_defaults() {
        let config = AgentConfig::default();
        assert_eq!(config.prefix, "");
        assert!(!config.disable_rules_update);
        assert_eq!(config.subscribe_qos, 1);
        assert_eq!(config.queue_capacity, 256);
    }

    #[test]
    fn should_deserialize_from_toml() {
        let toml = r#"
            prefix = "home/"
            disable_rules_update = true
            subscribe_qos = 2
            queue_capacity = 16
        "#;
        let config: AgentConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.prefix, "home/");
        assert!(config.disable_rules_update);
        assert_eq!(config.subscribe_qos, 2);
        assert_eq!(config.queue_capacity, 16);
    }

    #[test]
    fn should_build_control_topics_from_prefix() {
        let config = AgentConfig {
            prefix: "home/".to_string(),
            ..AgentConfig::default()
        };
        assert_eq!(config.param_filter(), "home/param/+");
        assert_eq!(config.rule_filter(), "home/rule/+/+");
        assert_eq!(config.command_topic(), "home/$AGENT");
    }

    #[test]
    fn should_reject_qos_above_two() {
        let config = AgentConfig {
            subscribe_qos: 3,
            ..AgentConfig::default()
        };
        assert_eq!(config.validate(), Err(ValidationError::InvalidQos(3)));
    }
}
