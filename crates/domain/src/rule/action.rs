//! Action: one outbound publish performed when a rule fires.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Highest MQTT quality-of-service level.
pub const MAX_QOS: u8 = 2;

/// A publish to perform, with a payload template that may embed `${expr}` spans.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Action {
    #[serde(alias = "Topic")]
    pub topic: String,
    #[serde(alias = "Payload")]
    pub payload: String,
    #[serde(alias = "QoS", alias = "Qos")]
    pub qos: u8,
    #[serde(alias = "Retain")]
    pub retain: bool,
}

impl Action {
    /// Create an action publishing `payload` on `topic` with QoS 0, not retained.
    #[must_use]
    pub fn new(topic: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn qos(mut self, qos: u8) -> Self {
        self.qos = qos;
        self
    }

    #[must_use]
    pub fn retain(mut self, retain: bool) -> Self {
        self.retain = retain;
        self
    }

    /// Check the action can be published.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::EmptyTopic`] or [`ValidationError::InvalidQos`].
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.topic.is_empty() {
            return Err(ValidationError::EmptyTopic);
        }
        if self.qos > MAX_QOS {
            return Err(ValidationError::InvalidQos(self.qos));
        }
        Ok(())
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "publish({}, qos={}", self.topic, self.qos)?;
        if self.retain {
            f.write_str(", retained")?;
        }
        f.write_str(")")
    }
}
