//! Parameter: a named, dynamically valued variable available to expressions.
//!
//! A parameter may be fed from a bus topic; when it is, every message on
//! that topic recomputes its resolved value, optionally through an
//! expression that can reach into the message with `payload()`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{MqttRulesError, ValidationError};
use crate::value;

/// Definition of a parameter as pushed on `<prefix>param/<name>` or
/// configured at startup.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Parameter {
    /// Default value, installed as the resolved value on definition.
    #[serde(alias = "Value")]
    pub value: Value,
    /// Topic whose messages update this parameter; empty for none.
    #[serde(alias = "Topic", skip_serializing_if = "String::is_empty")]
    pub topic: String,
    /// Formula computing the new value from a message; empty to use the raw payload.
    #[serde(alias = "Expression", skip_serializing_if = "String::is_empty")]
    pub expression: String,
}

/// How a raw definition payload was understood.
#[derive(Debug, Clone, PartialEq)]
pub enum ParameterInput {
    /// The payload was a JSON object matching the parameter schema.
    Definition(Parameter),
    /// Any other payload, coerced into a plain value.
    Value(Value),
}

impl Parameter {
    /// A value-only parameter with no topic and no expression.
    #[must_use]
    pub fn with_value(value: Value) -> Self {
        Self {
            value,
            ..Self::default()
        }
    }

    /// Whether this parameter listens to a topic.
    #[must_use]
    pub fn has_topic(&self) -> bool {
        !self.topic.is_empty()
    }

    /// Whether updates go through an expression.
    #[must_use]
    pub fn has_expression(&self) -> bool {
        !self.expression.is_empty()
    }

    /// Interpret a raw payload: a JSON object becomes a full definition,
    /// anything else becomes a coerced value.
    #[must_use]
    pub fn interpret(raw: &str) -> ParameterInput {
        match Self::from_json(raw) {
            Ok(parameter) => ParameterInput::Definition(parameter),
            Err(_) => ParameterInput::Value(value::coerce(raw)),
        }
    }

    /// Parse a JSON definition.
    ///
    /// # Errors
    ///
    /// Returns [`MqttRulesError::Payload`] for malformed JSON and
    /// [`ValidationError::NotAnObject`] for JSON that is not an object.
    pub fn from_json(raw: &str) -> Result<Self, MqttRulesError> {
        let document: Value = serde_json::from_str(raw)?;
        if !document.is_object() {
            return Err(ValidationError::NotAnObject.into());
        }
        Ok(serde_json::from_value(document)?)
    }
}
