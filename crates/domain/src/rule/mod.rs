//! Rule: trigger/schedule → condition → actions.
//!
//! A rule fires when a message arrives on its trigger topic or when its
//! schedule elapses. If its condition holds (or it has none) every
//! [`Action`] is published, with `${expr}` spans in the payload replaced by
//! their evaluated values.

mod action;
mod key;

pub use action::{Action, MAX_QOS};
pub use key::RuleKey;

use serde::{Deserialize, Serialize};

use crate::error::{MqttRulesError, ValidationError};

/// Definition of a rule as pushed on `<prefix>rule/<ruleset>/<rule>` or
/// configured at startup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Rule {
    /// Topic whose messages fire the rule; empty for none.
    #[serde(alias = "Trigger", skip_serializing_if = "String::is_empty")]
    pub trigger: String,
    /// Recurrence spec (`@every 10s`, cron); empty for none.
    #[serde(alias = "Schedule", skip_serializing_if = "String::is_empty")]
    pub schedule: String,
    /// Formula that must evaluate to `true`; empty means always.
    #[serde(alias = "Condition", skip_serializing_if = "String::is_empty")]
    pub condition: String,
    #[serde(alias = "Actions")]
    pub actions: Vec<Action>,
}

impl Rule {
    /// Create a builder for constructing a [`Rule`].
    #[must_use]
    pub fn builder() -> RuleBuilder {
        RuleBuilder::default()
    }

    #[must_use]
    pub fn has_trigger(&self) -> bool {
        !self.trigger.is_empty()
    }

    #[must_use]
    pub fn has_schedule(&self) -> bool {
        !self.schedule.is_empty()
    }

    #[must_use]
    pub fn has_condition(&self) -> bool {
        !self.condition.is_empty()
    }

    /// Check domain invariants.
    ///
    /// # Errors
    ///
    /// Returns [`MqttRulesError::Validation`] when:
    /// - `actions` is empty ([`ValidationError::NoActions`])
    /// - an action has no topic or an out-of-range QoS
    pub fn validate(&self) -> Result<(), MqttRulesError> {
        if self.actions.is_empty() {
            return Err(ValidationError::NoActions.into());
        }
        for action in &self.actions {
            action.validate()?;
        }
        Ok(())
    }

    /// Parse and validate a JSON definition.
    ///
    /// # Errors
    ///
    /// Returns [`MqttRulesError::Payload`] for malformed JSON,
    /// [`ValidationError::NotAnObject`] for non-object JSON, and any
    /// [`Rule::validate`] failure.
    pub fn from_json(raw: &str) -> Result<Self, MqttRulesError> {
        let document: serde_json::Value = serde_json::from_str(raw)?;
        if !document.is_object() {
            return Err(ValidationError::NotAnObject.into());
        }
        let rule: Self = serde_json::from_value(document)?;
        rule.validate()?;
        Ok(rule)
    }
}

/// Step-by-step builder for [`Rule`].
#[derive(Debug, Default)]
pub struct RuleBuilder {
    rule: Rule,
}

impl RuleBuilder {
    #[must_use]
    pub fn trigger(mut self, topic: impl Into<String>) -> Self {
        self.rule.trigger = topic.into();
        self
    }

    #[must_use]
    pub fn schedule(mut self, spec: impl Into<String>) -> Self {
        self.rule.schedule = spec.into();
        self
    }

    #[must_use]
    pub fn condition(mut self, condition: impl Into<String>) -> Self {
        self.rule.condition = condition.into();
        self
    }

    #[must_use]
    pub fn action(mut self, action: Action) -> Self {
        self.rule.actions.push(action);
        self
    }

    /// Consume the builder, validate, and return a [`Rule`].
    ///
    /// # Errors
    ///
    /// Same as [`Rule::validate`].
    pub fn build(self) -> Result<Rule, MqttRulesError> {
        self.rule.validate()?;
        Ok(self.rule)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEFINITION: &str = r#"{
        "trigger": "triggering/topic",
        "schedule": "@every 10s",
        "condition": "param > 41",
        "actions": [
            {"topic": "triggeredby/trigger", "payload": "testing", "qos": 1, "retain": false}
        ]
    }"#;

    #[test]
    fn should_parse_full_definition() {
        let rule = Rule::from_json(DEFINITION).unwrap();
        assert_eq!(rule.trigger, "triggering/topic");
        assert_eq!(rule.schedule, "@every 10s");
        assert_eq!(rule.condition, "param > 41");
        assert_eq!(
            rule.actions,
            vec![Action::new("triggeredby/trigger", "testing").qos(1)]
        );
    }

    #[test]
    fn should_accept_capitalised_field_names() {
        let rule = Rule::from_json(
            r#"{"Trigger": "t", "Actions": [{"Topic": "out", "Payload": "x"}]}"#,
        )
        .unwrap();
        assert_eq!(rule.trigger, "t");
        assert!(!rule.has_schedule());
        assert!(!rule.has_condition());
    }

    #[test]
    fn should_return_validation_error_when_actions_is_empty() {
        let result = Rule::from_json(r#"{"trigger": "t", "actions": []}"#);
        assert!(matches!(
            result,
            Err(MqttRulesError::Validation(ValidationError::NoActions))
        ));
    }

    #[test]
    fn should_return_validation_error_when_actions_missing() {
        let result = Rule::builder().trigger("t").build();
        assert!(matches!(
            result,
            Err(MqttRulesError::Validation(ValidationError::NoActions))
        ));
    }

    #[test]
    fn should_return_validation_error_when_action_qos_invalid() {
        let result = Rule::builder().action(Action::new("out", "x").qos(7)).build();
        assert!(matches!(
            result,
            Err(MqttRulesError::Validation(ValidationError::InvalidQos(7)))
        ));
    }

    #[test]
    fn should_reject_malformed_json() {
        assert!(matches!(
            Rule::from_json("{not json"),
            Err(MqttRulesError::Payload(_))
        ));
    }

    #[test]
    fn should_reject_non_object_json() {
        assert!(matches!(
            Rule::from_json("[1, 2]"),
            Err(MqttRulesError::Validation(ValidationError::NotAnObject))
        ));
    }

    #[test]
    fn should_accumulate_multiple_actions() {
        let rule = Rule::builder()
            .schedule("@every 1m")
            .action(Action::new("a", "1"))
            .action(Action::new("b", "2"))
            .build()
            .unwrap();
        assert_eq!(rule.actions.len(), 2);
        assert!(rule.has_schedule());
        assert!(!rule.has_trigger());
    }

    #[test]
    fn should_skip_empty_fields_when_serialising() {
        let rule = Rule::builder().action(Action::new("a", "1")).build().unwrap();
        let json = serde_json::to_value(&rule).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"actions": [{"topic": "a", "payload": "1", "qos": 0, "retain": false}]})
        );
    }
}
