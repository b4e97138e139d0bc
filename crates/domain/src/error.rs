//! Common error types used across the workspace.
//!
//! Each layer defines its own typed errors and converts into
//! [`MqttRulesError`] via `#[from]`; adapters box their errors into
//! [`MqttRulesError::Transport`].

use crate::expression::ExpressionError;
use crate::recurrence::ScheduleError;

/// Top-level error for every operation of the rules agent.
#[derive(Debug, thiserror::Error)]
pub enum MqttRulesError {
    #[error("validation error")]
    Validation(#[from] ValidationError),

    #[error("not found")]
    NotFound(#[from] NotFoundError),

    #[error("expression error")]
    Expression(#[from] ExpressionError),

    #[error("schedule error")]
    Schedule(#[from] ScheduleError),

    #[error("malformed JSON payload")]
    Payload(#[from] serde_json::Error),

    #[error("transport error")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Input rejected before any state was touched.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("name must not be empty")]
    EmptyName,

    #[error("topic must not be empty")]
    EmptyTopic,

    #[error("rule must contain at least one action")]
    NoActions,

    #[error("invalid QoS level {0}, expected 0, 1 or 2")]
    InvalidQos(u8),

    #[error("definition must be a JSON object")]
    NotAnObject,
}

/// A lookup by key found nothing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{entity} {id} not found")]
pub struct NotFoundError {
    pub entity: &'static str,
    pub id: String,
}

/// Displays an error followed by each of its sources, joined by `": "`.
///
/// `tracing::error!(error = %Chain(&err), "...")`
pub struct Chain<'a>(pub &'a (dyn std::error::Error + 'a));

impl std::fmt::Display for Chain<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)?;
        let mut source = self.0.source();
        while let Some(cause) = source {
            write!(f, ": {cause}")?;
            source = cause.source();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_display_not_found_error() {
        let err = NotFoundError {
            entity: "Rule",
            id: "lights/evening".to_string(),
        };
        assert_eq!(err.to_string(), "Rule lights/evening not found");
    }

    #[test]
    fn should_wrap_validation_error() {
        let err: MqttRulesError = ValidationError::NoActions.into();
        assert!(matches!(
            err,
            MqttRulesError::Validation(ValidationError::NoActions)
        ));
    }

    #[test]
    fn should_keep_source_for_transport_error() {
        let io = std::io::Error::other("broker gone");
        let err = MqttRulesError::Transport(Box::new(io));
        let source = std::error::Error::source(&err).unwrap();
        assert_eq!(source.to_string(), "broker gone");
    }

    #[test]
    fn should_display_full_chain() {
        let io = std::io::Error::other("broker gone");
        let err = MqttRulesError::Transport(Box::new(io));
        assert_eq!(Chain(&err).to_string(), "transport error: broker gone");
    }

    #[test]
    fn should_display_invalid_qos() {
        assert_eq!(
            ValidationError::InvalidQos(3).to_string(),
            "invalid QoS level 3, expected 0, 1 or 2"
        );
    }
}
