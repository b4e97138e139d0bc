//! MQTT adapter error types.

use std::time::Duration;

use mqttrules_domain::error::MqttRulesError;

/// Errors specific to the MQTT adapter.
#[derive(Debug, thiserror::Error)]
pub enum MqttError {
    /// No client exists: `connect` was never called or the session ended.
    #[error("not connected to MQTT broker")]
    NotConnected,

    /// The rumqttc client returned an error.
    #[error("MQTT client error")]
    Client(#[source] rumqttc::ClientError),

    /// The broker did not acknowledge the connection in time.
    #[error("no acknowledgement from MQTT broker within {0:?}")]
    ConnectTimeout(Duration),

    /// A QoS level outside 0..=2.
    #[error("invalid QoS level {0}")]
    InvalidQos(u8),
}

/// Boxed into [`MqttRulesError::Transport`] when crossing the port boundary.
impl From<MqttError> for MqttRulesError {
    fn from(err: MqttError) -> Self {
        Self::Transport(Box::new(err))
    }
}

#[cfg(test)]
mod tests {
    use mqttrules_domain::error::Chain;

    use super::*;

    #[test]
    fn should_display_not_connected() {
        assert_eq!(
            MqttError::NotConnected.to_string(),
            "not connected to MQTT broker"
        );
    }

    #[test]
    fn should_display_invalid_qos() {
        assert_eq!(MqttError::InvalidQos(7).to_string(), "invalid QoS level 7");
    }

    #[test]
    fn should_convert_into_transport_error() {
        let err: MqttRulesError = MqttError::ConnectTimeout(Duration::from_secs(3)).into();
        assert!(matches!(err, MqttRulesError::Transport(_)));
        assert!(
            Chain(&err)
                .to_string()
                .ends_with("no acknowledgement from MQTT broker within 3s")
        );
    }
}
