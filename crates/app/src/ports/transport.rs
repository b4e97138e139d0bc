//! Transport port: the message bus seen from the agent core.
//!
//! Inbound messages do not flow through this trait: the adapter pushes them
//! into a [`DeliveryQueue`](crate::delivery_queue::DeliveryQueue) it was
//! handed at construction. Reconnecting and re-subscribing after a dropped
//! connection is the adapter's job.

use std::future::Future;

use mqttrules_domain::error::MqttRulesError;

/// Outbound operations on the bus.
pub trait Transport: Send + Sync {
    /// Open the connection to the broker.
    fn connect(&self) -> impl Future<Output = Result<(), MqttRulesError>> + Send;

    /// Close the connection to the broker.
    fn disconnect(&self) -> impl Future<Output = Result<(), MqttRulesError>> + Send;

    /// Start receiving messages matching `topic`.
    fn subscribe(
        &self,
        topic: &str,
        qos: u8,
    ) -> impl Future<Output = Result<(), MqttRulesError>> + Send;

    /// Stop receiving messages matching `topic`.
    fn unsubscribe(&self, topic: &str) -> impl Future<Output = Result<(), MqttRulesError>> + Send;

    /// Publish `payload` on `topic`.
    fn publish(
        &self,
        topic: &str,
        qos: u8,
        retain: bool,
        payload: String,
    ) -> impl Future<Output = Result<(), MqttRulesError>> + Send;
}

impl<T: Transport> Transport for std::sync::Arc<T> {
    fn connect(&self) -> impl Future<Output = Result<(), MqttRulesError>> + Send {
        (**self).connect()
    }

    fn disconnect(&self) -> impl Future<Output = Result<(), MqttRulesError>> + Send {
        (**self).disconnect()
    }

    fn subscribe(
        &self,
        topic: &str,
        qos: u8,
    ) -> impl Future<Output = Result<(), MqttRulesError>> + Send {
        (**self).subscribe(topic, qos)
    }

    fn unsubscribe(&self, topic: &str) -> impl Future<Output = Result<(), MqttRulesError>> + Send {
        (**self).unsubscribe(topic)
    }

    fn publish(
        &self,
        topic: &str,
        qos: u8,
        retain: bool,
        payload: String,
    ) -> impl Future<Output = Result<(), MqttRulesError>> + Send {
        (**self).publish(topic, qos, retain, payload)
    }
}
