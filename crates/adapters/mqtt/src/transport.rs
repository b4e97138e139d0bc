//! rumqttc implementation of [`Transport`].
//!
//! `connect` spawns a pump task that polls the event loop. Incoming
//! publishes are forwarded to the [`DeliveryQueue`] without waiting, and
//! dropped when it is full, so polling never stalls behind the agent. The
//! pump never calls back into the agent. After a reconnect without a persisted session the
//! tracked filters are subscribed again.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use rumqttc::{AsyncClient, Event, EventLoop, Outgoing, Packet, Publish, QoS};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use mqttrules_app::delivery_queue::DeliveryQueue;
use mqttrules_app::ports::Transport;
use mqttrules_domain::error::{Chain, MqttRulesError};

use crate::config::MqttConfig;
use crate::error::MqttError;

type Subscriptions = Arc<Mutex<BTreeMap<String, QoS>>>;

/// MQTT client speaking to a single broker.
pub struct MqttTransport {
    config: MqttConfig,
    queue: DeliveryQueue,
    client: Mutex<Option<AsyncClient>>,
    subscriptions: Subscriptions,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl MqttTransport {
    /// Create a transport that forwards broker messages into `queue`.
    ///
    /// Nothing touches the network until [`Transport::connect`].
    #[must_use]
    pub fn new(config: MqttConfig, queue: DeliveryQueue) -> Self {
        Self {
            config,
            queue,
            client: Mutex::new(None),
            subscriptions: Arc::default(),
            pump: Mutex::new(None),
        }
    }

    fn client(&self) -> Result<AsyncClient, MqttError> {
        self.client
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(MqttError::NotConnected)
    }

    fn stop_pump(&self) {
        let pump = self
            .pump
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(pump) = pump {
            pump.abort();
        }
    }
}

impl Drop for MqttTransport {
    fn drop(&mut self) {
        self.stop_pump();
    }
}

/// Map a numeric QoS level onto rumqttc's enum.
///
/// # Errors
///
/// Returns [`MqttError::InvalidQos`] for anything above 2.
pub fn qos_level(level: u8) -> Result<QoS, MqttError> {
    match level {
        0 => Ok(QoS::AtMostOnce),
        1 => Ok(QoS::AtLeastOnce),
        2 => Ok(QoS::ExactlyOnce),
        other => Err(MqttError::InvalidQos(other)),
    }
}

impl Transport for MqttTransport {
    async fn connect(&self) -> Result<(), MqttRulesError> {
        self.stop_pump();

        let options = self.config.mqtt_options();
        let (client, eventloop) = AsyncClient::new(options, self.config.channel_capacity);
        let (connected, mut state) = watch::channel(false);

        let pump = tokio::spawn(pump(
            eventloop,
            client.clone(),
            self.queue.clone(),
            Arc::clone(&self.subscriptions),
            connected,
            self.config.reconnect_delay(),
        ));
        *self.pump.lock().unwrap_or_else(PoisonError::into_inner) = Some(pump);
        *self.client.lock().unwrap_or_else(PoisonError::into_inner) = Some(client);

        let timeout = self.config.connect_timeout();
        let acknowledged = tokio::time::timeout(timeout, async {
            state.wait_for(|up| *up).await.map(|_| ())
        })
        .await;
        match acknowledged {
            Ok(Ok(())) => {
                tracing::info!(
                    host = %self.config.broker_host,
                    port = self.config.broker_port,
                    client_id = %self.config.client_id,
                    "connected to MQTT broker"
                );
                Ok(())
            }
            Ok(Err(_)) => {
                self.client.lock().unwrap_or_else(PoisonError::into_inner).take();
                Err(MqttError::NotConnected.into())
            }
            Err(_) => {
                self.stop_pump();
                self.client.lock().unwrap_or_else(PoisonError::into_inner).take();
                Err(MqttError::ConnectTimeout(timeout).into())
            }
        }
    }

    async fn disconnect(&self) -> Result<(), MqttRulesError> {
        let client = self
            .client
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(client) = client else {
            return Ok(());
        };
        let result = client.disconnect().await.map_err(MqttError::Client);
        if result.is_err() {
            self.stop_pump();
        } else {
            let pump = self
                .pump
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
            if let Some(pump) = pump {
                join_or_abort(pump, Duration::from_secs(1)).await;
            }
        }
        tracing::info!("disconnected from MQTT broker");
        result.map_err(MqttRulesError::from)
    }

    async fn subscribe(&self, topic: &str, qos: u8) -> Result<(), MqttRulesError> {
        let qos = qos_level(qos)?;
        let client = self.client()?;
        client
            .subscribe(topic, qos)
            .await
            .map_err(MqttError::Client)?;
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(topic.to_string(), qos);
        tracing::debug!(topic, ?qos, "subscribed");
        Ok(())
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), MqttRulesError> {
        let client = self.client()?;
        client.unsubscribe(topic).await.map_err(MqttError::Client)?;
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(topic);
        tracing::debug!(topic, "unsubscribed");
        Ok(())
    }

    async fn publish(
        &self,
        topic: &str,
        qos: u8,
        retain: bool,
        payload: String,
    ) -> Result<(), MqttRulesError> {
        let qos = qos_level(qos)?;
        let client = self.client()?;
        client
            .publish(topic, qos, retain, payload)
            .await
            .map_err(MqttError::Client)?;
        Ok(())
    }
}

async fn pump(
    mut eventloop: EventLoop,
    client: AsyncClient,
    queue: DeliveryQueue,
    subscriptions: Subscriptions,
    connected: watch::Sender<bool>,
    reconnect_delay: Duration,
) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                connected.send_replace(true);
                if !ack.session_present {
                    resubscribe(&client, &subscriptions);
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                if !forward(&queue, &publish) {
                    tracing::debug!("delivery queue closed, stopping MQTT event loop");
                    break;
                }
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => break,
            Ok(_) => {}
            Err(err) => {
                connected.send_replace(false);
                tracing::warn!(
                    error = %Chain(&err),
                    retry_in = ?reconnect_delay,
                    "MQTT connection error"
                );
                tokio::time::sleep(reconnect_delay).await;
            }
        }
    }
    connected.send_replace(false);
}

/// Wait up to `grace` for the pump to finish, then abort it.
async fn join_or_abort(mut pump: JoinHandle<()>, grace: Duration) {
    if tokio::time::timeout(grace, &mut pump).await.is_err() {
        tracing::debug!("MQTT event loop did not stop after disconnect, aborting it");
        pump.abort();
    }
}

/// Hand an incoming publish to the queue. Returns `false` once the queue
/// is closed.
fn forward(queue: &DeliveryQueue, publish: &Publish) -> bool {
    let topic = String::from_utf8_lossy(publish.topic.as_ref()).into_owned();
    let payload = String::from_utf8_lossy(&publish.payload).into_owned();
    tracing::trace!(%topic, "message received");
    queue.try_deliver(topic, payload).is_ok()
}

fn resubscribe(client: &AsyncClient, subscriptions: &Subscriptions) {
    let filters: Vec<(String, QoS)> = subscriptions
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .iter()
        .map(|(topic, qos)| (topic.clone(), *qos))
        .collect();
    for (topic, qos) in filters {
        if let Err(err) = client.try_subscribe(topic.as_str(), qos) {
            tracing::error!(%topic, error = %Chain(&err), "failed to restore subscription");
        }
    }
}
