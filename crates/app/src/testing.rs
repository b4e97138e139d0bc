//! In-memory test doubles for the ports.

use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use mqttrules_domain::error::MqttRulesError;
use mqttrules_domain::recurrence::Recurrence;

use crate::ports::{ScheduleCallback, ScheduleHandle, Scheduler, Transport};

// ── Spy transport ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Connect,
    Disconnect,
    Subscribe(String),
    Unsubscribe(String),
    Publish {
        topic: String,
        qos: u8,
        retain: bool,
        payload: String,
    },
}

/// Records every call; operations on topics marked with
/// [`SpyTransport::fail_on`] return a transport error.
#[derive(Default)]
pub struct SpyTransport {
    calls: Mutex<Vec<Call>>,
    failing: Mutex<HashSet<String>>,
}

impl SpyTransport {
    pub fn fail_on(&self, topic: &str) {
        self.failing.lock().unwrap().insert(topic.to_string());
    }

    pub fn heal(&self, topic: &str) {
        self.failing.lock().unwrap().remove(topic);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn subscribes(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Subscribe(topic) => Some(topic),
                _ => None,
            })
            .collect()
    }

    pub fn unsubscribes(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Unsubscribe(topic) => Some(topic),
                _ => None,
            })
            .collect()
    }

    /// `(topic, payload)` of every publish, in order.
    pub fn published(&self) -> Vec<(String, String)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Publish { topic, payload, .. } => Some((topic, payload)),
                _ => None,
            })
            .collect()
    }

    /// `(qos, retain)` of the most recent publish.
    pub fn last_publish_flags(&self) -> Option<(u8, bool)> {
        self.calls().into_iter().rev().find_map(|call| match call {
            Call::Publish { qos, retain, .. } => Some((qos, retain)),
            _ => None,
        })
    }

    fn record(&self, call: Call, topic: Option<&str>) -> Result<(), MqttRulesError> {
        self.calls.lock().unwrap().push(call);
        match topic {
            Some(topic) if self.failing.lock().unwrap().contains(topic) => Err(
                MqttRulesError::Transport(Box::new(std::io::Error::other(format!(
                    "refused {topic}"
                )))),
            ),
            _ => Ok(()),
        }
    }
}

impl Transport for SpyTransport {
    fn connect(&self) -> impl Future<Output = Result<(), MqttRulesError>> + Send {
        let r = self.record(Call::Connect, None);
        async { r }
    }

    fn disconnect(&self) -> impl Future<Output = Result<(), MqttRulesError>> + Send {
        let r = self.record(Call::Disconnect, None);
        async { r }
    }

    fn subscribe(
        &self,
        topic: &str,
        _qos: u8,
    ) -> impl Future<Output = Result<(), MqttRulesError>> + Send {
        let r = self.record(Call::Subscribe(topic.to_string()), Some(topic));
        async { r }
    }

    fn unsubscribe(&self, topic: &str) -> impl Future<Output = Result<(), MqttRulesError>> + Send {
        let r = self.record(Call::Unsubscribe(topic.to_string()), Some(topic));
        async { r }
    }

    fn publish(
        &self,
        topic: &str,
        qos: u8,
        retain: bool,
        payload: String,
    ) -> impl Future<Output = Result<(), MqttRulesError>> + Send {
        let call = Call::Publish {
            topic: topic.to_string(),
            qos,
            retain,
            payload,
        };
        let r = self.record(call, Some(topic));
        async { r }
    }
}

// ── Manual scheduler ───────────────────────────────────────────

/// Keeps callbacks until a test fires them by hand.
#[derive(Default)]
pub struct ManualScheduler {
    next: AtomicU64,
    entries: Mutex<BTreeMap<u64, (String, ScheduleCallback)>>,
}

impl ManualScheduler {
    /// Specs of the entries that are still installed.
    pub fn active(&self) -> Vec<String> {
        self.entries
            .lock()
            .unwrap()
            .values()
            .map(|(spec, _)| spec.clone())
            .collect()
    }

    /// Run every installed callback once.
    pub fn fire_all(&self) {
        for (_, callback) in self.entries.lock().unwrap().values() {
            callback();
        }
    }
}

impl Scheduler for ManualScheduler {
    fn schedule(&self, recurrence: Recurrence, callback: ScheduleCallback) -> ScheduleHandle {
        let id = self.next.fetch_add(1, Ordering::Relaxed);
        self.entries
            .lock()
            .unwrap()
            .insert(id, (recurrence.to_string(), callback));
        ScheduleHandle::new(id)
    }

    fn cancel(&self, handle: ScheduleHandle) {
        self.entries.lock().unwrap().remove(&handle.id());
    }
}
