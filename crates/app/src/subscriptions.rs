//! Subscription multiplexer: many logical consumers, one bus subscription
//! per topic.
//!
//! Each parameter fed from a topic and each rule with a trigger registers
//! an interest. The transport is subscribed when a topic gains its first
//! interest and unsubscribed when it loses its last one.

use std::collections::{BTreeSet, HashMap};

use mqttrules_domain::error::{Chain, MqttRulesError, ValidationError};
use mqttrules_domain::rule::RuleKey;

use crate::ports::Transport;

/// Something that wants messages from a topic.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Consumer {
    Parameter(String),
    Rule(RuleKey),
}

impl std::fmt::Display for Consumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Parameter(name) => write!(f, "parameter {name}"),
            Self::Rule(key) => write!(f, "rule {key}"),
        }
    }
}

#[derive(Debug, Default)]
struct Interest {
    parameters: BTreeSet<String>,
    rules: BTreeSet<RuleKey>,
}

impl Interest {
    fn insert(&mut self, consumer: Consumer) -> bool {
        match consumer {
            Consumer::Parameter(name) => self.parameters.insert(name),
            Consumer::Rule(key) => self.rules.insert(key),
        }
    }

    fn remove(&mut self, consumer: &Consumer) -> bool {
        match consumer {
            Consumer::Parameter(name) => self.parameters.remove(name),
            Consumer::Rule(key) => self.rules.remove(key),
        }
    }

    fn is_empty(&self) -> bool {
        self.parameters.is_empty() && self.rules.is_empty()
    }
}

/// Topic → interested consumers, plus the subscribe/unsubscribe decisions.
#[derive(Debug)]
pub struct SubscriptionMultiplexer {
    records: HashMap<String, Interest>,
    qos: u8,
}

impl SubscriptionMultiplexer {
    /// Create an empty multiplexer subscribing with `qos`.
    #[must_use]
    pub fn new(qos: u8) -> Self {
        Self {
            records: HashMap::new(),
            qos,
        }
    }

    /// Register `consumer` on `topic`, subscribing if it is the first.
    ///
    /// Registering the same pair twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::EmptyTopic`] for an empty topic, or the
    /// transport error when the subscribe fails. Nothing is recorded then.
    #[tracing::instrument(skip(self, transport, consumer), fields(%consumer))]
    pub async fn ensure_interest<T: Transport>(
        &mut self,
        transport: &T,
        topic: &str,
        consumer: Consumer,
    ) -> Result<(), MqttRulesError> {
        if topic.is_empty() {
            return Err(ValidationError::EmptyTopic.into());
        }
        if let Some(interest) = self.records.get_mut(topic) {
            interest.insert(consumer);
            return Ok(());
        }

        if let Err(err) = transport.subscribe(topic, self.qos).await {
            tracing::error!(error = %Chain(&err), %topic, "failed to subscribe");
            return Err(err);
        }
        tracing::info!(%topic, "subscribed");

        let mut interest = Interest::default();
        interest.insert(consumer);
        self.records.insert(topic.to_string(), interest);
        Ok(())
    }

    /// Deregister `consumer` from `topic`, unsubscribing if it was the last.
    ///
    /// When the unsubscribe fails the empty record is kept, so the topic
    /// still reads as active and a later call retries the unsubscribe.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::EmptyTopic`] for an empty topic, or the
    /// transport error when the unsubscribe fails.
    #[tracing::instrument(skip(self, transport, consumer), fields(%consumer))]
    pub async fn remove_interest<T: Transport>(
        &mut self,
        transport: &T,
        topic: &str,
        consumer: &Consumer,
    ) -> Result<(), MqttRulesError> {
        if topic.is_empty() {
            return Err(ValidationError::EmptyTopic.into());
        }
        let Some(interest) = self.records.get_mut(topic) else {
            return Ok(());
        };
        interest.remove(consumer);
        if !interest.is_empty() {
            return Ok(());
        }

        if let Err(err) = transport.unsubscribe(topic).await {
            tracing::error!(error = %Chain(&err), %topic, "failed to unsubscribe, keeping record");
            return Err(err);
        }
        self.records.remove(topic);
        tracing::info!(%topic, "unsubscribed");
        Ok(())
    }

    /// Whether a record exists for `topic`.
    #[must_use]
    pub fn is_active(&self, topic: &str) -> bool {
        self.records.contains_key(topic)
    }

    /// Consumers of every record whose filter matches `topic`: parameters
    /// first, then rules, each in key order and without duplicates.
    #[must_use]
    pub fn consumers(&self, topic: &str) -> Vec<Consumer> {
        let mut parameters = BTreeSet::new();
        let mut rules = BTreeSet::new();
        for (filter, interest) in &self.records {
            if filter_matches(filter, topic) {
                parameters.extend(interest.parameters.iter().cloned());
                rules.extend(interest.rules.iter().cloned());
            }
        }
        parameters
            .into_iter()
            .map(Consumer::Parameter)
            .chain(rules.into_iter().map(Consumer::Rule))
            .collect()
    }
}

/// MQTT topic filter matching: `+` matches one level, a trailing `#` the
/// remaining levels (including none). Wildcards at the first level never
/// match `$`-prefixed topics.
#[must_use]
pub fn filter_matches(filter: &str, topic: &str) -> bool {
    if filter == topic {
        return true;
    }
    if topic.starts_with('$') && (filter.starts_with('+') || filter.starts_with('#')) {
        return false;
    }

    let mut levels = topic.split('/');
    for part in filter.split('/') {
        match part {
            "#" => return true,
            "+" => {
                if levels.next().is_none() {
                    return false;
                }
            }
            literal => {
                if levels.next() != Some(literal) {
                    return false;
                }
            }
        }
    }
    levels.next().is_none()
}
