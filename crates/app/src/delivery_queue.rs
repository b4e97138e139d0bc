//! Single delivery queue feeding the dispatcher, backed by a tokio
//! [`mpsc`] channel.
//!
//! The transport pump and scheduler callbacks run on their own tasks and
//! only ever enqueue here; the dispatcher drains the [`Mailbox`] one item
//! at a time, so every store mutation happens on one logical thread.

use tokio::sync::mpsc;

use mqttrules_domain::rule::RuleKey;

/// Work item for the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// A message received from the bus.
    Message { topic: String, payload: String },
    /// A scheduled fire of a rule, tagged with the rule generation that
    /// installed the schedule.
    Scheduled { key: RuleKey, generation: u64 },
    /// Stop the dispatcher loop.
    Shutdown,
}

/// The dispatcher has stopped and no longer accepts work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("delivery queue closed")]
pub struct QueueClosed;

/// Sending half, cloned into the transport and every scheduler callback.
#[derive(Debug, Clone)]
pub struct DeliveryQueue {
    sender: mpsc::Sender<Inbound>,
}

/// Receiving half, drained by the dispatcher.
#[derive(Debug)]
pub struct Mailbox {
    receiver: mpsc::Receiver<Inbound>,
}

/// Create a queue holding at most `capacity` pending items.
///
/// # Panics
///
/// Panics if `capacity` is zero.
#[must_use]
pub fn channel(capacity: usize) -> (DeliveryQueue, Mailbox) {
    let (sender, receiver) = mpsc::channel(capacity);
    (DeliveryQueue { sender }, Mailbox { receiver })
}

impl DeliveryQueue {
    /// Enqueue a bus message, waiting for room.
    ///
    /// # Errors
    ///
    /// Returns [`QueueClosed`] once the mailbox is dropped.
    pub async fn deliver(
        &self,
        topic: impl Into<String>,
        payload: impl Into<String>,
    ) -> Result<(), QueueClosed> {
        self.sender
            .send(Inbound::Message {
                topic: topic.into(),
                payload: payload.into(),
            })
            .await
            .map_err(|_| QueueClosed)
    }

    /// Enqueue a bus message without waiting.
    ///
    /// A message that finds the queue full is dropped with a warning;
    /// returns whether it was enqueued.
    ///
    /// # Errors
    ///
    /// Returns [`QueueClosed`] once the mailbox is dropped.
    pub fn try_deliver(
        &self,
        topic: impl Into<String>,
        payload: impl Into<String>,
    ) -> Result<bool, QueueClosed> {
        let message = Inbound::Message {
            topic: topic.into(),
            payload: payload.into(),
        };
        match self.sender.try_send(message) {
            Ok(()) => Ok(true),
            Err(mpsc::error::TrySendError::Full(Inbound::Message { topic, .. })) => {
                tracing::warn!(%topic, "delivery queue full, dropping message");
                Ok(false)
            }
            Err(mpsc::error::TrySendError::Full(_)) => Ok(false),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(QueueClosed),
        }
    }

    /// Enqueue a scheduled fire without waiting.
    ///
    /// A fire that finds the queue full is dropped; returns whether it was
    /// enqueued.
    pub fn try_schedule(&self, key: RuleKey, generation: u64) -> bool {
        match self.sender.try_send(Inbound::Scheduled { key, generation }) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(Inbound::Scheduled { key, .. })) => {
                tracing::warn!(rule = %key, "delivery queue full, dropping scheduled fire");
                false
            }
            Err(_) => false,
        }
    }

    /// Ask the dispatcher loop to stop after the items already queued.
    ///
    /// # Errors
    ///
    /// Returns [`QueueClosed`] once the mailbox is dropped.
    pub async fn shutdown(&self) -> Result<(), QueueClosed> {
        self.sender
            .send(Inbound::Shutdown)
            .await
            .map_err(|_| QueueClosed)
    }
}

impl Mailbox {
    /// Wait for the next item; `None` once every sender is gone.
    pub async fn recv(&mut self) -> Option<Inbound> {
        self.receiver.recv().await
    }

    /// Take the next item if one is ready.
    pub fn try_recv(&mut self) -> Option<Inbound> {
        self.receiver.try_recv().ok()
    }
}
