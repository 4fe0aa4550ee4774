//! At-least-once work queues.
//!
//! A delivery stays owned by the consumer that received it until it is
//! acknowledged, handed back for redelivery, or moved to the dead-letter
//! list. Handlers must therefore tolerate seeing the same body more than
//! once.

use std::sync::Mutex;

use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{debug, warn};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Queue '{queue}' is closed")]
    Closed { queue: String },

    #[error("Failed to publish to queue '{queue}': {reason}")]
    Publish { queue: String, reason: String },
}

/// Anything a message can be published to.
pub trait WorkQueue: Send + Sync {
    /// Publishes a message body and returns its message id.
    fn publish(&self, body: String) -> Result<String, QueueError>;
}

/// A message as handed to a consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub message_id: String,
    pub body: String,
    /// How many times this message has been received, including this time.
    pub receive_count: u32,
}

/// In-process queue backed by a crossbeam channel.
pub struct ChannelQueue {
    name: String,
    sender: Sender<Delivery>,
    receiver: Receiver<Delivery>,
    dead_letters: Mutex<Vec<Delivery>>,
}

impl ChannelQueue {
    pub fn new(name: impl Into<String>) -> Self {
        let (sender, receiver) = unbounded();
        Self {
            name: name.into(),
            sender,
            receiver,
            dead_letters: Mutex::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// A consumer handle. Every clone competes for the same messages.
    pub fn receiver(&self) -> Receiver<Delivery> {
        self.receiver.clone()
    }

    /// Messages waiting to be received.
    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    /// Puts a received message back for another attempt.
    pub fn redeliver(&self, mut delivery: Delivery) -> Result<(), QueueError> {
        delivery.receive_count += 1;
        debug!(
            "Redelivering {} on '{}' (attempt {})",
            delivery.message_id, self.name, delivery.receive_count
        );
        self.sender.send(delivery).map_err(|_| QueueError::Closed {
            queue: self.name.clone(),
        })
    }

    /// Parks a message that will not be retried.
    pub fn dead_letter(&self, delivery: Delivery) {
        warn!(
            "Dead-lettering {} on '{}' after {} receives",
            delivery.message_id, self.name, delivery.receive_count
        );
        match self.dead_letters.lock() {
            Ok(mut letters) => letters.push(delivery),
            Err(poisoned) => poisoned.into_inner().push(delivery),
        }
    }

    pub fn dead_letters(&self) -> Vec<Delivery> {
        match self.dead_letters.lock() {
            Ok(letters) => letters.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl WorkQueue for ChannelQueue {
    fn publish(&self, body: String) -> Result<String, QueueError> {
        let message_id = uuid::Uuid::new_v4().to_string();
        let delivery = Delivery {
            message_id: message_id.clone(),
            body,
            receive_count: 1,
        };
        self.sender.send(delivery).map_err(|_| QueueError::Closed {
            queue: self.name.clone(),
        })?;
        Ok(message_id)
    }
}
