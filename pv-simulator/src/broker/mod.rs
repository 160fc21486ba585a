//! Link to the durable work queue shared by the meter and the PV simulator.
//!
//! A [`Broker`] opens channels; a [`Channel`] publishes persistent messages and
//! hands out deliveries one at a time (prefetch 1) that stay unacknowledged
//! until [`Channel::settle`] is called.

use grid_client::domain::Reading;
use tokio_util::sync::CancellationToken;

use crate::pipeline::Disposition;

mod amqp;
mod memory;
mod retry;

pub use amqp::{AmqpBroker, AmqpChannel};
pub use memory::{MemoryBroker, MemoryChannel};
pub use retry::RetryPolicy;

#[derive(thiserror::Error, Debug, Clone)]
pub enum BrokerError {
    #[error("broker unreachable: {0}")]
    Unreachable(String),
    #[error("broker channel closed")]
    Closed,
    #[error("broker rejected request: {0}")]
    Rejected(String),
    #[error("publish failed: {0}")]
    Publish(String),
    #[error("consume failed: {0}")]
    Consume(String),
    #[error("cancelled")]
    Cancelled,
}

impl BrokerError {
    /// Connectivity problems that a reconnect can fix.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unreachable(_) | Self::Closed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub body: Vec<u8>,
    /// Unix seconds of the event the body describes.
    pub timestamp: Option<i64>,
    pub persistent: bool,
}

impl From<&Reading> for Message {
    fn from(r: &Reading) -> Self {
        Self {
            body: r.body().into_bytes(),
            timestamp: Some(r.unix_timestamp()),
            persistent: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Delivery {
    pub tag: u64,
    pub message: Message,
    pub redelivered: bool,
}

#[async_trait::async_trait]
pub trait Broker: Send + Sync {
    type Channel: Channel;

    /// One attempt at connecting, opening a channel and declaring the queue.
    async fn open(&self) -> Result<Self::Channel, BrokerError>;
}

#[async_trait::async_trait]
pub trait Channel: Send {
    /// Returns once the broker has taken responsibility for the message.
    async fn publish(&mut self, message: &Message) -> Result<(), BrokerError>;

    /// Wait for the next delivery. `Ok(None)` means the broker ended the
    /// consumer and the channel should be reopened.
    async fn next_delivery(&mut self) -> Result<Option<Delivery>, BrokerError>;

    async fn settle(&mut self, tag: u64, disposition: Disposition) -> Result<(), BrokerError>;
}

/// Open a channel, retrying transient failures according to `policy`.
pub async fn connect<B: Broker>(
    broker: &B,
    policy: &RetryPolicy,
    shutdown: &CancellationToken,
) -> Result<B::Channel, BrokerError> {
    policy.run("broker connect", shutdown, || broker.open()).await
}
