use std::sync::Arc;

use time::OffsetDateTime;

use crate::broker::BrokerError;

pub mod pv_simulator;

pub use pv_simulator::PvSimulator;

#[derive(Debug, Clone)]
pub struct Envelope<T> {
    pub payload: T,
    pub received_at: OffsetDateTime,
    /// Set when the broker has handed this message out before.
    pub redelivered: bool,
}

#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Broker(#[from] BrokerError),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("malformed message: {0}")]
    Malformed(String),
    #[error("report store write failed: {0}")]
    StoreWrite(String),
}

/// What the consume loop should tell the broker about a handled delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Processed and persisted.
    Ack,
    /// Unusable payload; acknowledged so it is never redelivered.
    Discard,
    /// Not persisted; hand it back to the queue.
    Requeue,
}

/// Destination for finished records.
#[async_trait::async_trait]
pub trait Sink<T>: Send + Sync {
    /// Durably append one item. Returning `Ok` means the item survives a crash.
    async fn append(&self, item: &T) -> Result<(), PipelineError>;
}

#[async_trait::async_trait]
impl<T, S> Sink<T> for Arc<S>
where
    T: Sync,
    S: Sink<T> + ?Sized,
{
    async fn append(&self, item: &T) -> Result<(), PipelineError> {
        (**self).append(item).await
    }
}
