use futures::StreamExt;
use lapin::{
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions,
        BasicQosOptions, ConfirmSelectOptions, QueueDeclareOptions,
    },
    protocol::{AMQPErrorKind, AMQPHardError},
    types::FieldTable,
    BasicProperties, Connection, ConnectionProperties, Consumer,
};

use super::{Broker, BrokerError, Channel, Delivery, Message};
use crate::{config::BrokerConfig, pipeline::Disposition};

const PERSISTENT_DELIVERY_MODE: u8 = 2;

/// RabbitMQ (AMQP 0-9-1) link using the default exchange and one durable queue.
pub struct AmqpBroker {
    url: String,
    queue: String,
    prefetch: u16,
}

impl AmqpBroker {
    pub fn new(url: impl Into<String>, queue: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            queue: queue.into(),
            prefetch: 1,
        }
    }

    pub fn from_config(cfg: &BrokerConfig) -> Self {
        Self::new(&cfg.url, &cfg.queue)
    }
}

pub struct AmqpChannel {
    // Dropping the connection closes the channel.
    _connection: Connection,
    channel: lapin::Channel,
    queue: String,
    consumer: Option<Consumer>,
}

/// Errors caused by the connection going away are transient; the broker
/// refusing what we asked for (bad credentials, missing vhost, precondition
/// failures) is not.
fn classify(e: lapin::Error) -> BrokerError {
    let transient = match &e {
        lapin::Error::IOError(_)
        | lapin::Error::InvalidConnectionState(_)
        | lapin::Error::InvalidChannelState(_)
        | lapin::Error::MissingHeartbeatError => true,
        lapin::Error::ProtocolError(amqp) => matches!(
            amqp.kind(),
            AMQPErrorKind::Hard(AMQPHardError::CONNECTIONFORCED | AMQPHardError::INTERNALERROR)
        ),
        _ => false,
    };
    if transient {
        BrokerError::Unreachable(e.to_string())
    } else {
        BrokerError::Rejected(e.to_string())
    }
}

fn publish_properties(message: &Message) -> BasicProperties {
    let mut props = BasicProperties::default();
    if message.persistent {
        props = props.with_delivery_mode(PERSISTENT_DELIVERY_MODE);
    }
    if let Some(ts) = message.timestamp.and_then(|t| u64::try_from(t).ok()) {
        props = props.with_timestamp(ts);
    }
    props
}

fn delivered_message(body: Vec<u8>, props: &BasicProperties) -> Message {
    Message {
        body,
        timestamp: (*props.timestamp()).and_then(|t| i64::try_from(t).ok()),
        persistent: *props.delivery_mode() == Some(PERSISTENT_DELIVERY_MODE),
    }
}

#[async_trait::async_trait]
impl Broker for AmqpBroker {
    type Channel = AmqpChannel;

    async fn open(&self) -> Result<AmqpChannel, BrokerError> {
        let connection = Connection::connect(&self.url, ConnectionProperties::default())
            .await
            .map_err(classify)?;
        let channel = connection.create_channel().await.map_err(classify)?;

        channel
            .basic_qos(self.prefetch, BasicQosOptions::default())
            .await
            .map_err(classify)?;
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(classify)?;
        channel
            .queue_declare(
                &self.queue,
                QueueDeclareOptions {
                    durable: true,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(classify)?;

        tracing::info!(queue = %self.queue, prefetch = self.prefetch, "broker channel open");

        Ok(AmqpChannel {
            _connection: connection,
            channel,
            queue: self.queue.clone(),
            consumer: None,
        })
    }
}

#[async_trait::async_trait]
impl Channel for AmqpChannel {
    async fn publish(&mut self, message: &Message) -> Result<(), BrokerError> {
        let confirmation = self
            .channel
            .basic_publish(
                "",
                &self.queue,
                BasicPublishOptions::default(),
                &message.body,
                publish_properties(message),
            )
            .await
            .map_err(classify)?
            .await
            .map_err(classify)?;

        if confirmation.is_nack() {
            return Err(BrokerError::Publish("broker did not confirm message".to_string()));
        }
        Ok(())
    }

    async fn next_delivery(&mut self) -> Result<Option<Delivery>, BrokerError> {
        if self.consumer.is_none() {
            let consumer = self
                .channel
                .basic_consume(
                    &self.queue,
                    "",
                    BasicConsumeOptions::default(),
                    FieldTable::default(),
                )
                .await
                .map_err(classify)?;
            self.consumer = Some(consumer);
        }
        let Some(consumer) = self.consumer.as_mut() else {
            return Err(BrokerError::Closed);
        };

        match consumer.next().await {
            Some(Ok(d)) => Ok(Some(Delivery {
                tag: d.delivery_tag,
                message: delivered_message(d.data, &d.properties),
                redelivered: d.redelivered,
            })),
            Some(Err(e)) => Err(classify(e)),
            None => {
                self.consumer = None;
                Ok(None)
            }
        }
    }

    async fn settle(&mut self, tag: u64, disposition: Disposition) -> Result<(), BrokerError> {
        let res = match disposition {
            Disposition::Ack | Disposition::Discard => {
                self.channel.basic_ack(tag, BasicAckOptions::default()).await
            }
            Disposition::Requeue => {
                self.channel
                    .basic_nack(
                        tag,
                        BasicNackOptions {
                            requeue: true,
                            ..BasicNackOptions::default()
                        },
                    )
                    .await
            }
        };
        res.map_err(classify)
    }
}
