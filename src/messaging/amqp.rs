//! AMQP implementation of the broker abstraction (lapin)
//!
//! One connection per process. Publishing and topology declaration share a
//! channel opened at connect time with publisher confirms enabled; each
//! queue subscription gets a dedicated channel so prefetch applies per
//! consumer, not globally.

use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicCancelOptions, BasicConsumeOptions, BasicNackOptions,
    BasicPublishOptions, BasicQosOptions, ConfirmSelectOptions, ExchangeDeclareOptions,
    QueueBindOptions, QueueDeclareOptions,
};
use lapin::publisher_confirm::Confirmation;
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind};
use tracing::{debug, info, warn};

use crate::messaging::broker::{
    BrokerError, Delivery, DeliveryAcker, MessageBroker, QueueSubscription,
};
use crate::messaging::topology::BrokerTopology;

const CHANNEL_CLOSE_REPLY_CODE: u16 = 200;

pub struct AmqpBroker {
    connection: Connection,
    publish_channel: Channel,
    exchange: String,
}

impl AmqpBroker {
    /// Connect to the broker and prepare the shared publish channel.
    pub async fn connect(uri: &str, exchange: &str) -> Result<Self, BrokerError> {
        let connection = Connection::connect(uri, ConnectionProperties::default())
            .await
            .map_err(|e| BrokerError::Connection(e.to_string()))?;

        let publish_channel = connection
            .create_channel()
            .await
            .map_err(|e| BrokerError::Channel(e.to_string()))?;
        publish_channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|e| BrokerError::Channel(e.to_string()))?;

        info!(exchange = %exchange, "AMQP broker connected");

        Ok(Self {
            connection,
            publish_channel,
            exchange: exchange.to_string(),
        })
    }

    pub fn is_connected(&self) -> bool {
        self.connection.status().connected()
    }
}

#[async_trait]
impl MessageBroker for AmqpBroker {
    async fn ensure_topology(&self, topology: &BrokerTopology) -> Result<(), BrokerError> {
        self.publish_channel
            .exchange_declare(
                &topology.exchange,
                ExchangeKind::Topic,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| BrokerError::Topology(e.to_string()))?;

        for binding in &topology.bindings {
            self.publish_channel
                .queue_declare(
                    &binding.queue,
                    QueueDeclareOptions {
                        durable: true,
                        ..Default::default()
                    },
                    FieldTable::default(),
                )
                .await
                .map_err(|e| BrokerError::Topology(e.to_string()))?;

            self.publish_channel
                .queue_bind(
                    &binding.queue,
                    &topology.exchange,
                    &binding.routing_key,
                    QueueBindOptions::default(),
                    FieldTable::default(),
                )
                .await
                .map_err(|e| BrokerError::Topology(e.to_string()))?;

            debug!(
                queue = %binding.queue,
                routing_key = %binding.routing_key,
                "declared queue and binding"
            );
        }

        info!(
            exchange = %topology.exchange,
            queues = topology.bindings.len(),
            "broker topology ensured"
        );
        Ok(())
    }

    async fn publish(&self, routing_key: &str, payload: Vec<u8>) -> Result<(), BrokerError> {
        let confirm = self
            .publish_channel
            .basic_publish(
                &self.exchange,
                routing_key,
                BasicPublishOptions::default(),
                &payload,
                BasicProperties::default()
                    .with_content_type("application/json".into())
                    .with_delivery_mode(2),
            )
            .await
            .map_err(|e| BrokerError::Publish(e.to_string()))?;

        let confirmation = confirm
            .await
            .map_err(|e| BrokerError::Publish(e.to_string()))?;
        if let Confirmation::Nack(_) = confirmation {
            return Err(BrokerError::Publish(format!(
                "broker rejected message for routing key '{}'",
                routing_key
            )));
        }
        Ok(())
    }

    async fn consume(
        &self,
        queue: &str,
        prefetch: u16,
    ) -> Result<Box<dyn QueueSubscription>, BrokerError> {
        let channel = self
            .connection
            .create_channel()
            .await
            .map_err(|e| BrokerError::Channel(e.to_string()))?;

        // Per-channel flow control: at most `prefetch` unacknowledged
        // deliveries in flight, never shared across channels.
        if let Err(e) = channel
            .basic_qos(prefetch, BasicQosOptions { global: false })
            .await
        {
            close_quietly(&channel, "qos setup failed").await;
            return Err(BrokerError::Channel(e.to_string()));
        }

        let consumer = match channel
            .basic_consume(
                queue,
                "",
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
        {
            Ok(consumer) => consumer,
            Err(e) => {
                close_quietly(&channel, "consume setup failed").await;
                return Err(BrokerError::Consume(e.to_string()));
            }
        };

        debug!(queue = %queue, prefetch = prefetch, "consumer channel opened");
        Ok(Box::new(AmqpQueueSubscription {
            queue: queue.to_string(),
            channel,
            consumer,
        }))
    }
}

async fn close_quietly(channel: &Channel, reason: &str) {
    if let Err(e) = channel.close(CHANNEL_CLOSE_REPLY_CODE, reason).await {
        debug!(error = %e, "channel close during cleanup failed");
    }
}

struct AmqpQueueSubscription {
    queue: String,
    channel: Channel,
    consumer: lapin::Consumer,
}

#[async_trait]
impl QueueSubscription for AmqpQueueSubscription {
    async fn next_delivery(&mut self) -> Option<Delivery> {
        match self.consumer.next().await {
            Some(Ok(delivery)) => Some(Delivery {
                payload: delivery.data,
                acker: Box::new(AmqpAcker {
                    acker: delivery.acker,
                }),
            }),
            Some(Err(e)) => {
                warn!(queue = %self.queue, error = %e, "delivery stream error, ending consume loop");
                None
            }
            None => None,
        }
    }

    async fn cancel(&mut self) -> Result<(), BrokerError> {
        let tag = self.consumer.tag();
        self.channel
            .basic_cancel(tag.as_str(), BasicCancelOptions::default())
            .await
            .map_err(|e| BrokerError::Channel(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), BrokerError> {
        if !self.channel.status().connected() {
            return Ok(());
        }
        self.channel
            .close(CHANNEL_CLOSE_REPLY_CODE, "consumer stopped")
            .await
            .map_err(|e| BrokerError::Channel(e.to_string()))
    }
}

struct AmqpAcker {
    acker: lapin::acker::Acker,
}

#[async_trait]
impl DeliveryAcker for AmqpAcker {
    async fn ack(self: Box<Self>) -> Result<(), BrokerError> {
        self.acker
            .ack(BasicAckOptions { multiple: false })
            .await
            .map_err(|e| BrokerError::Ack(e.to_string()))
    }

    async fn nack(self: Box<Self>, requeue: bool) -> Result<(), BrokerError> {
        self.acker
            .nack(BasicNackOptions {
                requeue,
                multiple: false,
            })
            .await
            .map_err(|e| BrokerError::Ack(e.to_string()))
    }
}
