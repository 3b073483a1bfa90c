pub mod config;
pub mod error;

use std::future::Future;

use futures_util::StreamExt;
use lapin::options::{
    BasicConsumeOptions, BasicPublishOptions, BasicQosOptions, ExchangeDeclareOptions,
    QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::{AMQPValue, FieldTable, ShortString};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind};

use sluice_api::TopicEnvelope;

pub use config::QueueConfig;
pub use error::QueueError;
pub use lapin::message::Delivery;
pub use lapin::options::{BasicAckOptions, BasicNackOptions};

/// One unacknowledged delivery in flight per consumer, system-wide.
pub const PREFETCH_COUNT: u16 = 1;

/// Messages expire from the work queue after 24 hours.
pub const MESSAGE_TTL_MS: i64 = 86_400_000;

/// Broker-side redelivery cap for failed messages.
pub const MAX_RETRIES: i32 = 3;

pub const DEFAULT_PRIORITY: u8 = 5;

const CONSUMER_TAG: &str = "sluice-consumer";

// ════════════════════════════════════════════════════════════════
//  QueueClient
// ════════════════════════════════════════════════════════════════

/// Durable connection to the message broker.
///
/// Declares the exchange/queue topology on connect and holds one
/// channel for both publishing and consuming. Not a pool: one client,
/// one connection, explicit lifecycle (connect → use → disconnect).
pub struct QueueClient {
    connection: Connection,
    channel: Channel,
    config: QueueConfig,
}

impl QueueClient {
    /// Connect and declare the topology: qos prefetch 1, durable direct
    /// exchange when one is named, durable queue with TTL and retry-cap
    /// arguments, queue/exchange binding under the routing key.
    pub async fn connect(config: &QueueConfig) -> Result<QueueClient, QueueError> {
        let connection = Connection::connect(&config.url, ConnectionProperties::default())
            .await
            .map_err(|source| QueueError::Connect { context: "dial", source })?;

        let channel = connection
            .create_channel()
            .await
            .map_err(|source| QueueError::Connect { context: "channel", source })?;

        channel
            .basic_qos(PREFETCH_COUNT, BasicQosOptions::default())
            .await
            .map_err(|source| QueueError::Connect { context: "qos", source })?;

        if !config.exchange.is_empty() {
            channel
                .exchange_declare(
                    &config.exchange,
                    ExchangeKind::Direct,
                    ExchangeDeclareOptions {
                        durable: true,
                        ..Default::default()
                    },
                    FieldTable::default(),
                )
                .await
                .map_err(|source| QueueError::Connect { context: "exchange declare", source })?;
        }

        channel
            .queue_declare(
                &config.queue,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                queue_arguments(),
            )
            .await
            .map_err(|source| QueueError::Connect { context: "queue declare", source })?;

        if !config.exchange.is_empty() {
            channel
                .queue_bind(
                    &config.queue,
                    &config.exchange,
                    &config.routing_key,
                    QueueBindOptions::default(),
                    FieldTable::default(),
                )
                .await
                .map_err(|source| QueueError::Connect { context: "bind", source })?;
        }

        tracing::info!(
            queue = %config.queue,
            exchange = %config.exchange,
            "connected to broker"
        );

        Ok(QueueClient {
            connection,
            channel,
            config: config.clone(),
        })
    }

    /// Close the broker connection. Idempotent; transport errors are
    /// logged and swallowed so shutdown can never crash here.
    pub async fn disconnect(&self) {
        if let Err(e) = self.connection.close(200, "shutting down").await {
            tracing::warn!(error = %e, "error closing broker connection");
        } else {
            tracing::info!("disconnected from broker");
        }
    }

    /// Publish an envelope as a persistent message with routing headers.
    pub async fn publish(
        &self,
        envelope: &TopicEnvelope,
        priority: u8,
    ) -> Result<(), QueueError> {
        let payload = serde_json::to_vec(envelope)?;

        let mut headers = FieldTable::default();
        headers.insert(
            ShortString::from("content_type"),
            AMQPValue::LongString("application/json".to_string().into()),
        );
        headers.insert(
            ShortString::from("topic_id"),
            AMQPValue::LongString(envelope.topic_id.clone().into()),
        );
        headers.insert(
            ShortString::from("service"),
            AMQPValue::LongString(envelope.service.clone().into()),
        );

        let properties = BasicProperties::default()
            .with_content_type(ShortString::from("application/json"))
            // delivery mode 2 = persistent, survives broker restart
            .with_delivery_mode(2)
            .with_priority(priority)
            .with_headers(headers);

        self.channel
            .basic_publish(
                &self.config.exchange,
                self.config.publish_routing_key(),
                BasicPublishOptions::default(),
                &payload,
                properties,
            )
            .await
            .map_err(QueueError::Publish)?
            .await
            .map_err(QueueError::Publish)?;

        tracing::debug!(
            topic_id = %envelope.topic_id,
            service = %envelope.service,
            "published envelope"
        );
        Ok(())
    }

    /// Drive the delivery stream, passing each delivery to `handler`.
    ///
    /// Runs until the stream ends or the surrounding task is cancelled.
    /// Acknowledge/reject belongs to the handler, against the delivery's
    /// own acker; the client never interprets handler outcomes. Each
    /// handler is awaited before the next delivery is taken, which
    /// together with prefetch 1 keeps processing strictly sequential.
    pub async fn consume<F, Fut>(&self, handler: F) -> Result<(), QueueError>
    where
        F: Fn(Delivery) -> Fut,
        Fut: Future<Output = ()>,
    {
        let mut consumer = self
            .channel
            .basic_consume(
                &self.config.queue,
                CONSUMER_TAG,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(QueueError::Consume)?;

        tracing::info!(queue = %self.config.queue, "consuming");

        while let Some(delivery) = consumer.next().await {
            match delivery {
                Ok(delivery) => handler(delivery).await,
                Err(e) => return Err(QueueError::Consume(e)),
            }
        }
        Ok(())
    }
}

/// Queue declare arguments: 24h message TTL, redelivery cap.
fn queue_arguments() -> FieldTable {
    let mut arguments = FieldTable::default();
    arguments.insert(
        ShortString::from("x-message-ttl"),
        AMQPValue::LongLongInt(MESSAGE_TTL_MS),
    );
    arguments.insert(
        ShortString::from("x-max-retries"),
        AMQPValue::LongInt(MAX_RETRIES),
    );
    arguments
}
