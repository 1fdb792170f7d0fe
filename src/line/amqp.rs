use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, ExchangeDeclareOptions, QueueBindOptions,
    QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, Consumer, ExchangeKind};
use log::{debug, info, warn};
use uuid::Uuid;

use super::LineError;
use crate::models::LineMessage;

/// Topic exchange every line message goes through.
pub const EXCHANGE: &str = "pubsub_line";

const CONNECT_RETRY_DELAY: Duration = Duration::from_secs(1);

#[async_trait]
pub trait MessagePublisher: Send + Sync {
    async fn publish(&self, routing_key: &str, message: &LineMessage) -> Result<(), LineError>;
}

async fn open_channel(uri: &str) -> Result<(Connection, Channel), LineError> {
    let connection = Connection::connect(uri, ConnectionProperties::default()).await?;
    let channel = connection.create_channel().await?;
    channel
        .exchange_declare(
            EXCHANGE,
            ExchangeKind::Topic,
            ExchangeDeclareOptions {
                durable: false,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await?;
    Ok((connection, channel))
}

/// Keeps trying until the broker accepts the connection.
async fn open_channel_with_retry(uri: &str) -> (Connection, Channel) {
    loop {
        match open_channel(uri).await {
            Ok(opened) => return opened,
            Err(err) => {
                warn!("AMQP connection failed: {}, retrying in {:?}", err, CONNECT_RETRY_DELAY);
                tokio::time::sleep(CONNECT_RETRY_DELAY).await;
            }
        }
    }
}

pub struct AmqpPublisher {
    _connection: Connection,
    channel: Channel,
}

impl AmqpPublisher {
    pub async fn connect(uri: &str) -> Self {
        let (connection, channel) = open_channel_with_retry(uri).await;
        info!("AMQP publisher connected");
        Self {
            _connection: connection,
            channel,
        }
    }
}

#[async_trait]
impl MessagePublisher for AmqpPublisher {
    async fn publish(&self, routing_key: &str, message: &LineMessage) -> Result<(), LineError> {
        let body = serde_json::to_vec(message)?;
        let _confirm = self
            .channel
            .basic_publish(
                EXCHANGE,
                routing_key,
                BasicPublishOptions::default(),
                &body,
                BasicProperties::default().with_content_type("application/json".into()),
            )
            .await?;
        Ok(())
    }
}

/// Exclusive, auto-deleted queue bound to the given routing keys.
pub struct AmqpConsumer {
    _connection: Connection,
    consumer: Consumer,
}

impl AmqpConsumer {
    pub async fn connect(uri: &str, binding_keys: &[String]) -> Result<Self, LineError> {
        let (connection, channel) = open_channel_with_retry(uri).await;

        let queue = channel
            .queue_declare(
                "",
                QueueDeclareOptions {
                    exclusive: true,
                    auto_delete: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;

        for key in binding_keys {
            channel
                .queue_bind(
                    queue.name().as_str(),
                    EXCHANGE,
                    key,
                    QueueBindOptions::default(),
                    FieldTable::default(),
                )
                .await?;
            debug!("Bound queue {} to {}", queue.name(), key);
        }

        let tag = format!("line-{}", Uuid::new_v4().simple());
        let consumer = channel
            .basic_consume(
                queue.name().as_str(),
                &tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;
        info!("AMQP consumer {} subscribed to {} keys", tag, binding_keys.len());

        Ok(Self {
            _connection: connection,
            consumer,
        })
    }

    /// Next message body, acknowledged. `None` once the connection is gone.
    pub async fn next(&mut self) -> Option<Result<Vec<u8>, LineError>> {
        let delivery = match self.consumer.next().await? {
            Ok(delivery) => delivery,
            Err(err) => return Some(Err(err.into())),
        };
        if let Err(err) = delivery.acker.ack(BasicAckOptions::default()).await {
            return Some(Err(err.into()));
        }
        Some(Ok(delivery.data))
    }
}
