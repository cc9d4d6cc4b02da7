//! RabbitMQ broker on `lapin`
//!
//! One connection and one channel per worker. The connect parameters from
//! `BrokerSettings` (attempts, retry delay) apply to the initial connect only;
//! a connection lost afterwards surfaces as an error on the consumer streams
//! or on the next publish/ack and is not re-established here.

use async_trait::async_trait;
use futures::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, QueueDeclareOptions,
};
use lapin::types::{AMQPValue, FieldTable, LongString, ShortString};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use bg_config::BrokerSettings;

use crate::{BrokerChannel, Delivery, DeliveryStream, PublishProperties, QueueError, Result};

pub struct AmqpBroker {
    /// Kept open for as long as the channel is used
    _connection: Connection,
    channel: Channel,
}

impl AmqpBroker {
    /// Connect, retrying up to `connection_attempts` times `retry_delay` apart
    pub async fn connect(settings: &BrokerSettings, connection_name: &str) -> Result<Self> {
        let uri = settings.uri();
        let mut attempt = 0;

        let connection = loop {
            attempt += 1;
            let properties = ConnectionProperties::default()
                .with_connection_name(connection_name.to_string().into());

            match Connection::connect(&uri, properties).await {
                Ok(connection) => break connection,
                Err(e) if attempt < settings.connection_attempts => {
                    warn!(
                        host = %settings.host,
                        port = settings.port,
                        attempt = attempt,
                        max_attempts = settings.connection_attempts,
                        error = %e,
                        "RabbitMQ connection attempt failed, retrying"
                    );
                    tokio::time::sleep(settings.retry_delay).await;
                }
                Err(e) => {
                    return Err(QueueError::Connection(format!(
                        "RabbitMQ connection to {}:{} failed after {} attempts: {}",
                        settings.host, settings.port, attempt, e
                    )));
                }
            }
        };

        let channel = connection
            .create_channel()
            .await
            .map_err(|e| QueueError::Channel(format!("RabbitMQ channel creation failed: {}", e)))?;

        debug!(host = %settings.host, port = settings.port, "RabbitMQ channel opened");

        Ok(Self {
            _connection: connection,
            channel,
        })
    }

    pub async fn declare_durable_queue(&self, queue_name: &str) -> Result<()> {
        self.channel
            .queue_declare(
                queue_name,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| QueueError::Channel(format!("Queue declare for {} failed: {}", queue_name, e)))?;

        info!(queue = %queue_name, "Declared durable queue");
        Ok(())
    }

    /// Start consuming `queue_name`; `auto_ack` deliveries must not be acked again
    pub async fn consume(&self, queue_name: &str, consumer_tag: &str, auto_ack: bool) -> Result<DeliveryStream> {
        let consumer = self
            .channel
            .basic_consume(
                queue_name,
                consumer_tag,
                BasicConsumeOptions {
                    no_ack: auto_ack,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| QueueError::Channel(format!("basic_consume on {} failed: {}", queue_name, e)))?;

        let queue = queue_name.to_string();
        let stream = consumer.map(move |item| match item {
            Ok(delivery) => Ok(Delivery {
                delivery_tag: delivery.delivery_tag,
                headers: delivery.properties.headers().as_ref().map(field_table_to_map),
                body: delivery.data,
            }),
            Err(e) => Err(QueueError::consumer_closed(queue.clone(), e.to_string())),
        });

        Ok(stream.boxed())
    }
}

#[async_trait]
impl BrokerChannel for AmqpBroker {
    async fn publish(&self, routing_key: &str, body: &[u8], properties: PublishProperties) -> Result<()> {
        let mut amqp_properties = BasicProperties::default();
        if properties.persistent {
            amqp_properties = amqp_properties.with_delivery_mode(2);
        }
        if let Some(reply_to) = properties.reply_to {
            amqp_properties = amqp_properties.with_reply_to(ShortString::from(reply_to));
        }
        if !properties.headers.is_empty() {
            let mut table = FieldTable::default();
            for (name, value) in properties.headers {
                table.insert(ShortString::from(name), AMQPValue::LongString(LongString::from(value)));
            }
            amqp_properties = amqp_properties.with_headers(table);
        }

        let confirm = self
            .channel
            .basic_publish("", routing_key, BasicPublishOptions::default(), body, amqp_properties)
            .await
            .map_err(|e| QueueError::publish(routing_key, e.to_string()))?;

        confirm
            .await
            .map_err(|e| QueueError::publish(routing_key, format!("confirmation failed: {}", e)))?;

        Ok(())
    }

    async fn ack(&self, delivery_tag: u64) -> Result<()> {
        self.channel
            .basic_ack(delivery_tag, BasicAckOptions::default())
            .await
            .map_err(|e| QueueError::Ack {
                delivery_tag,
                message: e.to_string(),
            })
    }
}

fn field_table_to_map(table: &FieldTable) -> Map<String, Value> {
    table
        .inner()
        .iter()
        .map(|(name, value)| (name.as_str().to_string(), amqp_to_json(value)))
        .collect()
}

fn amqp_to_json(value: &AMQPValue) -> Value {
    match value {
        AMQPValue::Boolean(b) => Value::Bool(*b),
        AMQPValue::ShortShortInt(n) => Value::from(*n),
        AMQPValue::ShortShortUInt(n) => Value::from(*n),
        AMQPValue::ShortInt(n) => Value::from(*n),
        AMQPValue::ShortUInt(n) => Value::from(*n),
        AMQPValue::LongInt(n) => Value::from(*n),
        AMQPValue::LongUInt(n) => Value::from(*n),
        AMQPValue::LongLongInt(n) => Value::from(*n),
        AMQPValue::Timestamp(n) => Value::from(*n),
        AMQPValue::Float(n) => Value::from(*n),
        AMQPValue::Double(n) => Value::from(*n),
        AMQPValue::ShortString(s) => Value::String(s.as_str().to_string()),
        AMQPValue::LongString(s) => Value::String(String::from_utf8_lossy(s.as_bytes()).into_owned()),
        AMQPValue::FieldArray(items) => Value::Array(items.as_slice().iter().map(amqp_to_json).collect()),
        AMQPValue::FieldTable(table) => Value::Object(field_table_to_map(table)),
        _ => Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_table_conversion() {
        let mut table = FieldTable::default();
        table.insert("x-request-id".into(), AMQPValue::LongString("rid-1".into()));
        table.insert("x-retries".into(), AMQPValue::LongInt(2));
        table.insert("x-flag".into(), AMQPValue::Boolean(true));

        let map = field_table_to_map(&table);

        assert_eq!(map["x-request-id"], "rid-1");
        assert_eq!(map["x-retries"], 2);
        assert_eq!(map["x-flag"], true);
    }

    // Integration tests require RabbitMQ to be running

    #[tokio::test]
    #[ignore = "requires RabbitMQ running"]
    async fn test_rabbitmq_publish_consume_ack() {
        let broker = AmqpBroker::connect(&BrokerSettings::from_env(), "bg-queue-test")
            .await
            .unwrap();
        let queue = "bg-queue-test-roundtrip";
        broker.declare_durable_queue(queue).await.unwrap();

        let mut deliveries = broker.consume(queue, "bg-queue-test", false).await.unwrap();
        broker
            .publish(queue, b"{\"k\":\"v\"}", PublishProperties::persistent().with_header("x-request-id", "rid"))
            .await
            .unwrap();

        let delivery = deliveries.next().await.unwrap().unwrap();
        assert_eq!(delivery.body, b"{\"k\":\"v\"}".to_vec());
        assert_eq!(delivery.header("x-request-id"), Some(&Value::from("rid")));

        broker.ack(delivery.delivery_tag).await.unwrap();
    }
}
