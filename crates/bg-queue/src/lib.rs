//! Broker plumbing for the bridge
//!
//! - `Codec` / `CodecRegistry`: body encoders and decoders selected by name
//! - `BrokerChannel`: the publish/ack capability handlers talk to
//! - `Delivery`: a broker-neutral inbound message
//! - `amqp` (feature `rabbitmq`): RabbitMQ implementation on `lapin`

use std::collections::BTreeMap;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde_json::{Map, Value};
use thiserror::Error;

pub mod codec;

#[cfg(feature = "rabbitmq")]
pub mod amqp;

pub use codec::{Codec, CodecError, CodecRegistry};

#[cfg(feature = "rabbitmq")]
pub use amqp::AmqpBroker;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Failed to publish to {queue}: {message}")]
    Publish { queue: String, message: String },

    #[error("Failed to ack delivery {delivery_tag}: {message}")]
    Ack { delivery_tag: u64, message: String },

    #[error("Consumer for {queue} stopped: {message}")]
    ConsumerClosed { queue: String, message: String },
}

impl QueueError {
    pub fn publish(queue: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Publish {
            queue: queue.into(),
            message: message.into(),
        }
    }

    pub fn consumer_closed(queue: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConsumerClosed {
            queue: queue.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, QueueError>;

/// Message properties applied on publish
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishProperties {
    /// Delivery mode 2 (survives broker restart)
    pub persistent: bool,
    pub reply_to: Option<String>,
    pub headers: BTreeMap<String, String>,
}

impl PublishProperties {
    pub fn persistent() -> Self {
        Self {
            persistent: true,
            ..Default::default()
        }
    }

    pub fn with_reply_to(mut self, reply_to: impl Into<String>) -> Self {
        self.reply_to = Some(reply_to.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

/// A message received from the broker
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub delivery_tag: u64,
    pub body: Vec<u8>,
    /// `None` when the publisher sent no header table at all
    pub headers: Option<Map<String, Value>>,
}

impl Delivery {
    pub fn new(delivery_tag: u64, body: impl Into<Vec<u8>>) -> Self {
        Self {
            delivery_tag,
            body: body.into(),
            headers: None,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.headers
            .get_or_insert_with(Map::new)
            .insert(name.into(), value.into());
        self
    }

    pub fn header(&self, name: &str) -> Option<&Value> {
        self.headers.as_ref().and_then(|h| h.get(name))
    }
}

/// Stream of deliveries from one consumer; an `Err` item is a broker fault
pub type DeliveryStream = BoxStream<'static, Result<Delivery>>;

/// Publish/ack capability of an open broker channel
#[async_trait]
pub trait BrokerChannel: Send + Sync {
    /// Publish `body` on the default exchange with `routing_key` = queue name
    async fn publish(&self, routing_key: &str, body: &[u8], properties: PublishProperties) -> Result<()>;

    /// Acknowledge a manually-acked delivery
    async fn ack(&self, delivery_tag: u64) -> Result<()>;
}
