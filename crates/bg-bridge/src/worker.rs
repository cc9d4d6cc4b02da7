//! Queue worker
//!
//! Each worker owns one broker connection, one handler and one correlation
//! table, and runs on a dedicated OS thread with a single-threaded runtime.
//! Deliveries are handled one at a time. Any broker fault ends the worker;
//! restarting is left to whatever supervises the process.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use futures::StreamExt;
use tracing::{error, info, info_span, warn, Instrument};

use bg_common::DIRECT_REPLY_QUEUE;
use bg_config::{BrokerSettings, ConfigStore, StorageSettings};
use bg_queue::{AmqpBroker, BrokerChannel, Delivery, DeliveryStream, QueueError};
use bg_storage::{create_downloader, TemplateArchiveProvisioner};

use crate::handler::TranslationHandler;
use crate::{BridgeError, Result};

/// Queue names a worker reads from and writes to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerQueues {
    pub in_queue: String,
    pub out_queue: String,
    pub status_queue: String,
}

impl WorkerQueues {
    pub fn from_config(config: &ConfigStore) -> Result<Self> {
        Ok(Self {
            in_queue: config.get_str("worker.in_queue")?,
            out_queue: config.get_str("worker.out_queue")?,
            status_queue: config.get_str("worker.status_queue")?,
        })
    }

    pub fn durable(&self) -> [&str; 3] {
        [&self.in_queue, &self.out_queue, &self.status_queue]
    }
}

pub struct QueueWorker {
    index: usize,
    config: ConfigStore,
    broker: BrokerSettings,
    storage: StorageSettings,
}

impl QueueWorker {
    pub fn new(index: usize, config: ConfigStore, broker: BrokerSettings, storage: StorageSettings) -> Self {
        Self {
            index,
            config,
            broker,
            storage,
        }
    }

    pub fn name(&self) -> String {
        format!("bridge-worker-{}", self.index)
    }

    /// Start the worker on its own thread
    pub fn spawn(self) -> std::io::Result<JoinHandle<Result<()>>> {
        thread::Builder::new().name(self.name()).spawn(move || {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .map_err(|e| BridgeError::Runtime(e.to_string()))?;

            runtime.block_on(self.run())
        })
    }

    /// Serve until a broker fault; only returns with the fault
    pub async fn run(self) -> Result<()> {
        let span = info_span!("worker", index = self.index);
        let result = self.serve().instrument(span.clone()).await;

        if let Err(e) = &result {
            let _guard = span.enter();
            error!(error = %e, "Worker stopped");
        }
        result
    }

    async fn serve(self) -> Result<()> {
        let config = Arc::new(self.config);
        let queues = WorkerQueues::from_config(&config)?;

        let storage_type = config.get_str("storage.type")?;
        let downloader = create_downloader(&storage_type, &self.storage).await?;
        let provisioner = Arc::new(TemplateArchiveProvisioner::new(downloader));
        let mut handler = TranslationHandler::new(config.clone(), provisioner);

        let name = format!("bridge-worker-{}", self.index);
        info!(host = %self.broker.host, port = self.broker.port, "Trying to connect to RabbitMQ");
        let broker = AmqpBroker::connect(&self.broker, &name).await?;

        for queue in queues.durable() {
            broker.declare_durable_queue(queue).await?;
        }

        let requests = broker
            .consume(&queues.in_queue, &format!("{}-requests", name), false)
            .await?;
        let replies = broker
            .consume(DIRECT_REPLY_QUEUE, &format!("{}-replies", name), true)
            .await?;

        info!(queue = %queues.in_queue, "Connected to RabbitMQ, waiting for messages");
        consume_loop(&mut handler, &broker, &queues.in_queue, requests, replies).await
    }
}

/// Dispatch deliveries from both consumers to the handler.
///
/// Returns when a consumer fails or ends, or when handling hits a fatal error.
pub async fn consume_loop(
    handler: &mut TranslationHandler,
    channel: &dyn BrokerChannel,
    in_queue: &str,
    mut requests: DeliveryStream,
    mut replies: DeliveryStream,
) -> Result<()> {
    loop {
        tokio::select! {
            item = requests.next() => {
                let delivery = next_delivery(item, in_queue)?;
                if let Err(e) = handler.on_request(channel, &delivery).await {
                    if e.is_fatal() {
                        return Err(e);
                    }
                    warn!(error = %e, "Failed to report request outcome");
                }
            }
            item = replies.next() => {
                let delivery = next_delivery(item, DIRECT_REPLY_QUEUE)?;
                if let Err(e) = handler.on_response(channel, &delivery.body).await {
                    if e.is_fatal() {
                        return Err(e);
                    }
                    warn!(error = %e, "Dropping completion notice");
                }
            }
        }
    }
}

fn next_delivery(item: Option<bg_queue::Result<Delivery>>, queue: &str) -> Result<Delivery> {
    match item {
        Some(Ok(delivery)) => Ok(delivery),
        Some(Err(e)) => Err(e.into()),
        None => Err(QueueError::consumer_closed(queue, "delivery stream ended").into()),
    }
}
