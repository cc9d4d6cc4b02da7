use tracing::{error, info};

use bg_config::{BrokerSettings, ConfigStore, StorageSettings};

use crate::worker::QueueWorker;
use crate::{BridgeError, Result};

/// Config key holding the worker count
pub const CONCURRENCY_KEY: &str = "concurency";

/// Starts the configured number of workers and waits for all of them
pub struct Supervisor {
    config: ConfigStore,
    broker: BrokerSettings,
    storage: StorageSettings,
}

impl Supervisor {
    pub fn new(config: ConfigStore, broker: BrokerSettings, storage: StorageSettings) -> Self {
        Self {
            config,
            broker,
            storage,
        }
    }

    pub fn worker_count(&self) -> Result<usize> {
        Ok(self.config.get_u64(CONCURRENCY_KEY)? as usize)
    }

    /// Run every worker to completion, returning how many failed
    pub fn run(&self) -> Result<usize> {
        let count = self.worker_count()?;
        info!(workers = count, "Starting workers");

        let mut handles = Vec::with_capacity(count);
        for index in 0..count {
            let worker = QueueWorker::new(
                index,
                self.config.clone(),
                self.broker.clone(),
                self.storage.clone(),
            );
            let handle = worker
                .spawn()
                .map_err(|e| BridgeError::Runtime(format!("failed to start worker {}: {}", index, e)))?;
            handles.push((index, handle));
        }

        let mut failed = 0;
        for (index, handle) in handles {
            match handle.join() {
                Ok(Ok(())) => info!(worker = index, "Worker finished"),
                Ok(Err(e)) => {
                    failed += 1;
                    error!(worker = index, error = %e, "Worker failed");
                }
                Err(_) => {
                    failed += 1;
                    error!(worker = index, "Worker panicked");
                }
            }
        }

        Ok(failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config(workers: u64) -> ConfigStore {
        ConfigStore::from_value(json!({
            "concurency": workers,
            "storage": {"type": "ftp"},
            "worker": {
                "in_queue": "in",
                "out_queue": "out",
                "status_queue": "status",
            }
        }))
    }

    #[test]
    fn test_counts_failed_workers() {
        let supervisor = Supervisor::new(config(3), BrokerSettings::default(), StorageSettings::default());

        assert_eq!(supervisor.worker_count().unwrap(), 3);
        assert_eq!(supervisor.run().unwrap(), 3);
    }

    #[test]
    fn test_zero_workers() {
        let supervisor = Supervisor::new(config(0), BrokerSettings::default(), StorageSettings::default());
        assert_eq!(supervisor.run().unwrap(), 0);
    }

    #[test]
    fn test_missing_concurrency_is_config_error() {
        let supervisor = Supervisor::new(
            ConfigStore::from_value(json!({})),
            BrokerSettings::default(),
            StorageSettings::default(),
        );

        assert!(matches!(supervisor.run(), Err(BridgeError::Config(_))));
    }
}
