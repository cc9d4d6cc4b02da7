//! Bundle Generation Bridge
//!
//! Consumes generation requests from RabbitMQ, prepares the generator's
//! filesystem inputs, forwards the translated request to the bundle generator
//! and reports status events back upstream.
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `BUNDLE_CONFIG_FILE` | `config_dev.json` | JSON or TOML configuration file |
//! | `RABBITMQ_HOST` | `localhost` | Broker host |
//! | `RABBITMQ_PORT` | `5672` | Broker port |
//! | `RABBITMQ_CONNECTION_ATTEMPTS` | `5` | Initial connect attempts |
//! | `RABBITMQ_RETRY_DELAY` | `5` | Seconds between connect attempts |
//! | `S3_REGION` | - | Template bucket region |
//! | `S3_BUCKET` | - | Template bucket |
//! | `INFO_PORT` | `8080` | Port for `/healthz` and `/info` |
//! | `LOG_FORMAT` | `text` | `text` or `json` |
//! | `RUST_LOG` | `info` | Log filter |

mod info;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use bg_bridge::Supervisor;
use bg_config::{env_or, env_or_parse, BrokerSettings, ConfigStore, StorageSettings};
use bg_storage::ensure_directories_from_env;

use crate::info::AppInfo;

const DEFAULT_CONFIG_FILE: &str = "config_dev.json";

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_logging();

    let started = Utc::now();
    info!("Starting Bundle Generation Bridge");

    let config_path = env_or("BUNDLE_CONFIG_FILE", DEFAULT_CONFIG_FILE);
    let config = ConfigStore::new(&config_path);
    config
        .load()
        .with_context(|| format!("Failed to load configuration from {}", config_path))?;
    info!(path = %config_path, "Configuration loaded");

    let dirs = config.get_string_list("envs")?;
    ensure_directories_from_env(&dirs, |name| std::env::var(name).ok())?;

    let info_port: u16 = env_or_parse("INFO_PORT", 8080);
    let listener = TcpListener::bind(("0.0.0.0", info_port))
        .await
        .with_context(|| format!("Failed to bind info port {}", info_port))?;
    let app = info::router(AppInfo::from_env(started));
    info!(port = info_port, "Starting info server");
    let server_task = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "Info server stopped");
        }
    });

    let supervisor = Supervisor::new(config, BrokerSettings::from_env(), StorageSettings::from_env());
    let failed = tokio::task::spawn_blocking(move || supervisor.run()).await??;

    server_task.abort();

    if failed > 0 {
        warn!(failed = failed, "Workers exited with errors");
        anyhow::bail!("{} worker(s) failed", failed);
    }

    info!("All workers finished");
    Ok(())
}

fn init_logging() {
    let filter = EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into());

    if env_or("LOG_FORMAT", "text").eq_ignore_ascii_case("json") {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_thread_names(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_thread_names(true)
            .init();
    }
}
