//! Bridge Configuration
//!
//! Two sources of configuration:
//! - `ConfigStore`: the nested config file (rules, queue names, codec selectors),
//!   addressed by dotted paths and memoized per path
//! - Process settings: broker and storage parameters read from the environment

use std::path::PathBuf;
use thiserror::Error;

mod settings;
mod store;

pub use settings::{env_or, env_or_parse, BrokerSettings, StorageSettings};
pub use store::{ConfigStore, DEFAULT_SEPARATOR};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration key not found: {path}")]
    NotFound { path: String },

    #[error("Configuration key {path} is not {expected}")]
    TypeMismatch { path: String, expected: &'static str },

    #[error("Failed to read configuration file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse configuration file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Environment variable {0} is required")]
    MissingEnv(String),
}

impl ConfigError {
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound { path: path.into() }
    }

    pub fn type_mismatch(path: impl Into<String>, expected: &'static str) -> Self {
        Self::TypeMismatch {
            path: path.into(),
            expected,
        }
    }
}

pub type Result<T> = std::result::Result<T, ConfigError>;
