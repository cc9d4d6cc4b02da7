//! Generator input provisioning
//!
//! - `Downloader`: fetches one object from storage into a directory
//! - `FileProvisioner`: prepares the generator's search path from a template archive
//! - Directory helpers for output-dir reset and startup directory creation

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use bg_config::StorageSettings;

mod dirs;
mod provisioner;

#[cfg(feature = "s3")]
mod s3;

pub use dirs::{ensure_directories_from_env, reset_directory};
pub use provisioner::{unpack_archive, ArchiveFormat, TemplateArchiveProvisioner};

#[cfg(feature = "s3")]
pub use s3::S3Downloader;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Download of {key} failed: {message}")]
    Download { key: String, message: String },

    #[error("Unsupported archive format: {0}")]
    UnsupportedArchive(String),

    #[error("Failed to unpack {archive}: {message}")]
    Unpack { archive: PathBuf, message: String },

    #[error("IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Environment variable {0} is not set")]
    MissingEnv(String),

    #[error("Storage configuration error: {0}")]
    Configuration(String),
}

impl StorageError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn download(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Download {
            key: key.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// Fetches a named object from storage
#[async_trait]
pub trait Downloader: Send + Sync {
    /// Download `filename` into `dir`, returning the local path
    async fn download(&self, dir: &Path, filename: &str) -> Result<PathBuf>;

    /// Backend name
    fn name(&self) -> &str;
}

/// Creates the filesystem inputs the generator reads
#[async_trait]
pub trait FileProvisioner: Send + Sync {
    /// Create `path`, fetch `filename` into it and unpack it in place
    async fn create_structure_for(&self, path: &Path, filename: &str) -> Result<()>;
}

/// Create a downloader for the configured `storage.type`
pub async fn create_downloader(
    storage_type: &str,
    #[cfg_attr(not(feature = "s3"), allow(unused_variables))] settings: &StorageSettings,
) -> Result<Arc<dyn Downloader>> {
    match storage_type {
        #[cfg(feature = "s3")]
        "s3" => {
            let downloader = S3Downloader::from_settings(settings).await?;
            tracing::info!(bucket = %downloader.bucket(), "Using S3 template downloader");
            Ok(Arc::new(downloader))
        }
        other => Err(StorageError::Configuration(format!("Unknown storage type: {}", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unknown_storage_type() {
        let result = create_downloader("ftp", &StorageSettings::default()).await;
        assert!(matches!(result, Err(StorageError::Configuration(msg)) if msg.contains("ftp")));
    }
}
