use std::path::{Path, PathBuf};

use async_trait::async_trait;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::DisplayErrorContext;
use tracing::debug;

use bg_config::StorageSettings;

use crate::{Downloader, Result, StorageError};

/// Downloads template archives from one S3 bucket
pub struct S3Downloader {
    client: aws_sdk_s3::Client,
    bucket: String,
}

impl S3Downloader {
    pub fn new(client: aws_sdk_s3::Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }

    pub async fn from_settings(settings: &StorageSettings) -> Result<Self> {
        let bucket = settings
            .require_bucket()
            .map_err(|_| StorageError::MissingEnv("S3_BUCKET".to_string()))?
            .to_string();

        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(region) = &settings.region {
            loader = loader.region(Region::new(region.clone()));
        }
        let config = loader.load().await;

        Ok(Self::new(aws_sdk_s3::Client::new(&config), bucket))
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

#[async_trait]
impl Downloader for S3Downloader {
    async fn download(&self, dir: &Path, filename: &str) -> Result<PathBuf> {
        let target = dir.join(filename);
        debug!(bucket = %self.bucket, key = %filename, target = %target.display(), "Downloading object");

        let object = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(filename)
            .send()
            .await
            .map_err(|e| StorageError::download(filename, DisplayErrorContext(&e).to_string()))?;

        let bytes = object
            .body
            .collect()
            .await
            .map_err(|e| StorageError::download(filename, e.to_string()))?
            .into_bytes();

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::io(parent, e))?;
        }
        tokio::fs::write(&target, &bytes)
            .await
            .map_err(|e| StorageError::io(&target, e))?;

        Ok(target)
    }

    fn name(&self) -> &str {
        "s3"
    }
}
