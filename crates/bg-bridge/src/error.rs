use thiserror::Error;

use bg_config::ConfigError;
use bg_queue::{CodecError, QueueError};
use bg_storage::StorageError;

use crate::formatter::FormatError;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Format(#[from] FormatError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error("Message field not found: {0}")]
    MissingField(String),

    #[error("Invalid completion notice: {0}")]
    InvalidNotice(String),

    #[error("Worker runtime error: {0}")]
    Runtime(String),
}

impl BridgeError {
    /// Errors that end the worker.
    ///
    /// Request failures are reported as `BUNDLE_ERROR` and never returned, so a
    /// configuration or codec-selection error seen here came from publishing.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            BridgeError::Queue(_)
                | BridgeError::Runtime(_)
                | BridgeError::Config(_)
                | BridgeError::Codec(CodecError::Unknown(_))
        )
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(BridgeError::from(QueueError::publish("status", "closed")).is_fatal());
        assert!(BridgeError::Runtime("no reactor".into()).is_fatal());
        assert!(BridgeError::from(ConfigError::not_found("worker.out_queue")).is_fatal());
        assert!(BridgeError::from(CodecError::Unknown("yaml".into())).is_fatal());

        assert!(!BridgeError::MissingField("id".into()).is_fatal());
        assert!(!BridgeError::InvalidNotice("missing field `success`".into()).is_fatal());
        assert!(!BridgeError::from(CodecError::NotAMap { codec: "json" }).is_fatal());
    }

    #[test]
    fn test_display_is_inner_message() {
        let err = BridgeError::from(FormatError::MissingField("platformName".into()));
        assert_eq!(err.to_string(), "Message field not found: platformName");
    }
}
