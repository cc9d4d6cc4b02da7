use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use chrono::Utc;

// ============================================================================
// Core Message Types
// ============================================================================

/// An open field map flowing through the bridge.
///
/// Requests, generator messages and completion notices have no fixed schema
/// beyond what the configured rules reference, so every stage works on a
/// plain JSON object and produces a new one.
pub type Message = Map<String, Value>;

/// Header carrying the upstream request token
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// RabbitMQ direct reply-to pseudo queue
pub const DIRECT_REPLY_QUEUE: &str = "amq.rabbitmq.reply-to";

/// Error code attached to every BUNDLE_ERROR status
pub const GENERIC_ERROR_CODE: &str = "GENERIC_ERROR";

/// Error message published when the generation engine reports a failure
pub const ENGINE_FAILURE_MESSAGE: &str = "Got error from BundleGen";

// ============================================================================
// Status Types
// ============================================================================

/// Lifecycle phase reported on the status queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PhaseCode {
    GenerationRequested,
    GenerationLaunched,
    GenerationCompleted,
    BundleError,
}

impl PhaseCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PhaseCode::GenerationRequested => "GENERATION_REQUESTED",
            PhaseCode::GenerationLaunched => "GENERATION_LAUNCHED",
            PhaseCode::GenerationCompleted => "GENERATION_COMPLETED",
            PhaseCode::BundleError => "BUNDLE_ERROR",
        }
    }
}

impl std::fmt::Display for PhaseCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusError {
    pub code: String,
    pub message: String,
}

/// Status event published back to the originating system
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusEvent {
    pub id: String,
    pub phase_code: PhaseCode,
    pub message_timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<StatusError>,
}

impl StatusEvent {
    pub fn phase(id: impl Into<String>, phase_code: PhaseCode) -> Self {
        Self {
            id: id.into(),
            phase_code,
            message_timestamp: utc_timestamp_ms(),
            error: None,
        }
    }

    pub fn bundle_error(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            phase_code: PhaseCode::BundleError,
            message_timestamp: utc_timestamp_ms(),
            error: Some(StatusError {
                code: GENERIC_ERROR_CODE.to_string(),
                message: message.into(),
            }),
        }
    }

    /// Convert into the open message shape handed to the status encoder
    pub fn to_message(&self) -> Message {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            // A struct with named fields always serializes to an object
            _ => Message::new(),
        }
    }
}

/// Completion notice sent by the generation engine over the direct-reply channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionNotice {
    pub success: bool,
    pub uuid: String,
    /// Engine-specific fields we pass through untouched
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

// ============================================================================
// Helpers
// ============================================================================

/// Milliseconds since the Unix epoch, UTC
pub fn utc_timestamp_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Render a value as the text substituted into templates and headers.
///
/// Strings are used verbatim, `null` becomes the empty string and every
/// other value uses its compact JSON text.
pub fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
