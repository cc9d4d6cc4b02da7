//! Bundle generation bridge
//!
//! Sits between the upstream request queue and the bundle generator:
//! - `formatter`: rule-driven translation of request fields
//! - `handler`: request and completion handling, correlation, status events
//! - `worker`: one broker connection serving requests and direct replies
//! - `supervisor`: runs the configured number of isolated workers

pub mod error;
pub mod formatter;
pub mod handler;
pub mod supervisor;
pub mod worker;

pub use error::{BridgeError, Result};
pub use formatter::{format_template, FormatError, Rule, RuleFormatter};
pub use handler::{CodecSlot, RequestOutcome, TranslationHandler};
pub use supervisor::Supervisor;
pub use worker::{consume_loop, QueueWorker, WorkerQueues};
