//! Translation handler
//!
//! Turns inbound generation requests into generator messages and completion
//! notices into status events. One handler per worker; it owns the worker's
//! codec cache and correlation table, so nothing here is shared.
//!
//! Request path:
//! 1. decode and extend the request with configured env vars and headers
//! 2. assign the id and remember its request token
//! 3. apply the rule set
//! 4. provision the template files and reset the output directory
//! 5. publish the generator message and a `GENERATION_LAUNCHED` status
//!
//! Any failure in steps 1-4 becomes a single `BUNDLE_ERROR` status. The
//! delivery is acked exactly once either way.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};

use bg_common::{
    render_value, CompletionNotice, Message, PhaseCode, StatusEvent, DIRECT_REPLY_QUEUE,
    ENGINE_FAILURE_MESSAGE, REQUEST_ID_HEADER,
};
use bg_config::ConfigStore;
use bg_queue::{BrokerChannel, Codec, CodecRegistry, Delivery, PublishProperties};
use bg_storage::{reset_directory, FileProvisioner};

use crate::formatter::{format_template, RuleFormatter};
use crate::{BridgeError, Result};

/// Optional config key overriding the request-id header name
pub const REQUEST_ID_HEADER_KEY: &str = "worker.request_id_header";

/// Resolves process environment variables
pub type EnvLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Logical channel a codec is configured for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CodecSlot {
    InDecoder,
    OutEncoder,
    StatusDecoder,
    StatusEncoder,
}

impl CodecSlot {
    pub fn config_key(&self) -> &'static str {
        match self {
            CodecSlot::InDecoder => "worker.in_decoder",
            CodecSlot::OutEncoder => "worker.out_encoder",
            CodecSlot::StatusDecoder => "worker.status_decoder",
            CodecSlot::StatusEncoder => "worker.status_encoder",
        }
    }
}

/// Result of handling one inbound request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestOutcome {
    /// Generator message and `GENERATION_LAUNCHED` published
    Launched { id: String },
    /// `BUNDLE_ERROR` published
    Rejected { id: String, reason: String },
}

pub struct TranslationHandler {
    config: Arc<ConfigStore>,
    formatter: RuleFormatter,
    provisioner: Arc<dyn FileProvisioner>,
    env: EnvLookup,
    codecs: HashMap<CodecSlot, Codec>,
    correlation: HashMap<String, String>,
}

impl TranslationHandler {
    pub fn new(config: Arc<ConfigStore>, provisioner: Arc<dyn FileProvisioner>) -> Self {
        Self {
            formatter: RuleFormatter::new(config.clone()),
            config,
            provisioner,
            env: Arc::new(|name| std::env::var(name).ok()),
            codecs: HashMap::new(),
            correlation: HashMap::new(),
        }
    }

    /// Replace the process environment lookup
    pub fn with_env_lookup<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        self.env = Arc::new(lookup);
        self
    }

    /// Request token recorded for `id`, if any
    pub fn correlation_for(&self, id: &str) -> Option<&str> {
        self.correlation.get(id).map(String::as_str)
    }

    /// Handle one inbound request and ack it.
    ///
    /// Only broker faults and configuration errors while reporting are
    /// returned; request failures are reported as `BUNDLE_ERROR`.
    pub async fn on_request(
        &mut self,
        channel: &dyn BrokerChannel,
        delivery: &Delivery,
    ) -> Result<RequestOutcome> {
        let handled = self.handle_request(channel, delivery).await;
        let acked = channel.ack(delivery.delivery_tag).await;

        let outcome = handled?;
        acked?;
        Ok(outcome)
    }

    async fn handle_request(
        &mut self,
        channel: &dyn BrokerChannel,
        delivery: &Delivery,
    ) -> Result<RequestOutcome> {
        match self.prepare(delivery).await {
            Ok((id, destination)) => {
                self.send_generator_message(channel, &destination).await?;
                self.send_status(channel, StatusEvent::phase(id.clone(), PhaseCode::GenerationLaunched))
                    .await?;
                info!(id = %id, "Generation launched");
                Ok(RequestOutcome::Launched { id })
            }
            Err(e) => {
                let id = self.inbound_request_id(delivery);
                let reason = e.to_string();
                error!(id = %id, error = %reason, "Generation request failed");
                self.send_status(channel, StatusEvent::bundle_error(id.clone(), reason.clone()))
                    .await?;
                Ok(RequestOutcome::Rejected { id, reason })
            }
        }
    }

    async fn prepare(&mut self, delivery: &Delivery) -> Result<(String, Message)> {
        let source = self.make_source_message(delivery)?;
        let id = source.get("id").map(render_value).unwrap_or_default();
        info!(id = %id, "Received generation request");

        let destination = self.formatter.format(&source)?;
        debug!(id = %id, fields = destination.len(), "Generator message formatted");

        let search_path = path_field(&destination, "searchpath")?;
        let archive = self.archive_name(&source)?;
        self.provisioner
            .create_structure_for(&search_path, &archive)
            .await?;

        let output_dir = path_field(&destination, "outputdir")?;
        reset_directory(&output_dir).await?;

        Ok((id, destination))
    }

    /// Decode, extend and assign the id of an inbound request
    pub fn make_source_message(&mut self, delivery: &Delivery) -> Result<Message> {
        let decoded = self.codec(CodecSlot::InDecoder)?.decode_map(&delivery.body)?;
        let mut message = self.extend_message(decoded, delivery.headers.as_ref())?;

        let header = self.request_id_header();
        let request_id = delivery
            .header(&header)
            .filter(|v| !v.is_null())
            .map(render_value);

        let id = match message.get("id").filter(|v| !v.is_null()) {
            Some(existing) => render_value(existing),
            None => {
                let token = request_id
                    .clone()
                    .ok_or_else(|| BridgeError::MissingField(header.clone()))?;
                message.insert("id".to_string(), Value::String(token.clone()));
                token
            }
        };

        if let Some(token) = request_id {
            self.correlation.insert(id, token);
        }

        Ok(message)
    }

    /// Merge configured env vars and headers into `message` under lower-cased names.
    ///
    /// Unset variables and absent headers become `null`; merged fields replace
    /// request fields of the same name.
    pub fn extend_message(
        &self,
        mut message: Message,
        headers: Option<&Map<String, Value>>,
    ) -> Result<Message> {
        for name in self.config.get_string_list("envs")? {
            let value = (self.env)(&name).map(Value::String).unwrap_or(Value::Null);
            message.insert(name.to_lowercase(), value);
        }

        for name in self.config.get_string_list("headers")? {
            let value = headers
                .and_then(|h| h.get(&name))
                .cloned()
                .unwrap_or(Value::Null);
            message.insert(name.to_lowercase(), value);
        }

        Ok(message)
    }

    /// Template archive name for a request, from `templates_archive_name`
    pub fn archive_name(&self, source: &Message) -> Result<String> {
        let template = self.config.get_str("templates_archive_name")?;
        Ok(format_template(&template, source)?)
    }

    /// Handle one completion notice from the generator
    pub async fn on_response(&mut self, channel: &dyn BrokerChannel, body: &[u8]) -> Result<PhaseCode> {
        let decoded = self.codec(CodecSlot::StatusDecoder)?.decode_map(body)?;
        let notice: CompletionNotice = serde_json::from_value(Value::Object(decoded))
            .map_err(|e| BridgeError::InvalidNotice(e.to_string()))?;

        let event = if notice.success {
            info!(id = %notice.uuid, "Generation completed");
            StatusEvent::phase(notice.uuid, PhaseCode::GenerationCompleted)
        } else {
            warn!(id = %notice.uuid, "Generator reported a failure");
            StatusEvent::bundle_error(notice.uuid, ENGINE_FAILURE_MESSAGE)
        };

        let phase = event.phase_code;
        self.send_status(channel, event).await?;
        Ok(phase)
    }

    /// Publish a status event, tagged with the id's request token
    pub async fn send_status(&mut self, channel: &dyn BrokerChannel, event: StatusEvent) -> Result<()> {
        let queue = self.config.get_str("worker.status_queue")?;
        let body = self
            .codec(CodecSlot::StatusEncoder)?
            .encode_map(&event.to_message())?;
        let token = self
            .correlation
            .get(&event.id)
            .cloned()
            .unwrap_or_else(|| event.id.clone());

        let properties = PublishProperties::persistent().with_header(REQUEST_ID_HEADER, token);
        channel.publish(&queue, &body, properties).await?;

        debug!(id = %event.id, phase = %event.phase_code, queue = %queue, "Status published");
        Ok(())
    }

    /// Publish the formatted message to the generator, asking for a direct reply
    pub async fn send_generator_message(
        &mut self,
        channel: &dyn BrokerChannel,
        message: &Message,
    ) -> Result<()> {
        let queue = self.config.get_str("worker.out_queue")?;
        let body = self.codec(CodecSlot::OutEncoder)?.encode_map(message)?;

        let properties = PublishProperties::persistent().with_reply_to(DIRECT_REPLY_QUEUE);
        channel.publish(&queue, &body, properties).await?;
        Ok(())
    }

    fn codec(&mut self, slot: CodecSlot) -> Result<Codec> {
        if let Some(codec) = self.codecs.get(&slot) {
            return Ok(*codec);
        }

        let name = self.config.get_str(slot.config_key())?;
        let codec = CodecRegistry::resolve(&name)?;
        self.codecs.insert(slot, codec);
        Ok(codec)
    }

    fn request_id_header(&self) -> String {
        match self.config.get_opt(REQUEST_ID_HEADER_KEY) {
            Ok(Some(Value::String(name))) => name,
            _ => REQUEST_ID_HEADER.to_string(),
        }
    }

    /// Id reported for a failed request: its request token, or empty
    fn inbound_request_id(&self, delivery: &Delivery) -> String {
        delivery
            .header(&self.request_id_header())
            .filter(|v| !v.is_null())
            .map(render_value)
            .unwrap_or_default()
    }
}

fn path_field(message: &Message, field: &str) -> Result<PathBuf> {
    message
        .get(field)
        .and_then(Value::as_str)
        .map(PathBuf::from)
        .ok_or_else(|| BridgeError::MissingField(field.to_string()))
}
