//! Message body codecs
//!
//! Two closed variants, selected by the names used in configuration:
//! `json` and `msgpack`.

use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Unknown codec: {0}")]
    Unknown(String),

    #[error("Failed to decode {codec} body: {message}")]
    Decode { codec: &'static str, message: String },

    #[error("Failed to encode {codec} body: {message}")]
    Encode { codec: &'static str, message: String },

    #[error("Decoded {codec} body is not a map")]
    NotAMap { codec: &'static str },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Codec {
    Json,
    MsgPack,
}

impl Codec {
    pub fn name(&self) -> &'static str {
        match self {
            Codec::Json => "json",
            Codec::MsgPack => "msgpack",
        }
    }

    pub fn encode(&self, value: &Value) -> Result<Vec<u8>, CodecError> {
        match self {
            Codec::Json => serde_json::to_vec(value).map_err(|e| self.encode_error(e)),
            Codec::MsgPack => rmp_serde::to_vec_named(value).map_err(|e| self.encode_error(e)),
        }
    }

    pub fn decode(&self, body: &[u8]) -> Result<Value, CodecError> {
        match self {
            Codec::Json => serde_json::from_slice(body).map_err(|e| self.decode_error(e)),
            Codec::MsgPack => rmp_serde::from_slice(body).map_err(|e| self.decode_error(e)),
        }
    }

    pub fn encode_map(&self, map: &Map<String, Value>) -> Result<Vec<u8>, CodecError> {
        match self {
            Codec::Json => serde_json::to_vec(map).map_err(|e| self.encode_error(e)),
            Codec::MsgPack => rmp_serde::to_vec_named(map).map_err(|e| self.encode_error(e)),
        }
    }

    /// Decode a body that must be a map at the top level
    pub fn decode_map(&self, body: &[u8]) -> Result<Map<String, Value>, CodecError> {
        match self.decode(body)? {
            Value::Object(map) => Ok(map),
            _ => Err(CodecError::NotAMap { codec: self.name() }),
        }
    }

    fn encode_error(&self, e: impl std::fmt::Display) -> CodecError {
        CodecError::Encode {
            codec: self.name(),
            message: e.to_string(),
        }
    }

    fn decode_error(&self, e: impl std::fmt::Display) -> CodecError {
        CodecError::Decode {
            codec: self.name(),
            message: e.to_string(),
        }
    }
}

impl std::str::FromStr for Codec {
    type Err = CodecError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        CodecRegistry::resolve(name)
    }
}

/// Maps configured codec names to implementations
pub struct CodecRegistry;

impl CodecRegistry {
    pub fn resolve(name: &str) -> Result<Codec, CodecError> {
        match name {
            "json" => Ok(Codec::Json),
            "msgpack" => Ok(Codec::MsgPack),
            other => Err(CodecError::Unknown(other.to_string())),
        }
    }
}
