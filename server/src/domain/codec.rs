//! Payload codec
//!
//! Turns request payloads into broker bytes and broker bytes back into
//! response values.

use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::BridgeError;

/// How request bodies are interpreted before publishing
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadEncoding {
    /// Body bytes are published unchanged
    Raw,
    /// Text bodies as UTF-8, JSON strings unwrapped, other JSON compacted
    #[default]
    Text,
}

impl fmt::Display for PayloadEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PayloadEncoding::Raw => write!(f, "raw"),
            PayloadEncoding::Text => write!(f, "text"),
        }
    }
}

/// Payload accepted by the publish bridge
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Raw(Vec<u8>),
    Text(String),
    Structured(Value),
}

impl Payload {
    /// Encode to the bytes stored on the broker
    pub fn into_bytes(self) -> Result<Vec<u8>, BridgeError> {
        match self {
            Payload::Raw(bytes) => Ok(bytes),
            Payload::Text(text) => Ok(text.into_bytes()),
            Payload::Structured(Value::String(text)) => Ok(text.into_bytes()),
            Payload::Structured(value) => serde_json::to_vec(&value)
                .map_err(|e| BridgeError::Validation(format!("Unserializable payload: {e}"))),
        }
    }

    /// Missing body: nothing, JSON null, or an empty JSON string
    pub fn is_missing(&self) -> bool {
        match self {
            Payload::Raw(bytes) => bytes.is_empty(),
            Payload::Text(text) => text.is_empty(),
            Payload::Structured(Value::Null) => true,
            Payload::Structured(Value::String(text)) => text.is_empty(),
            Payload::Structured(_) => false,
        }
    }
}

/// Broker bytes prepared for a JSON response
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedPayload {
    Text(String),
    /// Not UTF-8, base64 encoded
    Binary(String),
}

impl DecodedPayload {
    pub fn decode(bytes: Vec<u8>) -> Self {
        match String::from_utf8(bytes) {
            Ok(text) => DecodedPayload::Text(text),
            Err(e) => DecodedPayload::Binary(BASE64.encode(e.into_bytes())),
        }
    }
}
