//! Message API types

use serde::Serialize;
use utoipa::ToSchema;

use crate::domain::{DecodedPayload, Published};

/// Response for a successful publish
#[derive(Debug, Serialize, ToSchema)]
pub struct PublishResponse {
    /// Always `ok`
    pub status: &'static str,
    /// Storage unit that stored the message
    pub storage_unit: String,
    /// Broker message id
    pub id: String,
}

impl From<Published> for PublishResponse {
    fn from(published: Published) -> Self {
        Self {
            status: "ok",
            storage_unit: published.storage_unit,
            id: published.id,
        }
    }
}

/// Response for a fetch; `message` is null when nothing arrived in time
#[derive(Debug, Serialize, ToSchema)]
pub struct FetchResponse {
    pub message: Option<String>,
    /// `base64` when the payload was not valid UTF-8
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encoding: Option<String>,
}

impl FetchResponse {
    pub fn empty() -> Self {
        Self {
            message: None,
            encoding: None,
        }
    }
}

impl From<DecodedPayload> for FetchResponse {
    fn from(payload: DecodedPayload) -> Self {
        match payload {
            DecodedPayload::Text(text) => Self {
                message: Some(text),
                encoding: None,
            },
            DecodedPayload::Binary(encoded) => Self {
                message: Some(encoded),
                encoding: Some("base64".to_string()),
            },
        }
    }
}
