//! Message API endpoints
//!
//! `PUT /?topic=<t>` publishes the request body, `GET /?topic=<t>` returns
//! at most one message.

pub mod types;

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, header};
use axum::routing::put;
use axum::{Json, Router};

use types::{FetchResponse, PublishResponse};

use crate::api::extractors::TopicQuery;
use crate::api::types::ApiError;
use crate::core::config::FetchConfig;
use crate::domain::{DecodedPayload, FetchBridge, Payload, PayloadEncoding, PublishBridge};

/// Shared state for message endpoints
#[derive(Clone)]
pub struct MessagesApiState {
    pub publisher: Arc<PublishBridge>,
    pub fetcher: Arc<FetchBridge>,
    pub encoding: PayloadEncoding,
    pub fetch: FetchConfig,
}

/// Build message routes
pub fn routes(
    publisher: Arc<PublishBridge>,
    fetcher: Arc<FetchBridge>,
    encoding: PayloadEncoding,
    fetch: FetchConfig,
) -> Router<()> {
    let state = MessagesApiState {
        publisher,
        fetcher,
        encoding,
        fetch,
    };

    Router::new()
        .route("/", put(publish).get(fetch_one))
        .with_state(state)
}

/// Turn a request body into a payload according to the configured encoding
fn payload_from_body(
    encoding: PayloadEncoding,
    content_type: Option<&str>,
    body: Bytes,
) -> Result<Payload, ApiError> {
    if body.is_empty() {
        return Err(ApiError::bad_request("Missing message body"));
    }

    let payload = match encoding {
        PayloadEncoding::Raw => Payload::Raw(body.to_vec()),
        PayloadEncoding::Text if is_text(content_type) => {
            let text = String::from_utf8(body.to_vec()).map_err(|e| {
                ApiError::bad_request_with_detail("Body is not valid UTF-8", e.to_string())
            })?;
            Payload::Text(text)
        }
        PayloadEncoding::Text => {
            let value = serde_json::from_slice(&body).map_err(|e| {
                ApiError::bad_request_with_detail("Invalid JSON body", e.to_string())
            })?;
            Payload::Structured(value)
        }
    };

    if payload.is_missing() {
        return Err(ApiError::bad_request("Missing message body"));
    }
    Ok(payload)
}

fn is_text(content_type: Option<&str>) -> bool {
    content_type.is_some_and(|ct| ct.trim().to_ascii_lowercase().starts_with("text/"))
}

/// Publish a message under a topic
#[utoipa::path(
    put,
    path = "/",
    tag = "messages",
    params(crate::api::extractors::TopicQueryRaw),
    request_body(
        content = String,
        description = "Message body. JSON is compacted, JSON strings are unwrapped, text/* is stored as is",
        content_type = "application/json"
    ),
    responses(
        (status = 200, description = "Message stored", body = PublishResponse),
        (status = 400, description = "Missing topic or body, or invalid JSON", body = crate::api::types::ErrorBody),
        (status = 500, description = "Publish failed", body = crate::api::types::ErrorBody)
    )
)]
pub async fn publish(
    State(state): State<MessagesApiState>,
    query: TopicQuery,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<PublishResponse>, ApiError> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok());
    let payload = payload_from_body(state.encoding, content_type, body)?;

    let published = state
        .publisher
        .publish(&query.topic, payload)
        .await
        .map_err(|e| ApiError::bridge("Publish failed", e))?;

    tracing::debug!(
        topic = %query.topic,
        storage_unit = %published.storage_unit,
        id = %published.id,
        provisioned = published.provisioned,
        "Message published"
    );
    Ok(Json(published.into()))
}

/// Fetch and acknowledge at most one message for a topic
#[utoipa::path(
    get,
    path = "/",
    tag = "messages",
    params(crate::api::extractors::TopicQueryRaw),
    responses(
        (status = 200, description = "A message, or null when none arrived in time", body = FetchResponse),
        (status = 400, description = "Missing topic", body = crate::api::types::ErrorBody),
        (status = 500, description = "Fetch failed", body = crate::api::types::ErrorBody)
    )
)]
pub async fn fetch_one(
    State(state): State<MessagesApiState>,
    query: TopicQuery,
) -> Result<Json<FetchResponse>, ApiError> {
    let wait = state.fetch.wait(query.wait_ms);

    let message = state
        .fetcher
        .fetch_one(&query.topic, wait)
        .await
        .map_err(|e| ApiError::bridge("Fetch failed", e))?;

    Ok(Json(match message {
        Some(bytes) => DecodedPayload::decode(bytes).into(),
        None => FetchResponse::empty(),
    }))
}
