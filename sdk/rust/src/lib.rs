//! # Streamgate client
//!
//! Thin async client for the Streamgate HTTP bridge. Publishes a message
//! under a topic with `PUT /?topic=<t>` and pulls at most one message
//! with `GET /?topic=<t>`.
//!
//! ```rust,no_run
//! # async fn example() -> Result<(), streamgate_client::ClientError> {
//! let client = streamgate_client::StreamgateClient::new("http://127.0.0.1:3000")?;
//!
//! client.publish_json("orders.created", &serde_json::json!({ "id": 1 })).await?;
//! if let Some(message) = client.fetch("orders.created").await? {
//!     println!("{}", message.as_text().unwrap_or_default());
//! }
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::header::CONTENT_TYPE;
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ClientError>;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid base url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{message} ({status}, {category})")]
    Api {
        status: u16,
        /// Server error category, e.g. `validation_error` or `broker_fault`
        category: String,
        message: String,
        detail: Option<String>,
    },

    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("invalid base64 payload: {0}")]
    Decode(#[from] base64::DecodeError),
}

impl ClientError {
    /// Broker or bridge detail attached to an API error
    pub fn detail(&self) -> Option<&str> {
        match self {
            Self::Api { detail, .. } => detail.as_deref(),
            _ => None,
        }
    }
}

/// Receipt returned by a successful publish
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PublishReceipt {
    pub status: String,
    pub storage_unit: String,
    pub id: String,
}

/// A fetched message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Text(String),
    /// Payload that was not valid UTF-8
    Binary(Vec<u8>),
}

impl Message {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Binary(_) => None,
        }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            Self::Text(text) => text.into_bytes(),
            Self::Binary(bytes) => bytes,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Health {
    pub status: String,
    pub version: String,
    pub broker: String,
    #[serde(default)]
    pub detail: Option<String>,
}

impl Health {
    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

#[derive(Deserialize)]
struct FetchBody {
    message: Option<String>,
    #[serde(default)]
    encoding: Option<String>,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
    message: String,
    #[serde(default)]
    detail: Option<String>,
}

#[derive(Clone)]
pub struct StreamgateClient {
    base_url: String,
    http: reqwest::Client,
}

impl StreamgateClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        Self::with_http_client(base_url, reqwest::Client::new())
    }

    /// Use a preconfigured HTTP client (timeouts, proxies, TLS)
    pub fn with_http_client(base_url: impl Into<String>, http: reqwest::Client) -> Result<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Url::parse(&base_url).map_err(|e| ClientError::InvalidUrl {
            url: base_url.clone(),
            reason: e.to_string(),
        })?;
        Ok(Self { base_url, http })
    }

    /// Publish a value serialized as JSON
    pub async fn publish_json<T: Serialize + ?Sized>(
        &self,
        topic: &str,
        value: &T,
    ) -> Result<PublishReceipt> {
        let body = serde_json::to_vec(value)?;
        self.publish(topic, "application/json", body).await
    }

    /// Publish text stored exactly as given
    pub async fn publish_text(
        &self,
        topic: &str,
        text: impl Into<String>,
    ) -> Result<PublishReceipt> {
        self.publish(topic, "text/plain; charset=utf-8", text.into().into_bytes())
            .await
    }

    /// Publish opaque bytes; the server must run with raw payload encoding
    pub async fn publish_bytes(&self, topic: &str, bytes: Vec<u8>) -> Result<PublishReceipt> {
        self.publish(topic, "application/octet-stream", bytes).await
    }

    async fn publish(
        &self,
        topic: &str,
        content_type: &str,
        body: Vec<u8>,
    ) -> Result<PublishReceipt> {
        let url = self.topic_url(topic, None)?;
        tracing::debug!(topic, bytes = body.len(), "Publishing message");

        let response = self
            .http
            .put(url)
            .header(CONTENT_TYPE, content_type)
            .body(body)
            .send()
            .await?;
        let response = Self::check(response).await?;
        Ok(response.json().await?)
    }

    /// Fetch at most one message using the server's default wait
    pub async fn fetch(&self, topic: &str) -> Result<Option<Message>> {
        self.fetch_inner(topic, None).await
    }

    /// Fetch at most one message, waiting up to `wait` for one to arrive
    pub async fn fetch_with_wait(&self, topic: &str, wait: Duration) -> Result<Option<Message>> {
        self.fetch_inner(topic, Some(wait)).await
    }

    async fn fetch_inner(&self, topic: &str, wait: Option<Duration>) -> Result<Option<Message>> {
        let url = self.topic_url(topic, wait)?;
        let response = self.http.get(url).send().await?;
        let body: FetchBody = Self::check(response).await?.json().await?;

        let message = match (body.message, body.encoding.as_deref()) {
            (None, _) => None,
            (Some(encoded), Some("base64")) => Some(Message::Binary(STANDARD.decode(encoded)?)),
            (Some(text), _) => Some(Message::Text(text)),
        };
        tracing::debug!(topic, found = message.is_some(), "Fetched");
        Ok(message)
    }

    /// Broker health; a 503 is reported as an unhealthy status, not an error
    pub async fn health(&self) -> Result<Health> {
        let url = format!("{}/api/v1/health", self.base_url);
        let response = self.http.get(url).send().await?;
        if response.status() == StatusCode::SERVICE_UNAVAILABLE {
            return Ok(response.json().await?);
        }
        Ok(Self::check(response).await?.json().await?)
    }

    fn topic_url(&self, topic: &str, wait: Option<Duration>) -> Result<Url> {
        let root = format!("{}/", self.base_url);
        let mut url = Url::parse(&root).map_err(|e| ClientError::InvalidUrl {
            url: root.clone(),
            reason: e.to_string(),
        })?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("topic", topic);
            if let Some(wait) = wait {
                pairs.append_pair("wait_ms", &wait.as_millis().to_string());
            }
        }
        Ok(url)
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let text = response.text().await.unwrap_or_default();
        let err = match serde_json::from_str::<ErrorBody>(&text) {
            Ok(body) => ClientError::Api {
                status: status.as_u16(),
                category: body.error,
                message: body.message,
                detail: body.detail,
            },
            Err(_) => ClientError::Api {
                status: status.as_u16(),
                category: "unknown".to_string(),
                message: status.to_string(),
                detail: (!text.is_empty()).then_some(text),
            },
        };
        tracing::debug!(error = %err, "Request rejected");
        Err(err)
    }
}

#[cfg(test)]
mod tests {
    use httpmock::prelude::*;
    use serde_json::json;

    use super::*;

    #[test]
    fn test_invalid_base_url() {
        let err = StreamgateClient::new("not a url").err().unwrap();
        assert!(matches!(err, ClientError::InvalidUrl { .. }));
    }

    #[tokio::test]
    async fn test_publish_json() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(PUT)
                    .path("/")
                    .query_param("topic", "orders.created")
                    .header("content-type", "application/json")
                    .body(r#"{"id":1}"#);
                then.status(200).json_body(json!({
                    "status": "ok",
                    "storage_unit": "unit_orders_created",
                    "id": "1"
                }));
            })
            .await;

        let client = StreamgateClient::new(server.base_url()).unwrap();
        let receipt = client
            .publish_json("orders.created", &json!({"id": 1}))
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(receipt.storage_unit, "unit_orders_created");
        assert_eq!(receipt.id, "1");
    }

    #[tokio::test]
    async fn test_publish_text_sets_content_type() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(PUT)
                    .query_param("topic", "notes")
                    .header("content-type", "text/plain; charset=utf-8")
                    .body("hello");
                then.status(200).json_body(json!({
                    "status": "ok",
                    "storage_unit": "unified_stream",
                    "id": "7"
                }));
            })
            .await;

        let client = StreamgateClient::new(format!("{}/", server.base_url())).unwrap();
        client.publish_text("notes", "hello").await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_fetch_text_and_empty() {
        let server = MockServer::start_async().await;
        let found = server
            .mock_async(|when, then| {
                when.method(GET)
                    .query_param("topic", "orders")
                    .query_param("wait_ms", "250");
                then.status(200).json_body(json!({ "message": "{\"id\":1}" }));
            })
            .await;
        let empty = server
            .mock_async(|when, then| {
                when.method(GET).query_param("topic", "quiet");
                then.status(200).json_body(json!({ "message": null }));
            })
            .await;

        let client = StreamgateClient::new(server.base_url()).unwrap();
        let message = client
            .fetch_with_wait("orders", Duration::from_millis(250))
            .await
            .unwrap();
        assert_eq!(message, Some(Message::Text(r#"{"id":1}"#.into())));
        assert!(client.fetch("quiet").await.unwrap().is_none());

        found.assert_async().await;
        empty.assert_async().await;
    }

    #[tokio::test]
    async fn test_fetch_binary() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).query_param("topic", "blobs");
                then.status(200)
                    .json_body(json!({ "message": "//4=", "encoding": "base64" }));
            })
            .await;

        let client = StreamgateClient::new(server.base_url()).unwrap();
        let message = client.fetch("blobs").await.unwrap().unwrap();
        assert_eq!(message.as_text(), None);
        assert_eq!(message.into_bytes(), vec![0xff, 0xfe]);
    }

    #[tokio::test]
    async fn test_api_error_carries_detail() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(PUT);
                then.status(500).json_body(json!({
                    "error": "broker_fault",
                    "message": "Publish failed",
                    "detail": "invalid subject 'orders.*'"
                }));
            })
            .await;

        let client = StreamgateClient::new(server.base_url()).unwrap();
        let err = client.publish_text("orders.*", "x").await.unwrap_err();
        match &err {
            ClientError::Api {
                status, category, ..
            } => {
                assert_eq!(*status, 500);
                assert_eq!(category, "broker_fault");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(err.detail().unwrap().contains("orders.*"));
    }

    #[tokio::test]
    async fn test_non_json_error_body() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET);
                then.status(502).body("bad gateway");
            })
            .await;

        let client = StreamgateClient::new(server.base_url()).unwrap();
        let err = client.fetch("a").await.unwrap_err();
        assert!(matches!(err, ClientError::Api { status: 502, .. }));
        assert_eq!(err.detail(), Some("bad gateway"));
    }

    #[tokio::test]
    async fn test_health_unavailable_is_not_an_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/api/v1/health");
                then.status(503).json_body(json!({
                    "status": "unavailable",
                    "version": "0.1.0",
                    "broker": "redis",
                    "detail": "connection refused"
                }));
            })
            .await;

        let client = StreamgateClient::new(server.base_url()).unwrap();
        let health = client.health().await.unwrap();
        assert!(!health.is_ok());
        assert_eq!(health.broker, "redis");
        assert_eq!(health.detail.as_deref(), Some("connection refused"));
    }
}
