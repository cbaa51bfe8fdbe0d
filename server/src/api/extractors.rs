//! Query extractors for message routes

use axum::extract::{FromRequestParts, Query};
use axum::http::request::Parts;
use serde::Deserialize;
use utoipa::IntoParams;

use super::types::ApiError;

/// Raw query string of the message routes (internal use)
#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct TopicQueryRaw {
    /// Topic to publish to or fetch from
    topic: Option<String>,
    /// Alias for `topic`
    subject: Option<String>,
    /// Fetch wait budget in milliseconds (GET only)
    wait_ms: Option<u64>,
}

/// Topic extractor.
///
/// Accepts `topic` (or its alias `subject`) and an optional `wait_ms`.
/// Rejects a missing or empty topic with 400. The topic itself is not
/// validated here; the broker is the authority on subject syntax.
#[derive(Debug)]
pub struct TopicQuery {
    pub topic: String,
    pub wait_ms: Option<u64>,
}

impl<S> FromRequestParts<S> for TopicQuery
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Query(raw) = Query::<TopicQueryRaw>::from_request_parts(parts, state)
            .await
            .map_err(|rejection| {
                ApiError::bad_request_with_detail("Invalid query string", rejection.body_text())
            })?;

        let topic = raw
            .topic
            .or(raw.subject)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ApiError::bad_request("Missing required query parameter 'topic'"))?;

        Ok(Self {
            topic,
            wait_ms: raw.wait_ms,
        })
    }
}
