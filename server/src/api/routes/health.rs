//! Health check endpoint

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use utoipa::ToSchema;

use crate::data::broker::BrokerClient;

#[derive(Clone)]
pub struct HealthApiState {
    pub broker: Arc<dyn BrokerClient>,
}

#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    /// `ok` or `unavailable`
    pub status: &'static str,
    pub version: &'static str,
    /// Broker backend name
    pub broker: &'static str,
    /// Broker error when unavailable
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

pub fn routes(broker: Arc<dyn BrokerClient>) -> Router<()> {
    Router::new()
        .route("/", get(health))
        .with_state(HealthApiState { broker })
}

/// Health check endpoint
#[utoipa::path(
    get,
    path = "/api/v1/health",
    tag = "health",
    responses(
        (status = 200, description = "Service and broker are healthy", body = HealthResponse),
        (status = 503, description = "Broker is unreachable", body = HealthResponse)
    )
)]
pub async fn health(State(state): State<HealthApiState>) -> impl IntoResponse {
    let broker = state.broker.backend_name();
    match state.broker.health_check().await {
        Ok(()) => (
            StatusCode::OK,
            Json(HealthResponse {
                status: "ok",
                version: env!("CARGO_PKG_VERSION"),
                broker,
                detail: None,
            }),
        ),
        Err(e) => {
            tracing::warn!(broker, error = %e, "Broker health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "unavailable",
                    version: env!("CARGO_PKG_VERSION"),
                    broker,
                    detail: Some(e.to_string()),
                }),
            )
        }
    }
}
