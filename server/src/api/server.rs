//! API server initialization

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::get;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use super::middleware;
use super::openapi::{openapi_json, swagger_ui_html};
use super::routes::{health, messages};
use crate::core::CoreApp;

/// Assemble the full HTTP surface around a wired application
pub fn build_router(app: &CoreApp) -> Router {
    let message_routes = messages::routes(
        app.publisher.clone(),
        app.fetcher.clone(),
        app.config.encoding,
        app.config.fetch.clone(),
    );

    Router::new()
        .merge(message_routes)
        .nest("/api/v1/health", health::routes(app.broker.clone()))
        .route("/api/openapi.json", get(openapi_json))
        .route("/api/docs", get(swagger_ui_html))
        .route("/api/docs/", get(swagger_ui_html))
        .fallback(middleware::handle_404)
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(app.config.server.body_limit_bytes))
}

pub struct ApiServer {
    app: CoreApp,
}

impl ApiServer {
    pub fn new(app: CoreApp) -> Self {
        Self { app }
    }

    /// Returns CoreApp for graceful shutdown
    pub async fn start(self) -> Result<CoreApp> {
        let app = self.app;
        let shutdown = app.shutdown.clone();

        let host = app.config.server.host.clone();
        let port = app.config.server.port;
        let router = build_router(&app);

        let listener = TcpListener::bind((host.as_str(), port))
            .await
            .with_context(|| format!("Failed to bind {}:{}", host, port))?;
        tracing::debug!(%host, port, "Listening");

        // Closing the broker wakes parked fetches so open connections drain
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                shutdown.wait().await;
                shutdown.shutdown().await;
            })
            .await?;

        Ok(app)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{Request, StatusCode, header};
    use serde_json::{Value, json};
    use tower::ServiceExt;

    use super::*;
    use crate::core::cli::CliConfig;
    use crate::core::config::AppConfig;
    use crate::data::broker::{BrokerClient, MemoryBroker};

    async fn test_app() -> (CoreApp, Arc<MemoryBroker>) {
        let broker = Arc::new(MemoryBroker::new());
        let config = AppConfig::load(&CliConfig::default()).unwrap();
        let app = CoreApp::with_broker(config, broker.clone());
        app.provision_default_unit().await.unwrap();
        (app, broker)
    }

    async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    fn get(uri: &str) -> Request<Body> {
        Request::get(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_publish_and_fetch_through_router() {
        let (app, _broker) = test_app().await;
        let router = build_router(&app);

        let request = Request::put("/?topic=orders.created")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"id":1}"#))
            .unwrap();
        let (status, body) = send(&router, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");

        let (status, body) = send(&router, get("/?topic=orders.created&wait_ms=50")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "message": r#"{"id":1}"# }));
    }

    #[tokio::test]
    async fn test_single_token_topic_uses_default_unit() {
        let (app, _broker) = test_app().await;
        let router = build_router(&app);

        let request = Request::put("/?topic=greetings")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(r#""hi""#))
            .unwrap();
        let (status, body) = send(&router, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["storage_unit"], "unified_stream");
    }

    #[tokio::test]
    async fn test_health_ok() {
        let (app, _broker) = test_app().await;
        let router = build_router(&app);

        let (status, body) = send(&router, get("/api/v1/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["broker"], "memory");
        assert!(body.get("detail").is_none());
    }

    #[tokio::test]
    async fn test_health_unavailable_after_close() {
        let (app, broker) = test_app().await;
        let router = build_router(&app);
        broker.close().await;

        let (status, body) = send(&router, get("/api/v1/health")).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["status"], "unavailable");
        assert!(body["detail"].is_string());
    }

    #[tokio::test]
    async fn test_unknown_route_is_json_404() {
        let (app, _broker) = test_app().await;
        let router = build_router(&app);

        let (status, body) = send(&router, get("/nope")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "not_found");
        assert_eq!(body["message"], "No route for GET /nope");
    }

    #[tokio::test]
    async fn test_openapi_and_docs_served() {
        let (app, _broker) = test_app().await;
        let router = build_router(&app);

        let (status, body) = send(&router, get("/api/openapi.json")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["info"]["title"], "Streamgate API");
        assert!(body["paths"].get("/").is_some());

        let response = router.clone().oneshot(get("/api/docs")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_body_limit_rejects_large_publish() {
        let (mut app, _broker) = test_app().await;
        app.config.server.body_limit_bytes = 16;
        let router = build_router(&app);

        let request = Request::put("/?topic=big")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(format!("\"{}\"", "x".repeat(64))))
            .unwrap();
        let response = router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }
}
