//! HTTP middleware (404 handler)

use axum::body::to_bytes;
use axum::extract::Request;
use axum::response::IntoResponse;

use super::types::ApiError;

/// Request bodies above this are not logged
const MAX_404_BODY_LOG: usize = 64 * 1024;

/// Handle unknown routes, logging the request at debug level
pub async fn handle_404(req: Request) -> impl IntoResponse {
    let method = req.method().clone();
    let uri = req.uri().clone();
    let not_found = ApiError::not_found(format!("No route for {} {}", method, uri.path()));

    if !tracing::enabled!(tracing::Level::DEBUG) {
        return not_found;
    }

    let headers: serde_json::Map<String, serde_json::Value> = req
        .headers()
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.to_string(), serde_json::Value::String(v.to_string())))
        })
        .collect();

    let body = match to_bytes(req.into_body(), MAX_404_BODY_LOG).await {
        Ok(bytes) if bytes.is_empty() => serde_json::Value::Null,
        Ok(bytes) => match std::str::from_utf8(&bytes) {
            Ok(text) => serde_json::Value::String(text.to_string()),
            Err(_) => serde_json::Value::String(format!("<binary {} bytes>", bytes.len())),
        },
        Err(_) => serde_json::Value::String("<unreadable>".to_string()),
    };

    let entry = serde_json::json!({
        "status": 404,
        "method": method.to_string(),
        "url": uri.to_string(),
        "headers": headers,
        "body": body,
    });
    if let Ok(pretty) = serde_json::to_string_pretty(&entry) {
        tracing::debug!("[404]\n{}", pretty);
    }

    not_found
}
