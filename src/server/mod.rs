//! HTTP layer: request routing and error mapping
//!
//! Thin glue over the runtime: extracts the bearer token, decodes the
//! body, and maps `GatewayError` variants to status codes and the
//! standard error body. All semantics live in the pipeline and below.

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::info;

use crate::error::GatewayError;
use crate::model::{ErrorResponse, IngestRequest};
use crate::runtime::Runtime;

pub fn router(runtime: Arc<Runtime>) -> Router {
    Router::new()
        .route("/v1/logs:ingest", post(ingest_logs))
        .route("/v1/admin/flush", post(admin_flush))
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .with_state(runtime)
}

/// Bind and serve until the task is cancelled.
pub async fn run(runtime: Arc<Runtime>) -> anyhow::Result<()> {
    let addr = runtime.config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %addr, "HTTP server listening");
    axum::serve(listener, router(runtime)).await?;
    Ok(())
}

/// Wrapper so `GatewayError` can flow out of handlers with `?`.
struct ApiError(GatewayError);

impl From<GatewayError> for ApiError {
    fn from(err: GatewayError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = ErrorResponse {
            error: self.0.code().to_string(),
            message: self.0.to_string(),
            details: self.0.details(),
        };
        let mut response = (status, Json(body)).into_response();
        if let Some(retry_after) = self.0.retry_after() {
            if let Ok(value) = retry_after.to_string().parse() {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
}

async fn ingest_logs(
    State(runtime): State<Arc<Runtime>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let token = runtime.auth.authenticate(bearer_token(&headers))?;

    let request: IngestRequest = serde_json::from_slice(&body)
        .map_err(|e| GatewayError::validation("missing_field", format!("invalid request body: {e}")))?;

    let idempotency_key = headers
        .get("x-idempotency-key")
        .and_then(|v| v.to_str().ok())
        .or(request.idempotency_key.as_deref())
        .map(str::to_string);

    let response = runtime
        .pipeline
        .ingest(&token, request, idempotency_key.as_deref())
        .await?;

    Ok((StatusCode::ACCEPTED, Json(response)))
}

#[derive(Debug, Deserialize)]
struct FlushQuery {
    /// Restrict the flush to one tenant token
    token: Option<String>,
}

async fn admin_flush(
    State(runtime): State<Arc<Runtime>>,
    headers: HeaderMap,
    Query(query): Query<FlushQuery>,
) -> Result<Response, ApiError> {
    runtime.auth.authenticate_admin(bearer_token(&headers))?;

    if !runtime.forwarder_service.is_running() {
        let body = ErrorResponse {
            error: "forwarder_error".to_string(),
            message: "forwarder service not running".to_string(),
            details: None,
        };
        return Ok((StatusCode::SERVICE_UNAVAILABLE, Json(body)).into_response());
    }

    let report = runtime
        .forwarder_service
        .force_flush(query.token.as_deref())
        .await;

    Ok(Json(json!({
        "message": "Flush completed",
        "entries_forwarded": report.entries_forwarded,
        "segments_processed": report.segments_processed,
    }))
    .into_response())
}

async fn healthz() -> impl IntoResponse {
    Json(json!({ "status": "ok", "version": crate::VERSION }))
}

async fn readyz(State(runtime): State<Arc<Runtime>>) -> Response {
    let status = runtime
        .health
        .check_all(runtime.forwarder_service.is_running())
        .await;
    let code = if status.is_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(status)).into_response()
}

async fn metrics(State(runtime): State<Arc<Runtime>>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        runtime.metrics.export_prometheus(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bearer_token_extraction() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);

        headers.insert(header::AUTHORIZATION, "Bearer abc123".parse().unwrap());
        assert_eq!(bearer_token(&headers), Some("abc123"));

        headers.insert(header::AUTHORIZATION, "Basic abc123".parse().unwrap());
        assert_eq!(bearer_token(&headers), None);
    }

    #[test]
    fn test_api_error_sets_retry_after() {
        let response = ApiError(GatewayError::RateLimited { retry_after: 3 }).into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "3");
    }

    #[test]
    fn test_api_error_statuses() {
        let cases = [
            (GatewayError::validation("bad_level", "x"), StatusCode::BAD_REQUEST),
            (GatewayError::Auth, StatusCode::UNAUTHORIZED),
            (GatewayError::MissingAuth, StatusCode::FORBIDDEN),
            (GatewayError::QuotaExceeded { quota: "bytes" }, StatusCode::TOO_MANY_REQUESTS),
            (GatewayError::WalWrite("disk".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, expected) in cases {
            assert_eq!(ApiError(err).into_response().status(), expected);
        }
    }
}
