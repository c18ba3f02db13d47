//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use order_store::StoreError;
use saga::SagaError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Resource not found.
    NotFound(String),
    /// Bad request from the client.
    BadRequest(String),
    /// Saga error.
    Saga(SagaError),
    /// Order store error.
    Store(StoreError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, error_body(msg)),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, error_body(msg)),
            ApiError::Saga(err) => saga_error_to_response(err),
            ApiError::Store(err) => {
                let status = store_error_status(&err);
                (status, error_body(err.to_string()))
            }
        };

        if status.is_server_error() {
            tracing::error!(%status, error = %body["error"], "request failed");
        }
        (status, axum::Json(body)).into_response()
    }
}

fn error_body(message: String) -> serde_json::Value {
    serde_json::json!({ "error": message })
}

fn store_error_status(err: &StoreError) -> StatusCode {
    match err {
        StoreError::NotFound(_) => StatusCode::NOT_FOUND,
        StoreError::StatusConflict { .. } => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn saga_error_to_response(err: SagaError) -> (StatusCode, serde_json::Value) {
    let status = match &err {
        SagaError::Validation(_) => StatusCode::BAD_REQUEST,
        SagaError::NotFound(_) => StatusCode::NOT_FOUND,
        SagaError::InsufficientStock { .. } | SagaError::InvalidTransition { .. } => {
            StatusCode::CONFLICT
        }
        SagaError::Dependency { .. } => StatusCode::BAD_GATEWAY,
        SagaError::Storage(store_err) => store_error_status(store_err),
        SagaError::Delivery(_) => StatusCode::INTERNAL_SERVER_ERROR,
        SagaError::OrderCreatedUnpublished { order_id, .. } => {
            // The order exists; only the notification may be missing.
            let body = serde_json::json!({
                "error": err.to_string(),
                "order_id": order_id,
                "order_persisted": true,
            });
            return (StatusCode::ACCEPTED, body);
        }
    };
    (status, error_body(err.to_string()))
}

impl From<SagaError> for ApiError {
    fn from(err: SagaError) -> Self {
        ApiError::Saga(err)
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => ApiError::NotFound(format!("Order {id} not found")),
            other => ApiError::Store(other),
        }
    }
}
