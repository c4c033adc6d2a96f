// HTTP error envelope and request-id scoping, shared by the REST endpoints
// and the websocket upgrade handler.

use std::future::Future;

use axum::{
    http::{header::HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use parkcore_core::CoreError;
use serde_json::json;
use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

tokio::task_local! {
    static REQUEST_ID: String;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    ValidationFailed,
    NotFound,
    SpotTaken,
    Conflict,
    PaymentUnavailable,
    CacheDegraded,
    RateLimited,
    InternalError,
}

impl ErrorCode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ValidationFailed => "VALIDATION_FAILED",
            Self::NotFound => "NOT_FOUND",
            Self::SpotTaken => "SPOT_TAKEN",
            Self::Conflict => "CONFLICT",
            Self::PaymentUnavailable => "PAYMENT_UNAVAILABLE",
            Self::CacheDegraded => "CACHE_DEGRADED",
            Self::RateLimited => "RATE_LIMITED",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }

    pub const fn status(self) -> StatusCode {
        match self {
            Self::ValidationFailed => StatusCode::BAD_REQUEST,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::SpotTaken => StatusCode::CONFLICT,
            Self::Conflict => StatusCode::CONFLICT,
            Self::PaymentUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::CacheDegraded => StatusCode::SERVICE_UNAVAILABLE,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub const fn retryable(self) -> bool {
        matches!(self, Self::PaymentUnavailable | Self::CacheDegraded | Self::RateLimited | Self::InternalError)
    }
}

#[derive(Debug, Clone)]
pub struct ApiError {
    code: ErrorCode,
    message: String,
    request_id: Option<String>,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self { code, message: message.into(), request_id: None }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let request_id = self.request_id.or_else(current_request_id);
        let mut response = (
            self.code.status(),
            Json(json!({
                "error": {
                    "code": self.code.as_str(),
                    "message": self.message,
                    "retryable": self.code.retryable(),
                    "request_id": request_id.clone(),
                }
            })),
        )
            .into_response();
        if let Some(request_id) = &request_id {
            attach_request_id_header(&mut response, request_id);
        }
        response
    }
}

/// Maps the transport-agnostic `CoreError` onto an HTTP error envelope.
/// This is the only place parkcore-server knows about core error variants
/// in detail (core itself stays transport-agnostic).
impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        let code = match &err {
            CoreError::SpotUnavailable { .. } => ErrorCode::SpotTaken,
            CoreError::LeaseNotFound { .. } | CoreError::LeaseHolderMismatch { .. } => ErrorCode::Conflict,
            CoreError::InvalidWindow { .. } | CoreError::AmountTooSmall(_) => ErrorCode::ValidationFailed,
            CoreError::CacheUnavailable | CoreError::Cache(_) => ErrorCode::CacheDegraded,
            CoreError::Payment(_) => ErrorCode::PaymentUnavailable,
            CoreError::IdempotencyConflict { .. } => ErrorCode::Conflict,
            CoreError::Database(_) => ErrorCode::InternalError,
        };
        Self::new(code, err.to_string())
    }
}

pub async fn with_request_id_scope<F>(request_id: String, future: F) -> F::Output
where
    F: Future,
{
    REQUEST_ID.scope(request_id, future).await
}

pub fn current_request_id() -> Option<String> {
    REQUEST_ID.try_with(Clone::clone).ok()
}

pub fn request_id_from_headers_or_generate(headers: &HeaderMap) -> String {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.trim().is_empty())
        .map(ToOwned::to_owned)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

pub fn attach_request_id_header(response: &mut Response, request_id: &str) {
    if let Ok(header) = HeaderValue::from_str(request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, header);
    }
}

#[cfg(test)]
mod tests {
    use axum::{body::to_bytes, response::IntoResponse};
    use serde_json::Value;

    use super::*;

    #[tokio::test]
    async fn api_error_uses_scoped_request_id() {
        let response = with_request_id_scope("req-123".to_string(), async {
            ApiError::new(ErrorCode::InternalError, "boom").into_response()
        })
        .await;

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let parsed: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["error"]["code"], "INTERNAL_ERROR");
        assert_eq!(parsed["error"]["request_id"], "req-123");
    }

    #[test]
    fn spot_unavailable_maps_to_conflict_status() {
        let api_error: ApiError = CoreError::SpotUnavailable { spot_id: Uuid::nil() }.into();
        assert_eq!(api_error.code.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn cache_unavailable_maps_to_service_unavailable() {
        let api_error: ApiError = CoreError::CacheUnavailable.into();
        assert_eq!(api_error.code.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(api_error.code.retryable());
    }
}
