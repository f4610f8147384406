use axum::extract::{FromRequestParts, Query};
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::error;

use copypasta_store::StoreError;
use copypasta_types::api::ErrorResponse;

/// Errors surfaced by the HTTP layer, mapped onto the wire contract.
/// Every variant renders as `{"error": "..."}` with the matching status;
/// persistence and internal failures are logged here and surfaced opaque.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("unauthorized")]
    Unauthorized,

    #[error("invalid credentials")]
    AuthFailed,

    #[error("username already taken")]
    UsernameTaken,

    #[error("{0}")]
    BadRequest(String),

    #[error("payload too large")]
    PayloadTooLarge,

    #[error("too many requests")]
    RateLimited,

    #[error("internal server error")]
    Store(#[source] StoreError),

    #[error("internal server error")]
    Internal(#[from] anyhow::Error),
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::UsernameTaken => ApiError::UsernameTaken,
            other => ApiError::Store(other),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized".to_string()),
            ApiError::AuthFailed => (StatusCode::UNAUTHORIZED, "invalid credentials".to_string()),
            ApiError::UsernameTaken => (StatusCode::CONFLICT, "username already taken".to_string()),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            ApiError::PayloadTooLarge => {
                (StatusCode::PAYLOAD_TOO_LARGE, "payload too large".to_string())
            }
            ApiError::RateLimited => {
                (StatusCode::TOO_MANY_REQUESTS, "too many requests".to_string())
            }
            ApiError::Store(e) => {
                error!("store error: {e}");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal server error".to_string())
            }
            ApiError::Internal(e) => {
                error!("internal error: {e:#}");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal server error".to_string())
            }
        };
        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

/// `Query` wrapper whose rejection is an [`ApiError`], so a malformed
/// query string (`limit=abc`, `version=abc`, ...) comes back as the same
/// `{"error": ...}` JSON as every other failure instead of axum's
/// plain-text body.
pub struct ApiQuery<T>(pub T);

impl<T, S> FromRequestParts<S> for ApiQuery<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        match Query::<T>::from_request_parts(parts, state).await {
            Ok(Query(value)) => Ok(ApiQuery(value)),
            Err(rejection) => Err(ApiError::BadRequest(rejection.body_text())),
        }
    }
}
