use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tracing::error;

use unitrade_gateway::BusError;
use unitrade_types::FieldErrors;
use unitrade_types::api::{ErrorBody, ValidationErrorBody};

/// Error type shared by every handler.
///
/// Auth failures carry no body. Validation failures carry the per-field map.
/// Everything else is `{ "error": "<message>" }`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("unauthorized")]
    Unauthorized,
    #[error("forbidden")]
    Forbidden,
    #[error("not found")]
    NotFound,
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    BadRequest(String),
    #[error("validation failed")]
    Validation(FieldErrors),
    #[error("payload too large")]
    PayloadTooLarge,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// A single-field validation error.
    pub fn field(name: &str, message: &str) -> Self {
        Self::Validation(FieldErrors::from([(name.to_string(), message.to_string())]))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        match self {
            Self::Unauthorized => status.into_response(),
            Self::Validation(errors) => (status, Json(ValidationErrorBody { errors })).into_response(),
            Self::Internal(e) => {
                error!("Internal error: {:#}", e);
                (status, Json(ErrorBody { error: format!("{e:#}") })).into_response()
            }
            other => (status, Json(ErrorBody { error: other.to_string() })).into_response(),
        }
    }
}

/// Oversized bodies keep their 413 but get the usual `{error}` body.
impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            Self::PayloadTooLarge
        } else {
            Self::BadRequest(rejection.body_text())
        }
    }
}

impl From<BusError> for ApiError {
    fn from(e: BusError) -> Self {
        match e {
            BusError::EmptyContent => Self::field("content", "Message cannot be empty"),
            BusError::ChatNotFound | BusError::NotParticipant => Self::NotFound,
            BusError::Banned => Self::Forbidden,
            BusError::Storage(e) => Self::Internal(e),
        }
    }
}

/// Runs blocking database work off the async runtime.
pub async fn blocking<F, T>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            ApiError::Internal(e.into())
        })?
        .map_err(ApiError::Internal)
}
