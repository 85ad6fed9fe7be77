//! JSON error payloads for the HTTP surface
//!
//! Every failure leaves the server as `{ "error": message, "reason": reason }`
//! with a status code derived from the error's reason.

use axum::{
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use sluice_core::SluiceError;
use sluice_storage::DbError;

/// Wire shape of an error response
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub reason: &'static str,
}

/// Handler error wrapping [`SluiceError`]
#[derive(Debug)]
pub struct ApiError(pub SluiceError);

impl ApiError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self(SluiceError::Validation(message.into()))
    }

    pub fn status_code(&self) -> StatusCode {
        match &self.0 {
            SluiceError::Validation(_) | SluiceError::NoRelevantFiles(_) => {
                StatusCode::BAD_REQUEST
            }
            SluiceError::NotFound(_) => StatusCode::NOT_FOUND,
            SluiceError::StateConflict { .. } | SluiceError::Conflict(_) => StatusCode::CONFLICT,
            SluiceError::Generation(_) => StatusCode::BAD_GATEWAY,
            SluiceError::UpstreamUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn body(&self) -> ErrorBody {
        ErrorBody {
            error: self.0.to_string(),
            reason: self.0.reason(),
        }
    }
}

impl From<SluiceError> for ApiError {
    fn from(err: SluiceError) -> Self {
        Self(err)
    }
}

impl From<DbError> for ApiError {
    fn from(err: DbError) -> Self {
        Self(err.into())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::validation(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::validation(rejection.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        Self::validation(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!("Request failed ({}): {}", self.0.reason(), self.0);
        } else {
            tracing::warn!("Request rejected ({}): {}", self.0.reason(), self.0);
        }
        (status, Json(self.body())).into_response()
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (SluiceError::Validation("x".into()), StatusCode::BAD_REQUEST),
            (SluiceError::NoRelevantFiles("x".into()), StatusCode::BAD_REQUEST),
            (SluiceError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (
                SluiceError::StateConflict {
                    id: 1,
                    status: "accepted".into(),
                },
                StatusCode::CONFLICT,
            ),
            (SluiceError::Generation("x".into()), StatusCode::BAD_GATEWAY),
            (
                SluiceError::UpstreamUnavailable("x".into()),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (SluiceError::Storage("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];

        for (err, status) in cases {
            assert_eq!(ApiError(err).status_code(), status);
        }
    }

    #[test]
    fn test_body_carries_reason() {
        let body = ApiError(SluiceError::StateConflict {
            id: 4,
            status: "rejected".into(),
        })
        .body();
        assert_eq!(body.reason, "state_conflict");
        assert_eq!(body.error, "Proposed change #4 is already rejected");
    }
}
