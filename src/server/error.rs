//! HTTP error mapping for handlers.

use axum::{
    body::Body,
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::error;

use crate::error::Error;

const VALIDATION_FAILED: &str = "Validation failed";

#[derive(Debug, Clone)]
pub struct ApiError {
    status: StatusCode,
    message: String,
    errors: Option<Vec<String>>,
}

/// Attached to error responses so the request middleware can render the
/// envelope with the request path.
#[derive(Debug, Clone)]
pub(crate) struct ErrorReport {
    status: StatusCode,
    message: String,
    errors: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorEnvelope<'a> {
    status_code: u16,
    timestamp: DateTime<Utc>,
    path: &'a str,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    errors: Option<&'a [String]>,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            errors: None,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn validation(errors: Vec<String>) -> Self {
        Self {
            status: StatusCode::UNPROCESSABLE_ENTITY,
            message: VALIDATION_FAILED.to_string(),
            errors: Some(errors),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        match err {
            Error::Unauthorized(message) => Self::unauthorized(message),
            Error::NotFound(message) => Self::not_found(message),
            Error::Conflict(message) => Self::new(StatusCode::CONFLICT, message),
            Error::Validation(errors) => Self::validation(errors),
            err @ Error::Replay(_) => {
                error!("{err}");
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
            }
            Error::Internal(err) => {
                error!("internal error: {err:#}");
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
            }
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        match rejection {
            JsonRejection::JsonDataError(e) => Self::validation(vec![e.body_text()]),
            other => Self::new(other.status(), other.body_text()),
        }
    }
}

impl From<PathRejection> for ApiError {
    fn from(_: PathRejection) -> Self {
        Self::bad_request("Validation failed (uuid is expected)")
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let report = ErrorReport {
            status: self.status,
            message: self.message,
            errors: self.errors,
        };
        let mut response = report.render("");
        response.extensions_mut().insert(report);
        response
    }
}

impl ErrorReport {
    pub(crate) fn status(&self) -> StatusCode {
        self.status
    }

    pub(crate) fn message(&self) -> &str {
        &self.message
    }

    pub(crate) fn render(&self, path: &str) -> Response {
        let envelope = ErrorEnvelope {
            status_code: self.status.as_u16(),
            timestamp: Utc::now(),
            path,
            message: &self.message,
            errors: self.errors.as_deref(),
        };
        (self.status, Json(envelope)).into_response()
    }

    /// Body of [ErrorReport::render], for swapping into an existing response.
    pub(crate) fn body(&self, path: &str) -> Body {
        self.render(path).into_body()
    }
}
