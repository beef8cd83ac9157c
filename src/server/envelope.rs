use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;

use super::error::ApiError;

pub type ApiResult<T> = Result<Success<T>, ApiError>;

/// A successful response, wrapped as `{data, statusCode, message, timestamp}`.
#[derive(Debug)]
pub struct Success<T> {
    status: StatusCode,
    data: T,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Envelope<T> {
    data: T,
    status_code: u16,
    message: &'static str,
    timestamp: DateTime<Utc>,
}

/// Confirmation body for deletions.
#[derive(Debug, Serialize)]
pub struct Message {
    pub message: &'static str,
}

pub fn ok<T>(data: T) -> ApiResult<T> {
    Ok(Success {
        status: StatusCode::OK,
        data,
    })
}

pub fn created<T>(data: T) -> ApiResult<T> {
    Ok(Success {
        status: StatusCode::CREATED,
        data,
    })
}

pub fn message(message: &'static str) -> ApiResult<Message> {
    ok(Message { message })
}

impl<T: Serialize> IntoResponse for Success<T> {
    fn into_response(self) -> Response {
        let envelope = Envelope {
            data: self.data,
            status_code: self.status.as_u16(),
            message: "Success",
            timestamp: Utc::now(),
        };
        (self.status, Json(envelope)).into_response()
    }
}
