use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::error::{CaptureError, DeviceError, QueryError, StoreError, ValidationError};

/// Error returned by every handler; rendered as `{"error", "code"}`.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("no data for {0}")]
    NotFound(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error(transparent)]
    Device(#[from] DeviceError),
}

impl From<QueryError> for AppError {
    fn from(e: QueryError) -> Self {
        match e {
            QueryError::Validation(v) => Self::Validation(v),
            QueryError::NotFound(what) => Self::NotFound(what),
            QueryError::Store(s) => Self::Store(s),
        }
    }
}

impl AppError {
    pub fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            AppError::Store(StoreError::Duplicate { .. }) => (StatusCode::CONFLICT, "CONFLICT"),
            AppError::Store(StoreError::Timeout(_)) => {
                (StatusCode::SERVICE_UNAVAILABLE, "STORE_TIMEOUT")
            }
            AppError::Device(DeviceError::NotConnected) => {
                (StatusCode::SERVICE_UNAVAILABLE, "DEVICE_UNAVAILABLE")
            }
            AppError::Store(StoreError::Database(_))
            | AppError::Capture(_)
            | AppError::Device(DeviceError::Write(_)) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR")
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        let message = match &self {
            AppError::Store(StoreError::Database(e)) => {
                tracing::error!(error = %e, "Reading store failure");
                "An internal error occurred".to_owned()
            }
            AppError::Capture(e) => {
                tracing::error!(error = %e, "Capture failed to start");
                self.to_string()
            }
            AppError::Device(DeviceError::Write(e)) => {
                tracing::error!(error = %e, "Device command failed");
                self.to_string()
            }
            _ => self.to_string(),
        };
        (status, Json(json!({ "error": message, "code": code }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn query_errors_keep_their_kind() {
        let v: AppError = QueryError::Validation(ValidationError::parameter("month", "13", "must be 1-12")).into();
        assert_eq!(v.status_and_code(), (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"));

        let nf: AppError = QueryError::NotFound("2024-11".into()).into();
        assert_eq!(nf.status_and_code(), (StatusCode::NOT_FOUND, "NOT_FOUND"));
        assert_eq!(nf.to_string(), "no data for 2024-11");
    }

    #[test]
    fn store_errors_map_to_distinct_statuses() {
        let dup: AppError = StoreError::Duplicate {
            date: "2024-11-20".parse().unwrap(),
            time_of_day: "10:00:00".parse().unwrap(),
        }
        .into();
        assert_eq!(dup.status_and_code(), (StatusCode::CONFLICT, "CONFLICT"));

        let slow: AppError = StoreError::Timeout(Duration::from_secs(5)).into();
        assert_eq!(slow.status_and_code(), (StatusCode::SERVICE_UNAVAILABLE, "STORE_TIMEOUT"));

        let db: AppError = StoreError::Database(sqlx::Error::PoolTimedOut).into();
        assert_eq!(db.status_and_code(), (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"));
    }

    #[test]
    fn missing_device_is_unavailable_not_internal() {
        let absent: AppError = DeviceError::NotConnected.into();
        assert_eq!(
            absent.status_and_code(),
            (StatusCode::SERVICE_UNAVAILABLE, "DEVICE_UNAVAILABLE")
        );

        let broken: AppError =
            DeviceError::Write(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone")).into();
        assert_eq!(
            broken.status_and_code(),
            (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR")
        );
    }
}
