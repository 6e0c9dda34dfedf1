use crate::errors::Error;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use std::fmt;

/// Envelope shared by every API response
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub status: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(message: impl Into<String>, data: T) -> Self {
        Self {
            status: true,
            message: message.into(),
            data: Some(data),
        }
    }
}

impl ApiResponse<()> {
    /// Success without a payload
    pub fn done(message: impl Into<String>) -> Self {
        Self {
            status: true,
            message: message.into(),
            data: None,
        }
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        axum::Json(self).into_response()
    }
}

#[derive(Debug)]
pub struct ApiError {
    pub message: String,
    pub code: u16,
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ApiError({}, {})", self.code, self.message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = ApiResponse::<()> {
            status: false,
            message: self.message,
            data: None,
        };
        (status, axum::Json(body)).into_response()
    }
}

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        let status = match &error {
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Validation(_)
            | Error::InvalidSort(_)
            | Error::UnknownPlatform(_)
            | Error::SerdeError(_) => StatusCode::BAD_REQUEST,
            Error::InvalidTransition { .. }
            | Error::TaskAlreadyRunning(_)
            | Error::DuplicateProcess(_) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        api_error(status, &error.to_string())
    }
}

/// Helper function to create API errors
pub fn api_error(status: StatusCode, message: &str) -> ApiError {
    ApiError {
        message: message.to_string(),
        code: status.as_u16(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::TaskStatus;

    #[test]
    fn domain_errors_map_to_status_codes() {
        assert_eq!(ApiError::from(Error::NotFound(1)).code, 404);
        assert_eq!(ApiError::from(Error::Validation("x".into())).code, 400);
        assert_eq!(
            ApiError::from(Error::InvalidTransition {
                id: 1,
                from: TaskStatus::Completed,
                action: "resume"
            })
            .code,
            409
        );
        assert_eq!(ApiError::from(Error::TaskAlreadyRunning(1)).code, 409);
        assert_eq!(
            ApiError::from(Error::SpawnFailed {
                id: 1,
                reason: "no such file".into()
            })
            .code,
            500
        );
    }
}
