use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;
use tracing::error;

use crate::errors::{CertplaneError, ErrorKind};

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Unauthorized(String),
    Forbidden(String),
    NotFound(String),
    NotImplemented(String),
    Internal(String),
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::NotImplemented(_) => StatusCode::NOT_IMPLEMENTED,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn bad_request<S: Into<String>>(msg: S) -> Self {
        ApiError::BadRequest(msg.into())
    }
}

#[derive(Serialize)]
struct ErrorBody {
    status: u16,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        let message = match self {
            ApiError::BadRequest(msg)
            | ApiError::Unauthorized(msg)
            | ApiError::Forbidden(msg)
            | ApiError::NotFound(msg)
            | ApiError::NotImplemented(msg)
            | ApiError::Internal(msg) => msg,
        };

        (status, Json(ErrorBody { status: status.as_u16(), message })).into_response()
    }
}

impl From<CertplaneError> for ApiError {
    fn from(err: CertplaneError) -> Self {
        let message = err.public_message();
        match err.kind() {
            ErrorKind::MalformedRequest
            | ErrorKind::AccountDoesNotExist
            | ErrorKind::AlreadyRevoked => ApiError::BadRequest(message),
            ErrorKind::Unauthorized | ErrorKind::ReplayedToken => ApiError::Unauthorized(message),
            ErrorKind::Forbidden | ErrorKind::ConstraintViolation => ApiError::Forbidden(message),
            ErrorKind::NotFound => ApiError::NotFound(message),
            ErrorKind::NotImplemented => ApiError::NotImplemented(message),
            ErrorKind::InternalServerError => {
                error!(error = %err, "Request failed");
                ApiError::Internal(message)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_follow_error_kinds() {
        let cases = [
            (CertplaneError::validation("x"), StatusCode::BAD_REQUEST),
            (CertplaneError::already_revoked("4a"), StatusCode::BAD_REQUEST),
            (CertplaneError::replayed_token("jti"), StatusCode::UNAUTHORIZED),
            (CertplaneError::constraint("x"), StatusCode::FORBIDDEN),
            (CertplaneError::not_found("provisioner", "x"), StatusCode::NOT_FOUND),
            (CertplaneError::not_implemented("x"), StatusCode::NOT_IMPLEMENTED),
            (CertplaneError::internal("secret detail"), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).into_response().status(), status);
        }
    }

    #[test]
    fn internal_details_are_not_exposed() {
        match ApiError::from(CertplaneError::internal("secret detail")) {
            ApiError::Internal(msg) => assert!(!msg.contains("secret")),
            other => panic!("unexpected {:?}", other),
        }
    }
}
