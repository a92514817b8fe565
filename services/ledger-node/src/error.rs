use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use sovledger_core::ledger::StoreError;
use sovledger_gate::{CommitError, ErrorKind, GateError};
use tracing::error;

/// Failure returned by a handler, rendered as a JSON body
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<CommitError> for ApiError {
    fn from(err: CommitError) -> Self {
        let status = match err.kind() {
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::Identity => StatusCode::FORBIDDEN,
            ErrorKind::Integrity => StatusCode::CONFLICT,
            ErrorKind::Persistence => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            code: err.reason_code(),
            message: err.to_string(),
        }
    }
}

impl From<GateError> for ApiError {
    fn from(err: GateError) -> Self {
        match err {
            GateError::Denied { .. } => Self {
                status: StatusCode::TOO_MANY_REQUESTS,
                code: "ACCESS_DENIED",
                message: err.to_string(),
            },
            GateError::Commit(e) => e.into(),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        CommitError::Persistence(err).into()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!(code = self.code, message = %self.message, "Request failed");
        }
        let body = Json(json!({
            "error": self.code,
            "message": self.message,
        }));
        (self.status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sovledger_gate::ValidationError;

    #[test]
    fn test_status_mapping() {
        let denied: ApiError = GateError::Denied {
            origin: "10.0.0.1".to_string(),
        }
        .into();
        assert_eq!(denied.status(), StatusCode::TOO_MANY_REQUESTS);

        let invalid: ApiError = CommitError::Validation(ValidationError::PayloadNotObject).into();
        assert_eq!(invalid.status(), StatusCode::BAD_REQUEST);

        let breach: ApiError = CommitError::Integrity("link mismatch".to_string()).into();
        assert_eq!(breach.status(), StatusCode::CONFLICT);

        let store: ApiError = StoreError::Timeout.into();
        assert_eq!(store.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
