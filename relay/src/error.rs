use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

pub const MISSING_CREDENTIALS: &str = "Server misconfiguration: Telegram credentials missing";

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Server misconfiguration: Telegram credentials missing")]
    MissingCredentials,

    /// The request body could not be read as an incident.
    #[error("{0}")]
    InvalidPayload(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Invalid email or password")]
    InvalidLogin,

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Upload too large: {size} bytes (max {max})")]
    UploadTooLarge { size: usize, max: usize },

    #[error("Unsupported media: {0}")]
    Media(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<rusqlite::Error> for RelayError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Storage(e.to_string())
    }
}

impl From<image::ImageError> for RelayError {
    fn from(e: image::ImageError) -> Self {
        Self::Media(e.to_string())
    }
}

impl From<std::io::Error> for RelayError {
    fn from(e: std::io::Error) -> Self {
        Self::Storage(e.to_string())
    }
}

impl RelayError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::MissingCredentials | Self::InvalidPayload(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::BadRequest(_) | Self::Media(_) => StatusCode::BAD_REQUEST,
            Self::InvalidLogin | Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::UploadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Storage(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn public_message(&self) -> String {
        match self {
            Self::Storage(_) => "Storage error".to_string(),
            Self::Internal(_) => "Internal server error".to_string(),
            _ => self.to_string(),
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }

        let body = serde_json::json!({
            "success": false,
            "error": self.public_message(),
        });

        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_credentials_message() {
        let err = RelayError::MissingCredentials;
        assert_eq!(err.to_string(), MISSING_CREDENTIALS);
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_invalid_payload_is_server_error() {
        let err = RelayError::InvalidPayload("expected value at line 1 column 1".into());
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.public_message(), "expected value at line 1 column 1");
    }

    #[test]
    fn test_storage_details_stay_private() {
        let err = RelayError::Storage("disk I/O error at /var/lib/db".into());
        assert_eq!(err.public_message(), "Storage error");
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(RelayError::InvalidLogin.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(RelayError::NotFound("media 3".into()).status(), StatusCode::NOT_FOUND);
        assert_eq!(
            RelayError::UploadTooLarge { size: 2, max: 1 }.status(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
    }
}
