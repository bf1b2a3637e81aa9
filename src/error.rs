//! Error taxonomy for account operations and the JSON error envelope.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

use crate::users::repo::StoreError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Conflict(String),

    /// Unknown user and wrong password both map here.
    #[error("Invalid user credentials")]
    InvalidCredentials,

    #[error("{0}")]
    Unauthenticated(String),

    #[error("Invalid refresh token")]
    InvalidToken,

    #[error("Refresh token is expired or used")]
    ExpiredOrRevoked,

    #[error("upload failed: {0:#}")]
    UploadFailed(anyhow::Error),

    #[error("persistence error: {0:#}")]
    Persistence(anyhow::Error),

    #[error("internal error: {0:#}")]
    Internal(anyhow::Error),
}

impl AppError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn unauthenticated(msg: impl Into<String>) -> Self {
        Self::Unauthenticated(msg.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::InvalidCredentials
            | AppError::Unauthenticated(_)
            | AppError::InvalidToken
            | AppError::ExpiredOrRevoked => StatusCode::UNAUTHORIZED,
            AppError::UploadFailed(_) => StatusCode::BAD_GATEWAY,
            AppError::Persistence(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message shown to the caller. Server-side failures keep their details in the logs.
    fn public_message(&self) -> String {
        match self {
            AppError::UploadFailed(_) => "Failed to upload file".to_string(),
            AppError::Persistence(_) => "Failed to persist user record".to_string(),
            AppError::Internal(_) => "Internal server error".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::UniqueViolation => {
                AppError::Conflict("Username or email already exists".into())
            }
            StoreError::Other(e) => AppError::Persistence(e),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEnvelope {
    pub status_code: u16,
    pub message: String,
    pub success: bool,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() || matches!(self, AppError::UploadFailed(_)) {
            error!(error = %self, %status, "request failed");
        }
        let body = ErrorEnvelope {
            status_code: status.as_u16(),
            message: self.public_message(),
            success: false,
        };
        (status, Json(body)).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_taxonomy() {
        assert_eq!(AppError::validation("x").status(), StatusCode::BAD_REQUEST);
        assert_eq!(AppError::Conflict("x".into()).status(), StatusCode::CONFLICT);
        assert_eq!(AppError::InvalidCredentials.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(AppError::ExpiredOrRevoked.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            AppError::UploadFailed(anyhow::anyhow!("s3 down")).status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            AppError::Persistence(anyhow::anyhow!("db down")).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn unique_violation_becomes_conflict() {
        let err: AppError = StoreError::UniqueViolation.into();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn envelope_hides_internal_details() {
        let resp = AppError::Persistence(anyhow::anyhow!("connection refused on 10.0.0.5"))
            .into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["statusCode"], 500);
        assert_eq!(json["success"], false);
        assert!(!json["message"].as_str().unwrap().contains("10.0.0.5"));
    }
}
