use crate::types::ApiResponse;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};

/// Application-specific error types
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Database connection failed: {0}")]
    DatabaseConnection(String),

    #[error("Database operation failed: {0}")]
    DatabaseOperation(String),

    #[error("Invalid request: {0}")]
    Invalid(String),

    #[error("Not found")]
    NotFound,

    #[error("Not authorized")]
    Unauthorized,

    #[error("Purchase token is bound to a different order")]
    PurchaseTokenConflict,

    #[error("Concurrent update conflict: {0}")]
    Conflict(String),

    #[error("Quota consolidation failed: {0}")]
    TransactionFailed(String),

    #[error("Purchase verifier unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("Purchase rejected by the billing provider: {0}")]
    VerificationFailed(String),

    #[error("Failed to get access token: {0}")]
    AccessTokenFailed(String),

    #[error("Failed to parse Google Play response: {0}")]
    GooglePlayResponseParse(String),

    #[error("Internal server error: {0}")]
    InternalError(String),
}

impl AppError {
    /// Get the appropriate HTTP status code for this error
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::DatabaseConnection(_)
            | AppError::DatabaseOperation(_)
            | AppError::TransactionFailed(_)
            | AppError::AccessTokenFailed(_)
            | AppError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,

            AppError::Invalid(_) | AppError::VerificationFailed(_) => StatusCode::BAD_REQUEST,

            AppError::Unauthorized => StatusCode::UNAUTHORIZED,

            AppError::NotFound => StatusCode::NOT_FOUND,

            AppError::PurchaseTokenConflict | AppError::Conflict(_) => StatusCode::CONFLICT,

            AppError::UpstreamUnavailable(_) | AppError::GooglePlayResponseParse(_) => {
                StatusCode::BAD_GATEWAY
            }
        }
    }

    /// Errors that point at a possible ledger inconsistency rather than a bad credential.
    pub fn is_integrity_failure(&self) -> bool {
        matches!(
            self,
            AppError::PurchaseTokenConflict | AppError::Conflict(_) | AppError::TransactionFailed(_)
        )
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status_code = self.status_code();
        if status_code.is_server_error() || self.is_integrity_failure() {
            tracing::error!(error = %self, "request failed");
        }

        let response_body = ApiResponse::<()>::error(self.to_string());

        (status_code, Json(response_body)).into_response()
    }
}

/// Result type for application operations
pub type AppResult<T> = Result<T, AppError>;

impl From<diesel::result::Error> for AppError {
    fn from(err: diesel::result::Error) -> Self {
        AppError::DatabaseOperation(err.to_string())
    }
}

impl From<diesel::r2d2::PoolError> for AppError {
    fn from(err: diesel::r2d2::PoolError) -> Self {
        AppError::DatabaseConnection(err.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            AppError::GooglePlayResponseParse(err.to_string())
        } else {
            AppError::UpstreamUnavailable(err.to_string())
        }
    }
}
