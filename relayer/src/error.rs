use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json as AxumJson;
use thiserror::Error;

/// Failures of the withdrawal driver.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Malformed proof or public-signal bytes. The caller's input is invalid.
    #[error("encoding error: {0}")]
    Encoding(String),
    /// Session account length disagrees with the compiled layout.
    #[error("session schema mismatch: expected {expected} bytes, got {actual}")]
    SchemaVersion { expected: usize, actual: usize },
    /// Stage selector outside {0, 1, 2}.
    #[error("protocol mismatch: unknown session stage {0}")]
    ProtocolMismatch(u8),
    #[error("transaction rejected: {0}")]
    Submission(String),
    #[error("no confirmation within {secs}s for {signature}")]
    ConfirmationTimeout { signature: String, secs: u64 },
    #[error("session stalled: progress {progress}/{max} after {iterations} iterations")]
    Stall {
        progress: u32,
        max: u32,
        iterations: u32,
    },
    #[error("precondition violated: {0}")]
    Precondition(String),
    /// Startup-time packing assertion.
    #[error("invalid advance plan: {0}")]
    InvalidPlan(String),
    #[error("rpc error: {0}")]
    Rpc(String),
}

impl RelayError {
    /// Failures the advance loop absorbs and re-drives.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RelayError::Submission(_) | RelayError::ConfirmationTimeout { .. } | RelayError::Rpc(_)
        )
    }
}

pub type RelayResult<T> = Result<T, RelayError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Bad Request: {0}")]
    BadRequest(String),
    #[error("Not Found: {0}")]
    NotFound(String),
    #[error("Too Many Requests: {0}")]
    TooManyRequests(String),
    #[error("Internal Error: {0}")]
    Internal(String),
    #[error("Bad Gateway: {0}")]
    BadGateway(String),
}

impl From<RelayError> for AppError {
    fn from(e: RelayError) -> Self {
        match e {
            RelayError::Encoding(_) => AppError::BadRequest(e.to_string()),
            RelayError::Submission(_)
            | RelayError::ConfirmationTimeout { .. }
            | RelayError::Rpc(_) => AppError::BadGateway(e.to_string()),
            _ => AppError::Internal(e.to_string()),
        }
    }
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::TooManyRequests(_) => StatusCode::TOO_MANY_REQUESTS,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::BadGateway(_) => StatusCode::BAD_GATEWAY,
        }
    }

    /// Message without the status prefix.
    pub fn message(&self) -> &str {
        match self {
            AppError::BadRequest(m)
            | AppError::NotFound(m)
            | AppError::TooManyRequests(m)
            | AppError::Internal(m)
            | AppError::BadGateway(m) => m,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let body = serde_json::json!({ "error": self.message() });
        (self.status(), AxumJson(body)).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
