use axum::{http::StatusCode, response::IntoResponse};
use thiserror::Error;

/// Run-fatal errors. Anything surfacing as `AppError` ends ingestion for the
/// current endpoint and the process exits non-zero.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Database migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unexpected response from {endpoint}: {detail}")]
    UnexpectedResponse { endpoint: String, detail: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            AppError::Config(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string()).into_response()
    }
}

/// Why a single raw record could not be turned into a canonical row.
#[derive(Debug, Error, PartialEq)]
pub enum NormalizeError {
    #[error("record is not a JSON object")]
    NotAnObject,

    #[error("missing required field `{0}`")]
    MissingField(&'static str),

    #[error("invalid timestamp in `{field}`: {value:?}")]
    InvalidTimestamp { field: &'static str, value: String },

    #[error("field `{field}` is not a valid {expected}")]
    InvalidField {
        field: &'static str,
        expected: &'static str,
    },

    #[error("field `{field}` does not hold valid JSON")]
    InvalidJson { field: &'static str },
}

/// Per-item failure. Logged and skipped by the fetcher unless `is_fatal`.
#[derive(Debug, Error)]
pub enum ItemError {
    #[error("normalization failed: {0}")]
    Normalize(#[from] NormalizeError),

    #[error("storage write failed: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("failed to encode JSON column: {0}")]
    Encode(#[from] serde_json::Error),
}

impl ItemError {
    /// Lost storage connections end the run; constraint violations and bad
    /// records only skip the item.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ItemError::Storage(
                sqlx::Error::Io(_)
                    | sqlx::Error::Tls(_)
                    | sqlx::Error::PoolClosed
                    | sqlx::Error::PoolTimedOut
                    | sqlx::Error::WorkerCrashed
            )
        )
    }
}

impl From<ItemError> for AppError {
    fn from(e: ItemError) -> Self {
        match e {
            ItemError::Storage(e) => AppError::Database(e),
            ItemError::Encode(e) => AppError::Json(e),
            ItemError::Normalize(e) => AppError::UnexpectedResponse {
                endpoint: "record".to_string(),
                detail: e.to_string(),
            },
        }
    }
}
