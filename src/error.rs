//! Error types shared across the ingestion pipeline and HTTP surface.

use thiserror::Error;
use warp::http::StatusCode;

/// Result type for pipeline operations.
pub type ServiceResult<T> = Result<T, ServiceError>;

/// Failure classes the service distinguishes.
///
/// Validation failures are the caller's fault and map to 400; everything else
/// maps to 500. Endpoint handlers serialize the display string, so messages
/// stay descriptive without leaking panics or backtraces.
#[derive(Error, Debug)]
pub enum ServiceError {
    /// Bad request input: missing file, wrong extension, missing parameter,
    /// unusable identifier.
    #[error("validation error: {0}")]
    Validation(String),

    /// Bad or missing environment configuration at startup.
    #[error("configuration error: {0}")]
    Config(String),

    /// Could not reach or authenticate against a database.
    #[error("failed to connect to database `{database}`: {source}")]
    Connectivity {
        /// Logical database name the connection targeted.
        database: String,
        #[source]
        source: sqlx::Error,
    },

    /// Provisioning or DDL failure (create database, create/drop table).
    #[error("schema error: {0}")]
    Schema(String),

    /// A raw row's composite columns did not match the expected textual
    /// shape, so the bronze casts failed.
    #[error("transform error: {0}")]
    Transform(String),

    /// Any other SQL execution failure.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// CSV parse failure, including rows whose arity differs from the header.
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    /// Filesystem failure while buffering the upload.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServiceError {
    /// HTTP status this error surfaces as.
    pub fn status(&self) -> StatusCode {
        match self {
            ServiceError::Validation(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Shorthand for a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        ServiceError::Validation(message.into())
    }

    /// Shorthand for a schema error.
    pub fn schema(message: impl Into<String>) -> Self {
        ServiceError::Schema(message.into())
    }
}
