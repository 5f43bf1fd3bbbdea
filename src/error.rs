//! Service error type shared by all layers.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("{0}")]
    Conflict(String),
    #[error("authentication required")]
    Unauthorized,
    #[error("insufficient permissions")]
    Forbidden,
    #[error("not found")]
    NotFound,
    #[error("{0}")]
    LimitExceeded(String),
    #[error("upstream error: {0}")]
    Upstream(String),
    #[error("upstream overloaded")]
    UpstreamOverloaded,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type Result<T> = std::result::Result<T, ServiceError>;
