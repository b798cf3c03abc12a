use thiserror::Error;

/// Common error types used across the workers.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error: {url} returned {status}")]
    Api { status: u16, url: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Template error: {0}")]
    Template(String),

    #[error("Delivery error: {0}")]
    Delivery(String),

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Timed out after {0:?}")]
    Timeout(std::time::Duration),
}

impl AppError {
    /// Whether this error came from talking to a remote endpoint.
    pub fn is_remote(&self) -> bool {
        matches!(
            self,
            AppError::Http(_) | AppError::Api { .. } | AppError::Timeout(_)
        )
    }
}
