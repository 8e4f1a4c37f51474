//! Visual rendering error types.

use thiserror::Error;

pub type VisualResult<T> = Result<T, VisualError>;

#[derive(Debug, Error)]
pub enum VisualError {
    #[error("renderer request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("{provider} renderer returned status {status}: {body}")]
    Status {
        provider: &'static str,
        status: u16,
        body: String,
    },

    #[error("{provider} renderer returned an empty image")]
    EmptyImage { provider: &'static str },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl VisualError {
    /// Transient failures worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            VisualError::Request(_) => true,
            VisualError::Status { status, .. } => *status >= 500 || *status == 429,
            VisualError::EmptyImage { .. } => true,
            VisualError::Io(_) => false,
        }
    }
}
