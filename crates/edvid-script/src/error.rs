//! Script generation error types.

use thiserror::Error;

pub type ScriptResult<T> = Result<T, ScriptError>;

#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("failed to read source document: {0}")]
    SourceRead(#[from] std::io::Error),

    #[error("PDF extraction failed: {0}")]
    PdfExtract(String),

    #[error("source document contains no usable text")]
    EmptySource,

    #[error("LLM request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("LLM returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("could not recover a script from the LLM output: {0}")]
    Malformed(String),

    #[error("LLM script failed validation: {0}")]
    Invalid(String),
}

impl ScriptError {
    /// Transient upstream failures worth retrying. Malformed or invalid
    /// output is a logic error; retrying the same prompt rarely helps, so
    /// the orchestrator falls back instead.
    pub fn is_retryable(&self) -> bool {
        match self {
            ScriptError::Request(_) => true,
            ScriptError::Status { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}
