//! TTS client error types.

use std::path::PathBuf;
use thiserror::Error;

pub type TtsResult<T> = Result<T, TtsError>;

#[derive(Debug, Error)]
pub enum TtsError {
    #[error("TTS request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("TTS returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("TTS returned an empty waveform")]
    EmptyWaveform,

    #[error("could not measure duration of waveform at {path}")]
    BadWaveform { path: PathBuf },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TtsError {
    /// Transient failures worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            TtsError::Request(_) => true,
            TtsError::Status { status, .. } => *status >= 500 || *status == 429,
            TtsError::EmptyWaveform => true,
            TtsError::BadWaveform { .. } | TtsError::Io(_) => false,
        }
    }
}
