//! Engine error taxonomy.
//!
//! Scene-level errors (TTS, visual) are recovered by the pipeline; job-level
//! errors (no script possible, compose failure, cancellation) terminate the
//! job. Validation errors never reach the orchestrator at all.

use edvid_models::JobStatus;
use edvid_resilience::BreakerError;
use thiserror::Error;

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Upload(#[from] edvid_models::UploadError),

    #[error("script generation failed: {0}")]
    Script(#[from] edvid_script::ScriptError),

    #[error("speech synthesis failed: {0}")]
    Tts(#[from] edvid_tts::TtsError),

    #[error("visual rendering failed: {0}")]
    Visual(#[from] edvid_visuals::VisualError),

    #[error("composition failed: {0}")]
    Compose(#[from] edvid_compose::ComposeError),

    #[error("store error: {0}")]
    Store(#[from] edvid_store::StoreError),

    #[error("queue error: {0}")]
    Queue(#[from] edvid_queue::QueueError),

    #[error("resource error: {0}")]
    Resource(#[from] edvid_resources::ResourceError),

    #[error("{service} is unavailable (circuit open)")]
    UpstreamUnavailable { service: String },

    #[error("job was cancelled")]
    Cancelled,

    #[error("video is not available for a job in status {status}")]
    VideoNotReady { status: JobStatus },

    #[error("job not found")]
    JobNotFound,

    #[error("job failed: {0}")]
    JobFailed(String),
}

impl EngineError {
    pub fn job_failed(msg: impl Into<String>) -> Self {
        Self::JobFailed(msg.into())
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, EngineError::Cancelled)
    }

    /// Transient errors worth another attempt inside the retry wrapper.
    /// Cancellation and circuit-open are never retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            EngineError::Script(e) => e.is_retryable(),
            EngineError::Tts(e) => e.is_retryable(),
            EngineError::Visual(e) => e.is_retryable(),
            EngineError::Cancelled
            | EngineError::UpstreamUnavailable { .. }
            | EngineError::Resource(_) => false,
            _ => false,
        }
    }
}

/// Flatten a breaker wrapper into the engine taxonomy.
impl From<BreakerError<EngineError>> for EngineError {
    fn from(err: BreakerError<EngineError>) -> Self {
        match err {
            BreakerError::UpstreamUnavailable { service } => {
                EngineError::UpstreamUnavailable { service }
            }
            BreakerError::Inner(inner) => inner,
        }
    }
}
