//! Composition error types.

use std::path::PathBuf;
use thiserror::Error;

pub type ComposeResult<T> = Result<T, ComposeError>;

#[derive(Debug, Error)]
pub enum ComposeError {
    #[error("ffmpeg binary not found on PATH")]
    FfmpegNotFound,

    #[error("no scenes with complete assets to compose")]
    NoScenes,

    #[error("ffmpeg exited with {code:?}: {stderr}")]
    Ffmpeg { code: Option<i32>, stderr: String },

    #[error("composed video at {path} is empty")]
    EmptyOutput { path: PathBuf },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
