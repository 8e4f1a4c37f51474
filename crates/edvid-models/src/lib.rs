//! Shared data models for the EduVid backend.
//!
//! This crate provides Serde-serializable types for:
//! - Jobs, their status/phase state machines and priorities
//! - Scripts and scenes produced by the script phase
//! - Audio/visual assets and the final video record
//! - Source documents and upload validation

pub mod asset;
pub mod job;
pub mod script;
pub mod source;

// Re-export common types
pub use asset::{AudioAsset, ImageFormat, Video, VideoStatus, VisualAsset};
pub use job::{Job, JobError, JobId, JobPhase, JobStatus, JobSummary, JobView, Priority};
pub use script::{
    Scene, SceneStatus, Script, VisualKind, MAX_NARRATION_CHARS, MAX_PROMPT_CHARS, MAX_SCENES,
    MIN_NARRATION_CHARS, MIN_PROMPT_CHARS, MIN_SCENES,
};
pub use source::{SourceDocument, SourceKind, UploadError, UploadLimits};
