//! Job record, status/phase state machines and priorities.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::asset::Video;
use crate::script::Script;
use crate::source::SourceDocument;

/// Unique identifier for a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Submission priority. Admission is strict priority, FIFO within a level.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Urgent,
    High,
    #[default]
    Normal,
    Low,
}

impl Priority {
    /// Queue lane index, 0 = most urgent.
    pub fn lane(&self) -> usize {
        match self {
            Priority::Urgent => 0,
            Priority::High => 1,
            Priority::Normal => 2,
            Priority::Low => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Urgent => "urgent",
            Priority::High => "high",
            Priority::Normal => "normal",
            Priority::Low => "low",
        }
    }
}

/// Job lifecycle status.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Job is waiting in the queue
    #[default]
    Pending,
    /// Job is being processed
    Processing,
    /// Job completed with every scene succeeding
    Completed,
    /// Job completed but one or more scenes failed
    CompletedWithErrors,
    /// Job failed
    Failed,
    /// Job was cancelled by the client
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::CompletedWithErrors => "completed_with_errors",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    /// Check if this is a terminal state (no more updates expected).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed
                | JobStatus::CompletedWithErrors
                | JobStatus::Failed
                | JobStatus::Cancelled
        )
    }

    /// Check whether `next` is a legal successor of `self`.
    ///
    /// pending -> processing | cancelled
    /// processing -> completed | completed_with_errors | failed | cancelled
    /// terminal -> (nothing)
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        match self {
            JobStatus::Pending => {
                matches!(next, JobStatus::Processing | JobStatus::Cancelled)
            }
            JobStatus::Processing => matches!(
                next,
                JobStatus::Completed
                    | JobStatus::CompletedWithErrors
                    | JobStatus::Failed
                    | JobStatus::Cancelled
            ),
            _ => false,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Pipeline phase a processing job is currently in.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum JobPhase {
    #[default]
    Upload,
    Script,
    Audio,
    Visual,
    Compose,
    Done,
}

impl JobPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobPhase::Upload => "upload",
            JobPhase::Script => "script",
            JobPhase::Audio => "audio",
            JobPhase::Visual => "visual",
            JobPhase::Compose => "compose",
            JobPhase::Done => "done",
        }
    }
}

impl fmt::Display for JobPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A recorded job or scene error.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct JobError {
    /// Scene the error belongs to, if scene-scoped
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scene_id: Option<u32>,
    /// Human-readable error message
    pub message: String,
    /// When the error was recorded
    pub at: DateTime<Utc>,
}

impl JobError {
    pub fn job_level(message: impl Into<String>) -> Self {
        Self {
            scene_id: None,
            message: message.into(),
            at: Utc::now(),
        }
    }

    pub fn scene_level(scene_id: u32, message: impl Into<String>) -> Self {
        Self {
            scene_id: Some(scene_id),
            message: message.into(),
            at: Utc::now(),
        }
    }
}

/// One user submission, from upload to finished video.
///
/// The record is created when the submission is accepted and mutated only by
/// the orchestrator that owns it; the job store hands out read-only views.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Job {
    /// Unique job ID
    pub id: JobId,

    /// Lifecycle status
    #[serde(default)]
    pub status: JobStatus,

    /// Current pipeline phase
    #[serde(default)]
    pub phase: JobPhase,

    /// Progress (0-100), non-decreasing within a run
    #[serde(default)]
    pub progress: u8,

    /// Human-readable progress or error summary
    #[serde(default)]
    pub message: String,

    /// Submission priority
    #[serde(default)]
    pub priority: Priority,

    /// Source document reference
    pub source: SourceDocument,

    /// Generated script, once the script phase has run
    #[serde(skip_serializing_if = "Option::is_none")]
    pub script: Option<Script>,

    /// Final video, once composed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video: Option<Video>,

    /// Job- and scene-level errors collected along the way
    #[serde(default)]
    pub errors: Vec<JobError>,

    /// Cancellation reason, if cancelled
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancel_reason: Option<String>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,

    /// Completion timestamp
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Create a new pending job for a source document.
    pub fn new(source: SourceDocument, priority: Priority) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            status: JobStatus::Pending,
            phase: JobPhase::Upload,
            progress: 0,
            message: "Queued".to_string(),
            priority,
            source,
            script: None,
            video: None,
            errors: Vec::new(),
            cancel_reason: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Move to a new status, enforcing the transition graph.
    ///
    /// Returns `false` (and leaves the record untouched) when the transition
    /// is illegal, e.g. out of a terminal state.
    pub fn transition(&mut self, next: JobStatus) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }
        self.status = next;
        self.updated_at = Utc::now();
        if next.is_terminal() {
            self.completed_at = Some(self.updated_at);
            self.phase = JobPhase::Done;
        }
        true
    }

    /// Enter a pipeline phase with a progress message.
    pub fn enter_phase(&mut self, phase: JobPhase, message: impl Into<String>) {
        if self.status.is_terminal() {
            return;
        }
        self.phase = phase;
        self.message = message.into();
        self.updated_at = Utc::now();
    }

    /// Raise progress. Values below the current progress are ignored so the
    /// observable percentage never decreases within a run.
    pub fn set_progress(&mut self, progress: u8) {
        if self.status.is_terminal() {
            return;
        }
        let clamped = progress.min(100);
        if clamped > self.progress {
            self.progress = clamped;
            self.updated_at = Utc::now();
        }
    }

    /// Record an error without changing status.
    pub fn push_error(&mut self, error: JobError) {
        self.errors.push(error);
        self.updated_at = Utc::now();
    }

    /// Mark the job cancelled. Legal from pending and processing only.
    pub fn cancel(&mut self, reason: Option<String>) -> bool {
        if !self.transition(JobStatus::Cancelled) {
            return false;
        }
        self.message = "Cancelled".to_string();
        if reason.is_some() {
            self.cancel_reason = reason;
        }
        true
    }

    /// Check if the job has reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Read-only projection for status polling.
    pub fn view(&self) -> JobView {
        JobView {
            job_id: self.id.clone(),
            status: self.status,
            phase: self.phase,
            progress: self.progress,
            message: self.message.clone(),
            updated_at: self.updated_at,
            completed_at: self.completed_at,
            result: self.video.clone(),
            errors: self.errors.iter().map(|e| e.message.clone()).collect(),
        }
    }

    /// One-line summary for listings.
    pub fn summary(&self) -> JobSummary {
        JobSummary {
            job_id: self.id.clone(),
            status: self.status,
            phase: self.phase,
            progress: self.progress,
            priority: self.priority,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Read-only projection of a job for status queries.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct JobView {
    pub job_id: JobId,
    pub status: JobStatus,
    pub phase: JobPhase,
    pub progress: u8,
    pub message: String,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Video>,
    pub errors: Vec<String>,
}

/// Summary row for job listings.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct JobSummary {
    pub job_id: JobId,
    pub status: JobStatus,
    pub phase: JobPhase,
    pub progress: u8,
    pub priority: Priority,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{SourceDocument, SourceKind};

    fn test_source() -> SourceDocument {
        SourceDocument::new("/tmp/doc.txt", SourceKind::Text, 2048)
    }

    #[test]
    fn test_job_creation() {
        let job = Job::new(test_source(), Priority::Normal);
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.phase, JobPhase::Upload);
        assert_eq!(job.progress, 0);
        assert!(!job.is_terminal());
    }

    #[test]
    fn test_legal_transitions() {
        let mut job = Job::new(test_source(), Priority::Normal);

        assert!(job.transition(JobStatus::Processing));
        assert_eq!(job.status, JobStatus::Processing);

        assert!(job.transition(JobStatus::Completed));
        assert!(job.is_terminal());
        assert!(job.completed_at.is_some());
        assert_eq!(job.phase, JobPhase::Done);
    }

    #[test]
    fn test_terminal_states_are_sticky() {
        let mut job = Job::new(test_source(), Priority::Normal);
        job.transition(JobStatus::Processing);
        job.transition(JobStatus::Failed);

        assert!(!job.transition(JobStatus::Processing));
        assert!(!job.transition(JobStatus::Completed));
        assert!(!job.cancel(None));
        assert_eq!(job.status, JobStatus::Failed);
    }

    #[test]
    fn test_cancel_from_pending_and_processing_only() {
        let mut pending = Job::new(test_source(), Priority::Normal);
        assert!(pending.cancel(Some("user request".into())));
        assert_eq!(pending.status, JobStatus::Cancelled);
        assert_eq!(pending.cancel_reason.as_deref(), Some("user request"));

        let mut processing = Job::new(test_source(), Priority::Normal);
        processing.transition(JobStatus::Processing);
        assert!(processing.cancel(None));

        let mut done = Job::new(test_source(), Priority::Normal);
        done.transition(JobStatus::Processing);
        done.transition(JobStatus::Completed);
        assert!(!done.cancel(None));
    }

    #[test]
    fn test_progress_is_monotonic() {
        let mut job = Job::new(test_source(), Priority::Normal);
        job.transition(JobStatus::Processing);

        job.set_progress(40);
        assert_eq!(job.progress, 40);

        // Lower values are ignored
        job.set_progress(10);
        assert_eq!(job.progress, 40);

        job.set_progress(90);
        assert_eq!(job.progress, 90);

        // Clamped to 100
        job.set_progress(250);
        assert_eq!(job.progress, 100);
    }

    #[test]
    fn test_priority_lanes() {
        assert!(Priority::Urgent.lane() < Priority::High.lane());
        assert!(Priority::High.lane() < Priority::Normal.lane());
        assert!(Priority::Normal.lane() < Priority::Low.lane());
    }

    #[test]
    fn test_view_projects_errors() {
        let mut job = Job::new(test_source(), Priority::Normal);
        job.push_error(JobError::scene_level(2, "tts unavailable"));

        let view = job.view();
        assert_eq!(view.errors, vec!["tts unavailable".to_string()]);
        assert_eq!(view.job_id, job.id);
    }
}
