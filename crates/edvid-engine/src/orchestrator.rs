//! Public engine surface and the worker loop.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use metrics::counter;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{info, warn};

use edvid_models::{Job, JobId, JobStatus, JobSummary, JobView, Priority, SourceDocument};
use edvid_resources::SlotKind;

use crate::error::{EngineError, EngineResult};
use crate::health::HealthReport;
use crate::pipeline;
use crate::services::Services;

/// Drives jobs from submission to completion. The HTTP layer talks to this
/// type only.
pub struct Orchestrator {
    services: Arc<Services>,
}

impl Orchestrator {
    pub fn new(services: Arc<Services>) -> Self {
        Self { services }
    }

    pub fn services(&self) -> &Arc<Services> {
        &self.services
    }

    /// Validate an upload and enqueue a new job. Validation failures are
    /// surfaced verbatim and never create a job record.
    pub async fn submit(&self, path: impl AsRef<Path>, priority: Priority) -> EngineResult<JobId> {
        let path = path.as_ref();
        let size_bytes = tokio::fs::metadata(path)
            .await
            .map_err(|e| EngineError::job_failed(format!("cannot read upload: {e}")))?
            .len();

        let kind = self.services.config.upload.validate(path, size_bytes)?;
        let job = Job::new(SourceDocument::new(path, kind, size_bytes), priority);
        let job_id = job.id.clone();

        self.services.store.create(job).await?;
        self.services.register_cancel(&job_id).await;
        self.services.queue.push(job_id.clone(), priority).await?;

        counter!("edvid_jobs_submitted_total").increment(1);
        info!(job_id = %job_id, priority = priority.as_str(), "job submitted");
        Ok(job_id)
    }

    /// Read-only projection for pollers. Pure: repeated calls only differ
    /// by real progress.
    pub async fn status(&self, job_id: &JobId) -> EngineResult<JobView> {
        self.services
            .store
            .view(job_id)
            .await
            .ok_or(EngineError::JobNotFound)
    }

    /// Cancel a job. Pending jobs are removed from the queue and marked
    /// immediately, with no external call ever issued; processing jobs
    /// observe the flag at the next suspension point. Never blocks on the
    /// job itself.
    pub async fn cancel(&self, job_id: &JobId, reason: Option<String>) -> EngineResult<bool> {
        let job = self
            .services
            .store
            .get(job_id)
            .await
            .ok_or(EngineError::JobNotFound)?;
        if job.is_terminal() {
            return Ok(false);
        }

        if self.services.queue.remove(job_id).await {
            self.services
                .store
                .update(job_id, |job| {
                    job.cancel(reason);
                })
                .await?;
            self.services.clear_cancel(job_id).await;
            counter!("edvid_jobs_cancelled_total").increment(1);
            info!(job_id = %job_id, "cancelled before admission");
            return Ok(true);
        }

        // Already admitted: record the reason now, flip the flag, and let
        // the pipeline finish the bookkeeping at its next check.
        self.services
            .store
            .update(job_id, |job| {
                if reason.is_some() {
                    job.cancel_reason = reason;
                }
                job.message = "Cancellation requested".to_string();
            })
            .await?;
        let flagged = self.services.request_cancel(job_id).await;
        info!(job_id = %job_id, flagged, "cancellation requested");
        Ok(flagged)
    }

    pub async fn list(&self, limit: usize) -> Vec<JobSummary> {
        self.services.store.list(limit).await
    }

    pub async fn list_active(&self, limit: usize) -> Vec<JobSummary> {
        self.services.store.list_active(limit).await
    }

    /// Path of the finished MP4, for download handlers.
    pub async fn video_path(&self, job_id: &JobId) -> EngineResult<PathBuf> {
        let job = self
            .services
            .store
            .get(job_id)
            .await
            .ok_or(EngineError::JobNotFound)?;

        match (&job.status, &job.video) {
            (JobStatus::Completed | JobStatus::CompletedWithErrors, Some(video)) => {
                Ok(video.path.clone())
            }
            _ => Err(EngineError::VideoNotReady { status: job.status }),
        }
    }

    /// Service health: breaker states plus resource and queue load.
    pub async fn health(&self) -> HealthReport {
        HealthReport::collect(&self.services).await
    }

    /// Worker loop: admit queued jobs as job slots free up, one spawned
    /// task per job. Runs until shutdown flips, then drains in-flight jobs
    /// within the configured grace period.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            max_concurrent_jobs = self.services.config.resources.max_concurrent_jobs,
            "orchestrator started"
        );
        let mut jobs: JoinSet<()> = JoinSet::new();

        loop {
            let job_id = tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
                popped = self.services.queue.pop() => match popped {
                    Some(job_id) => job_id,
                    None => break,
                },
            };

            // Admission requires a job slot; shutdown mid-wait re-queues.
            let permit = loop {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break None;
                        }
                    }
                    permit = self.services.governor.acquire(SlotKind::Job) => match permit {
                        Ok(permit) => break Some(permit),
                        Err(e) => {
                            warn!("job slot acquisition failed: {e}");
                            break None;
                        }
                    },
                }
            };
            let Some(permit) = permit else {
                self.requeue(job_id).await;
                break;
            };

            let services = Arc::clone(&self.services);
            jobs.spawn(async move {
                let _permit = permit;
                pipeline::process_job(services, job_id).await;
            });

            // Opportunistically reap finished jobs so the set stays small.
            while jobs.try_join_next().is_some() {}
        }

        info!("orchestrator draining in-flight jobs");
        let grace = self.services.config.shutdown_grace;
        let drained = tokio::time::timeout(grace, async {
            while jobs.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!(grace_secs = grace.as_secs(), "shutdown grace expired with jobs in flight");
        }
        info!("orchestrator stopped");
    }

    async fn requeue(&self, job_id: JobId) {
        let priority = self
            .services
            .store
            .get(&job_id)
            .await
            .map(|j| j.priority)
            .unwrap_or_default();
        if let Err(e) = self.services.queue.push(job_id, priority).await {
            warn!("could not re-queue job during shutdown: {e}");
        }
    }
}
