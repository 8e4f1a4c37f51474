//! Process-wide job store.
//!
//! A map from job id to the current [`Job`] record, safe under concurrent
//! access: writes serialize behind a write lock, status reads clone under a
//! shared lock. A background sweeper periodically snapshots the whole store
//! to a JSON file (best-effort durability, not a transaction log) and
//! removes terminal jobs past the retention age together with their
//! on-disk assets.

mod sweeper;

pub use sweeper::spawn_sweeper;

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use edvid_models::{Job, JobId, JobStatus, JobSummary, JobView};

use thiserror::Error;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("job {0} not found")]
    NotFound(JobId),

    #[error("job {0} already exists")]
    Duplicate(JobId),

    #[error("snapshot IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("snapshot serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Snapshot file location
    pub snapshot_path: PathBuf,
    /// How often the sweeper snapshots and sweeps
    pub snapshot_interval: Duration,
    /// Terminal jobs older than this are removed
    pub retention: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            snapshot_path: PathBuf::from("job_store.json"),
            snapshot_interval: Duration::from_secs(60),
            retention: Duration::from_secs(24 * 3600),
        }
    }
}

impl StoreConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            snapshot_path: std::env::var("EDVID_STORE_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.snapshot_path),
            snapshot_interval: Duration::from_secs(
                std::env::var("EDVID_STORE_SNAPSHOT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(60),
            ),
            retention: Duration::from_secs(
                std::env::var("EDVID_JOB_RETENTION_HOURS")
                    .ok()
                    .and_then(|s| s.parse::<u64>().ok())
                    .map(|h| h * 3600)
                    .unwrap_or(24 * 3600),
            ),
        }
    }
}

/// Process-wide job map with snapshot persistence.
pub struct JobStore {
    config: StoreConfig,
    jobs: RwLock<HashMap<JobId, Job>>,
}

impl JobStore {
    pub fn new(config: StoreConfig) -> Self {
        Self {
            config,
            jobs: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Load the snapshot written by a previous run, if one exists.
    /// Best-effort: a missing or corrupt snapshot starts the store empty.
    pub async fn load(&self) -> StoreResult<usize> {
        let bytes = match tokio::fs::read(&self.config.snapshot_path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let restored: Vec<Job> = match serde_json::from_slice(&bytes) {
            Ok(jobs) => jobs,
            Err(e) => {
                warn!(
                    path = %self.config.snapshot_path.display(),
                    "ignoring corrupt job snapshot: {e}"
                );
                return Ok(0);
            }
        };

        let mut jobs = self.jobs.write().await;
        let count = restored.len();
        for job in restored {
            jobs.insert(job.id.clone(), job);
        }
        info!(count, "restored jobs from snapshot");
        Ok(count)
    }

    /// Insert a freshly created job. Ids are unique for the lifetime of the
    /// store.
    pub async fn create(&self, job: Job) -> StoreResult<()> {
        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(&job.id) {
            return Err(StoreError::Duplicate(job.id));
        }
        jobs.insert(job.id.clone(), job);
        Ok(())
    }

    /// Mutate a job under the write lock and return the updated record.
    pub async fn update<F>(&self, id: &JobId, mutate: F) -> StoreResult<Job>
    where
        F: FnOnce(&mut Job),
    {
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(id).ok_or_else(|| StoreError::NotFound(id.clone()))?;
        mutate(job);
        Ok(job.clone())
    }

    /// Full record, cloned.
    pub async fn get(&self, id: &JobId) -> Option<Job> {
        self.jobs.read().await.get(id).cloned()
    }

    /// Read-only projection for pollers.
    pub async fn view(&self, id: &JobId) -> Option<JobView> {
        self.jobs.read().await.get(id).map(|j| j.view())
    }

    /// Most recently created jobs first.
    pub async fn list(&self, limit: usize) -> Vec<JobSummary> {
        let jobs = self.jobs.read().await;
        let mut summaries: Vec<JobSummary> = jobs.values().map(|j| j.summary()).collect();
        summaries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        summaries.truncate(limit);
        summaries
    }

    /// Non-terminal jobs, most recently created first.
    pub async fn list_active(&self, limit: usize) -> Vec<JobSummary> {
        let jobs = self.jobs.read().await;
        let mut summaries: Vec<JobSummary> = jobs
            .values()
            .filter(|j| !j.is_terminal())
            .map(|j| j.summary())
            .collect();
        summaries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        summaries.truncate(limit);
        summaries
    }

    /// Number of jobs currently in `Processing`.
    pub async fn processing_count(&self) -> usize {
        self.jobs
            .read()
            .await
            .values()
            .filter(|j| j.status == JobStatus::Processing)
            .count()
    }

    /// Remove a job record (assets are left to the caller).
    pub async fn delete(&self, id: &JobId) -> bool {
        self.jobs.write().await.remove(id).is_some()
    }

    /// Remove terminal jobs older than `max_age` along with their on-disk
    /// assets. Returns the number of jobs removed.
    pub async fn cleanup_expired(&self, max_age: Duration) -> usize {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(max_age).unwrap_or(chrono::Duration::hours(24));

        let expired: Vec<Job> = {
            let jobs = self.jobs.read().await;
            jobs.values()
                .filter(|j| j.is_terminal() && j.updated_at < cutoff)
                .cloned()
                .collect()
        };

        if expired.is_empty() {
            return 0;
        }

        {
            let mut jobs = self.jobs.write().await;
            for job in &expired {
                jobs.remove(&job.id);
            }
        }

        for job in &expired {
            remove_job_assets(job).await;
        }

        info!(removed = expired.len(), "swept expired jobs");
        expired.len()
    }

    /// Write the whole store to the snapshot file. The write goes to a
    /// sibling temp file first and is renamed into place, so a crash
    /// mid-write cannot corrupt the previous snapshot.
    pub async fn snapshot(&self) -> StoreResult<()> {
        let jobs: Vec<Job> = {
            let guard = self.jobs.read().await;
            guard.values().cloned().collect()
        };

        let json = serde_json::to_vec_pretty(&jobs)?;
        let tmp_path = self.config.snapshot_path.with_extension("json.tmp");

        if let Some(parent) = self.config.snapshot_path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        tokio::fs::write(&tmp_path, &json).await?;
        tokio::fs::rename(&tmp_path, &self.config.snapshot_path).await?;

        debug!(
            jobs = jobs.len(),
            path = %self.config.snapshot_path.display(),
            "snapshotted job store"
        );
        Ok(())
    }
}

/// Delete the files a job produced: the video plus per-scene assets.
async fn remove_job_assets(job: &Job) {
    if let Some(video) = &job.video {
        tokio::fs::remove_file(&video.path).await.ok();
    }
    if let Some(script) = &job.script {
        for scene in &script.scenes {
            if let Some(audio) = &scene.audio {
                tokio::fs::remove_file(&audio.path).await.ok();
            }
            if let Some(visual) = &scene.visual {
                tokio::fs::remove_file(&visual.path).await.ok();
            }
        }
    }
}
