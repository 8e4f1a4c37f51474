//! In-process job queue.
//!
//! Strict priority (urgent > high > normal > low) with FIFO ordering inside
//! each lane. Admission is driven by the orchestrator, which pops the next
//! job only once the resource governor grants a job slot. Cancellation
//! before admission removes the entry so no external call is ever issued
//! for it.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;
use tokio::sync::{Mutex, Notify};
use tracing::debug;

use edvid_models::{JobId, Priority};

pub type QueueResult<T> = Result<T, QueueError>;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("job {0} is already enqueued")]
    Duplicate(JobId),

    #[error("queue is closed")]
    Closed,
}

const LANES: usize = 4;

/// Strict-priority FIFO queue of pending job ids.
pub struct JobQueue {
    lanes: Mutex<[VecDeque<JobId>; LANES]>,
    notify: Notify,
    closed: AtomicBool,
}

impl JobQueue {
    pub fn new() -> Self {
        Self {
            lanes: Mutex::new(std::array::from_fn(|_| VecDeque::new())),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Enqueue a pending job at its priority. Duplicates are rejected.
    pub async fn push(&self, job_id: JobId, priority: Priority) -> QueueResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(QueueError::Closed);
        }

        let mut lanes = self.lanes.lock().await;
        if lanes.iter().any(|lane| lane.contains(&job_id)) {
            return Err(QueueError::Duplicate(job_id));
        }
        lanes[priority.lane()].push_back(job_id.clone());
        drop(lanes);

        debug!(job_id = %job_id, priority = priority.as_str(), "enqueued job");
        self.notify.notify_one();
        Ok(())
    }

    /// Take the next job without waiting.
    pub async fn try_pop(&self) -> Option<JobId> {
        let mut lanes = self.lanes.lock().await;
        lanes.iter_mut().find_map(|lane| lane.pop_front())
    }

    /// Wait for the next job. Returns `None` once the queue is closed and
    /// drained.
    pub async fn pop(&self) -> Option<JobId> {
        loop {
            if let Some(job_id) = self.try_pop().await {
                return Some(job_id);
            }
            if self.closed.load(Ordering::SeqCst) {
                return None;
            }
            self.notify.notified().await;
        }
    }

    /// Remove a job that has not been admitted yet. Returns whether an
    /// entry was removed.
    pub async fn remove(&self, job_id: &JobId) -> bool {
        let mut lanes = self.lanes.lock().await;
        for lane in lanes.iter_mut() {
            if let Some(pos) = lane.iter().position(|id| id == job_id) {
                lane.remove(pos);
                return true;
            }
        }
        false
    }

    /// Number of queued jobs across all lanes.
    pub async fn len(&self) -> usize {
        self.lanes.lock().await.iter().map(|lane| lane.len()).sum()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Stop accepting jobs and wake all waiting workers.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn id(name: &str) -> JobId {
        JobId::from_string(name)
    }

    #[tokio::test]
    async fn test_strict_priority_order() {
        let queue = JobQueue::new();
        queue.push(id("low"), Priority::Low).await.unwrap();
        queue.push(id("normal"), Priority::Normal).await.unwrap();
        queue.push(id("urgent"), Priority::Urgent).await.unwrap();
        queue.push(id("high"), Priority::High).await.unwrap();

        assert_eq!(queue.pop().await.unwrap().as_str(), "urgent");
        assert_eq!(queue.pop().await.unwrap().as_str(), "high");
        assert_eq!(queue.pop().await.unwrap().as_str(), "normal");
        assert_eq!(queue.pop().await.unwrap().as_str(), "low");
    }

    #[tokio::test]
    async fn test_fifo_within_priority() {
        let queue = JobQueue::new();
        queue.push(id("first"), Priority::Normal).await.unwrap();
        queue.push(id("second"), Priority::Normal).await.unwrap();
        queue.push(id("third"), Priority::Normal).await.unwrap();

        assert_eq!(queue.pop().await.unwrap().as_str(), "first");
        assert_eq!(queue.pop().await.unwrap().as_str(), "second");
        assert_eq!(queue.pop().await.unwrap().as_str(), "third");
    }

    #[tokio::test]
    async fn test_duplicates_rejected() {
        let queue = JobQueue::new();
        queue.push(id("a"), Priority::Normal).await.unwrap();
        assert!(matches!(
            queue.push(id("a"), Priority::High).await,
            Err(QueueError::Duplicate(_))
        ));
    }

    #[tokio::test]
    async fn test_remove_before_admission() {
        let queue = JobQueue::new();
        queue.push(id("a"), Priority::Normal).await.unwrap();
        queue.push(id("b"), Priority::Normal).await.unwrap();

        assert!(queue.remove(&id("a")).await);
        assert!(!queue.remove(&id("a")).await);
        assert_eq!(queue.len().await, 1);
        assert_eq!(queue.pop().await.unwrap().as_str(), "b");
    }

    #[tokio::test]
    async fn test_pop_wakes_on_push() {
        let queue = Arc::new(JobQueue::new());

        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.pop().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.push(id("late"), Priority::Normal).await.unwrap();

        let popped = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(popped.unwrap().as_str(), "late");
    }

    #[tokio::test]
    async fn test_close_unblocks_waiters() {
        let queue = Arc::new(JobQueue::new());

        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.pop().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.close();

        let popped = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(popped.is_none());
        assert!(matches!(
            queue.push(id("x"), Priority::Normal).await,
            Err(QueueError::Closed)
        ));
    }
}
