//! Slot accounting and pressure-gated acquisition.

use std::sync::Arc;
use std::time::Instant;

use futures_util::future::BoxFuture;
use tokio::sync::{OwnedSemaphorePermit, RwLock, Semaphore};
use tracing::{debug, warn};

use crate::monitor::SystemMonitor;
use crate::{ResourceError, ResourceLimits, ResourceResult, ResourceSnapshot, SlotKind, SlotUsage};

/// Callback invoked when memory crosses the cleanup ceiling. Receives the
/// target fraction to evict down to and returns the number of entries shed.
pub type ReclaimFn = Arc<dyn Fn(f64) -> BoxFuture<'static, usize> + Send + Sync>;

/// A held slot. Releasing is automatic on drop, on every exit path.
pub struct ResourcePermit {
    _permit: OwnedSemaphorePermit,
    kind: SlotKind,
}

impl ResourcePermit {
    pub fn kind(&self) -> SlotKind {
        self.kind
    }
}

/// Process-wide concurrency governor.
pub struct ResourceGovernor {
    limits: ResourceLimits,
    job_slots: Arc<Semaphore>,
    tts_slots: Arc<Semaphore>,
    visual_slots: Arc<Semaphore>,
    monitor: SystemMonitor,
    reclaimer: RwLock<Option<ReclaimFn>>,
}

impl ResourceGovernor {
    pub fn new(limits: ResourceLimits) -> Self {
        Self {
            job_slots: Arc::new(Semaphore::new(limits.max_concurrent_jobs)),
            tts_slots: Arc::new(Semaphore::new(limits.max_concurrent_tts)),
            visual_slots: Arc::new(Semaphore::new(limits.max_concurrent_visual)),
            monitor: SystemMonitor::new(),
            reclaimer: RwLock::new(None),
            limits,
        }
    }

    /// Register the memory reclaimer (the cache layer's eviction pass).
    pub async fn set_reclaimer(&self, reclaim: ReclaimFn) {
        *self.reclaimer.write().await = Some(reclaim);
    }

    pub fn limits(&self) -> &ResourceLimits {
        &self.limits
    }

    fn slots(&self, kind: SlotKind) -> &Arc<Semaphore> {
        match kind {
            SlotKind::Job => &self.job_slots,
            SlotKind::Tts => &self.tts_slots,
            SlotKind::Visual => &self.visual_slots,
        }
    }

    /// Wait for a permit of the requested kind.
    ///
    /// Waiters are served FIFO per kind (tokio semaphores are fair). After a
    /// slot is granted the governor holds the caller until CPU and memory
    /// sit below the soft ceilings, triggering a cache eviction pass when
    /// memory is above the cleanup ceiling. Never fails except when the
    /// governor is shut down; dropping the future releases nothing it did
    /// not take.
    pub async fn acquire(&self, kind: SlotKind) -> ResourceResult<ResourcePermit> {
        let permit = self
            .slots(kind)
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ResourceError::Closed)?;

        self.wait_for_headroom(kind).await;

        Ok(ResourcePermit {
            _permit: permit,
            kind,
        })
    }

    /// Same as `acquire`, but gives up after `timeout`.
    pub async fn try_acquire(
        &self,
        kind: SlotKind,
        timeout: std::time::Duration,
    ) -> ResourceResult<ResourcePermit> {
        let started = Instant::now();
        match tokio::time::timeout(timeout, self.acquire(kind)).await {
            Ok(result) => result,
            Err(_) => Err(ResourceError::ResourceExhausted {
                kind,
                waited_ms: started.elapsed().as_millis(),
            }),
        }
    }

    /// Spin (with short sleeps) until CPU/memory are under the soft
    /// ceilings, kicking the reclaimer when memory passes the cleanup mark.
    async fn wait_for_headroom(&self, kind: SlotKind) {
        loop {
            let (cpu, memory) = self.monitor.sample();

            if memory > self.limits.memory_cleanup_ceiling {
                if let Some(reclaim) = self.reclaimer.read().await.clone() {
                    let target = (self.limits.memory_cleanup_ceiling / 100.0) as f64;
                    let evicted = reclaim(target).await;
                    if evicted > 0 {
                        debug!(evicted, memory_percent = memory, "reclaimed cache entries");
                        continue;
                    }
                }
            }

            if cpu <= self.limits.cpu_soft_ceiling && memory <= self.limits.memory_soft_ceiling {
                return;
            }

            warn!(
                slot = %kind,
                cpu_percent = cpu,
                memory_percent = memory,
                "resource pressure above soft ceiling, delaying permit"
            );
            tokio::time::sleep(self.limits.pressure_poll_interval).await;
        }
    }

    /// Current CPU/memory readings and per-kind slot usage.
    pub fn snapshot(&self) -> ResourceSnapshot {
        let (cpu_percent, memory_percent) = self.monitor.sample();

        let slots = [SlotKind::Job, SlotKind::Tts, SlotKind::Visual]
            .into_iter()
            .map(|kind| {
                let total = self.limits.slots_for(kind);
                let available = self.slots(kind).available_permits();
                SlotUsage {
                    kind,
                    in_use: total.saturating_sub(available),
                    available,
                }
            })
            .collect();

        ResourceSnapshot {
            cpu_percent,
            memory_percent,
            slots,
        }
    }
}
