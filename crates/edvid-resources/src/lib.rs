//! Process-wide resource governor.
//!
//! Every expensive operation (job admission, TTS synthesis, visual
//! rendering) must hold a permit of the matching slot kind. Each kind is a
//! counting semaphore; on top of the slot counts, `acquire` refuses to hand
//! out permits while CPU or memory sit above the configured soft ceilings,
//! and asks the registered reclaimer (the cache layer) to shed memory once
//! usage crosses the cleanup ceiling.

mod governor;
mod monitor;

pub use governor::{ReclaimFn, ResourceGovernor, ResourcePermit};
pub use monitor::SystemMonitor;

use serde::Serialize;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Kind of slot a permit is drawn from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotKind {
    Job,
    Tts,
    Visual,
}

impl SlotKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SlotKind::Job => "job",
            SlotKind::Tts => "tts",
            SlotKind::Visual => "visual",
        }
    }
}

impl fmt::Display for SlotKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Governor configuration.
#[derive(Debug, Clone)]
pub struct ResourceLimits {
    /// Maximum concurrently processing jobs
    pub max_concurrent_jobs: usize,
    /// Maximum concurrent TTS operations
    pub max_concurrent_tts: usize,
    /// Maximum concurrent visual renderings
    pub max_concurrent_visual: usize,
    /// Soft CPU ceiling (percent); acquires wait above this
    pub cpu_soft_ceiling: f32,
    /// Soft memory ceiling (percent); acquires wait above this
    pub memory_soft_ceiling: f32,
    /// Memory ceiling (percent) above which the reclaimer is triggered
    pub memory_cleanup_ceiling: f32,
    /// How long to sleep between ceiling re-checks
    pub pressure_poll_interval: Duration,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 3,
            max_concurrent_tts: 2,
            max_concurrent_visual: 4,
            cpu_soft_ceiling: 80.0,
            memory_soft_ceiling: 85.0,
            memory_cleanup_ceiling: 70.0,
            pressure_poll_interval: Duration::from_millis(250),
        }
    }
}

impl ResourceLimits {
    /// Create limits from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_concurrent_jobs: env_parse("EDVID_MAX_JOBS", defaults.max_concurrent_jobs),
            max_concurrent_tts: env_parse("EDVID_MAX_TTS", defaults.max_concurrent_tts),
            max_concurrent_visual: env_parse("EDVID_MAX_VISUAL", defaults.max_concurrent_visual),
            cpu_soft_ceiling: env_parse("EDVID_CPU_SOFT_CEILING", defaults.cpu_soft_ceiling),
            memory_soft_ceiling: env_parse("EDVID_MEM_SOFT_CEILING", defaults.memory_soft_ceiling),
            memory_cleanup_ceiling: env_parse(
                "EDVID_MEM_CLEANUP_CEILING",
                defaults.memory_cleanup_ceiling,
            ),
            pressure_poll_interval: defaults.pressure_poll_interval,
        }
    }

    /// Slot count for a kind.
    pub fn slots_for(&self, kind: SlotKind) -> usize {
        match kind {
            SlotKind::Job => self.max_concurrent_jobs,
            SlotKind::Tts => self.max_concurrent_tts,
            SlotKind::Visual => self.max_concurrent_visual,
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// Current load as reported by `ResourceGovernor::snapshot`.
#[derive(Debug, Clone, Serialize)]
pub struct ResourceSnapshot {
    pub cpu_percent: f32,
    pub memory_percent: f32,
    pub slots: Vec<SlotUsage>,
}

/// Per-kind slot usage.
#[derive(Debug, Clone, Serialize)]
pub struct SlotUsage {
    pub kind: SlotKind,
    pub in_use: usize,
    pub available: usize,
}

pub type ResourceResult<T> = Result<T, ResourceError>;

#[derive(Debug, Error)]
pub enum ResourceError {
    /// `try_acquire` did not get a permit within its timeout.
    #[error("no {kind} slot became available within {waited_ms} ms")]
    ResourceExhausted { kind: SlotKind, waited_ms: u128 },

    /// The governor is shutting down.
    #[error("resource governor is closed")]
    Closed,
}
