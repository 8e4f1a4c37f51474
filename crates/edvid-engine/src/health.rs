//! Engine health reporting.

use std::collections::BTreeMap;

use serde::Serialize;

use edvid_resilience::CircuitState;
use edvid_resources::ResourceSnapshot;

use crate::services::Services;

/// Snapshot of service health for the health endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    /// LLM reachable as far as its breaker knows
    pub llm: bool,
    /// TTS reachable as far as its breaker knows
    pub tts: bool,
    /// Breaker state per external service
    pub breakers: BTreeMap<String, String>,
    /// CPU/memory and slot usage
    pub resources: ResourceSnapshot,
    /// Jobs waiting for admission
    pub queue_depth: usize,
    /// Jobs currently processing
    pub active_jobs: usize,
}

impl HealthReport {
    pub async fn collect(services: &Services) -> Self {
        let breakers: BTreeMap<String, String> = services
            .breakers
            .all()
            .into_iter()
            .map(|b| (b.service().to_string(), b.state().as_str().to_string()))
            .collect();

        Self {
            llm: services.breakers.llm.state() != CircuitState::Open,
            tts: services.breakers.tts.state() != CircuitState::Open,
            breakers,
            resources: services.governor.snapshot(),
            queue_depth: services.queue.len().await,
            active_jobs: services.store.processing_count().await,
        }
    }
}
