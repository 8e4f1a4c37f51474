//! Shared services context.
//!
//! One explicit context constructed at startup and threaded through the
//! orchestrator and per-scene tasks, replacing any notion of global
//! singletons. Lifecycle: create, run, shutdown.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{watch, Mutex};

use edvid_cache::CacheLayer;
use edvid_compose::Composer;
use edvid_models::{JobId, VisualKind};
use edvid_queue::JobQueue;
use edvid_resilience::{CircuitBreaker, CircuitBreakerConfig};
use edvid_resources::ResourceGovernor;
use edvid_script::LlmClient;
use edvid_store::JobStore;
use edvid_tts::TtsClient;
use edvid_visuals::{AssetRouter, ProviderClient};

use crate::config::EngineConfig;
use crate::error::EngineResult;

/// One breaker per external service.
pub struct Breakers {
    pub llm: CircuitBreaker,
    pub tts: CircuitBreaker,
    pub slide: CircuitBreaker,
    pub diagram: CircuitBreaker,
    pub chart: CircuitBreaker,
    pub formula: CircuitBreaker,
    pub code: CircuitBreaker,
}

impl Breakers {
    pub fn new(config: &CircuitBreakerConfig) -> Self {
        Self {
            llm: CircuitBreaker::new("llm", config.clone()),
            tts: CircuitBreaker::new("tts", config.clone()),
            slide: CircuitBreaker::new("visual.slide", config.clone()),
            diagram: CircuitBreaker::new("visual.diagram", config.clone()),
            chart: CircuitBreaker::new("visual.chart", config.clone()),
            formula: CircuitBreaker::new("visual.formula", config.clone()),
            code: CircuitBreaker::new("visual.code", config.clone()),
        }
    }

    /// Breaker guarding the provider for a visual kind. Unknown kinds are
    /// rendered locally and never pass through a breaker; the slide breaker
    /// stands in so callers always get one.
    pub fn for_visual(&self, kind: VisualKind) -> &CircuitBreaker {
        match kind {
            VisualKind::Slide | VisualKind::Unknown => &self.slide,
            VisualKind::Diagram => &self.diagram,
            VisualKind::Graph => &self.chart,
            VisualKind::Formula => &self.formula,
            VisualKind::Code => &self.code,
        }
    }

    pub fn all(&self) -> Vec<&CircuitBreaker> {
        vec![
            &self.llm,
            &self.tts,
            &self.slide,
            &self.diagram,
            &self.chart,
            &self.formula,
            &self.code,
        ]
    }
}

/// Everything a job needs to run, shared across workers.
pub struct Services {
    pub config: EngineConfig,
    pub governor: Arc<ResourceGovernor>,
    pub cache: Arc<CacheLayer>,
    pub breakers: Breakers,
    pub llm: LlmClient,
    pub tts: TtsClient,
    pub visuals: AssetRouter,
    pub composer: Composer,
    pub store: Arc<JobStore>,
    pub queue: Arc<JobQueue>,
    /// Per-job cancellation flags, registered at submit time.
    pub cancellations: Mutex<HashMap<JobId, watch::Sender<bool>>>,
}

impl Services {
    /// Build the full context and wire the governor's memory reclaimer to
    /// the cache eviction pass.
    pub async fn new(config: EngineConfig) -> EngineResult<Self> {
        let governor = Arc::new(ResourceGovernor::new(config.resources.clone()));
        let cache = Arc::new(CacheLayer::new(config.cache.clone()));

        let cache_for_reclaim = Arc::clone(&cache);
        governor
            .set_reclaimer(Arc::new(move |target| {
                let cache = Arc::clone(&cache_for_reclaim);
                Box::pin(async move { cache.evict_until(target).await })
            }))
            .await;

        let breakers = Breakers::new(&config.circuit);
        let llm = LlmClient::new(config.llm.clone())?;
        let tts = TtsClient::new(config.tts.clone(), config.audio_dir())?;
        let visuals = AssetRouter::new(
            ProviderClient::new(config.visual.clone())?,
            config.visuals_dir(),
        );
        let composer = Composer::new(&config.videos_dir)?;
        let store = Arc::new(JobStore::new(config.store.clone()));
        let queue = Arc::new(JobQueue::new());

        Ok(Self {
            config,
            governor,
            cache,
            breakers,
            llm,
            tts,
            visuals,
            composer,
            store,
            queue,
            cancellations: Mutex::new(HashMap::new()),
        })
    }

    /// Register a cancellation channel for a new job.
    pub async fn register_cancel(&self, job_id: &JobId) -> watch::Receiver<bool> {
        let (tx, rx) = watch::channel(false);
        self.cancellations.lock().await.insert(job_id.clone(), tx);
        rx
    }

    /// Flip a job's cancellation flag. Returns whether a channel existed.
    pub async fn request_cancel(&self, job_id: &JobId) -> bool {
        let cancellations = self.cancellations.lock().await;
        match cancellations.get(job_id) {
            Some(tx) => tx.send(true).is_ok(),
            None => false,
        }
    }

    /// Fetch the cancellation receiver for a job, if still registered.
    pub async fn cancel_receiver(&self, job_id: &JobId) -> Option<watch::Receiver<bool>> {
        self.cancellations
            .lock()
            .await
            .get(job_id)
            .map(|tx| tx.subscribe())
    }

    /// Drop the cancellation channel once a job is terminal.
    pub async fn clear_cancel(&self, job_id: &JobId) {
        self.cancellations.lock().await.remove(job_id);
    }
}
