//! Engine configuration, aggregating every component's settings.

use std::path::PathBuf;
use std::time::Duration;

use edvid_cache::CacheConfig;
use edvid_models::UploadLimits;
use edvid_resilience::{CircuitBreakerConfig, RetryPolicy};
use edvid_resources::ResourceLimits;
use edvid_script::LlmConfig;
use edvid_store::StoreConfig;
use edvid_tts::TtsConfig;
use edvid_visuals::VisualConfig;

/// Top-level engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub resources: ResourceLimits,
    pub circuit: CircuitBreakerConfig,
    pub retry: RetryPolicy,
    pub cache: CacheConfig,
    pub store: StoreConfig,
    pub upload: UploadLimits,
    pub llm: LlmConfig,
    pub tts: TtsConfig,
    pub visual: VisualConfig,
    /// Root for per-scene assets (`audio/`, `visuals/` below it)
    pub assets_dir: PathBuf,
    /// Directory for finished videos
    pub videos_dir: PathBuf,
    /// How long shutdown waits for in-flight jobs
    pub shutdown_grace: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            resources: ResourceLimits::default(),
            circuit: CircuitBreakerConfig::default(),
            retry: RetryPolicy::default(),
            cache: CacheConfig::default(),
            store: StoreConfig::default(),
            upload: UploadLimits::default(),
            llm: LlmConfig::default(),
            tts: TtsConfig::default(),
            visual: VisualConfig::default(),
            assets_dir: PathBuf::from("assets"),
            videos_dir: PathBuf::from("videos"),
            shutdown_grace: Duration::from_secs(60),
        }
    }
}

impl EngineConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            resources: ResourceLimits::from_env(),
            circuit: CircuitBreakerConfig::from_env(),
            retry: RetryPolicy::from_env(),
            cache: CacheConfig::from_env(),
            store: StoreConfig::from_env(),
            upload: UploadLimits {
                max_upload_size_mb: std::env::var("EDVID_MAX_UPLOAD_SIZE_MB")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(defaults.upload.max_upload_size_mb),
            },
            llm: LlmConfig::from_env(),
            tts: TtsConfig::from_env(),
            visual: VisualConfig::from_env(),
            assets_dir: std::env::var("EDVID_ASSETS_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.assets_dir),
            videos_dir: std::env::var("EDVID_VIDEOS_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.videos_dir),
            shutdown_grace: Duration::from_secs(
                std::env::var("EDVID_SHUTDOWN_GRACE_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(60),
            ),
        }
    }

    pub fn audio_dir(&self) -> PathBuf {
        self.assets_dir.join("audio")
    }

    pub fn visuals_dir(&self) -> PathBuf {
        self.assets_dir.join("visuals")
    }
}
