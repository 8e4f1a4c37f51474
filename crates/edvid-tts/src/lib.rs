//! Text-to-speech client.
//!
//! Posts narration to `POST {base_url}/v1/audio/speech`, streams the binary
//! waveform to `assets/audio/segment_{scene_id}_{uuid}.wav` and measures
//! the duration from the written file.

mod error;
mod wav;

pub use error::{TtsError, TtsResult};
pub use wav::wav_duration;

use std::path::{Path, PathBuf};
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::Client;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};
use uuid::Uuid;

use edvid_models::AudioAsset;

/// TTS endpoint and voice configuration.
#[derive(Debug, Clone)]
pub struct TtsConfig {
    /// Base URL of the speech endpoint
    pub base_url: String,
    /// Voice identifier
    pub voice: String,
    /// Output container requested from the service
    pub format: String,
    /// Speaking-rate multiplier
    pub speed: f32,
    /// Expressiveness tuning
    pub exaggeration: f32,
    /// Guidance weight tuning
    pub cfg_weight: f32,
    /// Sampling temperature
    pub temperature: f32,
    /// TCP connect timeout (separate from the read timeout)
    pub connect_timeout: Duration,
    /// Full-request timeout
    pub timeout: Duration,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8880".to_string(),
            voice: "af_heart".to_string(),
            format: "wav".to_string(),
            speed: 1.0,
            exaggeration: 0.5,
            cfg_weight: 0.5,
            temperature: 0.8,
            connect_timeout: Duration::from_secs(10),
            timeout: Duration::from_secs(60),
        }
    }
}

impl TtsConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            base_url: std::env::var("EDVID_TTS_BASE_URL").unwrap_or(defaults.base_url),
            voice: std::env::var("EDVID_TTS_VOICE").unwrap_or(defaults.voice),
            format: std::env::var("EDVID_TTS_FORMAT").unwrap_or(defaults.format),
            speed: env_f32("EDVID_TTS_SPEED", defaults.speed),
            exaggeration: env_f32("EDVID_TTS_EXAGGERATION", defaults.exaggeration),
            cfg_weight: env_f32("EDVID_TTS_CFG_WEIGHT", defaults.cfg_weight),
            temperature: env_f32("EDVID_TTS_TEMPERATURE", defaults.temperature),
            connect_timeout: defaults.connect_timeout,
            timeout: Duration::from_secs(
                std::env::var("EDVID_TTS_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(60),
            ),
        }
    }
}

fn env_f32(name: &str, default: f32) -> f32 {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

#[derive(Debug, Serialize)]
struct SpeechRequest<'a> {
    text: &'a str,
    voice: &'a str,
    format: &'a str,
    speed: f32,
    exaggeration: f32,
    cfg_weight: f32,
    temperature: f32,
}

/// Client for the speech synthesis service.
pub struct TtsClient {
    config: TtsConfig,
    client: Client,
    audio_dir: PathBuf,
}

impl TtsClient {
    pub fn new(config: TtsConfig, audio_dir: impl Into<PathBuf>) -> TtsResult<Self> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.timeout)
            .build()?;
        Ok(Self {
            config,
            client,
            audio_dir: audio_dir.into(),
        })
    }

    pub fn config(&self) -> &TtsConfig {
        &self.config
    }

    /// Synthesise narration for one scene and persist the waveform.
    pub async fn synthesize(
        &self,
        scene_id: u32,
        text: &str,
        fingerprint: &str,
    ) -> TtsResult<AudioAsset> {
        let url = format!("{}/v1/audio/speech", self.config.base_url);
        let request = SpeechRequest {
            text,
            voice: &self.config.voice,
            format: &self.config.format,
            speed: self.config.speed,
            exaggeration: self.config.exaggeration,
            cfg_weight: self.config.cfg_weight,
            temperature: self.config.temperature,
        };

        debug!(scene_id, chars = text.len(), "requesting speech synthesis");
        let response = self.client.post(&url).json(&request).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TtsError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let path = self.segment_path(scene_id);
        let written = stream_to_file(response, &path).await?;
        if written == 0 {
            tokio::fs::remove_file(&path).await.ok();
            return Err(TtsError::EmptyWaveform);
        }

        let duration_secs = match wav::wav_duration(&path).await {
            Ok(duration) => duration,
            Err(e) => {
                // Unusable payloads must not linger in the asset directory.
                tokio::fs::remove_file(&path).await.ok();
                return Err(e);
            }
        };

        info!(
            scene_id,
            duration_secs,
            bytes = written,
            path = %path.display(),
            "synthesised narration"
        );

        Ok(AudioAsset {
            scene_id,
            path,
            duration_secs,
            fingerprint: fingerprint.to_string(),
        })
    }

    fn segment_path(&self, scene_id: u32) -> PathBuf {
        self.audio_dir.join(format!(
            "segment_{}_{}.{}",
            scene_id,
            Uuid::new_v4(),
            self.config.format
        ))
    }
}

async fn stream_to_file(response: reqwest::Response, path: &Path) -> TtsResult<u64> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let mut file = tokio::fs::File::create(path).await?;
    let mut stream = response.bytes_stream();
    let mut written = 0u64;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;

    Ok(written)
}
