//! Scene → renderer dispatch.

use std::path::PathBuf;

use tracing::{info, warn};
use uuid::Uuid;

use edvid_models::{ImageFormat, Scene, VisualAsset, VisualKind};

use crate::error::VisualResult;
use crate::placeholder::placeholder_svg;
use crate::providers::{ProviderClient, RenderedImage};

/// Routes each scene to the renderer matching its visual type and persists
/// the output under the shared visuals directory.
pub struct AssetRouter {
    provider: ProviderClient,
    visuals_dir: PathBuf,
}

impl AssetRouter {
    pub fn new(provider: ProviderClient, visuals_dir: impl Into<PathBuf>) -> Self {
        Self {
            provider,
            visuals_dir: visuals_dir.into(),
        }
    }

    pub fn provider(&self) -> &ProviderClient {
        &self.provider
    }

    /// Render the scene's visual. This is the raw renderer call the
    /// orchestrator wraps with cache, breaker, retry and the governor;
    /// unknown visual types short-circuit to a placeholder without touching
    /// any provider.
    pub async fn render(&self, scene: &Scene, fingerprint: &str) -> VisualResult<VisualAsset> {
        let image = match scene.visual_type {
            VisualKind::Slide => self.provider.render_slide(&scene.visual_prompt).await?,
            VisualKind::Diagram => self.provider.render_diagram(&scene.visual_prompt).await?,
            VisualKind::Graph => self.provider.render_chart(&scene.visual_prompt).await?,
            VisualKind::Formula => self.provider.render_formula(&scene.visual_prompt).await?,
            VisualKind::Code => self.provider.render_code(&scene.visual_prompt).await?,
            VisualKind::Unknown => {
                warn!(
                    scene_id = scene.id,
                    "unknown visual type, rendering placeholder"
                );
                return self
                    .placeholder(scene, "unrecognised visual type", fingerprint)
                    .await;
            }
        };

        let asset = self.persist(scene.id, image, fingerprint).await?;
        info!(
            scene_id = scene.id,
            visual_type = %scene.visual_type,
            path = %asset.path.display(),
            "rendered visual"
        );
        Ok(asset)
    }

    /// Write a locally generated error placeholder for the scene. Used for
    /// unknown visual types and after the retry budget for a real renderer
    /// is exhausted.
    pub async fn placeholder(
        &self,
        scene: &Scene,
        message: &str,
        fingerprint: &str,
    ) -> VisualResult<VisualAsset> {
        let config = self.provider.config();
        let bytes = placeholder_svg(
            scene.visual_type.as_str(),
            message,
            config.width,
            config.height,
        );
        self.persist(
            scene.id,
            RenderedImage {
                bytes,
                format: ImageFormat::Svg,
            },
            fingerprint,
        )
        .await
    }

    async fn persist(
        &self,
        scene_id: u32,
        image: RenderedImage,
        fingerprint: &str,
    ) -> VisualResult<VisualAsset> {
        tokio::fs::create_dir_all(&self.visuals_dir).await?;
        let path = self.visuals_dir.join(format!(
            "{}_{}.{}",
            scene_id,
            Uuid::new_v4(),
            image.format.extension()
        ));
        tokio::fs::write(&path, &image.bytes).await?;

        let config = self.provider.config();
        Ok(VisualAsset {
            scene_id,
            path,
            width: config.width,
            height: config.height,
            format: image.format,
            fingerprint: fingerprint.to_string(),
        })
    }
}
