//! Per-scene media assets and the final video record.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Raster or vector format of a rendered visual.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Png,
    Jpeg,
    Svg,
}

impl ImageFormat {
    /// File extension without the dot.
    pub fn extension(&self) -> &'static str {
        match self {
            ImageFormat::Png => "png",
            ImageFormat::Jpeg => "jpeg",
            ImageFormat::Svg => "svg",
        }
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.extension())
    }
}

/// Synthesised narration for one scene.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AudioAsset {
    /// Scene this asset belongs to
    pub scene_id: u32,
    /// Local path to the waveform file
    pub path: PathBuf,
    /// Duration measured from the file itself (seconds, > 0)
    pub duration_secs: f64,
    /// Fingerprint of (text, voice params) used as the cache key
    pub fingerprint: String,
}

/// Rendered visual for one scene.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct VisualAsset {
    /// Scene this asset belongs to
    pub scene_id: u32,
    /// Local path to the image file
    pub path: PathBuf,
    /// Declared pixel width
    pub width: u32,
    /// Declared pixel height
    pub height: u32,
    pub format: ImageFormat,
    /// Fingerprint of (visual type, prompt, rendering params)
    pub fingerprint: String,
}

/// Status of the final muxed video.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum VideoStatus {
    #[default]
    Ready,
    Missing,
}

/// The final muxed MP4.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Video {
    /// Local path to the MP4
    pub path: PathBuf,
    /// Duration in seconds
    pub duration_secs: f64,
    /// File size in bytes
    pub size_bytes: u64,
    #[serde(default)]
    pub status: VideoStatus,
}
