//! Final video composition.
//!
//! Treats muxing as a black box over the FFmpeg CLI: each successful scene
//! becomes a still-image-plus-narration segment, and the segments are
//! concatenated in script order into `videos/{job_id}.mp4`. Composition has
//! no timeout (it completes in bounded real time on local files), but the
//! orchestrator may abort between segments on cancellation.

mod error;

pub use error::{ComposeError, ComposeResult};

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;
use tracing::{debug, info};

use edvid_models::{JobId, Video, VideoStatus};

/// Media pair for one successfully processed scene.
#[derive(Debug, Clone)]
pub struct SceneMedia {
    pub scene_id: u32,
    pub visual_path: PathBuf,
    pub audio_path: PathBuf,
    /// Drives the segment length (`-shortest` guards the tail).
    pub audio_duration_secs: f64,
}

/// FFmpeg-backed composer.
pub struct Composer {
    ffmpeg: PathBuf,
    videos_dir: PathBuf,
}

impl Composer {
    /// Locate `ffmpeg` on PATH and prepare the output directory.
    pub fn new(videos_dir: impl Into<PathBuf>) -> ComposeResult<Self> {
        let ffmpeg = which::which("ffmpeg").map_err(|_| ComposeError::FfmpegNotFound)?;
        Ok(Self::with_ffmpeg_path(ffmpeg, videos_dir))
    }

    /// Use an explicit ffmpeg binary (tests, unusual installs).
    pub fn with_ffmpeg_path(ffmpeg: impl Into<PathBuf>, videos_dir: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            videos_dir: videos_dir.into(),
        }
    }

    /// Mux the scene pairs, in the given order, into one MP4.
    pub async fn compose(&self, job_id: &JobId, scenes: &[SceneMedia]) -> ComposeResult<Video> {
        if scenes.is_empty() {
            return Err(ComposeError::NoScenes);
        }

        tokio::fs::create_dir_all(&self.videos_dir).await?;
        let work_dir = tempfile::tempdir()?;

        let mut segment_paths = Vec::with_capacity(scenes.len());
        for (index, scene) in scenes.iter().enumerate() {
            let segment = work_dir.path().join(format!("segment_{index:03}.mp4"));
            self.render_segment(scene, &segment).await?;
            segment_paths.push(segment);
        }

        let list_path = work_dir.path().join("concat.txt");
        tokio::fs::write(&list_path, concat_list(&segment_paths)).await?;

        let output = self.videos_dir.join(format!("{job_id}.mp4"));
        self.run_ffmpeg(&[
            "-y",
            "-f",
            "concat",
            "-safe",
            "0",
            "-i",
            &list_path.to_string_lossy(),
            "-c",
            "copy",
            &output.to_string_lossy(),
        ])
        .await?;

        let size_bytes = tokio::fs::metadata(&output).await?.len();
        if size_bytes == 0 {
            return Err(ComposeError::EmptyOutput { path: output });
        }

        let duration_secs = scenes.iter().map(|s| s.audio_duration_secs).sum();
        info!(
            job_id = %job_id,
            scenes = scenes.len(),
            duration_secs,
            size_bytes,
            "composed video"
        );

        Ok(Video {
            path: output,
            duration_secs,
            size_bytes,
            status: VideoStatus::Ready,
        })
    }

    /// Build one still-image segment: loop the visual under the narration.
    async fn render_segment(&self, scene: &SceneMedia, output: &Path) -> ComposeResult<()> {
        debug!(scene_id = scene.scene_id, "rendering scene segment");
        self.run_ffmpeg(&[
            "-y",
            "-loop",
            "1",
            "-i",
            &scene.visual_path.to_string_lossy(),
            "-i",
            &scene.audio_path.to_string_lossy(),
            "-t",
            &format!("{:.3}", scene.audio_duration_secs),
            "-c:v",
            "libx264",
            "-tune",
            "stillimage",
            "-pix_fmt",
            "yuv420p",
            "-vf",
            "scale=trunc(iw/2)*2:trunc(ih/2)*2",
            "-c:a",
            "aac",
            "-shortest",
            "-movflags",
            "+faststart",
            &output.to_string_lossy(),
        ])
        .await
    }

    async fn run_ffmpeg(&self, args: &[&str]) -> ComposeResult<()> {
        let output = Command::new(&self.ffmpeg)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await?;

        if !output.status.success() {
            return Err(ComposeError::Ffmpeg {
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        Ok(())
    }
}

/// Concat-demuxer list body. Single quotes in paths are escaped the way the
/// demuxer expects ('\'' splice).
fn concat_list(segments: &[PathBuf]) -> String {
    segments
        .iter()
        .map(|p| {
            let escaped = p.to_string_lossy().replace('\'', r"'\''");
            format!("file '{escaped}'\n")
        })
        .collect()
}
