//! Scripts and scenes produced by the script phase.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use validator::{Validate, ValidationError, ValidationErrors};

use crate::asset::{AudioAsset, VisualAsset};

/// Minimum number of scenes in a valid script.
pub const MIN_SCENES: usize = 3;
/// Maximum number of scenes in a valid script.
pub const MAX_SCENES: usize = 7;
/// Narration text bounds (characters).
pub const MIN_NARRATION_CHARS: u64 = 10;
pub const MAX_NARRATION_CHARS: u64 = 1000;
/// Visual prompt bounds (characters).
pub const MIN_PROMPT_CHARS: u64 = 5;
pub const MAX_PROMPT_CHARS: u64 = 500;

/// Kind of visual a scene is rendered with.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum VisualKind {
    #[default]
    Slide,
    Diagram,
    Graph,
    Formula,
    Code,
    /// Anything the LLM emitted that we do not recognise. Rendered as an
    /// error placeholder rather than rejected.
    #[serde(other)]
    Unknown,
}

impl VisualKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            VisualKind::Slide => "slide",
            VisualKind::Diagram => "diagram",
            VisualKind::Graph => "graph",
            VisualKind::Formula => "formula",
            VisualKind::Code => "code",
            VisualKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for VisualKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Per-scene processing status within the assets phase.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum SceneStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
}

impl SceneStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SceneStatus::Pending => "pending",
            SceneStatus::Processing => "processing",
            SceneStatus::Completed => "completed",
            SceneStatus::Failed => "failed",
        }
    }
}

/// One atomic unit of the video: narration paired with a single visual.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Validate)]
pub struct Scene {
    /// Identifier unique within the script
    pub id: u32,

    /// Narration spoken over the scene
    #[validate(length(min = 10, max = 1000))]
    pub narration_text: String,

    /// Kind of visual to render
    #[serde(default)]
    pub visual_type: VisualKind,

    /// Prompt handed to the visual renderer
    #[validate(length(min = 5, max = 500))]
    pub visual_prompt: String,

    /// Processing status, mutated only by the worker handling the scene
    #[serde(default)]
    pub status: SceneStatus,

    /// Error message if the scene failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Synthesised narration, once the audio task has run
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio: Option<AudioAsset>,

    /// Rendered visual, once the visual task has run
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visual: Option<VisualAsset>,
}

impl Scene {
    pub fn new(
        id: u32,
        narration_text: impl Into<String>,
        visual_type: VisualKind,
        visual_prompt: impl Into<String>,
    ) -> Self {
        Self {
            id,
            narration_text: narration_text.into(),
            visual_type,
            visual_prompt: visual_prompt.into(),
            status: SceneStatus::Pending,
            error: None,
            audio: None,
            visual: None,
        }
    }

    /// Mark the scene failed with a reason.
    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = SceneStatus::Failed;
        self.error = Some(error.into());
    }

    /// Check the narration and prompt length bounds.
    pub fn validate_bounds(&self) -> Result<(), ValidationErrors> {
        Validate::validate(self)
    }

    /// A scene may only be reported completed when both assets exist.
    pub fn has_complete_assets(&self) -> bool {
        self.audio.is_some() && self.visual.is_some()
    }
}

/// The ordered list of scenes generated from the source document.
///
/// Created exactly once per job; the scene list and ordering are immutable
/// afterwards (only per-scene status/error fields change).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Script {
    pub scenes: Vec<Scene>,

    /// BCP-47 language code of the narration, when the LLM reports one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

impl Script {
    pub fn new(scenes: Vec<Scene>) -> Self {
        Self {
            scenes,
            language: None,
        }
    }

    /// Validate the script-level shape: 3-7 scenes with unique ids.
    ///
    /// Per-scene field bounds are deliberately not part of this check: a
    /// script with a bad scene is still worth running, with just that
    /// scene failed (see [`Scene::validate_bounds`]).
    pub fn validate_shape(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if self.scenes.len() < MIN_SCENES || self.scenes.len() > MAX_SCENES {
            let mut err = ValidationError::new("scene_count");
            err.message = Some(
                format!(
                    "script must contain {MIN_SCENES}-{MAX_SCENES} scenes, got {}",
                    self.scenes.len()
                )
                .into(),
            );
            errors.add("scenes", err);
            return Err(errors);
        }

        let mut seen = std::collections::HashSet::new();
        for scene in &self.scenes {
            if !seen.insert(scene.id) {
                let mut err = ValidationError::new("duplicate_scene_id");
                err.message = Some(format!("duplicate scene id {}", scene.id).into());
                errors.add("scenes", err);
                return Err(errors);
            }
        }

        Ok(())
    }

    /// Validate shape plus every scene's field bounds.
    pub fn validate(&self) -> Result<(), ValidationErrors> {
        self.validate_shape()?;
        for scene in &self.scenes {
            scene.validate_bounds()?;
        }
        Ok(())
    }

    /// Scenes whose status is `Completed`, in script order.
    pub fn completed_scenes(&self) -> impl Iterator<Item = &Scene> {
        self.scenes
            .iter()
            .filter(|s| s.status == SceneStatus::Completed)
    }

    /// Scenes whose status is `Failed`, in script order.
    pub fn failed_scenes(&self) -> impl Iterator<Item = &Scene> {
        self.scenes
            .iter()
            .filter(|s| s.status == SceneStatus::Failed)
    }
}
