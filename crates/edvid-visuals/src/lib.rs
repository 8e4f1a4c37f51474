//! Visual asset production.
//!
//! The [`AssetRouter`] maps a scene's visual type onto the matching
//! renderer (slide, diagram, chart, formula, code) and persists the result
//! under the shared asset directory. Renderer failures never fail a job:
//! after the orchestrator's retry budget is spent, an error placeholder is
//! rendered locally and the scene is marked failed.

mod error;
mod placeholder;
mod providers;
mod router;

pub use error::{VisualError, VisualResult};
pub use providers::{ChartKind, DiagramSpec, ProviderClient, VisualConfig};
pub use router::AssetRouter;
