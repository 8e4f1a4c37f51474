//! EduVid job orchestration engine.
//!
//! Turns an uploaded document into a short educational video: an LLM writes
//! a scene script, each scene gets narration (TTS) and a visual (slide,
//! diagram, chart, formula or code), and FFmpeg muxes the pairs into one
//! MP4. This crate owns the job state machine, the per-scene fan-out, the
//! cache→breaker→retry→governor wrapping of every external call, the
//! partial-failure policy and cancellation.

pub mod config;
pub mod error;
pub mod health;
pub mod orchestrator;
pub mod pipeline;
pub mod services;

pub use config::EngineConfig;
pub use error::{EngineError, EngineResult};
pub use health::HealthReport;
pub use orchestrator::Orchestrator;
pub use services::{Breakers, Services};
