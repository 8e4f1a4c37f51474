//! Script generation: source-text extraction, the LLM client, and the
//! deterministic fallback generator used when the LLM is unavailable or
//! returns an invalid script.

mod error;
mod extract;
mod fallback;
mod llm;

pub use error::{ScriptError, ScriptResult};
pub use extract::extract_text;
pub use fallback::fallback_script;
pub use llm::{LlmClient, LlmConfig};
