//! LLM client for scene-by-scene script generation.
//!
//! Speaks an OpenAI-compatible chat completion contract. The model identity
//! is opaque to the pipeline and only participates in the script cache key.
//! Parsing is tolerant: fenced code blocks are stripped, and when the whole
//! payload is not valid JSON a single reparse attempt recovers the first
//! JSON object embedded in the text.

use std::time::Duration;

use regex_lite::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use edvid_models::{Scene, Script, VisualKind};

use crate::error::{ScriptError, ScriptResult};

/// System prompt instructing structured scene output.
const SCRIPT_PROMPT: &str = r#"You are an educational video script writer.
Turn the user's document into a short explainer video script.

Return ONLY a single JSON object with this schema:
{
  "language": "en",
  "scenes": [
    {
      "id": 1,
      "narration_text": "What the narrator says for this scene (10-1000 characters)",
      "visual_type": "slide",
      "visual_prompt": "What to show on screen (5-500 characters)"
    }
  ]
}

Rules:
- Emit between 3 and 7 scenes.
- visual_type must be one of: slide, diagram, graph, formula, code.
- Scene ids start at 1 and increase by 1.
- Return ONLY the JSON object, no commentary."#;

/// Maximum number of document characters forwarded to the model.
const MAX_DOCUMENT_CHARS: usize = 24_000;

/// LLM endpoint configuration.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// Base URL of the OpenAI-compatible endpoint
    pub base_url: String,
    /// Bearer token, if the endpoint requires one
    pub api_key: Option<String>,
    /// Model identifier, carried into the script cache key
    pub model: String,
    /// Prompt template version, carried into the script cache key
    pub template_version: String,
    /// Per-request timeout
    pub timeout: Duration,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8001".to_string(),
            api_key: None,
            model: "gpt-4o-mini".to_string(),
            template_version: "v1".to_string(),
            timeout: Duration::from_secs(60),
        }
    }
}

impl LlmConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            base_url: std::env::var("EDVID_LLM_BASE_URL").unwrap_or(defaults.base_url),
            api_key: std::env::var("EDVID_LLM_API_KEY").ok(),
            model: std::env::var("EDVID_LLM_MODEL").unwrap_or(defaults.model),
            template_version: std::env::var("EDVID_LLM_TEMPLATE_VERSION")
                .unwrap_or(defaults.template_version),
            timeout: Duration::from_secs(
                std::env::var("EDVID_LLM_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(60),
            ),
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: String,
}

/// Payload shape the model is asked to emit.
#[derive(Debug, Deserialize)]
struct ScriptPayload {
    #[serde(default)]
    language: Option<String>,
    scenes: Vec<ScenePayload>,
}

#[derive(Debug, Deserialize)]
struct ScenePayload {
    id: u32,
    narration_text: String,
    #[serde(default)]
    visual_type: VisualKind,
    visual_prompt: String,
}

/// Client for the script-writing LLM.
pub struct LlmClient {
    config: LlmConfig,
    client: Client,
}

impl LlmClient {
    pub fn new(config: LlmConfig) -> ScriptResult<Self> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { config, client })
    }

    pub fn config(&self) -> &LlmConfig {
        &self.config
    }

    /// Generate and validate a script for the extracted document text.
    pub async fn generate_script(&self, document: &str) -> ScriptResult<Script> {
        let truncated = truncate_chars(document, MAX_DOCUMENT_CHARS);
        let content = self.chat(&truncated).await?;
        let script = parse_script(&content)?;

        // Shape violations (scene count, duplicate ids) invalidate the
        // whole script; individual out-of-bounds scenes are kept and fail
        // later at asset time without spending external calls.
        script
            .validate_shape()
            .map_err(|e| ScriptError::Invalid(e.to_string()))?;

        info!(
            scenes = script.scenes.len(),
            model = %self.config.model,
            "LLM produced a valid script"
        );
        Ok(script)
    }

    async fn chat(&self, document: &str) -> ScriptResult<String> {
        let url = format!("{}/v1/chat/completions", self.config.base_url);
        let request = ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SCRIPT_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: document,
                },
            ],
            temperature: 0.4,
        };

        let mut builder = self.client.post(&url).json(&request);
        if let Some(key) = &self.config.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ScriptError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body = response.text().await?;
        match serde_json::from_str::<ChatResponse>(&body) {
            Ok(chat) => chat
                .choices
                .into_iter()
                .next()
                .map(|c| c.message.content)
                .ok_or_else(|| ScriptError::Malformed("response has no choices".into())),
            Err(e) => {
                // Unknown envelope; hand the raw body to the tolerant parser.
                debug!("response is not a chat envelope ({e}), using raw body");
                Ok(body)
            }
        }
    }
}

/// Parse model output into a [`Script`], with one reparse attempt that
/// recovers an embedded JSON object from surrounding prose.
fn parse_script(content: &str) -> ScriptResult<Script> {
    let stripped = strip_code_fences(content);

    let payload = match serde_json::from_str::<ScriptPayload>(stripped) {
        Ok(payload) => payload,
        Err(first_err) => {
            warn!("script payload not directly parseable ({first_err}), reparsing");
            let block = extract_json_block(stripped)
                .ok_or_else(|| ScriptError::Malformed(first_err.to_string()))?;
            serde_json::from_str::<ScriptPayload>(&block)
                .map_err(|e| ScriptError::Malformed(e.to_string()))?
        }
    };

    let scenes = payload
        .scenes
        .into_iter()
        .map(|s| Scene::new(s.id, s.narration_text, s.visual_type, s.visual_prompt))
        .collect();

    let mut script = Script::new(scenes);
    script.language = payload.language;
    Ok(script)
}

/// Strip a leading/trailing markdown code fence if present.
fn strip_code_fences(text: &str) -> &str {
    let text = text.trim();
    let text = text
        .strip_prefix("```json")
        .or_else(|| text.strip_prefix("```"))
        .unwrap_or(text);
    text.strip_suffix("```").unwrap_or(text).trim()
}

/// Find the outermost JSON object in free-form text.
fn extract_json_block(text: &str) -> Option<String> {
    let re = Regex::new(r"(?s)\{.*\}").ok()?;
    re.find(text).map(|m| m.as_str().to_string())
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        text.chars().take(max_chars).collect()
    }
}
