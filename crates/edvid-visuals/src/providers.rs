//! HTTP clients for the external visual renderers.
//!
//! Each provider accepts a structured prompt and returns an image. The
//! request shapes differ per provider; the response contract is uniform:
//! image bytes with a `Content-Type` of png, jpeg or svg.

use std::time::Duration;

use reqwest::Client;
use serde::Serialize;
use tracing::debug;

use edvid_models::ImageFormat;

use crate::error::{VisualError, VisualResult};

/// Renderer endpoints and output dimensions.
#[derive(Debug, Clone)]
pub struct VisualConfig {
    pub slide_url: String,
    pub diagram_url: String,
    pub chart_url: String,
    pub formula_url: String,
    pub code_url: String,
    /// Requested output width in pixels
    pub width: u32,
    /// Requested output height in pixels
    pub height: u32,
    /// Per-request timeout
    pub timeout: Duration,
}

impl Default for VisualConfig {
    fn default() -> Self {
        Self {
            slide_url: "http://localhost:8601".to_string(),
            diagram_url: "http://localhost:8602".to_string(),
            chart_url: "http://localhost:8603".to_string(),
            formula_url: "http://localhost:8604".to_string(),
            code_url: "http://localhost:8605".to_string(),
            width: 1280,
            height: 720,
            timeout: Duration::from_secs(60),
        }
    }
}

impl VisualConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            slide_url: std::env::var("EDVID_VISUAL_SLIDE_URL").unwrap_or(defaults.slide_url),
            diagram_url: std::env::var("EDVID_VISUAL_DIAGRAM_URL").unwrap_or(defaults.diagram_url),
            chart_url: std::env::var("EDVID_VISUAL_CHART_URL").unwrap_or(defaults.chart_url),
            formula_url: std::env::var("EDVID_VISUAL_FORMULA_URL").unwrap_or(defaults.formula_url),
            code_url: std::env::var("EDVID_VISUAL_CODE_URL").unwrap_or(defaults.code_url),
            width: defaults.width,
            height: defaults.height,
            timeout: Duration::from_secs(
                std::env::var("EDVID_VISUAL_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(60),
            ),
        }
    }

    /// Rendering parameters carried into the visual cache key.
    pub fn render_params(&self) -> String {
        format!("{}x{}", self.width, self.height)
    }
}

/// Chart family inferred from the scene prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChartKind {
    Bar,
    Line,
    Pie,
}

impl ChartKind {
    /// Infer the chart family from prompt wording; bar is the default.
    pub fn infer(prompt: &str) -> Self {
        let lower = prompt.to_lowercase();
        if lower.contains("pie") || lower.contains("share") || lower.contains("proportion") {
            ChartKind::Pie
        } else if lower.contains("line")
            || lower.contains("trend")
            || lower.contains("over time")
            || lower.contains("timeline")
        {
            ChartKind::Line
        } else {
            ChartKind::Bar
        }
    }
}

/// Structured graph description parsed from a diagram prompt.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DiagramSpec {
    pub nodes: Vec<String>,
    pub edges: Vec<(String, String)>,
}

impl DiagramSpec {
    /// Parse "A -> B" arrows out of the prompt; with no arrows, each comma-
    /// or newline-separated fragment becomes a free-standing node.
    pub fn parse(prompt: &str) -> Self {
        let mut nodes: Vec<String> = Vec::new();
        let mut edges = Vec::new();

        let mut push_node = |nodes: &mut Vec<String>, name: &str| {
            let name = name.trim().to_string();
            if !name.is_empty() && !nodes.contains(&name) {
                nodes.push(name);
            }
        };

        for segment in prompt.split(['\n', ',', ';']) {
            if segment.contains("->") {
                let parts: Vec<&str> = segment.split("->").collect();
                for window in parts.windows(2) {
                    let from = window[0].trim();
                    let to = window[1].trim();
                    if from.is_empty() || to.is_empty() {
                        continue;
                    }
                    push_node(&mut nodes, from);
                    push_node(&mut nodes, to);
                    edges.push((from.to_string(), to.to_string()));
                }
            } else {
                push_node(&mut nodes, segment);
            }
        }

        Self { nodes, edges }
    }
}

#[derive(Debug, Serialize)]
struct SlideRequest<'a> {
    prompt: &'a str,
    width: u32,
    height: u32,
}

#[derive(Debug, Serialize)]
struct DiagramRequest {
    #[serde(flatten)]
    spec: DiagramSpec,
    width: u32,
    height: u32,
}

#[derive(Debug, Serialize)]
struct ChartRequest<'a> {
    kind: ChartKind,
    prompt: &'a str,
    width: u32,
    height: u32,
}

#[derive(Debug, Serialize)]
struct FormulaRequest<'a> {
    latex: &'a str,
}

#[derive(Debug, Serialize)]
struct CodeRequest<'a> {
    code: &'a str,
    language: &'a str,
}

/// One rendered image, before it is written to disk.
pub(crate) struct RenderedImage {
    pub bytes: Vec<u8>,
    pub format: ImageFormat,
}

/// HTTP client shared by the five renderer providers.
pub struct ProviderClient {
    config: VisualConfig,
    client: Client,
}

impl ProviderClient {
    pub fn new(config: VisualConfig) -> VisualResult<Self> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { config, client })
    }

    pub fn config(&self) -> &VisualConfig {
        &self.config
    }

    pub(crate) async fn render_slide(&self, prompt: &str) -> VisualResult<RenderedImage> {
        let request = SlideRequest {
            prompt,
            width: self.config.width,
            height: self.config.height,
        };
        self.post("slide", &self.config.slide_url, &request).await
    }

    pub(crate) async fn render_diagram(&self, prompt: &str) -> VisualResult<RenderedImage> {
        let request = DiagramRequest {
            spec: DiagramSpec::parse(prompt),
            width: self.config.width,
            height: self.config.height,
        };
        self.post("diagram", &self.config.diagram_url, &request)
            .await
    }

    pub(crate) async fn render_chart(&self, prompt: &str) -> VisualResult<RenderedImage> {
        let request = ChartRequest {
            kind: ChartKind::infer(prompt),
            prompt,
            width: self.config.width,
            height: self.config.height,
        };
        self.post("chart", &self.config.chart_url, &request).await
    }

    pub(crate) async fn render_formula(&self, prompt: &str) -> VisualResult<RenderedImage> {
        let request = FormulaRequest { latex: prompt };
        self.post("formula", &self.config.formula_url, &request)
            .await
    }

    pub(crate) async fn render_code(&self, prompt: &str) -> VisualResult<RenderedImage> {
        let request = CodeRequest {
            code: prompt,
            language: guess_language(prompt),
        };
        self.post("code", &self.config.code_url, &request).await
    }

    async fn post<B: Serialize>(
        &self,
        provider: &'static str,
        base_url: &str,
        body: &B,
    ) -> VisualResult<RenderedImage> {
        let url = format!("{base_url}/render");
        debug!(provider, url, "rendering visual");

        let response = self.client.post(&url).json(body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(VisualError::Status {
                provider,
                status: status.as_u16(),
                body,
            });
        }

        let format = match response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
        {
            Some(ct) if ct.contains("svg") => ImageFormat::Svg,
            Some(ct) if ct.contains("jpeg") || ct.contains("jpg") => ImageFormat::Jpeg,
            _ => ImageFormat::Png,
        };

        let bytes = response.bytes().await?.to_vec();
        if bytes.is_empty() {
            return Err(VisualError::EmptyImage { provider });
        }

        Ok(RenderedImage { bytes, format })
    }
}

/// Crude language sniff for the syntax highlighter.
fn guess_language(code: &str) -> &'static str {
    if code.contains("fn ") && code.contains("let ") {
        "rust"
    } else if code.contains("def ") || code.contains("import ") {
        "python"
    } else if code.contains("function ") || code.contains("=>") || code.contains("const ") {
        "javascript"
    } else if code.contains("#include") {
        "c"
    } else if code.contains("public class") || code.contains("public static") {
        "java"
    } else {
        "text"
    }
}
