use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use log::{debug, warn};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Default tagging prompt sent to the vision model.
pub const DEFAULT_PROMPT: &str = r#"Analyze this image and return an extensive list of tags in JSON format.
The tags are used for image search, filtering, and organizing application.
The tags should be as diverse as possible.
The more tags the better.
The more detailed tags the better.
Example response format: { "tags": ["tag1", "tag2", "tag3"] }

Return only the JSON object without any additional text."#;

#[derive(Debug, thiserror::Error)]
pub enum AnalyzerError {
    #[error("analysis timed out")]
    Timeout,
    #[error("analysis transport error: {0}")]
    Transport(String),
    #[error("unparseable analysis response: {0}")]
    InvalidResponse(String),
}

/// Seam between the orchestrator and whatever produces raw tags for an image.
/// The production implementation talks to Ollama; tests substitute their own.
#[async_trait]
pub trait TagSource: Send + Sync {
    async fn analyze(&self, image: &[u8], prompt: &str) -> Result<Vec<String>, AnalyzerError>;
}

#[derive(Clone)]
pub struct OllamaAnalyzer {
    agent: ureq::Agent,
    host: String,
    model: String,
    timeout: Duration,
}

#[derive(Serialize)]
struct GenerateRequest {
    model: String,
    prompt: String,
    images: Vec<String>,
    stream: bool,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

#[derive(Deserialize)]
struct ModelList {
    #[serde(default)]
    models: Vec<ModelEntry>,
}

#[derive(Deserialize)]
struct ModelEntry {
    name: String,
}

impl OllamaAnalyzer {
    pub fn new(host: &str, model: &str, timeout: Duration) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build()
            .into();

        Self {
            agent,
            host: host.trim_end_matches('/').to_string(),
            model: model.to_string(),
            timeout,
        }
    }

    /// Check that the configured model is pulled and served. Called once
    /// before a run; a missing model is a configuration error, not a
    /// per-image one.
    pub fn is_model_available(&self) -> bool {
        let url = format!("{}/api/tags", self.host);
        let result = self
            .agent
            .get(&url)
            .call()
            .and_then(|mut res| res.body_mut().read_json::<ModelList>());

        match result {
            Ok(list) => list
                .models
                .iter()
                .any(|m| m.name == self.model || m.name.starts_with(&format!("{}:", self.model))),
            Err(e) => {
                warn!("could not list models at {}: {}", self.host, e);
                false
            }
        }
    }

    fn generate_blocking(&self, image: &[u8], prompt: &str) -> Result<Vec<String>, AnalyzerError> {
        let payload = GenerateRequest {
            model: self.model.clone(),
            prompt: prompt.to_string(),
            images: vec![BASE64.encode(image)],
            stream: false,
        };

        let url = format!("{}/api/generate", self.host);
        let mut response = self
            .agent
            .post(&url)
            .send_json(&payload)
            .map_err(classify_ureq_error)?;

        let body = response
            .body_mut()
            .read_to_string()
            .map_err(classify_ureq_error)?;

        let parsed: GenerateResponse = serde_json::from_str(&body)
            .map_err(|e| AnalyzerError::InvalidResponse(e.to_string()))?;

        let tags = extract_tags_from_text(&parsed.response);
        debug!("model returned {} raw tags", tags.len());
        Ok(tags)
    }
}

#[async_trait]
impl TagSource for OllamaAnalyzer {
    async fn analyze(&self, image: &[u8], prompt: &str) -> Result<Vec<String>, AnalyzerError> {
        let this = self.clone();
        let image = image.to_vec();
        let prompt = prompt.to_string();

        let call = tokio::task::spawn_blocking(move || this.generate_blocking(&image, &prompt));

        // The agent enforces the configured timeout itself; the outer timer
        // gets one extra second and exists as a hard stop because a blocking
        // task cannot be cancelled from here.
        match tokio::time::timeout(self.timeout + Duration::from_secs(1), call).await {
            Err(_) => Err(AnalyzerError::Timeout),
            Ok(Err(join_err)) => Err(AnalyzerError::Transport(join_err.to_string())),
            Ok(Ok(result)) => result,
        }
    }
}

fn classify_ureq_error(err: ureq::Error) -> AnalyzerError {
    match err {
        ureq::Error::Timeout(_) => AnalyzerError::Timeout,
        ureq::Error::Io(ref io) if io.kind() == std::io::ErrorKind::TimedOut => {
            AnalyzerError::Timeout
        }
        other => AnalyzerError::Transport(other.to_string()),
    }
}

/// Pull raw tags out of free-text model output.
///
/// Vision models wrap their JSON in prose or code fences more often than not,
/// so every candidate `{ ... }` object is tried and those carrying a `tags`
/// array contribute their string entries.
pub fn extract_tags_from_text(text: &str) -> Vec<String> {
    static JSON_OBJECT: OnceLock<Regex> = OnceLock::new();
    let pattern = JSON_OBJECT.get_or_init(|| Regex::new(r"\{[\s\S]*?\}").expect("valid regex"));

    let mut tags = Vec::new();
    for candidate in pattern.find_iter(text) {
        let value: serde_json::Value = match serde_json::from_str(candidate.as_str()) {
            Ok(v) => v,
            Err(e) => {
                debug!("skipping unparseable JSON candidate: {}", e);
                continue;
            }
        };

        if let Some(list) = value.get("tags").and_then(|t| t.as_array()) {
            for entry in list {
                if let Some(tag) = entry.as_str() {
                    tags.push(tag.to_string());
                }
            }
        }
    }
    tags
}
