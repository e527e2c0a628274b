use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "text-embedding-3-small";
const DEFAULT_TIMEOUT_S: f64 = 120.0;

/// Dimension used by the disabled provider so downstream shapes stay stable.
pub const DISABLED_DIMENSION: usize = 256;

#[derive(Debug, thiserror::Error)]
pub enum EmbedError {
    #[error("no non-blank texts to embed")]
    NoValidInput,

    #[error("embedding backend error: {0}")]
    Backend(String),
}

/// Converts text into fixed-dimension vectors. One vector per retained
/// (non-blank) input, in input order.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError>;
}

/// Drop blank entries before submission. All-blank input is an error, not a
/// silent empty call.
fn retain_non_blank(texts: &[String]) -> Result<Vec<&String>, EmbedError> {
    let retained: Vec<&String> = texts.iter().filter(|t| !t.trim().is_empty()).collect();
    if retained.is_empty() {
        return Err(EmbedError::NoValidInput);
    }
    Ok(retained)
}

// -- OpenAI-compatible provider --

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

pub struct OpenAiEmbedder {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiEmbedder {
    pub fn new(
        base_url: Option<String>,
        api_key: String,
        model: Option<String>,
        timeout_s: Option<f64>,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs_f64(timeout_s.unwrap_or(DEFAULT_TIMEOUT_S)))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            api_key,
            model: model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
        })
    }

    /// Build from environment: requires OPENAI_API_KEY, honors OPENAI_BASE_URL.
    pub fn from_env(model: Option<String>, base_url: Option<String>) -> anyhow::Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("embedding provider requires OPENAI_API_KEY"))?;
        let base_url = base_url.or_else(|| std::env::var("OPENAI_BASE_URL").ok());
        Self::new(base_url, api_key, model, None)
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        let retained = retain_non_blank(texts)?;

        let url = format!("{}/embeddings", self.base_url.trim_end_matches('/'));
        let body = serde_json::json!({ "model": self.model, "input": retained });

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| EmbedError::Backend(format!("request failed: {}", e)))?;

        let status = response.status();
        let resp_body = response
            .text()
            .await
            .map_err(|e| EmbedError::Backend(format!("failed to read response: {}", e)))?;

        if !status.is_success() {
            return Err(EmbedError::Backend(format!(
                "backend returned {}: {}",
                status, resp_body
            )));
        }

        let parsed: EmbeddingResponse = serde_json::from_str(&resp_body)
            .map_err(|e| EmbedError::Backend(format!("failed to parse response: {}", e)))?;

        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }
}

// -- Disabled provider --

/// Feature-flagged no-op: fixed-length zero vectors, no backend call ever.
/// Keeps downstream shapes consistent when embeddings are switched off.
pub struct DisabledEmbedder {
    dimension: usize,
}

impl DisabledEmbedder {
    pub fn new(dimension: Option<usize>) -> Self {
        Self {
            dimension: dimension.unwrap_or(DISABLED_DIMENSION),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for DisabledEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        let retained = retain_non_blank(texts)?;
        Ok(retained.iter().map(|_| vec![0.0; self.dimension]).collect())
    }
}
