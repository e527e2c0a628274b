use std::path::Path;

use anyhow::{Context as _, Result};
use serde::Deserialize;

use crate::retrieval::RetrievalStrategy;

/// Configuration loaded from `parley.yaml`.
/// All fields are optional — missing fields fall back to CLI/env/defaults.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct ParleyConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub store_dir: Option<String>,
    pub max_body: Option<usize>,
    pub retrieval: Option<RetrievalConfig>,
    pub embedding: Option<EmbeddingConfig>,
    pub generation: Option<GenerationConfig>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct RetrievalConfig {
    pub strategy: RetrievalStrategy,
    pub top_k: Option<usize>,
    /// JSON corpus for the keyword strategy.
    pub knowledge_file: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// "openai" or "disabled" (default).
    pub provider: Option<String>,
    pub model: Option<String>,
    pub base_url: Option<String>,
    /// Vector dimension used by the disabled provider.
    pub dimension: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct GenerationConfig {
    pub model: Option<String>,
    pub timeout_s: Option<f64>,
}

impl ParleyConfig {
    /// Load configuration from a YAML file.
    ///
    /// - If `path` is `Some`, load that specific file (error if missing).
    /// - If `path` is `None`, auto-detect `parley.yaml` in cwd; return defaults if absent.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file_path = match path {
            Some(p) => {
                if !p.exists() {
                    anyhow::bail!("Config file not found: {}", p.display());
                }
                p.to_path_buf()
            }
            None => {
                let default_path = Path::new("parley.yaml");
                if !default_path.exists() {
                    return Ok(Self::default());
                }
                default_path.to_path_buf()
            }
        };

        let contents = std::fs::read_to_string(&file_path)
            .with_context(|| format!("Failed to read config file: {}", file_path.display()))?;

        let config: ParleyConfig = serde_yml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", file_path.display()))?;

        Ok(config)
    }
}
