use std::path::Path;

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::retrieval::{KnowledgeRetriever, RetrievalError};

/// One entry of the keyword corpus: trigger terms plus the passage returned
/// when any of them matches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeEntry {
    pub keywords: Vec<String>,
    pub content: String,
}

/// Naive keyword matcher over a static corpus. An entry matches when any of
/// its keywords appears as a substring of the lower-cased query; matches come
/// back in corpus order, each entry at most once.
pub struct KeywordRetriever {
    entries: Vec<KnowledgeEntry>,
}

impl KeywordRetriever {
    pub fn new(entries: Vec<KnowledgeEntry>) -> Self {
        Self { entries }
    }

    /// Load a corpus from a JSON file holding an array of entries.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read knowledge file: {}", path.display()))?;
        let entries: Vec<KnowledgeEntry> = serde_json::from_str(&data)
            .with_context(|| format!("Failed to parse knowledge file: {}", path.display()))?;
        Ok(Self::new(entries))
    }
}

#[async_trait]
impl KnowledgeRetriever for KeywordRetriever {
    async fn retrieve(&self, query: &str) -> Result<Vec<String>, RetrievalError> {
        let query = query.to_lowercase();

        let matched = self
            .entries
            .iter()
            .filter(|entry| {
                entry
                    .keywords
                    .iter()
                    .any(|keyword| query.contains(&keyword.to_lowercase()))
            })
            .map(|entry| entry.content.clone())
            .collect();

        Ok(matched)
    }
}
