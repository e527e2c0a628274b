use std::sync::Arc;

use anyhow::{Context as _, Result};
use sha2::{Digest, Sha256};
use tracing::info;

use crate::embedding::EmbeddingProvider;
use crate::retrieval::{VectorIndex, VectorRecord};

/// Loads knowledge documents into the vector index: fetch, split into
/// records, embed, upsert. Runs at agent creation time, never on the turn
/// path.
pub struct IngestPipeline {
    embedder: Arc<dyn EmbeddingProvider>,
    index: Arc<dyn VectorIndex>,
}

impl IngestPipeline {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>, index: Arc<dyn VectorIndex>) -> Self {
        Self { embedder, index }
    }

    /// Ingest one document. `source` is a local path or an http(s) URL.
    /// Returns the number of records upserted.
    pub async fn ingest(&self, source: &str, description: &str) -> Result<usize> {
        let raw = fetch(source).await?;
        let records = split_records(source, &raw)?;

        if records.is_empty() {
            info!(source = %source, "Document produced no records, skipping");
            return Ok(0);
        }

        let vectors = self
            .embedder
            .embed(&records)
            .await
            .map_err(|e| anyhow::anyhow!("failed to embed '{}': {}", source, e))?;

        // Record ids are unique within one ingestion call: digest of the
        // source reference plus the record's position.
        let prefix = source_digest(source);
        let upserts: Vec<VectorRecord> = records
            .into_iter()
            .zip(vectors)
            .enumerate()
            .map(|(seq, (content, vector))| VectorRecord {
                id: format!("{}:{}", prefix, seq),
                vector,
                source: source.to_string(),
                description: description.to_string(),
                content,
            })
            .collect();

        let count = upserts.len();
        self.index.upsert(upserts).await?;

        info!(source = %source, records = count, "Ingested document");
        Ok(count)
    }
}

fn source_digest(source: &str) -> String {
    let digest = Sha256::digest(source.as_bytes());
    hex::encode(&digest[..6])
}

async fn fetch(source: &str) -> Result<String> {
    if source.starts_with("http://") || source.starts_with("https://") {
        let response = reqwest::get(source)
            .await
            .with_context(|| format!("Failed to fetch document: {}", source))?;
        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("Document fetch for '{}' returned {}", source, status);
        }
        response
            .text()
            .await
            .with_context(|| format!("Failed to read document body: {}", source))
    } else {
        tokio::fs::read_to_string(source)
            .await
            .with_context(|| format!("Failed to read document file: {}", source))
    }
}

/// Split a raw document into line-oriented records. CSV sources contribute
/// one record per row with fields joined for embedding.
fn split_records(source: &str, raw: &str) -> Result<Vec<String>> {
    if source.rsplit('.').next() == Some("csv") {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(raw.as_bytes());

        let mut records = Vec::new();
        for row in reader.records() {
            let row = row.with_context(|| format!("Failed to parse CSV row in {}", source))?;
            let joined = row.iter().collect::<Vec<_>>().join(", ");
            if !joined.trim().is_empty() {
                records.push(joined);
            }
        }
        Ok(records)
    } else {
        Ok(raw
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }
}
