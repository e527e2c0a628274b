use std::sync::Arc;

use async_trait::async_trait;

use crate::embedding::EmbeddingProvider;
use crate::retrieval::{DEFAULT_TOP_K, KnowledgeRetriever, RetrievalError, VectorIndex};

/// Similarity-search strategy: embed the query, take the top-K nearest
/// stored passages in descending similarity order.
pub struct VectorRetriever {
    embedder: Arc<dyn EmbeddingProvider>,
    index: Arc<dyn VectorIndex>,
    top_k: usize,
}

impl VectorRetriever {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        index: Arc<dyn VectorIndex>,
        top_k: Option<usize>,
    ) -> Self {
        Self {
            embedder,
            index,
            top_k: top_k.unwrap_or(DEFAULT_TOP_K),
        }
    }
}

#[async_trait]
impl KnowledgeRetriever for VectorRetriever {
    async fn retrieve(&self, query: &str) -> Result<Vec<String>, RetrievalError> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }

        let vectors = self
            .embedder
            .embed(&[query.to_string()])
            .await
            .map_err(|e| RetrievalError::Unavailable(e.to_string()))?;

        let query_vector = vectors
            .into_iter()
            .next()
            .ok_or_else(|| RetrievalError::Unavailable("embedder returned no vector".into()))?;

        let scored = self
            .index
            .query(&query_vector, self.top_k)
            .await
            .map_err(|e| RetrievalError::Unavailable(e.to_string()))?;

        Ok(scored.into_iter().map(|(_, record)| record.content).collect())
    }
}
