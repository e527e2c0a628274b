pub mod index;
pub mod keyword;
pub mod vector;

use async_trait::async_trait;
use serde::Deserialize;

pub use index::{MemoryVectorIndex, VectorIndex, VectorRecord};
pub use keyword::{KeywordRetriever, KnowledgeEntry};
pub use vector::VectorRetriever;

/// Default number of passages returned by the vector strategy.
pub const DEFAULT_TOP_K: usize = 3;

#[derive(Debug, thiserror::Error)]
pub enum RetrievalError {
    #[error("knowledge retrieval unavailable: {0}")]
    Unavailable(String),
}

/// Returns passages relevant to the user's input. The engine treats any
/// error as an empty result set.
#[async_trait]
pub trait KnowledgeRetriever: Send + Sync {
    async fn retrieve(&self, query: &str) -> Result<Vec<String>, RetrievalError>;
}

/// Which retrieval strategy the server runs with. `disabled` is an explicit
/// configuration value, not a fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RetrievalStrategy {
    #[default]
    Keyword,
    Vector,
    Disabled,
}

/// Strategy for deployments that opt out of retrieval entirely.
pub struct NullRetriever;

#[async_trait]
impl KnowledgeRetriever for NullRetriever {
    async fn retrieve(&self, _query: &str) -> Result<Vec<String>, RetrievalError> {
        Ok(Vec::new())
    }
}
