//! Tests for the keyword and vector retrieval strategies.

use std::sync::Arc;

use async_trait::async_trait;

use parley::embedding::{EmbedError, EmbeddingProvider};
use parley::retrieval::{
    KeywordRetriever, KnowledgeEntry, KnowledgeRetriever, MemoryVectorIndex, NullRetriever,
    RetrievalError, VectorIndex, VectorRecord, VectorRetriever,
};

fn entry(keywords: &[&str], content: &str) -> KnowledgeEntry {
    KnowledgeEntry {
        keywords: keywords.iter().map(|k| k.to_string()).collect(),
        content: content.to_string(),
    }
}

fn corpus() -> Vec<KnowledgeEntry> {
    vec![
        entry(&["pricing", "cost"], "Plans start at $29/month."),
        entry(&["support"], "Support is available around the clock."),
        entry(&["trial", "demo"], "A 14-day trial is free."),
    ]
}

// --- Keyword strategy ---

#[tokio::test]
async fn keyword_match_is_case_insensitive() {
    let retriever = KeywordRetriever::new(corpus());
    let passages = retriever.retrieve("What's your PRICING like?").await.unwrap();

    assert_eq!(passages, vec!["Plans start at $29/month."]);
}

#[tokio::test]
async fn keyword_matches_come_back_in_corpus_order() {
    let retriever = KeywordRetriever::new(corpus());
    let passages = retriever
        .retrieve("is there a trial, and what does pricing look like?")
        .await
        .unwrap();

    assert_eq!(
        passages,
        vec!["Plans start at $29/month.", "A 14-day trial is free."]
    );
}

#[tokio::test]
async fn entry_with_multiple_matching_keywords_appears_once() {
    let retriever = KeywordRetriever::new(corpus());
    let passages = retriever
        .retrieve("what does the cost and pricing look like?")
        .await
        .unwrap();

    assert_eq!(passages.len(), 1);
}

#[tokio::test]
async fn no_match_yields_empty_result() {
    let retriever = KeywordRetriever::new(corpus());
    let passages = retriever.retrieve("unrelated chatter").await.unwrap();
    assert!(passages.is_empty());
}

// --- Vector strategy ---

/// Maps each text to a fixed, deterministic vector so similarity ordering is
/// controlled by the test.
struct StubEmbedder;

fn stub_vector(text: &str) -> Vec<f32> {
    match text {
        t if t.contains("alpha") => vec![1.0, 0.0],
        t if t.contains("beta") => vec![0.0, 1.0],
        _ => vec![0.7, 0.7],
    }
}

#[async_trait]
impl EmbeddingProvider for StubEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        Ok(texts.iter().map(|t| stub_vector(t)).collect())
    }
}

struct BrokenEmbedder;

#[async_trait]
impl EmbeddingProvider for BrokenEmbedder {
    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        Err(EmbedError::Backend("embedding service down".to_string()))
    }
}

async fn seeded_index() -> Arc<MemoryVectorIndex> {
    let index = Arc::new(MemoryVectorIndex::new());
    index
        .upsert(vec![
            VectorRecord {
                id: "doc:0".to_string(),
                vector: vec![1.0, 0.0],
                source: "doc".to_string(),
                description: "".to_string(),
                content: "all about alpha".to_string(),
            },
            VectorRecord {
                id: "doc:1".to_string(),
                vector: vec![0.0, 1.0],
                source: "doc".to_string(),
                description: "".to_string(),
                content: "all about beta".to_string(),
            },
            VectorRecord {
                id: "doc:2".to_string(),
                vector: vec![0.9, 0.1],
                source: "doc".to_string(),
                description: "".to_string(),
                content: "mostly alpha".to_string(),
            },
        ])
        .await
        .unwrap();
    index
}

#[tokio::test]
async fn vector_results_come_back_by_descending_similarity() {
    let index = seeded_index().await;
    let retriever = VectorRetriever::new(Arc::new(StubEmbedder), index, Some(3));

    let passages = retriever.retrieve("tell me about alpha").await.unwrap();

    assert_eq!(passages[0], "all about alpha");
    assert_eq!(passages[1], "mostly alpha");
}

#[tokio::test]
async fn vector_results_respect_top_k() {
    let index = seeded_index().await;
    let retriever = VectorRetriever::new(Arc::new(StubEmbedder), index, Some(1));

    let passages = retriever.retrieve("tell me about alpha").await.unwrap();
    assert_eq!(passages.len(), 1);
}

#[tokio::test]
async fn blank_query_short_circuits_to_empty() {
    let index = seeded_index().await;
    let retriever = VectorRetriever::new(Arc::new(StubEmbedder), index, None);

    let passages = retriever.retrieve("   ").await.unwrap();
    assert!(passages.is_empty());
}

#[tokio::test]
async fn embedder_failure_surfaces_as_unavailable() {
    let index = seeded_index().await;
    let retriever = VectorRetriever::new(Arc::new(BrokenEmbedder), index, None);

    let err = retriever.retrieve("anything").await.unwrap_err();
    assert!(matches!(err, RetrievalError::Unavailable(_)));
}

// --- Disabled strategy ---

#[tokio::test]
async fn null_retriever_always_returns_empty() {
    let passages = NullRetriever.retrieve("pricing?").await.unwrap();
    assert!(passages.is_empty());
}
