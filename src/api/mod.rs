pub mod errors;
pub mod handlers;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post, put};
use tokio::sync::RwLock;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::cli::config::ParleyConfig;
use crate::embedding::{DisabledEmbedder, EmbeddingProvider, OpenAiEmbedder};
use crate::engine::WorkflowEngine;
use crate::engine::types::ConversationGraph;
use crate::generation::openai::OpenAiBackend;
use crate::ingest::IngestPipeline;
use crate::retrieval::{
    KeywordRetriever, KnowledgeRetriever, MemoryVectorIndex, NullRetriever, RetrievalStrategy,
    VectorRetriever,
};
use crate::storage::{AgentStore, JsonStore, LeadSink, SessionStore};

use errors::AppError;

/// Shared application state accessible by all handlers.
pub struct AppState {
    pub engine: Arc<WorkflowEngine>,
    pub sessions: Arc<dyn SessionStore>,
    pub leads: Arc<dyn LeadSink>,
    pub agents: Arc<dyn AgentStore>,
    pub ingestor: Arc<IngestPipeline>,
    /// Current graph per agent. Each entry is replaced wholesale — turn
    /// handlers clone the Arc and observe old or new, never a partial graph.
    graphs: RwLock<HashMap<String, Arc<ConversationGraph>>>,
}

impl AppState {
    pub fn new(
        engine: Arc<WorkflowEngine>,
        sessions: Arc<dyn SessionStore>,
        leads: Arc<dyn LeadSink>,
        agents: Arc<dyn AgentStore>,
        ingestor: Arc<IngestPipeline>,
    ) -> Self {
        Self {
            engine,
            sessions,
            leads,
            agents,
            ingestor,
            graphs: RwLock::new(HashMap::new()),
        }
    }

    pub async fn cache_graph(&self, agent_id: &str, graph: ConversationGraph) {
        self.graphs
            .write()
            .await
            .insert(agent_id.to_string(), Arc::new(graph));
    }

    /// Current graph snapshot for an agent, falling back to the persisted
    /// record when the cache is cold.
    pub async fn graph_for(&self, agent_id: &str) -> Result<Arc<ConversationGraph>, AppError> {
        if let Some(graph) = self.graphs.read().await.get(agent_id) {
            return Ok(graph.clone());
        }

        let agent = self
            .agents
            .get_agent(agent_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Agent '{}' not found", agent_id)))?;

        let graph = Arc::new(agent.graph);
        self.graphs
            .write()
            .await
            .insert(agent_id.to_string(), graph.clone());
        Ok(graph)
    }
}

/// Build the axum router over prepared state.
pub fn router(state: Arc<AppState>, max_body: usize) -> Router {
    Router::new()
        .route("/agents", post(handlers::create_agent))
        .route("/agents/{id}/graph", get(handlers::get_graph))
        .route("/agents/{id}/graph", put(handlers::put_graph))
        .route("/agents/{id}/turns", post(handlers::submit_turn))
        .route("/agents/{id}/leads", get(handlers::list_leads))
        .route(
            "/agents/{id}/sessions/{session_id}",
            get(handlers::get_session),
        )
        .route("/health", get(handlers::health))
        .layer(DefaultBodyLimit::max(max_body))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Wire up stores, retrieval, generation, and the engine from config, then
/// serve the REST API.
pub async fn serve(host: &str, port: u16, store_dir: PathBuf, config: ParleyConfig) -> Result<()> {
    let store = Arc::new(JsonStore::new(store_dir));
    let sessions: Arc<dyn SessionStore> = store.clone();
    let leads: Arc<dyn LeadSink> = store.clone();
    let agents: Arc<dyn AgentStore> = store.clone();

    let index = Arc::new(MemoryVectorIndex::new());

    let embedding = config.embedding.unwrap_or_default();
    let embedder: Arc<dyn EmbeddingProvider> = if embedding.provider.as_deref() == Some("openai") {
        Arc::new(OpenAiEmbedder::from_env(embedding.model, embedding.base_url)?)
    } else {
        Arc::new(DisabledEmbedder::new(embedding.dimension))
    };

    let retrieval = config.retrieval.unwrap_or_default();
    let retriever: Arc<dyn KnowledgeRetriever> = match retrieval.strategy {
        RetrievalStrategy::Keyword => match retrieval.knowledge_file {
            Some(ref path) => Arc::new(KeywordRetriever::from_file(path)?),
            None => Arc::new(KeywordRetriever::new(Vec::new())),
        },
        RetrievalStrategy::Vector => Arc::new(VectorRetriever::new(
            embedder.clone(),
            index.clone(),
            retrieval.top_k,
        )),
        RetrievalStrategy::Disabled => Arc::new(NullRetriever),
    };

    let generation = config.generation.unwrap_or_default();
    let backend = Arc::new(OpenAiBackend::from_env(
        generation.model,
        generation.timeout_s,
    )?);

    let engine = Arc::new(WorkflowEngine::new(
        sessions.clone(),
        leads.clone(),
        retriever,
        backend,
    ));

    let ingestor = Arc::new(IngestPipeline::new(embedder, index));

    let state = Arc::new(AppState::new(engine, sessions, leads, agents, ingestor));

    // Warm the graph cache from persisted agents.
    for agent in state.agents.list_agents().await? {
        let agent_id = agent.id.clone();
        state.cache_graph(&agent_id, agent.graph).await;
    }

    let max_body = config.max_body.unwrap_or(1_048_576);
    let app = router(state, max_body);

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Parley API server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
