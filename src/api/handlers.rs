use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::engine::types::{AgentRecord, ConversationGraph, TurnOutcome};

use super::AppState;
use super::errors::AppError;

// --- Request/Response types ---

#[derive(Deserialize)]
pub struct KnowledgeDoc {
    /// Local path or http(s) URL of a line-oriented document.
    pub source: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Deserialize)]
pub struct CreateAgentRequest {
    pub name: String,
    #[serde(default)]
    pub goal: String,
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub tone: String,
    #[serde(default)]
    pub knowledge_docs: Vec<KnowledgeDoc>,
    pub graph: ConversationGraph,
}

#[derive(Serialize)]
pub struct CreateAgentResponse {
    pub agent_id: String,
    pub ingested_records: usize,
}

#[derive(Deserialize)]
pub struct TurnRequest {
    pub session_id: String,
    #[serde(default)]
    pub input: String,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

// --- Handlers ---

/// POST /agents
pub async fn create_agent(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateAgentRequest>,
) -> Result<Json<CreateAgentResponse>, AppError> {
    if req.name.trim().is_empty() {
        return Err(AppError::BadRequest("Agent 'name' is required".to_string()));
    }

    let errors = req.graph.validate();
    if !errors.is_empty() {
        return Err(AppError::BadRequest(format!(
            "Invalid graph: {}",
            errors.join("; ")
        )));
    }

    let agent_id = Uuid::new_v4().to_string();

    let mut ingested_records = 0;
    for doc in &req.knowledge_docs {
        ingested_records += state
            .ingestor
            .ingest(&doc.source, &doc.description)
            .await
            .map_err(|e| AppError::BadRequest(format!("Ingestion failed: {:#}", e)))?;
    }

    let agent = AgentRecord {
        id: agent_id.clone(),
        name: req.name,
        goal: req.goal,
        domain: req.domain,
        tone: req.tone,
        graph: req.graph,
        created: Utc::now(),
    };

    state.agents.put_agent(&agent).await?;
    state.cache_graph(&agent_id, agent.graph.clone()).await;

    info!(agent = %agent_id, name = %agent.name, "Created agent");

    Ok(Json(CreateAgentResponse {
        agent_id,
        ingested_records,
    }))
}

/// GET /agents/{id}/graph
pub async fn get_graph(
    State(state): State<Arc<AppState>>,
    Path(agent_id): Path<String>,
) -> Result<Json<ConversationGraph>, AppError> {
    let graph = state.graph_for(&agent_id).await?;
    Ok(Json(graph.as_ref().clone()))
}

/// PUT /agents/{id}/graph — full replacement, atomic swap.
pub async fn put_graph(
    State(state): State<Arc<AppState>>,
    Path(agent_id): Path<String>,
    Json(graph): Json<ConversationGraph>,
) -> Result<Json<serde_json::Value>, AppError> {
    let errors = graph.validate();
    if !errors.is_empty() {
        return Err(AppError::BadRequest(format!(
            "Invalid graph: {}",
            errors.join("; ")
        )));
    }

    let mut agent = state
        .agents
        .get_agent(&agent_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Agent '{}' not found", agent_id)))?;

    agent.graph = graph.clone();
    state.agents.put_agent(&agent).await?;
    state.cache_graph(&agent_id, graph).await;

    info!(agent = %agent_id, "Replaced graph");

    Ok(Json(serde_json::json!({ "updated": agent_id })))
}

/// POST /agents/{id}/turns
pub async fn submit_turn(
    State(state): State<Arc<AppState>>,
    Path(agent_id): Path<String>,
    Json(req): Json<TurnRequest>,
) -> Result<Json<TurnOutcome>, AppError> {
    // Snapshot the graph before the turn; a concurrent replace affects the
    // next turn, never this one.
    let graph = state.graph_for(&agent_id).await?;

    let outcome = state
        .engine
        .handle_turn(&agent_id, &graph, &req.session_id, &req.input)
        .await?;

    Ok(Json(outcome))
}

/// GET /agents/{id}/leads
pub async fn list_leads(
    State(state): State<Arc<AppState>>,
    Path(agent_id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    // 404 for unknown agents rather than an empty list.
    state
        .agents
        .get_agent(&agent_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Agent '{}' not found", agent_id)))?;

    let leads = state.leads.list_leads(&agent_id).await?;
    let total = leads.len();

    Ok(Json(serde_json::json!({
        "leads": leads,
        "total": total,
    })))
}

/// GET /agents/{id}/sessions/{session_id}
pub async fn get_session(
    State(state): State<Arc<AppState>>,
    Path((agent_id, session_id)): Path<(String, String)>,
) -> Result<Json<serde_json::Value>, AppError> {
    let session = state
        .sessions
        .load_session(&agent_id, &session_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Session '{}' not found", session_id)))?;

    Ok(Json(serde_json::to_value(&session).map_err(anyhow::Error::from)?))
}

/// GET /health
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
