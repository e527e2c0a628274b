pub mod json_store;
pub mod memory_store;

use anyhow::Result;
use async_trait::async_trait;

use crate::engine::types::{AgentRecord, LeadRecord, Session};

pub use json_store::JsonStore;
pub use memory_store::MemoryStore;

/// Durable mapping from (agent, session id) to session state. The engine
/// loads a session at turn start and persists it exactly once at turn end;
/// implementations must make each load or save atomic per key.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load_session(&self, agent_id: &str, session_id: &str) -> Result<Option<Session>>;

    async fn save_session(&self, session: &Session) -> Result<()>;
}

/// Append-only store for captured leads. No update or delete.
#[async_trait]
pub trait LeadSink: Send + Sync {
    async fn append_lead(&self, lead: &LeadRecord) -> Result<()>;

    /// Leads for one agent, oldest first.
    async fn list_leads(&self, agent_id: &str) -> Result<Vec<LeadRecord>>;
}

/// Store for agent identity, metadata, and the serialized graph.
#[async_trait]
pub trait AgentStore: Send + Sync {
    async fn put_agent(&self, agent: &AgentRecord) -> Result<()>;

    async fn get_agent(&self, agent_id: &str) -> Result<Option<AgentRecord>>;

    async fn list_agents(&self) -> Result<Vec<AgentRecord>>;
}
