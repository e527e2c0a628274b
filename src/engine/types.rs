use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Identifier of a node within a conversation graph.
pub type NodeId = String;

/// Per-session accumulated facts — a JSON-compatible key-value store.
pub type SessionContext = HashMap<String, serde_json::Value>;

fn default_retrieve() -> bool {
    true
}

/// One step of a conversation workflow.
///
/// Behavior at a node is fully data-driven: `capture` names the context key
/// that receives the raw user input, `retrieve` gates knowledge lookup, and
/// `functions` lists the function calls the generation backend may request
/// while the session sits at this node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphNode {
    /// Instruction payload handed to the generation backend. Opaque — never parsed.
    pub instructions: String,
    /// Successor node. Absent means this node is terminal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<NodeId>,
    /// Context key that stores the user input produced at this step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capture: Option<String>,
    /// Whether knowledge retrieval runs for this step.
    #[serde(default = "default_retrieve")]
    pub retrieve: bool,
    /// Function calls the backend is offered at this step.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub functions: Vec<String>,
}

/// Immutable workflow definition: a start node plus a map of named nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationGraph {
    pub start: NodeId,
    pub nodes: HashMap<NodeId, GraphNode>,
}

impl ConversationGraph {
    /// Structural validation: the start node must exist and every `next`
    /// reference must resolve. Returns human-readable problems, empty if ok.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if !self.nodes.contains_key(&self.start) {
            errors.push(format!(
                "Start node '{}' is not defined in the graph",
                self.start
            ));
        }

        for (id, node) in &self.nodes {
            if let Some(ref next) = node.next
                && !self.nodes.contains_key(next)
            {
                errors.push(format!(
                    "Node '{}' points to '{}', which does not exist",
                    id, next
                ));
            }
        }

        errors.sort();
        errors
    }

    pub fn node(&self, id: &str) -> Option<&GraphNode> {
        self.nodes.get(id)
    }
}

/// One completed exchange, kept for audit. Never read by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnRecord {
    pub input: String,
    pub reply: String,
    /// Node the session holds after this turn.
    pub node: NodeId,
    pub at: DateTime<Utc>,
}

/// Durable per-session state, one row per (agent, session id).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub agent_id: String,
    pub current_node: NodeId,
    #[serde(default)]
    pub context: SessionContext,
    #[serde(default)]
    pub history: Vec<TurnRecord>,
    pub started: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

impl Session {
    pub fn new(agent_id: &str, session_id: &str, start_node: &str) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.to_string(),
            agent_id: agent_id.to_string(),
            current_node: start_node.to_string(),
            context: SessionContext::new(),
            history: Vec::new(),
            started: now,
            updated: now,
        }
    }
}

/// Result of handling one turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnOutcome {
    pub reply: String,
    pub next_node: Option<NodeId>,
    pub ended: bool,
}

/// A qualified user outcome captured via a `saveLeadData` function call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeadRecord {
    pub id: String,
    pub agent_id: String,
    pub name: String,
    pub needs: String,
    pub followup_info: String,
    pub captured_at: DateTime<Utc>,
}

/// Agent identity plus its serialized workflow graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRecord {
    pub id: String,
    pub name: String,
    pub goal: String,
    pub domain: String,
    pub tone: String,
    pub graph: ConversationGraph,
    pub created: DateTime<Utc>,
}

/// Errors that cross the turn boundary. Remote-dependency failures never
/// appear here — they degrade inside the engine (fallback reply, empty
/// retrieval) so a conversation does not hard-fail on a transient outage.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("session id must not be empty")]
    EmptySessionId,

    #[error("session '{session}' is at node '{node}', which is not in the current graph")]
    GraphIntegrity { session: String, node: String },

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}
