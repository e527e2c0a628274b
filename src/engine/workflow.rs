use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::engine::types::*;
use crate::generation::{FunctionSpec, GenerationBackend, GenerationOutcome, GenerationRequest};
use crate::retrieval::KnowledgeRetriever;
use crate::storage::{LeadSink, SessionStore};

/// Reply used when the generation backend is unreachable or times out.
pub const FALLBACK_REPLY: &str =
    "Sorry, I'm having trouble answering right now. Could you say that again?";

/// Reply substituted after a successful lead capture.
pub const LEAD_CONFIRMATION: &str =
    "Thanks! I've noted your details and someone will be in touch shortly.";

/// Context sentinel marking that this session already produced a lead.
const LEAD_ID_KEY: &str = "_lead_id";

/// The only function call the engine knows how to dispatch.
pub const FN_SAVE_LEAD: &str = "saveLeadData";

/// Specs for the built-in function calls, offered to the backend only where a
/// node's descriptor permits them.
pub fn builtin_functions() -> Vec<FunctionSpec> {
    vec![FunctionSpec {
        name: FN_SAVE_LEAD.to_string(),
        description: "Persist the visitor as a qualified lead once they have shared \
                      enough to follow up on"
            .to_string(),
        parameters: serde_json::json!({
            "type": "object",
            "properties": {
                "info": {
                    "type": "string",
                    "description": "Follow-up details expressed by the visitor"
                }
            },
            "required": ["info"]
        }),
    }]
}

/// The session/workflow orchestrator: maps (current node, user input,
/// accumulated context) to (reply, side effects, next node).
pub struct WorkflowEngine {
    sessions: Arc<dyn SessionStore>,
    leads: Arc<dyn LeadSink>,
    retriever: Arc<dyn KnowledgeRetriever>,
    backend: Arc<dyn GenerationBackend>,
    /// Per-session turn guards: turns for the same (agent, session) key are
    /// serialized, distinct sessions never contend.
    turn_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl WorkflowEngine {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        leads: Arc<dyn LeadSink>,
        retriever: Arc<dyn KnowledgeRetriever>,
        backend: Arc<dyn GenerationBackend>,
    ) -> Self {
        Self {
            sessions,
            leads,
            retriever,
            backend,
            turn_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Handle one conversational turn against `graph`.
    ///
    /// The caller passes an immutable graph snapshot, so administrative
    /// hot-swaps never tear mid-turn. The session is loaded (or created at
    /// the graph's start node), advanced by at most one node, and persisted
    /// exactly once as the final step of the turn.
    pub async fn handle_turn(
        &self,
        agent_id: &str,
        graph: &ConversationGraph,
        session_id: &str,
        user_input: &str,
    ) -> Result<TurnOutcome, EngineError> {
        if session_id.is_empty() {
            return Err(EngineError::EmptySessionId);
        }

        let guard = self.session_guard(agent_id, session_id).await;
        let _turn = guard.lock().await;

        let mut session = match self
            .sessions
            .load_session(agent_id, session_id)
            .await
            .map_err(EngineError::Store)?
        {
            Some(session) => session,
            None => {
                info!(agent = %agent_id, session = %session_id, node = %graph.start, "Creating session");
                Session::new(agent_id, session_id, &graph.start)
            }
        };

        let node_id = session.current_node.clone();
        let Some(node) = graph.node(&node_id) else {
            // The graph may have been hot-swapped since this session last
            // advanced. Surfaced, never silently reset: resetting would drop
            // the session's history without the caller knowing.
            return Err(EngineError::GraphIntegrity {
                session: session_id.to_string(),
                node: node_id,
            });
        };

        // Retrieval is best-effort: a failing knowledge backend degrades to
        // an empty passage list, never a failed turn.
        let passages = if node.retrieve {
            match self.retriever.retrieve(user_input).await {
                Ok(passages) => passages,
                Err(e) => {
                    warn!(session = %session_id, error = %e, "Knowledge retrieval failed, continuing without context");
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };

        // The request sees context as of turn start; this turn's capture
        // write below is only visible on the next turn.
        let request = GenerationRequest {
            system_instructions: node.instructions.clone(),
            user_message: user_input.to_string(),
            retrieved: passages,
            context: visible_context(&session.context),
            functions: permitted_functions(node),
        };

        let mut pending_lead: Option<LeadRecord> = None;
        let reply = match self.backend.generate(&request).await {
            Ok(GenerationOutcome::Text(text)) => text,
            Ok(GenerationOutcome::FunctionCall { name, arguments }) => {
                if name == FN_SAVE_LEAD {
                    match self.prepare_lead(&session, &arguments) {
                        Some(lead) => {
                            session.context.insert(
                                LEAD_ID_KEY.to_string(),
                                serde_json::Value::String(lead.id.clone()),
                            );
                            pending_lead = Some(lead);
                        }
                        None => {
                            debug!(session = %session_id, "Lead already captured for this session, skipping write");
                        }
                    }
                    LEAD_CONFIRMATION.to_string()
                } else {
                    warn!(session = %session_id, function = %name, "Ignoring unknown function call");
                    FALLBACK_REPLY.to_string()
                }
            }
            Err(e) => {
                warn!(session = %session_id, error = %e, "Generation backend failed, using fallback reply");
                FALLBACK_REPLY.to_string()
            }
        };

        // Node-declared context write, keyed by the node's own descriptor.
        if let Some(ref key) = node.capture {
            session
                .context
                .insert(key.clone(), serde_json::Value::String(user_input.to_string()));
        }

        let next_node = node.next.clone();
        let resulting_node = next_node.clone().unwrap_or(node_id);

        session.history.push(TurnRecord {
            input: user_input.to_string(),
            reply: reply.clone(),
            node: resulting_node.clone(),
            at: Utc::now(),
        });
        session.current_node = resulting_node;
        session.updated = Utc::now();

        // Side effects last, in a fixed order: lead write, then the single
        // session persist. Cancellation before this point leaves nothing
        // half-applied.
        if let Some(lead) = pending_lead {
            info!(agent = %agent_id, session = %session_id, lead = %lead.id, "Captured lead");
            self.leads.append_lead(&lead).await.map_err(EngineError::Store)?;
        }
        self.sessions
            .save_session(&session)
            .await
            .map_err(EngineError::Store)?;

        let ended = next_node.is_none();
        Ok(TurnOutcome {
            reply,
            next_node,
            ended,
        })
    }

    /// Build the lead record for this session, or `None` if one was already
    /// captured (at most one lead per session).
    fn prepare_lead(&self, session: &Session, arguments: &serde_json::Value) -> Option<LeadRecord> {
        if session.context.contains_key(LEAD_ID_KEY) {
            return None;
        }

        let followup_info = arguments
            .get("info")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();

        Some(LeadRecord {
            id: Uuid::new_v4().to_string(),
            agent_id: session.agent_id.clone(),
            name: context_string(&session.context, "name", "Unknown"),
            needs: context_string(&session.context, "needs", "Not specified"),
            followup_info,
            captured_at: Utc::now(),
        })
    }

    async fn session_guard(&self, agent_id: &str, session_id: &str) -> Arc<Mutex<()>> {
        let key = format!("{}/{}", agent_id, session_id);
        let mut locks = self.turn_locks.lock().await;
        locks.entry(key).or_default().clone()
    }
}

fn permitted_functions(node: &GraphNode) -> Vec<FunctionSpec> {
    builtin_functions()
        .into_iter()
        .filter(|spec| node.functions.iter().any(|name| name == &spec.name))
        .collect()
}

/// Context snapshot handed to the backend: internal keys stay internal.
fn visible_context(context: &SessionContext) -> SessionContext {
    context
        .iter()
        .filter(|(k, _)| !k.starts_with('_'))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

fn context_string(context: &SessionContext, key: &str, fallback: &str) -> String {
    context
        .get(key)
        .and_then(|v| v.as_str())
        .unwrap_or(fallback)
        .to_string()
}
