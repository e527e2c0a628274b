//! Integration tests for the workflow engine: session lifecycle, graph
//! walking, degradation, and lead capture.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;

use parley::engine::WorkflowEngine;
use parley::engine::types::*;
use parley::engine::workflow::{FALLBACK_REPLY, FN_SAVE_LEAD, LEAD_CONFIRMATION};
use parley::generation::{GenerationBackend, GenerationOutcome, GenerationRequest};
use parley::retrieval::{KnowledgeRetriever, RetrievalError};
use parley::storage::{LeadSink, MemoryStore, SessionStore};

// --- Test doubles ---

/// Echoes the user message and records the request it saw.
struct EchoBackend {
    last_request: Mutex<Option<GenerationRequest>>,
}

impl EchoBackend {
    fn new() -> Self {
        Self {
            last_request: Mutex::new(None),
        }
    }
}

#[async_trait]
impl GenerationBackend for EchoBackend {
    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationOutcome> {
        *self.last_request.lock().unwrap() = Some(request.clone());
        Ok(GenerationOutcome::Text(format!(
            "echo: {}",
            request.user_message
        )))
    }
}

struct FailingBackend;

#[async_trait]
impl GenerationBackend for FailingBackend {
    async fn generate(&self, _request: &GenerationRequest) -> Result<GenerationOutcome> {
        anyhow::bail!("backend unreachable")
    }
}

/// Always requests the given function call.
struct FunctionCallBackend {
    name: String,
    arguments: serde_json::Value,
}

#[async_trait]
impl GenerationBackend for FunctionCallBackend {
    async fn generate(&self, _request: &GenerationRequest) -> Result<GenerationOutcome> {
        Ok(GenerationOutcome::FunctionCall {
            name: self.name.clone(),
            arguments: self.arguments.clone(),
        })
    }
}

struct FixedRetriever {
    passages: Vec<String>,
}

#[async_trait]
impl KnowledgeRetriever for FixedRetriever {
    async fn retrieve(&self, _query: &str) -> Result<Vec<String>, RetrievalError> {
        Ok(self.passages.clone())
    }
}

struct FailingRetriever;

#[async_trait]
impl KnowledgeRetriever for FailingRetriever {
    async fn retrieve(&self, _query: &str) -> Result<Vec<String>, RetrievalError> {
        Err(RetrievalError::Unavailable("index down".to_string()))
    }
}

// --- Fixtures ---

fn node(instructions: &str, next: Option<&str>) -> GraphNode {
    GraphNode {
        instructions: instructions.to_string(),
        next: next.map(str::to_string),
        capture: None,
        retrieve: true,
        functions: Vec::new(),
    }
}

/// intro -> collectName (captures "name") -> terminal
fn lead_graph() -> ConversationGraph {
    let mut nodes = HashMap::new();
    nodes.insert(
        "intro".to_string(),
        node("Greet the visitor and ask for their name", Some("collectName")),
    );
    let mut collect = node("Thank them by name and wrap up", None);
    collect.capture = Some("name".to_string());
    nodes.insert("collectName".to_string(), collect);

    ConversationGraph {
        start: "intro".to_string(),
        nodes,
    }
}

struct Harness {
    engine: WorkflowEngine,
    store: Arc<MemoryStore>,
}

fn harness(
    retriever: Arc<dyn KnowledgeRetriever>,
    backend: Arc<dyn GenerationBackend>,
) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let sessions: Arc<dyn SessionStore> = store.clone();
    let leads: Arc<dyn LeadSink> = store.clone();
    Harness {
        engine: WorkflowEngine::new(sessions, leads, retriever, backend),
        store,
    }
}

fn echo_harness() -> Harness {
    harness(
        Arc::new(FixedRetriever { passages: vec![] }),
        Arc::new(EchoBackend::new()),
    )
}

// --- Session lifecycle ---

#[tokio::test]
async fn walk_follows_next_pointers() {
    let mut nodes = HashMap::new();
    nodes.insert("a".to_string(), node("step a", Some("b")));
    nodes.insert("b".to_string(), node("step b", Some("c")));
    nodes.insert("c".to_string(), node("step c", None));
    let graph = ConversationGraph {
        start: "a".to_string(),
        nodes,
    };

    let h = echo_harness();

    let t1 = h.engine.handle_turn("ag", &graph, "s1", "one").await.unwrap();
    assert_eq!(t1.next_node.as_deref(), Some("b"));
    assert!(!t1.ended);

    let t2 = h.engine.handle_turn("ag", &graph, "s1", "two").await.unwrap();
    assert_eq!(t2.next_node.as_deref(), Some("c"));
    assert!(!t2.ended);

    let t3 = h.engine.handle_turn("ag", &graph, "s1", "three").await.unwrap();
    assert!(t3.next_node.is_none());
    assert!(t3.ended);

    let session = h.store.load_session("ag", "s1").await.unwrap().unwrap();
    assert_eq!(session.current_node, "c");
    assert_eq!(session.history.len(), 3);
}

#[tokio::test]
async fn terminal_start_ends_on_first_turn() {
    let mut nodes = HashMap::new();
    nodes.insert("only".to_string(), node("one and done", None));
    let graph = ConversationGraph {
        start: "only".to_string(),
        nodes,
    };

    let h = echo_harness();
    let outcome = h.engine.handle_turn("ag", &graph, "s1", "hi").await.unwrap();

    assert!(outcome.next_node.is_none());
    assert!(outcome.ended);
}

#[tokio::test]
async fn empty_session_id_is_rejected() {
    let h = echo_harness();
    let err = h
        .engine
        .handle_turn("ag", &lead_graph(), "", "hi")
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::EmptySessionId));
}

#[tokio::test]
async fn empty_input_still_runs_the_turn() {
    let h = echo_harness();
    let outcome = h
        .engine
        .handle_turn("ag", &lead_graph(), "s1", "")
        .await
        .unwrap();

    assert!(!outcome.reply.is_empty());
    assert_eq!(outcome.next_node.as_deref(), Some("collectName"));
}

#[tokio::test]
async fn stale_node_surfaces_graph_integrity_error() {
    let h = echo_harness();

    // Session persisted at a node the current graph no longer has.
    let stale = Session::new("ag", "s1", "removedNode");
    h.store.save_session(&stale).await.unwrap();

    let err = h
        .engine
        .handle_turn("ag", &lead_graph(), "s1", "hi")
        .await
        .unwrap_err();

    match err {
        EngineError::GraphIntegrity { session, node } => {
            assert_eq!(session, "s1");
            assert_eq!(node, "removedNode");
        }
        other => panic!("expected GraphIntegrity, got {:?}", other),
    }

    // History untouched: the turn failed before any persist.
    let session = h.store.load_session("ag", "s1").await.unwrap().unwrap();
    assert!(session.history.is_empty());
}

// --- Scenario A: capture flow ---

#[tokio::test]
async fn name_capture_flow() {
    let graph = lead_graph();
    let h = echo_harness();

    let t1 = h.engine.handle_turn("ag", &graph, "s1", "hi").await.unwrap();
    assert_eq!(t1.next_node.as_deref(), Some("collectName"));
    assert!(!t1.ended);

    let t2 = h.engine.handle_turn("ag", &graph, "s1", "Ada").await.unwrap();
    assert!(t2.next_node.is_none());
    assert!(t2.ended);

    let session = h.store.load_session("ag", "s1").await.unwrap().unwrap();
    assert_eq!(
        session.context.get("name").unwrap(),
        &serde_json::json!("Ada")
    );
}

#[tokio::test]
async fn capture_is_invisible_to_the_same_turn() {
    let graph = lead_graph();
    let backend = Arc::new(EchoBackend::new());
    let h = harness(Arc::new(FixedRetriever { passages: vec![] }), backend.clone());

    h.engine.handle_turn("ag", &graph, "s1", "hi").await.unwrap();

    // The collectName turn writes "name", but its own request must see the
    // context as of turn start.
    h.engine.handle_turn("ag", &graph, "s1", "Ada").await.unwrap();
    let request = backend.last_request.lock().unwrap().clone().unwrap();
    assert!(!request.context.contains_key("name"));
}

// --- Scenario B: retrieval degradation ---

#[tokio::test]
async fn failing_retriever_degrades_to_empty_context() {
    let backend = Arc::new(EchoBackend::new());
    let h = harness(Arc::new(FailingRetriever), backend.clone());

    let outcome = h
        .engine
        .handle_turn("ag", &lead_graph(), "s1", "what do you offer?")
        .await
        .unwrap();

    assert!(!outcome.reply.is_empty());
    assert!(!outcome.ended);

    let request = backend.last_request.lock().unwrap().clone().unwrap();
    assert!(request.retrieved.is_empty());
}

#[tokio::test]
async fn retrieved_passages_reach_the_backend_in_order() {
    let backend = Arc::new(EchoBackend::new());
    let h = harness(
        Arc::new(FixedRetriever {
            passages: vec!["first".to_string(), "second".to_string()],
        }),
        backend.clone(),
    );

    h.engine
        .handle_turn("ag", &lead_graph(), "s1", "tell me more")
        .await
        .unwrap();

    let request = backend.last_request.lock().unwrap().clone().unwrap();
    assert_eq!(request.retrieved, vec!["first", "second"]);
}

// --- Generation degradation ---

#[tokio::test]
async fn backend_failure_yields_fallback_reply() {
    let h = harness(
        Arc::new(FixedRetriever { passages: vec![] }),
        Arc::new(FailingBackend),
    );

    let outcome = h
        .engine
        .handle_turn("ag", &lead_graph(), "s1", "hi")
        .await
        .unwrap();

    assert_eq!(outcome.reply, FALLBACK_REPLY);
    assert!(!outcome.ended);

    // The turn still advanced and persisted.
    let session = h.store.load_session("ag", "s1").await.unwrap().unwrap();
    assert_eq!(session.current_node, "collectName");
}

// --- Scenario C: lead capture ---

#[tokio::test]
async fn save_lead_data_writes_exactly_one_lead() {
    let h = harness(
        Arc::new(FixedRetriever { passages: vec![] }),
        Arc::new(FunctionCallBackend {
            name: FN_SAVE_LEAD.to_string(),
            arguments: serde_json::json!({ "info": "wants a callback" }),
        }),
    );

    let outcome = h
        .engine
        .handle_turn("ag", &lead_graph(), "s1", "call me back please")
        .await
        .unwrap();

    assert_eq!(outcome.reply, LEAD_CONFIRMATION);

    let leads = h.store.list_leads("ag").await.unwrap();
    assert_eq!(leads.len(), 1);
    assert_eq!(leads[0].followup_info, "wants a callback");
    assert_eq!(leads[0].agent_id, "ag");
}

#[tokio::test]
async fn lead_uses_context_name_with_placeholder_fallback() {
    let graph = lead_graph();
    let store = Arc::new(MemoryStore::new());
    let sessions: Arc<dyn SessionStore> = store.clone();
    let leads: Arc<dyn LeadSink> = store.clone();

    // Pre-seed a session whose context already holds a captured name.
    let mut session = Session::new("ag", "s1", "collectName");
    session
        .context
        .insert("name".to_string(), serde_json::json!("Ada"));
    store.save_session(&session).await.unwrap();

    let engine = WorkflowEngine::new(
        sessions,
        leads,
        Arc::new(FixedRetriever { passages: vec![] }),
        Arc::new(FunctionCallBackend {
            name: FN_SAVE_LEAD.to_string(),
            arguments: serde_json::json!({ "info": "pricing question" }),
        }),
    );

    engine.handle_turn("ag", &graph, "s1", "hi").await.unwrap();

    let captured = store.list_leads("ag").await.unwrap();
    assert_eq!(captured[0].name, "Ada");
    assert_eq!(captured[0].needs, "Not specified");
}

#[tokio::test]
async fn lead_is_captured_at_most_once_per_session() {
    let mut nodes = HashMap::new();
    nodes.insert("loop".to_string(), node("keep chatting", Some("loop")));
    let graph = ConversationGraph {
        start: "loop".to_string(),
        nodes,
    };

    let h = harness(
        Arc::new(FixedRetriever { passages: vec![] }),
        Arc::new(FunctionCallBackend {
            name: FN_SAVE_LEAD.to_string(),
            arguments: serde_json::json!({ "info": "first" }),
        }),
    );

    let t1 = h.engine.handle_turn("ag", &graph, "s1", "hi").await.unwrap();
    let t2 = h.engine.handle_turn("ag", &graph, "s1", "hi again").await.unwrap();

    // Both turns confirm, but only one record exists.
    assert_eq!(t1.reply, LEAD_CONFIRMATION);
    assert_eq!(t2.reply, LEAD_CONFIRMATION);
    assert_eq!(h.store.list_leads("ag").await.unwrap().len(), 1);
}

#[tokio::test]
async fn unknown_function_call_is_ignored() {
    let h = harness(
        Arc::new(FixedRetriever { passages: vec![] }),
        Arc::new(FunctionCallBackend {
            name: "launchMissiles".to_string(),
            arguments: serde_json::json!({}),
        }),
    );

    let outcome = h
        .engine
        .handle_turn("ag", &lead_graph(), "s1", "hi")
        .await
        .unwrap();

    assert_eq!(outcome.reply, FALLBACK_REPLY);
    assert!(h.store.list_leads("ag").await.unwrap().is_empty());
}

// --- Idempotence ---

#[tokio::test]
async fn repeat_turns_on_a_self_loop_are_idempotent() {
    let mut nodes = HashMap::new();
    nodes.insert("loop".to_string(), node("keep chatting", Some("loop")));
    let graph = ConversationGraph {
        start: "loop".to_string(),
        nodes,
    };

    let h = echo_harness();

    let t1 = h.engine.handle_turn("ag", &graph, "s1", "same").await.unwrap();
    let t2 = h.engine.handle_turn("ag", &graph, "s1", "same").await.unwrap();

    assert_eq!(t1.next_node, t2.next_node);
    assert_eq!(t1.ended, t2.ended);

    let session = h.store.load_session("ag", "s1").await.unwrap().unwrap();
    assert_eq!(session.history.len(), 2);
}

// --- Node descriptor behavior ---

#[tokio::test]
async fn retrieval_is_skipped_when_node_opts_out() {
    let mut no_retrieve = node("no lookup here", None);
    no_retrieve.retrieve = false;
    let mut nodes = HashMap::new();
    nodes.insert("quiet".to_string(), no_retrieve);
    let graph = ConversationGraph {
        start: "quiet".to_string(),
        nodes,
    };

    let backend = Arc::new(EchoBackend::new());
    let h = harness(
        Arc::new(FixedRetriever {
            passages: vec!["should not appear".to_string()],
        }),
        backend.clone(),
    );

    h.engine.handle_turn("ag", &graph, "s1", "hi").await.unwrap();

    let request = backend.last_request.lock().unwrap().clone().unwrap();
    assert!(request.retrieved.is_empty());
}

#[tokio::test]
async fn only_permitted_functions_are_offered() {
    let mut with_fn = node("qualify the visitor", None);
    with_fn.functions = vec![FN_SAVE_LEAD.to_string()];
    let mut nodes = HashMap::new();
    nodes.insert("qualify".to_string(), with_fn);
    let graph = ConversationGraph {
        start: "qualify".to_string(),
        nodes,
    };

    let backend = Arc::new(EchoBackend::new());
    let h = harness(Arc::new(FixedRetriever { passages: vec![] }), backend.clone());

    h.engine.handle_turn("ag", &graph, "s1", "hi").await.unwrap();
    let request = backend.last_request.lock().unwrap().clone().unwrap();
    assert_eq!(request.functions.len(), 1);
    assert_eq!(request.functions[0].name, FN_SAVE_LEAD);

    // A node without declared functions offers none.
    let plain = echo_harness();
    plain
        .engine
        .handle_turn("ag", &lead_graph(), "s2", "hi")
        .await
        .unwrap();
}
