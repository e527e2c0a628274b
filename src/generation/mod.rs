pub mod openai;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::engine::types::SessionContext;

/// Declared shape of a function call the backend may request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionSpec {
    pub name: String,
    pub description: String,
    /// JSON Schema for the call arguments.
    pub parameters: serde_json::Value,
}

/// Everything the engine assembles for one generation call.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    /// The current node's instruction payload.
    pub system_instructions: String,
    pub user_message: String,
    /// Retrieved knowledge passages, order-preserving.
    pub retrieved: Vec<String>,
    /// Session facts as of turn start (internal keys already stripped).
    pub context: SessionContext,
    /// Function calls the current node permits.
    pub functions: Vec<FunctionSpec>,
}

/// What a generation call produced: either plain text or a structured
/// function-call request. Modeled as a sum type so callers match instead of
/// probing optional fields.
#[derive(Debug, Clone)]
pub enum GenerationOutcome {
    Text(String),
    FunctionCall {
        name: String,
        arguments: serde_json::Value,
    },
}

/// Produces a natural-language reply (or a function-call request) for one
/// turn. Implementations must bound their remote calls with a timeout; the
/// engine treats any error as recoverable and substitutes a fallback reply.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationOutcome>;
}
