use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Value, json};

use crate::generation::{GenerationBackend, GenerationOutcome, GenerationRequest};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-5-mini";
const DEFAULT_TIMEOUT_S: f64 = 30.0;

/// Chat Completions backend for OpenAI and OpenAI-compatible providers.
pub struct OpenAiBackend {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiBackend {
    pub fn new(
        base_url: Option<String>,
        api_key: String,
        model: Option<String>,
        timeout_s: Option<f64>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs_f64(timeout_s.unwrap_or(DEFAULT_TIMEOUT_S)))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            api_key,
            model: model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
        })
    }

    /// Build from environment: requires OPENAI_API_KEY, honors
    /// OPENAI_BASE_URL for compatible providers.
    pub fn from_env(model: Option<String>, timeout_s: Option<f64>) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("generation backend requires OPENAI_API_KEY"))?;
        let base_url = std::env::var("OPENAI_BASE_URL").ok();
        Self::new(base_url, api_key, model, timeout_s)
    }
}

/// Fold the node instructions, retrieved passages, and session facts into a
/// single system message.
fn compose_system_message(request: &GenerationRequest) -> String {
    let mut out = request.system_instructions.clone();

    if !request.retrieved.is_empty() {
        out.push_str("\n\nRelevant knowledge:\n");
        for passage in &request.retrieved {
            out.push_str("- ");
            out.push_str(passage);
            out.push('\n');
        }
    }

    if !request.context.is_empty() {
        let mut keys: Vec<&String> = request.context.keys().collect();
        keys.sort();
        out.push_str("\nKnown facts about this visitor:\n");
        for key in keys {
            let value = &request.context[key];
            let rendered = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            out.push_str(&format!("- {}: {}\n", key, rendered));
        }
    }

    out
}

fn build_body(model: &str, request: &GenerationRequest) -> Value {
    let messages = json!([
        { "role": "system", "content": compose_system_message(request) },
        { "role": "user", "content": request.user_message },
    ]);

    let mut body = json!({ "model": model, "messages": messages });

    if !request.functions.is_empty() {
        let tools: Vec<Value> = request
            .functions
            .iter()
            .map(|spec| {
                json!({
                    "type": "function",
                    "function": {
                        "name": spec.name,
                        "description": spec.description,
                        "parameters": spec.parameters,
                    }
                })
            })
            .collect();
        body["tools"] = Value::Array(tools);
    }

    body
}

fn extract_text(value: &Value, out: &mut String) {
    match value {
        Value::String(s) => {
            if !s.is_empty() {
                if !out.is_empty() {
                    out.push(' ');
                }
                out.push_str(s);
            }
        }
        Value::Array(items) => {
            for item in items {
                extract_text(item, out);
            }
        }
        Value::Object(map) => {
            if let Some(text) = map.get("text").or_else(|| map.get("content")) {
                extract_text(text, out);
            }
        }
        _ => {}
    }
}

/// Parse an OpenAI-style chat completion into the engine's outcome type.
/// A tool call wins over message content when both are present.
pub fn parse_completion(data: &Value) -> Result<GenerationOutcome> {
    let message = data
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|choices| choices.first())
        .and_then(|choice| choice.get("message"))
        .ok_or_else(|| anyhow::anyhow!("completion response has no choices[0].message"))?;

    if let Some(call) = message
        .get("tool_calls")
        .and_then(Value::as_array)
        .and_then(|calls| calls.first())
        .and_then(|call| call.get("function"))
    {
        let name = call
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow::anyhow!("tool call has no function name"))?
            .to_string();

        // Arguments arrive as a JSON-encoded string in the chat API.
        let arguments = match call.get("arguments") {
            Some(Value::String(raw)) => {
                serde_json::from_str(raw).unwrap_or_else(|_| json!({ "raw": raw }))
            }
            Some(other) => other.clone(),
            None => json!({}),
        };

        return Ok(GenerationOutcome::FunctionCall { name, arguments });
    }

    let mut text = String::new();
    if let Some(content) = message.get("content") {
        extract_text(content, &mut text);
    }

    if text.is_empty() {
        anyhow::bail!("completion response has neither content nor tool calls");
    }

    Ok(GenerationOutcome::Text(text))
}

#[async_trait]
impl GenerationBackend for OpenAiBackend {
    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationOutcome> {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let body = build_body(&self.model, request);

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("generation request failed: {}", e))?;

        let status = response.status();
        let response_text = response
            .text()
            .await
            .map_err(|e| anyhow::anyhow!("failed to read generation response: {}", e))?;

        if !status.is_success() {
            anyhow::bail!("generation backend returned {}: {}", status, response_text);
        }

        let parsed: Value = serde_json::from_str(&response_text)
            .map_err(|e| anyhow::anyhow!("failed to parse generation response: {}", e))?;

        parse_completion(&parsed)
    }
}
