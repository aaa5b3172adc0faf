//! Structured LLM provider
//!
//! TigerStyle: one narrow contract. A prompt plus a JSON schema in, a JSON
//! object conforming to that schema out. Everything the engine asks a model
//! for (extraction, summary merges, community naming) goes through this one
//! call shape, which is what makes the whole pipeline simulable.

use async_trait::async_trait;
use naiad_core::http::{HttpClient, HttpError, ReqwestHttpClient};
use naiad_dst::{FaultInjector, FaultType};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::env;
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Errors from structured LLM calls.
#[derive(Debug, Clone, Error)]
pub enum LlmError {
    #[error("LLM request failed: {reason}")]
    RequestFailed { reason: String },

    #[error("LLM request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("LLM payload rejected by schema: {reason}")]
    SchemaMismatch { reason: String },

    #[error("fault injected: {operation}")]
    FaultInjected { operation: String },
}

impl LlmError {
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            LlmError::RequestFailed { .. }
                | LlmError::Timeout { .. }
                | LlmError::FaultInjected { .. }
        )
    }
}

pub type LlmResult<T> = Result<T, LlmError>;

/// A schema-conforming JSON payload plus token accounting.
#[derive(Debug, Clone)]
pub struct StructuredResponse {
    pub json: Value,
    pub tokens_used: u64,
}

/// Structured-generation contract.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Generate a JSON object conforming to `schema`.
    ///
    /// `schema` is a JSON Schema object; implementations must reject
    /// payloads that miss required keys rather than hand them downstream.
    async fn generate_structured(
        &self,
        prompt: &str,
        schema: &Value,
    ) -> LlmResult<StructuredResponse>;
}

/// Check required keys of a top-level object schema.
///
/// Deliberately shallow: the engine's schemas are flat objects and the
/// point is catching wholesale malformed payloads, not re-implementing a
/// validator.
pub(crate) fn validate_required(schema: &Value, payload: &Value) -> LlmResult<()> {
    let Some(required) = schema.get("required").and_then(Value::as_array) else {
        return Ok(());
    };

    let Some(object) = payload.as_object() else {
        return Err(LlmError::SchemaMismatch {
            reason: format!("expected object, got {payload}"),
        });
    };

    for key in required.iter().filter_map(Value::as_str) {
        if !object.contains_key(key) {
            return Err(LlmError::SchemaMismatch {
                reason: format!("missing required key '{key}'"),
            });
        }
    }
    Ok(())
}

// =============================================================================
// Simulation provider
// =============================================================================

/// Deterministic LLM for testing.
///
/// Resolution order per call:
/// 1. the scripted queue (exact payloads pushed by the test, FIFO)
/// 2. canned responses keyed by prompt substring
/// 3. a synthesized payload derived from the schema and the prompt hash
#[derive(Default)]
pub struct SimLlmProvider {
    script: Mutex<VecDeque<Value>>,
    canned: Mutex<Vec<(String, Value)>>,
    faults: Option<Arc<FaultInjector>>,
}

impl SimLlmProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue exact payloads, consumed in order.
    pub fn with_script(self, responses: Vec<Value>) -> Self {
        self.script.lock().unwrap().extend(responses);
        self
    }

    /// Append one scripted payload.
    pub fn push_response(&self, response: Value) {
        self.script.lock().unwrap().push_back(response);
    }

    /// Respond with `payload` whenever the prompt contains `pattern`.
    pub fn with_canned(self, pattern: impl Into<String>, payload: Value) -> Self {
        self.canned.lock().unwrap().push((pattern.into(), payload));
        self
    }

    /// Attach a fault injector (operation name: `llm_generate`).
    pub fn with_faults(mut self, faults: Arc<FaultInjector>) -> Self {
        self.faults = Some(faults);
        self
    }

    /// Number of scripted responses not yet consumed.
    pub fn pending_responses(&self) -> usize {
        self.script.lock().unwrap().len()
    }

    fn synthesize(schema: &Value, prompt_hash: u64) -> Value {
        let mut object = serde_json::Map::new();

        let properties = schema.get("properties").and_then(Value::as_object);
        let required: Vec<&str> = schema
            .get("required")
            .and_then(Value::as_array)
            .map(|keys| keys.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();

        for key in required {
            let kind = properties
                .and_then(|p| p.get(key))
                .and_then(|p| p.get("type"))
                .and_then(Value::as_str)
                .unwrap_or("string");

            let value = match kind {
                "number" => json!(0.75),
                "integer" => json!(1),
                "boolean" => json!(prompt_hash % 2 == 0),
                "array" => json!([]),
                "object" => json!({}),
                _ => json!(format!("sim-{key}-{:x}", prompt_hash & 0xffff)),
            };
            object.insert(key.to_string(), value);
        }

        Value::Object(object)
    }

    fn hash_prompt(prompt: &str) -> u64 {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut hasher = DefaultHasher::new();
        prompt.hash(&mut hasher);
        hasher.finish()
    }
}

#[async_trait]
impl LlmProvider for SimLlmProvider {
    async fn generate_structured(
        &self,
        prompt: &str,
        schema: &Value,
    ) -> LlmResult<StructuredResponse> {
        if let Some(faults) = &self.faults {
            match faults.should_inject("llm_generate") {
                Some(FaultType::LlmFailure) => {
                    return Err(LlmError::RequestFailed {
                        reason: "provider error: internal error".to_string(),
                    });
                }
                Some(FaultType::LlmTimeout) => {
                    return Err(LlmError::Timeout { timeout_ms: 30_000 });
                }
                Some(FaultType::LlmMalformedPayload) => {
                    return Err(LlmError::SchemaMismatch {
                        reason: "payload was not an object".to_string(),
                    });
                }
                _ => {}
            }
        }

        let scripted = self.script.lock().unwrap().pop_front();
        let json = if let Some(payload) = scripted {
            payload
        } else if let Some(payload) = self
            .canned
            .lock()
            .unwrap()
            .iter()
            .find(|(pattern, _)| prompt.contains(pattern.as_str()))
            .map(|(_, payload)| payload.clone())
        {
            payload
        } else {
            Self::synthesize(schema, Self::hash_prompt(prompt))
        };

        validate_required(schema, &json)?;

        let tokens_used = (prompt.len() as u64 + json.to_string().len() as u64) / 4;
        Ok(StructuredResponse { json, tokens_used })
    }
}

// =============================================================================
// HTTP provider (OpenAI-compatible)
// =============================================================================

/// Configuration for the HTTP LLM provider.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// OpenAI-compatible API base URL.
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub max_tokens: u32,
}

impl LlmConfig {
    /// Build from `NAIAD_API_KEY`/`NAIAD_BASE_URL`/`NAIAD_MODEL`, falling
    /// back to `OPENAI_API_KEY`.
    pub fn from_env() -> Option<Self> {
        let api_key = env::var("NAIAD_API_KEY")
            .or_else(|_| env::var("OPENAI_API_KEY"))
            .ok()?;

        Some(Self {
            base_url: env::var("NAIAD_BASE_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
            api_key,
            model: env::var("NAIAD_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string()),
            max_tokens: 2048,
        })
    }
}

/// OpenAI-compatible `/chat/completions` provider in JSON mode.
///
/// The schema rides in the system message; the parsed payload is checked
/// against the schema's required keys before it leaves this function.
pub struct HttpLlmProvider {
    config: LlmConfig,
    http: Arc<dyn HttpClient>,
}

impl HttpLlmProvider {
    pub fn new(config: LlmConfig) -> Self {
        Self {
            config,
            http: Arc::new(ReqwestHttpClient::new()),
        }
    }

    /// Swap the HTTP client (testing, fault injection).
    pub fn with_http_client(mut self, http: Arc<dyn HttpClient>) -> Self {
        self.http = http;
        self
    }
}

#[async_trait]
impl LlmProvider for HttpLlmProvider {
    async fn generate_structured(
        &self,
        prompt: &str,
        schema: &Value,
    ) -> LlmResult<StructuredResponse> {
        let url = format!("{}/chat/completions", self.config.base_url);
        let body = json!({
            "model": self.config.model,
            "max_tokens": self.config.max_tokens,
            "response_format": {"type": "json_object"},
            "messages": [
                {
                    "role": "system",
                    "content": format!(
                        "Respond with a single JSON object conforming to this JSON Schema, \
                         with no surrounding prose:\n{schema}"
                    ),
                },
                {"role": "user", "content": prompt},
            ],
        });

        let request = naiad_core::http::HttpRequest::post(url)
            .with_header("Authorization", format!("Bearer {}", self.config.api_key))
            .with_json_body(&body);

        let response = self.http.execute(request).await.map_err(|e| match e {
            HttpError::Timeout { timeout_ms } => LlmError::Timeout { timeout_ms },
            other => LlmError::RequestFailed {
                reason: other.to_string(),
            },
        })?;

        if !response.is_success() {
            return Err(LlmError::RequestFailed {
                reason: format!("status {}: {}", response.status, response.body),
            });
        }

        let payload = response.json().map_err(|e| LlmError::RequestFailed {
            reason: format!("invalid response body: {e}"),
        })?;

        let content = payload["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| LlmError::RequestFailed {
                reason: "response missing choices[0].message.content".to_string(),
            })?;

        let json: Value = serde_json::from_str(content).map_err(|e| LlmError::SchemaMismatch {
            reason: format!("content is not JSON: {e}"),
        })?;
        validate_required(schema, &json)?;

        let tokens_used = payload["usage"]["total_tokens"].as_u64().unwrap_or(0);
        Ok(StructuredResponse { json, tokens_used })
    }
}
