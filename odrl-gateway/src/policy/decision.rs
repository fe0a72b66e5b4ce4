//! Decision engine contract and the HTTP client for a remote engine.

use async_trait::async_trait;
use serde_json::{Value, json};

use super::interpolation::InterpolationContext;

/// Failure reported by a decision engine.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct EngineError(pub String);

/// External component deciding permit/deny for a policy and context.
#[async_trait]
pub trait DecisionEngine: Send + Sync {
    /// Returns the engine's raw decision value.
    async fn enforce(&self, policy: &Value, context: &InterpolationContext)
    -> Result<Value, EngineError>;
}

/// A decision value interpreted as permit or deny.
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub permit: bool,
    /// Everything the engine returned, logged and sent back to the caller.
    pub payload: Value,
}

impl Decision {
    /// An object carrying `decision` or `result` is decided by that field,
    /// anything else by its own truthiness.
    pub fn from_engine_value(payload: Value) -> Self {
        let permit = match &payload {
            Value::Object(map) => match map.get("decision").or_else(|| map.get("result")) {
                Some(field) => truthy(field),
                None => truthy(&payload),
            },
            other => truthy(other),
        };
        Decision { permit, payload }
    }
}

pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

/// Body sent to a remote engine. The bound evaluator is invoked locally
/// since the engine cannot call back into the gateway.
pub fn engine_request(policy: &Value, context: &InterpolationContext) -> Result<Value, EngineError> {
    let mut interpolations = json!(context.params);
    if let Some(result) = context.call_selected() {
        let value = result.map_err(|e| EngineError(e.to_string()))?;
        let name = context
            .selected_function
            .as_ref()
            .map(|f| f.kind().name())
            .unwrap_or_default();
        interpolations["selected_function"] = json!({ "name": name, "value": value });
    }
    Ok(json!({ "policy": policy, "interpolations": interpolations }))
}

/// Posts `{policy, interpolations}` to a remote engine and returns its JSON.
pub struct HttpDecisionEngine {
    url: String,
    http: reqwest::Client,
}

impl HttpDecisionEngine {
    pub fn new(url: impl Into<String>) -> Self {
        HttpDecisionEngine {
            url: url.into(),
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl DecisionEngine for HttpDecisionEngine {
    async fn enforce(
        &self,
        policy: &Value,
        context: &InterpolationContext,
    ) -> Result<Value, EngineError> {
        let body = engine_request(policy, context)?;
        let resp = self
            .http
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| EngineError(format!("Decision engine unreachable: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(EngineError(format!("Decision engine error {status}: {body}")));
        }
        resp.json::<Value>()
            .await
            .map_err(|e| EngineError(format!("Unreadable decision: {e}")))
    }
}
