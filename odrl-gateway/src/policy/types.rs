//! Core data structures shared by the store, orchestrator and HTTP layer.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::decision::truthy;
use super::error::PolicyError;

/// The only media type accepted for policy bodies.
pub const POLICY_MEDIA_TYPE: &str = "application/ld+json";

/// Request body wrapper used by create, update and ad-hoc evaluate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyEnvelope {
    pub odrl_policy: Value,
}

/// Derive the store key from a document's `uid`: the text after the last `:`.
pub fn derive_policy_id(document: &Value) -> Result<String, PolicyError> {
    let object = document
        .as_object()
        .ok_or_else(|| PolicyError::Validation("Policy must be a JSON object".into()))?;
    let uid = match object.get("uid") {
        None | Some(Value::Null) => {
            return Err(PolicyError::Validation("Policy UID is missing".into()));
        }
        Some(Value::String(uid)) => uid,
        Some(_) => return Err(PolicyError::Validation("Policy UID must be a string".into())),
    };
    let id = uid.rsplit(':').next().unwrap_or_default().trim();
    if id.is_empty() {
        return Err(PolicyError::Validation("Policy UID is empty".into()));
    }
    Ok(id.to_string())
}

/// Characters that would break an IRI when an id is appended to the base.
const IRI_UNSAFE: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'<')
    .add(b'>')
    .add(b'\\')
    .add(b'^')
    .add(b'`')
    .add(b'{')
    .add(b'|')
    .add(b'}')
    .add(b'#')
    .add(b'%');

/// `base + ":" + id`, the subject of a policy's node in the graph mirror.
pub fn canonical_uri(base: &str, policy_id: &str) -> String {
    format!("{base}:{}", utf8_percent_encode(policy_id, IRI_UNSAFE))
}

/// Body of `POST /api/update-data`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StatusUpdate {
    #[serde(default)]
    pub policy_id: Option<String>,
    #[serde(default)]
    pub status: Option<Value>,
}

impl StatusUpdate {
    /// Both fields present and truthy.
    pub fn into_parts(self) -> Option<(String, Value)> {
        let policy_id = self.policy_id.filter(|id| !id.trim().is_empty())?;
        let status = self.status.filter(truthy)?;
        Some((policy_id, status))
    }
}

/// One line of the audit log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationRecord {
    pub timestamp: DateTime<Utc>,
    /// `None` for ad-hoc documents that were never stored.
    pub policy_id: Option<String>,
    pub parameters: BTreeMap<String, String>,
    pub evaluation_result: Value,
    pub permitted: bool,
}
