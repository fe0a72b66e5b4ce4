//! Interpolation resolver.
//!
//! Request query parameters become the interpolation context handed to the
//! decision engine. The reserved `key` parameter may name one evaluator from
//! a closed registry; anything outside the registry is rejected before the
//! engine is called. Evaluators only read external state.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde_json::Value;

use super::error::PolicyError;

/// Query parameter naming the evaluator to bind.
pub const KEY_PARAM: &str = "key";

/// Signature shared by every registered evaluator.
pub type EvaluatorFn =
    fn(&ExternalState, &BTreeMap<String, String>, Option<&str>) -> Result<Value, String>;

/// The closed set of evaluators a request may select.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvaluatorKind {
    StatusVar,
    FaceRecognition,
}

impl EvaluatorKind {
    pub const ALL: [EvaluatorKind; 2] = [EvaluatorKind::StatusVar, EvaluatorKind::FaceRecognition];

    pub fn name(self) -> &'static str {
        match self {
            EvaluatorKind::StatusVar => "status_var",
            EvaluatorKind::FaceRecognition => "face_recognition",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }

    pub fn function(self) -> EvaluatorFn {
        match self {
            EvaluatorKind::StatusVar => status_var,
            EvaluatorKind::FaceRecognition => face_recognition,
        }
    }

    /// Parameters that must be present when the evaluator is selected.
    pub fn required_params(self) -> &'static [&'static str] {
        match self {
            EvaluatorKind::StatusVar => &[],
            EvaluatorKind::FaceRecognition => &["face_uuid"],
        }
    }
}

/// Read-only state the evaluators consult.
#[derive(Debug, Clone)]
pub struct ExternalState {
    /// JSON file: policy id → field → value.
    pub status_file: PathBuf,
    /// Registered identity UUID → display name.
    pub identities: BTreeMap<String, String>,
}

impl ExternalState {
    pub fn new(status_file: impl Into<PathBuf>) -> Self {
        ExternalState {
            status_file: status_file.into(),
            identities: registered_identities(),
        }
    }
}

fn registered_identities() -> BTreeMap<String, String> {
    [
        ("cd42c43d-18c4-445f-b5a6-814bc29cb505", "User A"),
        ("f7bc80a8-a2bc-4fb3-9caf-4e65ebe3c89a", "User B"),
        ("7cc7a7ab-b4b0-49db-b251-1b2936efc287", "User C"),
    ]
    .into_iter()
    .map(|(uuid, name)| (uuid.to_string(), name.to_string()))
    .collect()
}

/// Look up `field` for policy `id` (default: the policy being evaluated)
/// in the status file. Unknown policies read as `false`.
fn status_var(
    state: &ExternalState,
    params: &BTreeMap<String, String>,
    policy_id: Option<&str>,
) -> Result<Value, String> {
    let field = params
        .get("field")
        .ok_or_else(|| "Missing parameter 'field'".to_string())?;
    let id = params
        .get("id")
        .map(String::as_str)
        .or(policy_id)
        .ok_or_else(|| "Missing parameter 'id'".to_string())?;

    let text = std::fs::read_to_string(&state.status_file)
        .map_err(|e| format!("Cannot read status file {}: {e}", state.status_file.display()))?;
    let statuses: Value =
        serde_json::from_str(&text).map_err(|e| format!("Invalid status file: {e}"))?;

    match statuses.get(id) {
        None => Ok(Value::Bool(false)),
        Some(entry) => entry
            .get(field)
            .cloned()
            .ok_or_else(|| format!("Field '{field}' not found for policy '{id}'")),
    }
}

fn face_recognition(
    state: &ExternalState,
    params: &BTreeMap<String, String>,
    _policy_id: Option<&str>,
) -> Result<Value, String> {
    let uuid = params
        .get("face_uuid")
        .ok_or_else(|| "Missing parameter 'face_uuid'".to_string())?;
    Ok(Value::Bool(state.identities.contains_key(uuid.trim())))
}

/// An evaluator bound to a request.
#[derive(Clone)]
pub struct BoundEvaluator {
    kind: EvaluatorKind,
    function: EvaluatorFn,
    state: Arc<ExternalState>,
}

impl BoundEvaluator {
    pub fn kind(&self) -> EvaluatorKind {
        self.kind
    }

    pub fn call(
        &self,
        params: &BTreeMap<String, String>,
        policy_id: Option<&str>,
    ) -> Result<Value, PolicyError> {
        (self.function)(&self.state, params, policy_id).map_err(PolicyError::Evaluation)
    }
}

impl std::fmt::Debug for BoundEvaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundEvaluator").field("kind", &self.kind).finish()
    }
}

/// Per-request context handed to the decision engine.
#[derive(Debug, Clone)]
pub struct InterpolationContext {
    pub params: BTreeMap<String, String>,
    pub policy_id: Option<String>,
    pub selected_function: Option<BoundEvaluator>,
}

impl InterpolationContext {
    /// Invoke the bound evaluator, if any.
    pub fn call_selected(&self) -> Option<Result<Value, PolicyError>> {
        self.selected_function
            .as_ref()
            .map(|f| f.call(&self.params, self.policy_id.as_deref()))
    }
}

pub struct InterpolationResolver {
    state: Arc<ExternalState>,
}

impl InterpolationResolver {
    pub fn new(state: ExternalState) -> Self {
        InterpolationResolver {
            state: Arc::new(state),
        }
    }

    pub fn resolve(
        &self,
        params: BTreeMap<String, String>,
        policy_id: Option<&str>,
    ) -> Result<InterpolationContext, PolicyError> {
        let selected_function = match params.get(KEY_PARAM) {
            None => None,
            Some(name) => {
                let kind = EvaluatorKind::from_name(name).ok_or_else(|| {
                    PolicyError::InvalidFunction(format!("'{name}' is not a registered function"))
                })?;
                for required in kind.required_params() {
                    if !params.contains_key(*required) {
                        return Err(PolicyError::Validation(format!(
                            "Missing parameter '{required}'"
                        )));
                    }
                }
                tracing::debug!(function = kind.name(), "Bound interpolation function");
                Some(BoundEvaluator {
                    kind,
                    function: kind.function(),
                    state: Arc::clone(&self.state),
                })
            }
        };

        Ok(InterpolationContext {
            params,
            policy_id: policy_id.map(str::to_string),
            selected_function,
        })
    }
}
