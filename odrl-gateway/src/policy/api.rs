//! HTTP API endpoints for policy management and evaluation.
//!
//! Every handler returns `Result<Response, PolicyError>`; errors are mapped
//! to a status code and a `{"detail": ...}` body in one place.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::{Value, json};

use super::engine::{Evaluation, Outcome};
use super::error::PolicyError;
use super::types::{POLICY_MEDIA_TYPE, PolicyEnvelope, StatusUpdate};
use crate::server::SharedState;

/// Response header set when the evaluation record could not be written.
pub const AUDIT_STATUS_HEADER: &str = "x-audit-status";

/// Build the policy API router (shares state with the main server).
pub fn routes() -> Router<Arc<SharedState>> {
    Router::new()
        .route("/api/policy", get(list_policies).post(create_policy))
        .route("/api/policy/", get(list_policies).post(create_policy))
        .route(
            "/api/policy/{id}",
            get(get_policy).put(update_policy).delete(delete_policy),
        )
        .route("/api/policy/evaluate", post(evaluate_document))
        .route("/api/policy/evaluate/{id}", get(evaluate_policy))
        .route("/api/policy/sparql", post(run_sparql))
        .route("/api/update-data", post(update_data))
        .route("/api/get-token", get(get_token))
        .route("/api/revoke-token", post(revoke_token))
        .route("/api/health", get(health))
}

// ─── Error mapping ───────────────────────────────────────────────────────────

impl IntoResponse for PolicyError {
    fn into_response(self) -> Response {
        let status = match &self {
            PolicyError::Validation(_)
            | PolicyError::Conflict(_)
            | PolicyError::InvalidFunction(_)
            | PolicyError::UnsupportedMediaType
            | PolicyError::SchemaViolation(_) => StatusCode::BAD_REQUEST,
            PolicyError::NotFound(_) => StatusCode::NOT_FOUND,
            PolicyError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            PolicyError::Forbidden(_) => StatusCode::FORBIDDEN,
            PolicyError::Evaluation(_)
            | PolicyError::UpstreamFetch(_)
            | PolicyError::Query(_)
            | PolicyError::Storage(_)
            | PolicyError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }

        let mut body = json!({ "detail": self.to_string() });
        if let PolicyError::SchemaViolation(report) = &self {
            body["report"] = json!(report);
        }
        (status, Json(body)).into_response()
    }
}

// ─── Request helpers ─────────────────────────────────────────────────────────

/// `Accept` and `Content-Type`, when present, must name the policy media type.
fn check_media_type(headers: &HeaderMap) -> Result<(), PolicyError> {
    if let Some(accept) = headers.get(header::ACCEPT) {
        let accept = accept.to_str().map_err(|_| PolicyError::UnsupportedMediaType)?;
        let ok = accept.split(',').any(|range| {
            let essence = media_essence(range);
            essence.eq_ignore_ascii_case(POLICY_MEDIA_TYPE) || essence == "*/*"
        });
        if !ok {
            return Err(PolicyError::UnsupportedMediaType);
        }
    }
    if let Some(content_type) = headers.get(header::CONTENT_TYPE) {
        let content_type = content_type
            .to_str()
            .map_err(|_| PolicyError::UnsupportedMediaType)?;
        if !media_essence(content_type).eq_ignore_ascii_case(POLICY_MEDIA_TYPE) {
            return Err(PolicyError::UnsupportedMediaType);
        }
    }
    Ok(())
}

fn media_essence(value: &str) -> &str {
    value.split(';').next().unwrap_or_default().trim()
}

fn parse_envelope(body: &Bytes) -> Result<Value, PolicyError> {
    serde_json::from_slice::<PolicyEnvelope>(body)
        .map(|envelope| envelope.odrl_policy)
        .map_err(|e| PolicyError::Validation(format!("Invalid policy body: {e}")))
}

fn evaluation_response(evaluation: Evaluation) -> Response {
    let mut response = match evaluation.outcome {
        Outcome::Permitted {
            resource: Some(resource),
            ..
        } => (
            [(header::CONTENT_TYPE, resource.content_type)],
            resource.body,
        )
            .into_response(),
        Outcome::Permitted { decision, .. } => Json(decision.payload).into_response(),
        Outcome::Denied { decision } => (
            StatusCode::FORBIDDEN,
            Json(json!({
                "detail": "Access denied",
                "evaluation_result": decision.payload,
            })),
        )
            .into_response(),
    };
    if evaluation.audit_error.is_some() {
        response
            .headers_mut()
            .insert(AUDIT_STATUS_HEADER, HeaderValue::from_static("failed"));
    }
    response
}

// ─── CRUD ────────────────────────────────────────────────────────────────────

async fn create_policy(
    State(state): State<Arc<SharedState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, PolicyError> {
    check_media_type(&headers)?;
    let document = parse_envelope(&body)?;
    state.engine.store().create(document.clone())?;

    let body = serde_json::to_string(&json!({ "odrl_policy": document }))?;
    Ok((
        StatusCode::CREATED,
        [(header::CONTENT_TYPE, POLICY_MEDIA_TYPE)],
        body,
    )
        .into_response())
}

async fn get_policy(
    State(state): State<Arc<SharedState>>,
    Path(id): Path<String>,
) -> Result<Response, PolicyError> {
    Ok(Json(state.engine.store().get(&id)?).into_response())
}

async fn list_policies(State(state): State<Arc<SharedState>>) -> Result<Response, PolicyError> {
    Ok(Json(state.engine.store().list()?).into_response())
}

async fn update_policy(
    State(state): State<Arc<SharedState>>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Response, PolicyError> {
    let store = state.engine.store();
    // Unknown ids are reported before the body is looked at.
    store.get(&id)?;
    let document = parse_envelope(&body)?;
    store.update(&id, document)?;
    Ok(Json(json!({ "message": "Policy updated", "policy_id": id })).into_response())
}

async fn delete_policy(
    State(state): State<Arc<SharedState>>,
    Path(id): Path<String>,
) -> Result<Response, PolicyError> {
    state.engine.store().delete(&id)?;
    Ok(Json(json!({ "message": "Policy deleted", "policy_id": id })).into_response())
}

// ─── Evaluation ──────────────────────────────────────────────────────────────

async fn evaluate_policy(
    State(state): State<Arc<SharedState>>,
    Path(id): Path<String>,
    Query(params): Query<BTreeMap<String, String>>,
) -> Result<Response, PolicyError> {
    let evaluation = state.engine.evaluate_stored(&id, params).await?;
    Ok(evaluation_response(evaluation))
}

async fn evaluate_document(
    State(state): State<Arc<SharedState>>,
    Query(params): Query<BTreeMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, PolicyError> {
    check_media_type(&headers)?;
    let document = parse_envelope(&body)?;
    let evaluation = state.engine.evaluate_document(&document, params).await?;
    Ok(evaluation_response(evaluation))
}

async fn run_sparql(
    State(state): State<Arc<SharedState>>,
    body: Bytes,
) -> Result<Response, PolicyError> {
    let body: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    let query = body
        .get("query")
        .and_then(Value::as_str)
        .filter(|q| !q.trim().is_empty())
        .ok_or_else(|| PolicyError::Validation("Query parameter is missing".into()))?;

    let result = state.engine.store().query(query)?;
    Ok(Json(json!({ "query": query, "result": result })).into_response())
}

// ─── Tokens & status ─────────────────────────────────────────────────────────

async fn update_data(
    State(state): State<Arc<SharedState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, PolicyError> {
    let authorization = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    let update = serde_json::from_slice::<StatusUpdate>(&body).ok();
    let (policy_id, status) = state.engine.update_status(authorization, update)?;
    Ok(Json(json!({
        "message": "Status updated",
        "policy_id": policy_id,
        "new_status": status,
    }))
    .into_response())
}

async fn get_token(State(state): State<Arc<SharedState>>) -> Result<Response, PolicyError> {
    let token = state.engine.tokens().issue()?;
    Ok(Json(json!({ "token": token })).into_response())
}

async fn revoke_token(
    State(state): State<Arc<SharedState>>,
    headers: HeaderMap,
) -> Result<Response, PolicyError> {
    let tokens = state.engine.tokens();
    let authorization = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    let token = tokens.authorize(authorization)?;
    tokens.revoke(token)?;
    Ok(Json(json!({ "message": "Token revoked" })).into_response())
}

async fn health(State(state): State<Arc<SharedState>>) -> Json<Value> {
    Json(json!({ "status": "ok", "policies": state.engine.store().len() }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(header::HeaderName, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(name.clone(), HeaderValue::from_str(value).unwrap());
        }
        map
    }

    #[test]
    fn test_media_type_rules() {
        assert!(check_media_type(&HeaderMap::new()).is_ok());
        assert!(check_media_type(&headers(&[(header::ACCEPT, "*/*")])).is_ok());
        assert!(
            check_media_type(&headers(&[(
                header::CONTENT_TYPE,
                "application/ld+json; charset=utf-8"
            )]))
            .is_ok()
        );
        assert!(matches!(
            check_media_type(&headers(&[(header::CONTENT_TYPE, "application/json")])),
            Err(PolicyError::UnsupportedMediaType)
        ));
        assert!(matches!(
            check_media_type(&headers(&[(header::ACCEPT, "text/html")])),
            Err(PolicyError::UnsupportedMediaType)
        ));
    }

    #[test]
    fn test_error_status_mapping() {
        let cases = [
            (PolicyError::Validation("x".into()), StatusCode::BAD_REQUEST),
            (PolicyError::Conflict("x".into()), StatusCode::BAD_REQUEST),
            (PolicyError::InvalidFunction("x".into()), StatusCode::BAD_REQUEST),
            (PolicyError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (PolicyError::Unauthorized("x".into()), StatusCode::UNAUTHORIZED),
            (PolicyError::Forbidden("x".into()), StatusCode::FORBIDDEN),
            (PolicyError::Evaluation("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
            (PolicyError::UpstreamFetch("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (error, status) in cases {
            assert_eq!(error.into_response().status(), status);
        }
    }
}
