//! Evaluation orchestrator.
//!
//! One request runs `lookup → resolve interpolations → decide → fetch or
//! deny → log`. The audit record is written on both the permit and the deny
//! path before the outcome is returned; a failed write does not change the
//! outcome but is reported alongside it.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;

use super::audit::AuditLog;
use super::decision::{Decision, DecisionEngine};
use super::error::PolicyError;
use super::fetch::{FetchedResource, ResourceFetcher, resource_target};
use super::interpolation::InterpolationResolver;
use super::store::PolicyStore;
use super::tokens::TokenRegistry;
use super::types::{EvaluationRecord, StatusUpdate, derive_policy_id};

/// The gateway core: store, evaluation pipeline and token registry.
pub struct PolicyEngine {
    store: PolicyStore,
    resolver: InterpolationResolver,
    decider: Arc<dyn DecisionEngine>,
    fetcher: Arc<dyn ResourceFetcher>,
    audit: AuditLog,
    tokens: TokenRegistry,
}

/// What the decision led to.
#[derive(Debug)]
pub enum Outcome {
    /// Permit. `resource` is `None` for ad-hoc documents, which are never fetched.
    Permitted {
        decision: Decision,
        resource: Option<FetchedResource>,
    },
    Denied {
        decision: Decision,
    },
}

/// Result of one evaluation request.
#[derive(Debug)]
pub struct Evaluation {
    pub outcome: Outcome,
    /// Set when the audit record could not be written.
    pub audit_error: Option<String>,
}

impl PolicyEngine {
    pub fn new(
        store: PolicyStore,
        resolver: InterpolationResolver,
        decider: Arc<dyn DecisionEngine>,
        fetcher: Arc<dyn ResourceFetcher>,
        audit: AuditLog,
        tokens: TokenRegistry,
    ) -> Self {
        PolicyEngine {
            store,
            resolver,
            decider,
            fetcher,
            audit,
            tokens,
        }
    }

    pub fn store(&self) -> &PolicyStore {
        &self.store
    }

    pub fn tokens(&self) -> &TokenRegistry {
        &self.tokens
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    // ─── Evaluation ──────────────────────────────────────────────────────

    /// Evaluate a stored policy; on permit, fetch the resource it governs.
    pub async fn evaluate_stored(
        &self,
        policy_id: &str,
        params: BTreeMap<String, String>,
    ) -> Result<Evaluation, PolicyError> {
        let policy = self.store.get(policy_id)?;
        let decision = self.decide(&policy, params.clone(), Some(policy_id)).await?;

        if !decision.permit {
            let audit_error = self.log_outcome(Some(policy_id), params, &decision);
            tracing::info!(policy_id = %policy_id, "Access denied");
            return Ok(Evaluation {
                outcome: Outcome::Denied { decision },
                audit_error,
            });
        }

        let fetched = match resource_target(&policy) {
            Ok(url) => self.fetcher.fetch(&url).await,
            Err(e) => Err(e),
        };
        let audit_error = self.log_outcome(Some(policy_id), params, &decision);
        let resource = fetched.inspect_err(|e| {
            tracing::warn!(policy_id = %policy_id, error = %e, "Permitted resource fetch failed");
        })?;

        tracing::info!(
            policy_id = %policy_id,
            bytes = resource.body.len(),
            "Access permitted"
        );
        Ok(Evaluation {
            outcome: Outcome::Permitted {
                decision,
                resource: Some(resource),
            },
            audit_error,
        })
    }

    /// Evaluate a document supplied in the request. Nothing is fetched.
    pub async fn evaluate_document(
        &self,
        document: &Value,
        params: BTreeMap<String, String>,
    ) -> Result<Evaluation, PolicyError> {
        let policy_id = derive_policy_id(document).ok();
        let decision = self
            .decide(document, params.clone(), policy_id.as_deref())
            .await?;
        let audit_error = self.log_outcome(policy_id.as_deref(), params, &decision);

        let outcome = if decision.permit {
            Outcome::Permitted {
                decision,
                resource: None,
            }
        } else {
            Outcome::Denied { decision }
        };
        Ok(Evaluation {
            outcome,
            audit_error,
        })
    }

    async fn decide(
        &self,
        policy: &Value,
        params: BTreeMap<String, String>,
        policy_id: Option<&str>,
    ) -> Result<Decision, PolicyError> {
        let context = self.resolver.resolve(params, policy_id)?;
        let value = self.decider.enforce(policy, &context).await.map_err(|e| {
            tracing::warn!(policy_id = ?policy_id, error = %e, "Decision engine failed");
            PolicyError::Evaluation(e.0)
        })?;
        Ok(Decision::from_engine_value(value))
    }

    fn log_outcome(
        &self,
        policy_id: Option<&str>,
        parameters: BTreeMap<String, String>,
        decision: &Decision,
    ) -> Option<String> {
        let record = EvaluationRecord {
            timestamp: Utc::now(),
            policy_id: policy_id.map(str::to_string),
            parameters,
            evaluation_result: decision.payload.clone(),
            permitted: decision.permit,
        };
        match self.audit.append(&record) {
            Ok(()) => None,
            Err(e) => {
                tracing::error!(policy_id = ?policy_id, error = %e, "Failed to write evaluation record");
                Some(e.to_string())
            }
        }
    }

    // ─── Status mutation ─────────────────────────────────────────────────

    /// Token-gated status patch: authorize, check the body, then commit.
    pub fn update_status(
        &self,
        authorization: Option<&str>,
        update: Option<StatusUpdate>,
    ) -> Result<(String, Value), PolicyError> {
        self.tokens.authorize(authorization)?;
        let (policy_id, status) = update
            .and_then(StatusUpdate::into_parts)
            .ok_or_else(|| PolicyError::Validation("Incomplete data".into()))?;
        self.store.set_status(&policy_id, status.clone())?;
        Ok((policy_id, status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::decision::EngineError;
    use crate::policy::interpolation::{ExternalState, InterpolationContext};
    use crate::policy::sync::GraphSynchronizer;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;
    use url::Url;

    /// Permits when the `allow` parameter is "yes"; fails when it is "boom".
    struct ParamEngine;

    #[async_trait]
    impl DecisionEngine for ParamEngine {
        async fn enforce(
            &self,
            _policy: &Value,
            context: &InterpolationContext,
        ) -> Result<Value, EngineError> {
            match context.params.get("allow").map(String::as_str) {
                Some("boom") => Err(EngineError("engine exploded".into())),
                Some("yes") => Ok(json!({"decision": true, "trace": []})),
                _ => Ok(json!({"decision": false, "trace": ["dateTime lt failed"]})),
            }
        }
    }

    #[derive(Default)]
    struct CountingFetcher {
        hits: AtomicUsize,
        urls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ResourceFetcher for CountingFetcher {
        async fn fetch(&self, url: &Url) -> Result<FetchedResource, PolicyError> {
            self.hits.fetch_add(1, Ordering::SeqCst);
            self.urls.lock().push(url.to_string());
            Ok(FetchedResource {
                content_type: "text/plain".into(),
                body: b"governed bytes".to_vec(),
            })
        }
    }

    fn test_engine() -> (PolicyEngine, Arc<CountingFetcher>, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let sync = GraphSynchronizer::new(
            dir.path().join("policies.json"),
            dir.path().join("output.ttl"),
            "http://example.com/policy",
        );
        let fetcher = Arc::new(CountingFetcher::default());
        let engine = PolicyEngine::new(
            PolicyStore::open(sync).unwrap(),
            InterpolationResolver::new(ExternalState::new(dir.path().join("status.json"))),
            Arc::new(ParamEngine),
            fetcher.clone(),
            AuditLog::new(dir.path().join("evaluation_log.json")),
            TokenRegistry::open(dir.path().join("tokens.json")).unwrap(),
        );
        engine
            .store()
            .create(json!({
                "uid": "policy:2",
                "permission": [{"target": "https://x/doc", "action": "distribute"}]
            }))
            .unwrap();
        (engine, fetcher, dir)
    }

    fn params(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn test_permit_fetches_target_and_logs() {
        let (engine, fetcher, _dir) = test_engine();
        let result = engine
            .evaluate_stored("2", params(&[("allow", "yes")]))
            .await
            .unwrap();

        match result.outcome {
            Outcome::Permitted {
                resource: Some(resource),
                ..
            } => assert_eq!(resource.body, b"governed bytes"),
            other => panic!("Expected Permitted with resource, got {:?}", other),
        }
        assert!(result.audit_error.is_none());
        assert_eq!(fetcher.hits.load(Ordering::SeqCst), 1);
        assert_eq!(fetcher.urls.lock()[0], "https://x/doc");

        let records = engine.audit().read_all().unwrap();
        assert_eq!(records.len(), 1);
        assert!(records[0].permitted);
        assert_eq!(records[0].parameters, params(&[("allow", "yes")]));
    }

    #[tokio::test]
    async fn test_deny_does_not_fetch_but_logs() {
        let (engine, fetcher, _dir) = test_engine();
        let result = engine
            .evaluate_stored("2", params(&[("allow", "no"), ("x", "1")]))
            .await
            .unwrap();

        match result.outcome {
            Outcome::Denied { decision } => {
                assert_eq!(decision.payload["trace"][0], "dateTime lt failed");
            }
            other => panic!("Expected Denied, got {:?}", other),
        }
        assert_eq!(fetcher.hits.load(Ordering::SeqCst), 0);
        let records = engine.audit().read_all().unwrap();
        assert_eq!(records.len(), 1);
        assert!(!records[0].permitted);
        assert_eq!(records[0].parameters, params(&[("allow", "no"), ("x", "1")]));
    }

    #[tokio::test]
    async fn test_failures_before_decision_are_terminal() {
        let (engine, fetcher, _dir) = test_engine();

        assert!(matches!(
            engine.evaluate_stored("9", params(&[("allow", "yes")])).await,
            Err(PolicyError::NotFound(_))
        ));
        assert!(matches!(
            engine
                .evaluate_stored("2", params(&[("allow", "yes"), ("key", "eval")]))
                .await,
            Err(PolicyError::InvalidFunction(_))
        ));
        match engine.evaluate_stored("2", params(&[("allow", "boom")])).await {
            Err(PolicyError::Evaluation(msg)) => assert_eq!(msg, "engine exploded"),
            other => panic!("Expected Evaluation error, got {:?}", other),
        }

        assert_eq!(fetcher.hits.load(Ordering::SeqCst), 0);
        assert!(engine.audit().read_all().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_evaluate_document_never_fetches() {
        let (engine, fetcher, _dir) = test_engine();
        let doc = json!({"uid": "policy:77", "permission": [{"target": "https://x/doc", "action": "use"}]});

        let result = engine
            .evaluate_document(&doc, params(&[("allow", "yes")]))
            .await
            .unwrap();
        assert!(matches!(
            result.outcome,
            Outcome::Permitted { resource: None, .. }
        ));
        assert_eq!(fetcher.hits.load(Ordering::SeqCst), 0);
        let records = engine.audit().read_all().unwrap();
        assert_eq!(records[0].policy_id.as_deref(), Some("77"));
    }

    #[tokio::test]
    async fn test_audit_failure_is_reported_with_outcome() {
        let (engine, _fetcher, dir) = test_engine();
        // A directory where the log file should be makes every append fail.
        std::fs::create_dir(dir.path().join("evaluation_log.json")).unwrap();

        let result = engine
            .evaluate_stored("2", params(&[("allow", "no")]))
            .await
            .unwrap();
        assert!(matches!(result.outcome, Outcome::Denied { .. }));
        assert!(result.audit_error.is_some());
    }

    #[test]
    fn test_update_status_checks_token_then_body() {
        let (engine, _fetcher, _dir) = test_engine();
        let body = || {
            Some(StatusUpdate {
                policy_id: Some("2".into()),
                status: Some(json!("suspended")),
            })
        };

        assert!(matches!(
            engine.update_status(None, body()),
            Err(PolicyError::Unauthorized(_))
        ));
        assert!(matches!(
            engine.update_status(Some("Token nope"), body()),
            Err(PolicyError::Forbidden(_))
        ));

        let header = format!("Token {}", engine.tokens().issue().unwrap());
        assert!(matches!(
            engine.update_status(Some(&header), Some(StatusUpdate::default())),
            Err(PolicyError::Validation(_))
        ));
        let missing = Some(StatusUpdate {
            policy_id: Some("9".into()),
            status: Some(json!("on")),
        });
        assert!(matches!(
            engine.update_status(Some(&header), missing),
            Err(PolicyError::NotFound(_))
        ));

        let (id, status) = engine.update_status(Some(&header), body()).unwrap();
        assert_eq!((id.as_str(), status), ("2", json!("suspended")));
        assert_eq!(engine.store().get("2").unwrap()["status"], "suspended");
    }
}
