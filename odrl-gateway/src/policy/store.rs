//! Policy document store.
//!
//! Documents live in a JSON file keyed by policy id and are mirrored into
//! the RDF graph on every write. The map and graph sit behind one lock: a
//! writer stages its change on copies, commits through the synchronizer and
//! swaps the copies in only after the commit succeeded.

use std::collections::BTreeMap;

use parking_lot::RwLock;
use serde_json::Value;

use super::error::PolicyError;
use super::sync::GraphSynchronizer;
use super::types::derive_policy_id;
use crate::graph::{Graph, sparql};

struct StoreState {
    documents: BTreeMap<String, Value>,
    graph: Graph,
}

pub struct PolicyStore {
    state: RwLock<StoreState>,
    sync: GraphSynchronizer,
}

impl PolicyStore {
    /// Load documents and graph from disk. Missing files start empty.
    /// Each stored policy's triples are re-derived from its document.
    pub fn open(sync: GraphSynchronizer) -> Result<Self, PolicyError> {
        let documents = sync.load_documents()?;
        let graph = sync.reconcile(sync.load_graph()?, &documents)?;
        tracing::info!(
            policies = documents.len(),
            triples = graph.len(),
            "Policy store loaded"
        );
        Ok(PolicyStore {
            state: RwLock::new(StoreState { documents, graph }),
            sync,
        })
    }

    /// Insert a new policy. Returns its id.
    pub fn create(&self, document: Value) -> Result<String, PolicyError> {
        let policy_id = derive_policy_id(&document)?;
        let mut state = self.state.write();
        if state.documents.contains_key(&policy_id) {
            tracing::warn!(policy_id = %policy_id, "Rejected duplicate policy");
            return Err(PolicyError::Conflict("Policy UID already exists".into()));
        }

        let mut documents = state.documents.clone();
        documents.insert(policy_id.clone(), document);
        let graph = state.graph.clone();
        self.commit(&mut state, graph, documents, &policy_id, "created")?;
        Ok(policy_id)
    }

    pub fn get(&self, policy_id: &str) -> Result<Value, PolicyError> {
        self.state
            .read()
            .documents
            .get(policy_id)
            .cloned()
            .ok_or_else(|| PolicyError::NotFound("Policy not found".into()))
    }

    /// All policies keyed by id. An empty store is reported as `NotFound`.
    pub fn list(&self) -> Result<BTreeMap<String, Value>, PolicyError> {
        let state = self.state.read();
        if state.documents.is_empty() {
            return Err(PolicyError::NotFound("No policies found".into()));
        }
        Ok(state.documents.clone())
    }

    /// Replace a policy. The document's `uid` must derive to `policy_id`.
    pub fn update(&self, policy_id: &str, document: Value) -> Result<(), PolicyError> {
        let mut state = self.state.write();
        if !state.documents.contains_key(policy_id) {
            return Err(PolicyError::NotFound("Policy not found".into()));
        }
        let new_id = derive_policy_id(&document)?;
        if new_id != policy_id {
            tracing::warn!(policy_id = %policy_id, body_id = %new_id, "Rejected update with mismatched UID");
            return Err(PolicyError::Conflict(
                "Policy UID in body does not match the path".into(),
            ));
        }

        let mut documents = state.documents.clone();
        documents.insert(policy_id.to_string(), document);
        let mut graph = state.graph.clone();
        self.sync.remove_subject(&mut graph, policy_id);
        self.commit(&mut state, graph, documents, policy_id, "updated")
    }

    /// Set the `status` field of a stored policy.
    pub fn set_status(&self, policy_id: &str, status: Value) -> Result<(), PolicyError> {
        let mut state = self.state.write();
        let mut documents = state.documents.clone();
        let document = documents
            .get_mut(policy_id)
            .ok_or_else(|| PolicyError::NotFound("Policy not found".into()))?;
        let object = document
            .as_object_mut()
            .ok_or_else(|| PolicyError::Validation("Stored policy is not a JSON object".into()))?;
        object.insert("status".into(), status);

        let mut graph = state.graph.clone();
        self.sync.remove_subject(&mut graph, policy_id);
        self.commit(&mut state, graph, documents, policy_id, "status updated")
    }

    pub fn delete(&self, policy_id: &str) -> Result<(), PolicyError> {
        let mut state = self.state.write();
        if !state.documents.contains_key(policy_id) {
            return Err(PolicyError::NotFound("Policy not found".into()));
        }
        let mut documents = state.documents.clone();
        documents.remove(policy_id);
        let mut graph = state.graph.clone();
        let removed = self.sync.remove_subject(&mut graph, policy_id);
        tracing::debug!(policy_id = %policy_id, triples = removed, "Removed policy subject");
        self.commit(&mut state, graph, documents, policy_id, "deleted")
    }

    /// Run a SELECT query against the mirror.
    pub fn query(&self, query: &str) -> Result<Vec<String>, PolicyError> {
        let state = self.state.read();
        Ok(sparql::run(query, &state.graph)?)
    }

    pub fn len(&self) -> usize {
        self.state.read().documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn graph_len(&self) -> usize {
        self.state.read().graph.len()
    }

    fn commit(
        &self,
        state: &mut StoreState,
        graph: Graph,
        documents: BTreeMap<String, Value>,
        policy_id: &str,
        action: &str,
    ) -> Result<(), PolicyError> {
        match self.sync.commit(graph, &documents) {
            Ok(graph) => {
                state.documents = documents;
                state.graph = graph;
                tracing::info!(policy_id = %policy_id, "Policy {action}");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(policy_id = %policy_id, error = %e, "Policy commit rejected");
                Err(e)
            }
        }
    }
}
