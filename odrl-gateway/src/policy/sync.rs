//! Graph synchronizer: keeps the RDF mirror in step with the document store.
//!
//! A commit merges every document's triples into a staged graph, validates
//! the result against the ODRL shape set, and only then writes the graph file
//! and the documents file. Both files are replaced by rename, so a rejected
//! commit leaves the previous versions on disk.
//!
//! The documents file is renamed first. A failure between the two renames
//! leaves new documents beside the old graph; `reconcile` re-derives every
//! stored policy's triples on the next open, so the mirror catches up.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tempfile::NamedTempFile;

use super::error::PolicyError;
use super::types::canonical_uri;
use crate::graph::{Graph, ShapeSet, Term, jsonld, turtle};

pub struct GraphSynchronizer {
    documents_path: PathBuf,
    graph_path: PathBuf,
    base_uri: String,
    shapes: ShapeSet,
}

impl GraphSynchronizer {
    pub fn new(
        documents_path: impl Into<PathBuf>,
        graph_path: impl Into<PathBuf>,
        base_uri: impl Into<String>,
    ) -> Self {
        GraphSynchronizer {
            documents_path: documents_path.into(),
            graph_path: graph_path.into(),
            base_uri: base_uri.into(),
            shapes: ShapeSet::odrl(),
        }
    }

    /// Read the documents file. A missing file is an empty store.
    pub fn load_documents(&self) -> Result<BTreeMap<String, Value>, PolicyError> {
        if !self.documents_path.exists() {
            return Ok(BTreeMap::new());
        }
        let text = std::fs::read_to_string(&self.documents_path)?;
        if text.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        Ok(serde_json::from_str(&text)?)
    }

    /// Read the turtle graph file. A missing file is an empty graph.
    pub fn load_graph(&self) -> Result<Graph, PolicyError> {
        if !self.graph_path.exists() {
            return Ok(Graph::new());
        }
        let text = std::fs::read_to_string(&self.graph_path)?;
        turtle::parse(&text).map_err(|e| {
            PolicyError::Storage(format!("{}: {e}", self.graph_path.display()))
        })
    }

    pub fn canonical_uri(&self, policy_id: &str) -> String {
        canonical_uri(&self.base_uri, policy_id)
    }

    /// Drop every triple about a policy's canonical URI from `graph`.
    pub fn remove_subject(&self, graph: &mut Graph, policy_id: &str) -> usize {
        graph.remove_subject(&Term::iri(self.canonical_uri(policy_id)))
    }

    /// Replace each stored policy's triples in `graph` with a fresh mapping
    /// of its document.
    pub fn reconcile(
        &self,
        mut graph: Graph,
        documents: &BTreeMap<String, Value>,
    ) -> Result<Graph, PolicyError> {
        for (policy_id, document) in documents {
            self.remove_subject(&mut graph, policy_id);
            let uri = self.canonical_uri(policy_id);
            graph.extend(jsonld::policy_triples(policy_id, &uri, document)?);
        }
        Ok(graph)
    }

    /// Merge `documents` into `graph`, validate, and persist both.
    ///
    /// Returns the merged graph. On `SchemaViolation` (or any write failure)
    /// nothing on disk has changed and the caller keeps its previous state.
    pub fn commit(
        &self,
        mut graph: Graph,
        documents: &BTreeMap<String, Value>,
    ) -> Result<Graph, PolicyError> {
        for (policy_id, document) in documents {
            let uri = self.canonical_uri(policy_id);
            graph.extend(jsonld::policy_triples(policy_id, &uri, document)?);
        }

        let report = self.shapes.validate(&graph);
        if !report.conforms {
            return Err(PolicyError::SchemaViolation(report));
        }

        let graph_file = stage(&self.graph_path, turtle::serialize(&graph).as_bytes())?;
        let documents_file = stage(
            &self.documents_path,
            serde_json::to_string_pretty(documents)?.as_bytes(),
        )?;
        persist(documents_file, &self.documents_path)?;
        persist(graph_file, &self.graph_path)?;

        tracing::debug!(
            triples = graph.len(),
            policies = documents.len(),
            "Graph mirror committed"
        );
        Ok(graph)
    }
}

/// Write `contents` to a temp file beside `path`.
fn stage(path: &Path, contents: &[u8]) -> Result<NamedTempFile, PolicyError> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let mut file = NamedTempFile::new_in(dir)?;
    file.write_all(contents)?;
    file.as_file().sync_all()?;
    Ok(file)
}

fn persist(file: NamedTempFile, path: &Path) -> Result<(), PolicyError> {
    file.persist(path)
        .map_err(|e| PolicyError::Storage(format!("{}: {}", path.display(), e.error)))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::sparql;
    use serde_json::json;

    fn sync_in(dir: &Path) -> GraphSynchronizer {
        GraphSynchronizer::new(
            dir.join("policies.json"),
            dir.join("output.ttl"),
            "http://example.com/policy",
        )
    }

    #[test]
    fn test_commit_writes_both_files() {
        let dir = tempfile::tempdir().unwrap();
        let sync = sync_in(dir.path());
        let mut docs = BTreeMap::new();
        docs.insert(
            "2".to_string(),
            json!({"uid": "policy:2", "permission": [{"target": "https://x/doc", "action": "use"}]}),
        );

        let graph = sync.commit(Graph::new(), &docs).unwrap();
        assert_eq!(graph.len(), 3);
        assert_eq!(sync.load_documents().unwrap(), docs);
        assert_eq!(sync.load_graph().unwrap(), graph);
    }

    #[test]
    fn test_schema_violation_leaves_files_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let sync = sync_in(dir.path());
        let mut docs = BTreeMap::new();
        docs.insert("1".to_string(), json!({"uid": "policy:1"}));
        sync.commit(Graph::new(), &docs).unwrap();
        let before = std::fs::read_to_string(dir.path().join("output.ttl")).unwrap();

        docs.insert(
            "3".to_string(),
            json!({"uid": "policy:3", "permission": [{"target": "https://x/doc"}]}),
        );
        match sync.commit(sync.load_graph().unwrap(), &docs) {
            Err(PolicyError::SchemaViolation(report)) => {
                assert!(!report.conforms);
                assert_eq!(report.results[0].shape, "RuleShape");
            }
            other => panic!("Expected SchemaViolation, got {:?}", other),
        }
        assert_eq!(
            std::fs::read_to_string(dir.path().join("output.ttl")).unwrap(),
            before
        );
        assert_eq!(sync.load_documents().unwrap().len(), 1);
    }

    #[test]
    fn test_failed_graph_write_is_reconciled_from_documents() {
        let dir = tempfile::tempdir().unwrap();
        let sync = sync_in(dir.path());
        let mut docs = BTreeMap::new();
        docs.insert("1".to_string(), json!({"uid": "policy:1", "permission": [{"action": "use"}]}));
        let committed = sync.commit(Graph::new(), &docs).unwrap();

        // A directory in the graph file's place makes the second rename fail.
        std::fs::remove_file(dir.path().join("output.ttl")).unwrap();
        std::fs::create_dir(dir.path().join("output.ttl")).unwrap();
        docs.insert("1".to_string(), json!({"uid": "policy:1", "permission": [{"action": "read"}]}));
        assert!(matches!(
            sync.commit(committed.clone(), &docs),
            Err(PolicyError::Storage(_))
        ));
        assert_eq!(sync.load_documents().unwrap(), docs);

        let healed = sync.reconcile(committed, &sync.load_documents().unwrap()).unwrap();
        let rows = sparql::run("SELECT ?a WHERE { ?r odrl:action ?a }", &healed).unwrap();
        assert_eq!(rows, vec!["(<http://www.w3.org/ns/odrl/2/read>)".to_string()]);
    }

    #[test]
    fn test_missing_files_load_empty() {
        let dir = tempfile::tempdir().unwrap();
        let sync = sync_in(dir.path());
        assert!(sync.load_documents().unwrap().is_empty());
        assert!(sync.load_graph().unwrap().is_empty());
    }

    #[test]
    fn test_remove_subject_uses_canonical_uri() {
        let dir = tempfile::tempdir().unwrap();
        let sync = sync_in(dir.path());
        let mut docs = BTreeMap::new();
        docs.insert(
            "2".to_string(),
            json!({"uid": "policy:2", "@type": "Set", "permission": [{"action": "use"}]}),
        );
        let mut graph = sync.commit(Graph::new(), &docs).unwrap();
        assert_eq!(sync.remove_subject(&mut graph, "2"), 3);
        assert!(graph.is_empty());
    }
}
