//! ODRL policy gateway core.
//!
//! Stores policies, keeps a shape-validated RDF mirror of them, and runs
//! evaluation requests against an external decision engine.
//!
//! # Architecture
//!
//! - `types`: policy envelope, id derivation, evaluation record
//! - `error`: error taxonomy shared by every operation
//! - `sync`: graph synchronizer: merge, validate, persist
//! - `store`: policy document store behind one lock with the graph
//! - `interpolation`: closed evaluator registry and request context
//! - `decision`: decision engine contract and HTTP client
//! - `fetch`: retrieval of the governed resource on permit
//! - `audit`: append-only evaluation log
//! - `tokens`: bearer tokens gating status mutation
//! - `engine`: evaluation orchestration, composes the above
//! - `api`: HTTP endpoints

pub mod api;
pub mod audit;
pub mod decision;
pub mod engine;
pub mod error;
pub mod fetch;
pub mod interpolation;
pub mod store;
pub mod sync;
pub mod tokens;
pub mod types;

pub use audit::AuditLog;
pub use decision::{Decision, DecisionEngine, EngineError, HttpDecisionEngine};
pub use engine::{Evaluation, Outcome, PolicyEngine};
pub use error::PolicyError;
pub use fetch::{FetchedResource, HttpFetcher, ResourceFetcher};
pub use interpolation::{EvaluatorKind, ExternalState, InterpolationContext, InterpolationResolver};
pub use store::PolicyStore;
pub use sync::GraphSynchronizer;
pub use tokens::TokenRegistry;
pub use types::{EvaluationRecord, POLICY_MEDIA_TYPE};
