//! In-memory RDF graph mirror of the stored policies.
//!
//! # Architecture
//!
//! - `jsonld`: ODRL JSON-LD documents → triples
//! - `turtle`: turtle serialization and parsing of the durable graph file
//! - `shapes`: fixed shape set the mirror must conform to after every commit
//! - `sparql`: basic-graph-pattern SELECT queries over the mirror

pub mod jsonld;
pub mod shapes;
pub mod sparql;
pub mod turtle;

use std::collections::{BTreeSet, HashSet};
use std::fmt;

pub use shapes::{ShapeSet, ValidationReport, ValidationResult};

pub const RDF: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#";
pub const RDF_TYPE: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#type";
pub const RDFS: &str = "http://www.w3.org/2000/01/rdf-schema#";
pub const XSD: &str = "http://www.w3.org/2001/XMLSchema#";
pub const ODRL: &str = "http://www.w3.org/ns/odrl/2/";
pub const DCT: &str = "http://purl.org/dc/terms/";
pub const OWL: &str = "http://www.w3.org/2002/07/owl#";

/// Prefixes understood when expanding compact IRIs and emitted in turtle.
pub const PREFIXES: &[(&str, &str)] = &[
    ("odrl", ODRL),
    ("rdf", RDF),
    ("rdfs", RDFS),
    ("xsd", XSD),
    ("dct", DCT),
    ("owl", OWL),
];

/// Expand `prefix:local` against the well-known prefix table.
pub fn expand_prefixed(value: &str) -> Option<String> {
    let (prefix, local) = value.split_once(':')?;
    PREFIXES
        .iter()
        .find(|(p, _)| *p == prefix)
        .map(|(_, ns)| format!("{ns}{local}"))
}

/// An RDF term.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Term {
    Iri(String),
    Blank(String),
    Literal {
        lexical: String,
        datatype: Option<String>,
        language: Option<String>,
    },
}

impl Term {
    pub fn iri(value: impl Into<String>) -> Self {
        Term::Iri(value.into())
    }

    pub fn blank(label: impl Into<String>) -> Self {
        Term::Blank(label.into())
    }

    /// A plain (`xsd:string`) literal.
    pub fn literal(lexical: impl Into<String>) -> Self {
        Term::Literal {
            lexical: lexical.into(),
            datatype: None,
            language: None,
        }
    }

    pub fn typed(lexical: impl Into<String>, datatype: impl Into<String>) -> Self {
        Term::Literal {
            lexical: lexical.into(),
            datatype: Some(datatype.into()),
            language: None,
        }
    }

    pub fn is_iri(&self) -> bool {
        matches!(self, Term::Iri(_))
    }

    pub fn is_blank(&self) -> bool {
        matches!(self, Term::Blank(_))
    }

    pub fn is_literal(&self) -> bool {
        matches!(self, Term::Literal { .. })
    }

    /// Smallest term in the derived ordering.
    fn least() -> Self {
        Term::Iri(String::new())
    }

    pub fn as_iri(&self) -> Option<&str> {
        match self {
            Term::Iri(iri) => Some(iri),
            _ => None,
        }
    }
}

/// N-Triples rendering.
impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::Iri(iri) => write!(f, "<{iri}>"),
            Term::Blank(label) => write!(f, "_:{label}"),
            Term::Literal {
                lexical,
                datatype,
                language,
            } => {
                write!(f, "\"{}\"", escape_literal(lexical))?;
                if let Some(lang) = language {
                    write!(f, "@{lang}")
                } else if let Some(dt) = datatype {
                    write!(f, "^^<{dt}>")
                } else {
                    Ok(())
                }
            }
        }
    }
}

pub(crate) fn escape_literal(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            other => out.push(other),
        }
    }
    out
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Triple {
    pub subject: Term,
    pub predicate: Term,
    pub object: Term,
}

impl Triple {
    pub fn new(subject: Term, predicate: Term, object: Term) -> Self {
        Triple {
            subject,
            predicate,
            object,
        }
    }
}

impl fmt::Display for Triple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {} .", self.subject, self.predicate, self.object)
    }
}

/// A set of triples. Ordered so serialization is deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Graph {
    triples: BTreeSet<Triple>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.triples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.triples.is_empty()
    }

    /// Insert a triple. Returns false if it was already present.
    pub fn insert(&mut self, triple: Triple) -> bool {
        self.triples.insert(triple)
    }

    pub fn contains(&self, triple: &Triple) -> bool {
        self.triples.contains(triple)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Triple> {
        self.triples.iter()
    }

    /// Triples matching a pattern; `None` is a wildcard.
    ///
    /// A bound subject is answered from the ordered set by range, so the
    /// cost is the size of that subject's block, not of the graph.
    pub fn matching<'a>(
        &'a self,
        subject: Option<&Term>,
        predicate: Option<&Term>,
        object: Option<&Term>,
    ) -> impl Iterator<Item = &'a Triple> {
        let block = subject.map(|s| self.subject_block(s, predicate));
        let scan = subject.is_none().then(|| self.triples.iter());
        block
            .into_iter()
            .flatten()
            .chain(scan.into_iter().flatten())
            .filter(move |t| {
                predicate.is_none_or(|p| &t.predicate == p) && object.is_none_or(|o| &t.object == o)
            })
    }

    /// Triples about `subject`, starting at `predicate` when given.
    fn subject_block<'a>(
        &'a self,
        subject: &Term,
        predicate: Option<&Term>,
    ) -> impl Iterator<Item = &'a Triple> + use<'a> {
        let start = Triple::new(
            subject.clone(),
            predicate.cloned().unwrap_or_else(Term::least),
            Term::least(),
        );
        let subject = subject.clone();
        self.triples
            .range(start..)
            .take_while(move |t| t.subject == subject)
    }

    /// Objects of `(subject, predicate, ?)`.
    pub fn objects<'a>(&'a self, subject: &Term, predicate: &Term) -> Vec<&'a Term> {
        self.matching(Some(subject), Some(predicate), None)
            .map(|t| &t.object)
            .collect()
    }

    /// Distinct subjects that have `predicate`.
    pub fn subjects_of(&self, predicate: &Term) -> BTreeSet<&Term> {
        self.matching(None, Some(predicate), None)
            .map(|t| &t.subject)
            .collect()
    }

    /// Distinct non-literal objects of `predicate`.
    pub fn objects_of(&self, predicate: &Term) -> BTreeSet<&Term> {
        self.matching(None, Some(predicate), None)
            .map(|t| &t.object)
            .filter(|o| !o.is_literal())
            .collect()
    }

    /// Remove every triple whose subject is `subject`.
    ///
    /// Blank nodes that were only reachable through the removed triples are
    /// removed with it, so nested rules and constraints do not linger as
    /// orphans. Returns the number of triples removed.
    pub fn remove_subject(&mut self, subject: &Term) -> usize {
        let before = self.triples.len();
        let mut pending = vec![subject.clone()];
        let mut seen = HashSet::new();

        while let Some(node) = pending.pop() {
            if !seen.insert(node.clone()) {
                continue;
            }
            let removed: Vec<Triple> = self.subject_block(&node, None).cloned().collect();
            for triple in removed {
                self.triples.remove(&triple);
                if triple.object.is_blank() && !self.is_referenced(&triple.object) {
                    pending.push(triple.object);
                }
            }
        }

        before - self.triples.len()
    }

    fn is_referenced(&self, node: &Term) -> bool {
        self.triples.iter().any(|t| &t.object == node)
    }
}

impl Extend<Triple> for Graph {
    fn extend<I: IntoIterator<Item = Triple>>(&mut self, iter: I) {
        self.triples.extend(iter);
    }
}

impl FromIterator<Triple> for Graph {
    fn from_iter<I: IntoIterator<Item = Triple>>(iter: I) -> Self {
        Graph {
            triples: iter.into_iter().collect(),
        }
    }
}

/// Errors raised while parsing graph text (turtle files, SPARQL queries).
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("Parse error at line {line}: {message}")]
    Parse { line: usize, message: String },
    #[error("Unsupported query: {0}")]
    UnsupportedQuery(String),
    #[error("Mapping error: {0}")]
    Mapping(String),
}
