//! Fixed shape set the graph mirror must conform to.
//!
//! A small SHACL subset: node shapes select focus nodes by class or by
//! appearing as subject/object of a predicate, and property shapes check
//! cardinality, node kind and allowed values along one predicate path.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::{Graph, ODRL, RDF_TYPE, Term};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// Instances of a class (`rdf:type`).
    Class(String),
    /// Every subject of a predicate.
    SubjectsOf(String),
    /// Every non-literal object of a predicate.
    ObjectsOf(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Iri,
    Literal,
    BlankNodeOrIri,
}

impl NodeKind {
    fn accepts(self, term: &Term) -> bool {
        match self {
            NodeKind::Iri => term.is_iri(),
            NodeKind::Literal => term.is_literal(),
            NodeKind::BlankNodeOrIri => !term.is_literal(),
        }
    }

    fn label(self) -> &'static str {
        match self {
            NodeKind::Iri => "sh:IRI",
            NodeKind::Literal => "sh:Literal",
            NodeKind::BlankNodeOrIri => "sh:BlankNodeOrIRI",
        }
    }
}

#[derive(Debug, Clone)]
pub struct PropertyShape {
    path: String,
    min_count: Option<usize>,
    max_count: Option<usize>,
    node_kind: Option<NodeKind>,
    allowed: Option<Vec<String>>,
}

impl PropertyShape {
    pub fn new(path: impl Into<String>) -> Self {
        PropertyShape {
            path: path.into(),
            min_count: None,
            max_count: None,
            node_kind: None,
            allowed: None,
        }
    }

    pub fn min_count(mut self, n: usize) -> Self {
        self.min_count = Some(n);
        self
    }

    pub fn max_count(mut self, n: usize) -> Self {
        self.max_count = Some(n);
        self
    }

    pub fn node_kind(mut self, kind: NodeKind) -> Self {
        self.node_kind = Some(kind);
        self
    }

    /// Restrict values to the given IRIs (`sh:in`).
    pub fn one_of<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed = Some(values.into_iter().map(Into::into).collect());
        self
    }
}

#[derive(Debug, Clone)]
pub struct NodeShape {
    name: String,
    targets: Vec<Target>,
    properties: Vec<PropertyShape>,
    /// Each group needs at least one of its paths present (`sh:or` of minCount 1).
    any_of: Vec<Vec<String>>,
}

impl NodeShape {
    pub fn new(name: impl Into<String>) -> Self {
        NodeShape {
            name: name.into(),
            targets: Vec::new(),
            properties: Vec::new(),
            any_of: Vec::new(),
        }
    }

    pub fn target(mut self, target: Target) -> Self {
        self.targets.push(target);
        self
    }

    pub fn property(mut self, property: PropertyShape) -> Self {
        self.properties.push(property);
        self
    }

    pub fn any_of<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.any_of.push(paths.into_iter().map(Into::into).collect());
        self
    }

    fn focus_nodes<'a>(&self, graph: &'a Graph) -> BTreeSet<&'a Term> {
        let mut nodes = BTreeSet::new();
        for target in &self.targets {
            let found: Vec<&Term> = match target {
                Target::Class(class) => {
                    let class = Term::iri(class.clone());
                    graph
                        .matching(None, Some(&Term::iri(RDF_TYPE)), Some(&class))
                        .map(|t| &t.subject)
                        .collect()
                }
                Target::SubjectsOf(p) => graph.subjects_of(&Term::iri(p.clone())).into_iter().collect(),
                Target::ObjectsOf(p) => graph.objects_of(&Term::iri(p.clone())).into_iter().collect(),
            };
            nodes.extend(found);
        }
        nodes
    }
}

/// Outcome of validating a graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub conforms: bool,
    pub results: Vec<ValidationResult>,
}

/// One violation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub focus_node: String,
    pub shape: String,
    pub path: Option<String>,
    pub constraint: String,
    pub message: String,
}

impl ValidationReport {
    /// Human-readable one-line summary of the first few violations.
    pub fn summary(&self) -> String {
        if self.conforms {
            return "conforms".to_string();
        }
        let mut parts: Vec<String> = self
            .results
            .iter()
            .take(3)
            .map(|r| format!("{} ({}): {}", r.focus_node, r.shape, r.message))
            .collect();
        if self.results.len() > 3 {
            parts.push(format!("and {} more", self.results.len() - 3));
        }
        parts.join("; ")
    }
}

#[derive(Debug, Clone)]
pub struct ShapeSet {
    shapes: Vec<NodeShape>,
}

const POLICY_CLASSES: &[&str] = &[
    "Policy", "Set", "Offer", "Agreement", "Request", "Ticket", "Assertion", "Privacy",
];

const OPERATORS: &[&str] = &[
    "eq", "gt", "gteq", "lt", "lteq", "neq", "isA", "hasPart", "isPartOf", "isAllOf",
    "isAnyOf", "isNoneOf",
];

fn odrl(local: &str) -> String {
    format!("{ODRL}{local}")
}

impl ShapeSet {
    pub fn new(shapes: Vec<NodeShape>) -> Self {
        ShapeSet { shapes }
    }

    /// The ODRL structural rules enforced on every commit.
    pub fn odrl() -> Self {
        let mut policy = NodeShape::new("PolicyShape")
            .property(
                PropertyShape::new(odrl("conflict"))
                    .max_count(1)
                    .node_kind(NodeKind::Iri),
            )
            .property(PropertyShape::new(odrl("profile")).node_kind(NodeKind::Iri));
        for class in POLICY_CLASSES {
            policy = policy.target(Target::Class(odrl(class)));
        }
        for rule in ["permission", "prohibition", "obligation"] {
            policy = policy
                .target(Target::SubjectsOf(odrl(rule)))
                .property(PropertyShape::new(odrl(rule)).node_kind(NodeKind::BlankNodeOrIri));
        }

        let mut rule = NodeShape::new("RuleShape")
            .property(PropertyShape::new(odrl("action")).min_count(1))
            .property(PropertyShape::new(odrl("constraint")).node_kind(NodeKind::BlankNodeOrIri));
        for path in ["permission", "prohibition", "obligation", "duty"] {
            rule = rule.target(Target::ObjectsOf(odrl(path)));
        }
        for party in ["target", "assigner", "assignee"] {
            rule = rule.property(PropertyShape::new(odrl(party)).node_kind(NodeKind::Iri));
        }

        let constraint = NodeShape::new("ConstraintShape")
            .target(Target::ObjectsOf(odrl("constraint")))
            .target(Target::ObjectsOf(odrl("refinement")))
            .property(
                PropertyShape::new(odrl("leftOperand"))
                    .min_count(1)
                    .max_count(1)
                    .node_kind(NodeKind::Iri),
            )
            .property(
                PropertyShape::new(odrl("operator"))
                    .min_count(1)
                    .max_count(1)
                    .node_kind(NodeKind::Iri)
                    .one_of(OPERATORS.iter().map(|op| odrl(op))),
            )
            .any_of([odrl("rightOperand"), odrl("rightOperandReference")]);

        ShapeSet::new(vec![policy, rule, constraint])
    }

    pub fn validate(&self, graph: &Graph) -> ValidationReport {
        let mut results = Vec::new();
        for shape in &self.shapes {
            for focus in shape.focus_nodes(graph) {
                check_node(shape, focus, graph, &mut results);
            }
        }
        ValidationReport {
            conforms: results.is_empty(),
            results,
        }
    }
}

fn check_node(shape: &NodeShape, focus: &Term, graph: &Graph, results: &mut Vec<ValidationResult>) {
    let mut violation = |path: Option<&str>, constraint: &str, message: String| {
        results.push(ValidationResult {
            focus_node: focus.to_string(),
            shape: shape.name.clone(),
            path: path.map(str::to_string),
            constraint: constraint.to_string(),
            message,
        });
    };

    for property in &shape.properties {
        let predicate = Term::iri(property.path.clone());
        let values = graph.objects(focus, &predicate);
        let path = Some(property.path.as_str());

        if let Some(min) = property.min_count {
            if values.len() < min {
                violation(
                    path,
                    "sh:MinCountConstraintComponent",
                    format!("Less than {min} values on {}", property.path),
                );
            }
        }
        if let Some(max) = property.max_count {
            if values.len() > max {
                violation(
                    path,
                    "sh:MaxCountConstraintComponent",
                    format!("More than {max} values on {}", property.path),
                );
            }
        }
        for value in &values {
            if let Some(kind) = property.node_kind {
                if !kind.accepts(value) {
                    violation(
                        path,
                        "sh:NodeKindConstraintComponent",
                        format!("Value {value} is not of node kind {}", kind.label()),
                    );
                }
            }
            if let Some(allowed) = &property.allowed {
                let ok = value.as_iri().is_some_and(|iri| allowed.iter().any(|a| a == iri));
                if !ok {
                    violation(
                        path,
                        "sh:InConstraintComponent",
                        format!("Value {value} is not in the allowed list"),
                    );
                }
            }
        }
    }

    for group in &shape.any_of {
        let present = group
            .iter()
            .any(|p| !graph.objects(focus, &Term::iri(p.clone())).is_empty());
        if !present {
            violation(
                None,
                "sh:OrConstraintComponent",
                format!("Requires at least one of {}", group.join(", ")),
            );
        }
    }
}
