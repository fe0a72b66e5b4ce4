//! ODRL JSON-LD → triples.
//!
//! Expands policy documents against a built-in copy of the ODRL 2.2 context
//! (no remote context fetch). Nested rules and constraints without an
//! explicit id become blank nodes whose labels are derived from the policy
//! id and the JSON path, so mapping the same document twice yields the same
//! triples and a re-merge is a no-op.

use serde_json::{Map, Value};
use url::Url;

use super::{GraphError, ODRL, RDF_TYPE, Term, Triple, XSD, expand_prefixed};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TermKind {
    /// Values are nested nodes (or node references).
    Node,
    /// String values are ODRL vocabulary terms.
    Vocab,
    /// String values are IRIs, relative ones resolved against the policy URI.
    Id,
    /// String values are plain literals.
    Value,
}

fn odrl_term(key: &str) -> Option<TermKind> {
    match key {
        "permission" | "prohibition" | "obligation" | "duty" | "constraint" | "refinement"
        | "consequence" | "remedy" => Some(TermKind::Node),
        "action" | "operator" | "leftOperand" | "unit" | "conflict" => Some(TermKind::Vocab),
        "target" | "assigner" | "assignee" | "profile" | "inheritFrom"
        | "rightOperandReference" => Some(TermKind::Id),
        "rightOperand" => Some(TermKind::Value),
        _ => None,
    }
}

/// Map one policy document to triples rooted at `canonical_uri`.
pub fn policy_triples(
    policy_id: &str,
    canonical_uri: &str,
    document: &Value,
) -> Result<Vec<Triple>, GraphError> {
    let object = document
        .as_object()
        .ok_or_else(|| GraphError::Mapping("policy document must be a JSON object".into()))?;

    let mut mapper = Mapper {
        base: Url::parse(canonical_uri).ok(),
        label_root: format!("p{}", hex::encode(policy_id)),
        triples: Vec::new(),
    };
    mapper.node(&Term::iri(canonical_uri), object, "")?;
    Ok(mapper.triples)
}

struct Mapper {
    base: Option<Url>,
    label_root: String,
    triples: Vec<Triple>,
}

impl Mapper {
    fn node(&mut self, subject: &Term, object: &Map<String, Value>, path: &str) -> Result<(), GraphError> {
        for (key, value) in object {
            match key.as_str() {
                "@context" | "@id" | "uid" => {}
                "@type" => {
                    for item in as_items(value) {
                        if let Some(class) = item.as_str() {
                            let class = checked_iri(self.vocab(class))?;
                            self.push(subject, Term::iri(RDF_TYPE), class);
                        }
                    }
                }
                _ => {
                    let (predicate, kind) = match odrl_term(key) {
                        Some(kind) => (format!("{ODRL}{key}"), kind),
                        None => match key_iri(key) {
                            Some(iri) => {
                                check_iri(&iri)?;
                                (iri, TermKind::Value)
                            }
                            // Not in the context: JSON-LD drops it.
                            None => continue,
                        },
                    };
                    for (index, item) in as_items(value).enumerate() {
                        let child_path = format!("{path}_{}{index}", sanitize(key));
                        if let Some(term) = self.object(kind, item, &child_path)? {
                            self.push(subject, Term::iri(predicate.clone()), term);
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn object(&mut self, kind: TermKind, value: &Value, path: &str) -> Result<Option<Term>, GraphError> {
        let term = match value {
            Value::Null => return Ok(None),
            Value::Bool(b) => Term::typed(b.to_string(), format!("{XSD}boolean")),
            Value::Number(n) => number_literal(n),
            Value::String(s) => match kind {
                TermKind::Vocab => checked_iri(self.vocab(s))?,
                TermKind::Id | TermKind::Node => checked_iri(self.resolve(s))?,
                TermKind::Value => Term::literal(s.clone()),
            },
            Value::Object(map) => {
                if let Some(raw) = map.get("@value") {
                    return Ok(Some(value_object(raw, map)?));
                }
                let subject = match map.get("@id").or_else(|| map.get("uid")).and_then(Value::as_str) {
                    Some(id) => checked_iri(self.resolve(id))?,
                    None => Term::blank(format!("{}{path}", self.label_root)),
                };
                self.node(&subject, map, path)?;
                subject
            }
            Value::Array(_) => {
                return Err(GraphError::Mapping(format!(
                    "nested arrays are not supported (at {})",
                    path.trim_start_matches('_')
                )));
            }
        };
        Ok(Some(term))
    }

    fn push(&mut self, subject: &Term, predicate: Term, object: Term) {
        self.triples.push(Triple::new(subject.clone(), predicate, object));
    }

    fn vocab(&self, value: &str) -> String {
        if value.contains(':') {
            absolute(value)
        } else {
            format!("{ODRL}{value}")
        }
    }

    fn resolve(&self, value: &str) -> String {
        if value.contains(':') {
            return absolute(value);
        }
        match &self.base {
            Some(base) => base
                .join(value)
                .map(|u| u.to_string())
                .unwrap_or_else(|_| value.to_string()),
            None => value.to_string(),
        }
    }
}

fn as_items(value: &Value) -> Box<dyn Iterator<Item = &Value> + '_> {
    match value {
        Value::Array(items) => Box::new(items.iter()),
        other => Box::new(std::iter::once(other)),
    }
}

/// Characters that cannot appear inside a turtle `<...>` IRI.
fn is_iri_excluded(c: char) -> bool {
    c.is_whitespace()
        || c.is_control()
        || matches!(c, '<' | '>' | '"' | '{' | '}' | '|' | '^' | '`' | '\\')
}

fn check_iri(value: &str) -> Result<(), GraphError> {
    if value.chars().any(is_iri_excluded) {
        return Err(GraphError::Mapping(format!("'{value}' is not a valid IRI")));
    }
    Ok(())
}

fn checked_iri(value: String) -> Result<Term, GraphError> {
    check_iri(&value)?;
    Ok(Term::Iri(value))
}

/// `[A-Za-z]+(-[A-Za-z0-9]+)*`
fn is_language_tag(tag: &str) -> bool {
    let mut subtags = tag.split('-');
    let primary = subtags.next().unwrap_or_default();
    !primary.is_empty()
        && primary.chars().all(|c| c.is_ascii_alphabetic())
        && subtags.all(|s| !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric()))
}

fn absolute(value: &str) -> String {
    expand_prefixed(value).unwrap_or_else(|| value.to_string())
}

/// Keys outside the ODRL context only map if they are already IRIs.
fn key_iri(key: &str) -> Option<String> {
    if key.starts_with('@') || !key.contains(':') {
        return None;
    }
    Some(absolute(key))
}

fn number_literal(n: &serde_json::Number) -> Term {
    if n.is_i64() || n.is_u64() {
        Term::typed(n.to_string(), format!("{XSD}integer"))
    } else {
        Term::typed(n.to_string(), format!("{XSD}double"))
    }
}

fn value_object(raw: &Value, map: &Map<String, Value>) -> Result<Term, GraphError> {
    let datatype = map.get("@type").and_then(Value::as_str).map(absolute);
    if let Some(dt) = &datatype {
        check_iri(dt)?;
    }
    let language = map.get("@language").and_then(Value::as_str).map(str::to_string);
    if let Some(tag) = &language {
        if !is_language_tag(tag) {
            return Err(GraphError::Mapping(format!("'{tag}' is not a valid language tag")));
        }
    }

    let term = match raw {
        Value::String(s) => Term::Literal {
            lexical: s.clone(),
            datatype: if language.is_some() { None } else { datatype },
            language,
        },
        Value::Number(n) => match datatype {
            Some(dt) => Term::typed(n.to_string(), dt),
            None => number_literal(n),
        },
        Value::Bool(b) => Term::typed(
            b.to_string(),
            datatype.unwrap_or_else(|| format!("{XSD}boolean")),
        ),
        _ => return Err(GraphError::Mapping("@value must be a string, number or boolean".into())),
    };
    Ok(term)
}

fn sanitize(key: &str) -> String {
    key.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}
