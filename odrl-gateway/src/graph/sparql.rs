//! Basic-graph-pattern SELECT queries over the policy mirror.
//!
//! Supported form:
//!
//! ```text
//! PREFIX p: <iri>            (any number; odrl/rdf/rdfs/xsd/dct/owl predeclared)
//! SELECT [DISTINCT] ?a ?b | *
//! WHERE { s p o . s p o }
//! LIMIT n                    (optional)
//! ```
//!
//! Anything else (FILTER, OPTIONAL, ORDER BY, updates, ASK/CONSTRUCT) is
//! rejected with `GraphError::UnsupportedQuery`.

use std::collections::BTreeMap;

use super::turtle::{Token, TokenStream, tokenize};
use super::{Graph, GraphError, Term};

#[derive(Debug, Clone, PartialEq)]
enum PatternTerm {
    Var(String),
    Const(Term),
}

#[derive(Debug, Clone, PartialEq)]
struct TriplePattern {
    subject: PatternTerm,
    predicate: PatternTerm,
    object: PatternTerm,
}

#[derive(Debug, Clone, PartialEq)]
enum Projection {
    All,
    Vars(Vec<String>),
}

/// A parsed SELECT query.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectQuery {
    projection: Projection,
    distinct: bool,
    patterns: Vec<TriplePattern>,
    limit: Option<usize>,
}

type Solution = BTreeMap<String, Term>;

/// Parse a SELECT query.
pub fn parse(query: &str) -> Result<SelectQuery, GraphError> {
    let mut stream = TokenStream::new(tokenize(query)?).with_default_prefixes();

    while stream.eat_word("prefix") {
        stream.prefix_declaration()?;
    }

    if !stream.eat_word("select") {
        let form = match stream.peek() {
            Some(Token::Word(w)) => w.to_uppercase(),
            _ => "query".to_string(),
        };
        return Err(GraphError::UnsupportedQuery(format!(
            "{form} is not supported, only SELECT"
        )));
    }
    let distinct = stream.eat_word("distinct") || stream.eat_word("reduced");

    let projection = if stream.eat(&Token::Star) {
        Projection::All
    } else {
        let mut vars = Vec::new();
        while let Some(Token::Var(name)) = stream.peek().cloned() {
            stream.advance();
            vars.push(name);
        }
        if vars.is_empty() {
            return Err(stream.error("expected '*' or variables after SELECT"));
        }
        Projection::Vars(vars)
    };

    stream.eat_word("where");
    stream.expect(&Token::LBrace)?;
    let mut patterns = Vec::new();
    while !stream.eat(&Token::RBrace) {
        if stream.is_done() {
            return Err(stream.error("unterminated group pattern"));
        }
        if let Some(Token::Word(w)) = stream.peek() {
            if !w.eq_ignore_ascii_case("a") {
                return Err(GraphError::UnsupportedQuery(format!(
                    "{} is not supported in WHERE",
                    w.to_uppercase()
                )));
            }
        }
        let subject = pattern_term(&mut stream, false)?;
        let predicate = pattern_term(&mut stream, true)?;
        let object = pattern_term(&mut stream, false)?;
        patterns.push(TriplePattern {
            subject,
            predicate,
            object,
        });
        stream.eat(&Token::Dot);
    }

    let mut limit = None;
    if stream.eat_word("limit") {
        match stream.advance() {
            Some(Token::Number(n)) => {
                limit = Some(n.parse().map_err(|_| stream.error("invalid LIMIT"))?);
            }
            _ => return Err(stream.error("expected number after LIMIT")),
        }
    }

    if let Some(token) = stream.peek() {
        return Err(GraphError::UnsupportedQuery(format!(
            "unexpected {token:?} after WHERE clause"
        )));
    }

    Ok(SelectQuery {
        projection,
        distinct,
        patterns,
        limit,
    })
}

fn pattern_term(stream: &mut TokenStream, predicate: bool) -> Result<PatternTerm, GraphError> {
    if let Some(Token::Var(name)) = stream.peek().cloned() {
        stream.advance();
        return Ok(PatternTerm::Var(name));
    }
    let term = if predicate { stream.verb()? } else { stream.term()? };
    Ok(PatternTerm::Const(term))
}

impl SelectQuery {
    /// Projected variable names, in order.
    pub fn variables(&self) -> Vec<String> {
        match &self.projection {
            Projection::Vars(vars) => vars.clone(),
            Projection::All => {
                let mut vars: Vec<String> = Vec::new();
                for p in &self.patterns {
                    for term in [&p.subject, &p.predicate, &p.object] {
                        if let PatternTerm::Var(name) = term {
                            if !vars.contains(name) {
                                vars.push(name.clone());
                            }
                        }
                    }
                }
                vars
            }
        }
    }

    /// Evaluate against a graph. Each row holds the projected terms in order.
    pub fn execute(&self, graph: &Graph) -> Vec<Vec<Term>> {
        let mut solutions: Vec<Solution> = vec![Solution::new()];
        for pattern in &self.patterns {
            solutions = solutions
                .iter()
                .flat_map(|solution| extend(graph, pattern, solution))
                .collect();
            if solutions.is_empty() {
                break;
            }
        }

        let vars = self.variables();
        let mut rows: Vec<Vec<Term>> = Vec::new();
        for solution in solutions {
            // Projected variables absent from the pattern stay unbound; skip those rows.
            let row: Option<Vec<Term>> = vars.iter().map(|v| solution.get(v).cloned()).collect();
            let Some(row) = row else { continue };
            if self.distinct && rows.contains(&row) {
                continue;
            }
            rows.push(row);
            if self.limit.is_some_and(|limit| rows.len() >= limit) {
                break;
            }
        }
        rows
    }
}

fn bound<'a>(term: &'a PatternTerm, solution: &'a Solution) -> Option<&'a Term> {
    match term {
        PatternTerm::Const(t) => Some(t),
        PatternTerm::Var(name) => solution.get(name),
    }
}

fn extend(graph: &Graph, pattern: &TriplePattern, solution: &Solution) -> Vec<Solution> {
    let s = bound(&pattern.subject, solution);
    let p = bound(&pattern.predicate, solution);
    let o = bound(&pattern.object, solution);

    graph
        .matching(s, p, o)
        .filter_map(|triple| {
            let mut next = solution.clone();
            for (term, value) in [
                (&pattern.subject, &triple.subject),
                (&pattern.predicate, &triple.predicate),
                (&pattern.object, &triple.object),
            ] {
                if let PatternTerm::Var(name) = term {
                    match next.get(name) {
                        Some(existing) if existing != value => return None,
                        Some(_) => {}
                        None => {
                            next.insert(name.clone(), value.clone());
                        }
                    }
                }
            }
            Some(next)
        })
        .collect()
}

/// Parse and run a query, rendering each row as `(term, term, ...)`.
pub fn run(query: &str, graph: &Graph) -> Result<Vec<String>, GraphError> {
    let parsed = parse(query)?;
    Ok(parsed
        .execute(graph)
        .into_iter()
        .map(|row| {
            let terms: Vec<String> = row.iter().map(Term::to_string).collect();
            format!("({})", terms.join(", "))
        })
        .collect())
}
