//! Turtle serialization and parsing for the durable graph file.
//!
//! The writer emits `@prefix` declarations followed by one block per
//! subject. The reader accepts that output plus the common turtle subset
//! (`PREFIX`/`@prefix`, `;` and `,` lists, typed and language-tagged
//! literals, bare numbers and booleans, `a`). Collections and blank-node
//! property lists (`[ ... ]`) are not supported.

use std::collections::HashMap;
use std::fmt::Write;

use super::{Graph, GraphError, PREFIXES, RDF_TYPE, Term, Triple, XSD, escape_literal};

/// Render the graph as turtle.
pub fn serialize(graph: &Graph) -> String {
    let mut out = String::new();
    for (prefix, ns) in PREFIXES {
        let _ = writeln!(out, "@prefix {prefix}: <{ns}> .");
    }

    let mut current: Option<&Term> = None;
    for triple in graph.iter() {
        if current == Some(&triple.subject) {
            out.push_str(" ;\n    ");
        } else {
            if current.is_some() {
                out.push_str(" .\n");
            }
            out.push('\n');
            out.push_str(&write_term(&triple.subject));
            out.push(' ');
            current = Some(&triple.subject);
        }
        out.push_str(&write_predicate(&triple.predicate));
        out.push(' ');
        out.push_str(&write_term(&triple.object));
    }
    if current.is_some() {
        out.push_str(" .\n");
    }
    out
}

fn write_predicate(term: &Term) -> String {
    match term {
        Term::Iri(iri) if iri == RDF_TYPE => "a".to_string(),
        other => write_term(other),
    }
}

fn write_term(term: &Term) -> String {
    match term {
        Term::Iri(iri) => compact(iri).unwrap_or_else(|| format!("<{iri}>")),
        Term::Blank(label) => format!("_:{label}"),
        Term::Literal {
            lexical,
            datatype,
            language,
        } => {
            let mut s = format!("\"{}\"", escape_literal(lexical));
            if let Some(lang) = language {
                s.push('@');
                s.push_str(lang);
            } else if let Some(dt) = datatype {
                s.push_str("^^");
                s.push_str(&compact(dt).unwrap_or_else(|| format!("<{dt}>")));
            }
            s
        }
    }
}

fn compact(iri: &str) -> Option<String> {
    PREFIXES.iter().find_map(|(prefix, ns)| {
        let local = iri.strip_prefix(ns)?;
        let mut chars = local.chars();
        let first = chars.next()?;
        let simple = (first.is_ascii_alphabetic() || first == '_')
            && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        simple.then(|| format!("{prefix}:{local}"))
    })
}

/// Parse turtle text into a graph.
pub fn parse(input: &str) -> Result<Graph, GraphError> {
    let mut stream = TokenStream::new(tokenize(input)?);
    let mut graph = Graph::new();

    while let Some(token) = stream.peek().cloned() {
        match token {
            Token::Directive(name) if name == "prefix" => {
                stream.advance();
                stream.prefix_declaration()?;
                stream.expect(&Token::Dot)?;
            }
            Token::Directive(name) if name == "base" => {
                stream.advance();
                stream.iri()?;
                stream.expect(&Token::Dot)?;
            }
            Token::Word(word) if word.eq_ignore_ascii_case("prefix") => {
                stream.advance();
                stream.prefix_declaration()?;
            }
            Token::Word(word) if word.eq_ignore_ascii_case("base") => {
                stream.advance();
                stream.iri()?;
            }
            _ => {
                triples_statement(&mut stream, &mut graph)?;
            }
        }
    }
    Ok(graph)
}

fn triples_statement(stream: &mut TokenStream, graph: &mut Graph) -> Result<(), GraphError> {
    let subject = stream.term()?;
    if subject.is_literal() {
        return Err(stream.error("literal in subject position"));
    }
    loop {
        let predicate = stream.verb()?;
        loop {
            let object = stream.term()?;
            graph.insert(Triple::new(subject.clone(), predicate.clone(), object));
            if !stream.eat(&Token::Comma) {
                break;
            }
        }
        if !stream.eat(&Token::Semicolon) {
            break;
        }
        // Trailing `;` before the final `.`
        if stream.peek() == Some(&Token::Dot) {
            break;
        }
    }
    stream.expect(&Token::Dot)
}

// ─── Lexer ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Token {
    Iri(String),
    PrefixedName { prefix: String, local: String },
    Blank(String),
    Literal(String),
    LangTag(String),
    Directive(String),
    DataType,
    Var(String),
    Number(String),
    Word(String),
    Dot,
    Semicolon,
    Comma,
    LBrace,
    RBrace,
    LParen,
    RParen,
    Star,
}

pub(crate) fn tokenize(input: &str) -> Result<Vec<(Token, usize)>, GraphError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut line = 1;
    let mut i = 0;

    let err = |line: usize, message: String| GraphError::Parse { line, message };

    while i < chars.len() {
        let c = chars[i];
        match c {
            '\n' => {
                line += 1;
                i += 1;
            }
            c if c.is_whitespace() => i += 1,
            '#' => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
            }
            '<' => {
                let start = i + 1;
                let mut end = start;
                while end < chars.len() && chars[end] != '>' {
                    if chars[end] == '\n' || chars[end] == ' ' {
                        return Err(err(line, "unterminated IRI".into()));
                    }
                    end += 1;
                }
                if end >= chars.len() {
                    return Err(err(line, "unterminated IRI".into()));
                }
                tokens.push((Token::Iri(chars[start..end].iter().collect()), line));
                i = end + 1;
            }
            '"' | '\'' => {
                let (value, next) = read_string(&chars, i).map_err(|m| err(line, m))?;
                tokens.push((Token::Literal(value), line));
                i = next;
            }
            '@' => {
                let (word, next) = read_while(&chars, i + 1, |c| c.is_ascii_alphanumeric() || c == '-');
                if word.is_empty() {
                    return Err(err(line, "empty language tag".into()));
                }
                let token = match word.as_str() {
                    "prefix" | "base" => Token::Directive(word),
                    _ => Token::LangTag(word),
                };
                tokens.push((token, line));
                i = next;
            }
            '^' => {
                if chars.get(i + 1) != Some(&'^') {
                    return Err(err(line, "expected ^^".into()));
                }
                tokens.push((Token::DataType, line));
                i += 2;
            }
            '?' | '$' => {
                let (name, next) = read_while(&chars, i + 1, |c| c.is_ascii_alphanumeric() || c == '_');
                if name.is_empty() {
                    return Err(err(line, "empty variable name".into()));
                }
                tokens.push((Token::Var(name), line));
                i = next;
            }
            '_' if chars.get(i + 1) == Some(&':') => {
                let (label, next) = read_name(&chars, i + 2);
                if label.is_empty() {
                    return Err(err(line, "empty blank node label".into()));
                }
                tokens.push((Token::Blank(label), line));
                i = next;
            }
            '.' => {
                tokens.push((Token::Dot, line));
                i += 1;
            }
            ';' => {
                tokens.push((Token::Semicolon, line));
                i += 1;
            }
            ',' => {
                tokens.push((Token::Comma, line));
                i += 1;
            }
            '{' => {
                tokens.push((Token::LBrace, line));
                i += 1;
            }
            '}' => {
                tokens.push((Token::RBrace, line));
                i += 1;
            }
            '(' => {
                tokens.push((Token::LParen, line));
                i += 1;
            }
            ')' => {
                tokens.push((Token::RParen, line));
                i += 1;
            }
            '*' => {
                tokens.push((Token::Star, line));
                i += 1;
            }
            c if is_name_char(c) || c == '+' => {
                let signed = (c == '+' || c == '-')
                    && chars.get(i + 1).is_some_and(|n| n.is_ascii_digit());
                let (word, next) = read_name(&chars, if c == '+' { i + 1 } else { i });
                if word.is_empty() {
                    return Err(err(line, format!("unexpected character '{c}'")));
                }
                let token = if c.is_ascii_digit() || signed {
                    let sign = if c == '+' { "+" } else { "" };
                    Token::Number(format!("{sign}{word}"))
                } else if let Some((prefix, local)) = word.split_once(':') {
                    Token::PrefixedName {
                        prefix: prefix.to_string(),
                        local: local.to_string(),
                    }
                } else {
                    Token::Word(word)
                };
                tokens.push((token, line));
                i = next;
            }
            other => return Err(err(line, format!("unexpected character '{other}'"))),
        }
    }
    Ok(tokens)
}

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '-' || c == ':' || c == '.'
}

fn read_while(chars: &[char], start: usize, pred: impl Fn(char) -> bool) -> (String, usize) {
    let mut end = start;
    while end < chars.len() && pred(chars[end]) {
        end += 1;
    }
    (chars[start..end].iter().collect(), end)
}

/// Read a name; a trailing `.` terminates the statement, not the name.
fn read_name(chars: &[char], start: usize) -> (String, usize) {
    let (mut word, mut end) = read_while(chars, start, is_name_char);
    while word.ends_with('.') {
        word.pop();
        end -= 1;
    }
    (word, end)
}

fn read_string(chars: &[char], start: usize) -> Result<(String, usize), String> {
    let quote = chars[start];
    let mut out = String::new();
    let mut i = start + 1;
    while i < chars.len() {
        let c = chars[i];
        if c == quote {
            return Ok((out, i + 1));
        }
        match c {
            '\n' => return Err("unterminated string literal".into()),
            '\\' => {
                let escaped = chars.get(i + 1).ok_or("dangling escape")?;
                match escaped {
                    'n' => out.push('\n'),
                    'r' => out.push('\r'),
                    't' => out.push('\t'),
                    'b' => out.push('\u{8}'),
                    'f' => out.push('\u{c}'),
                    '"' | '\'' | '\\' => out.push(*escaped),
                    'u' | 'U' => {
                        let len = if *escaped == 'u' { 4 } else { 8 };
                        let hex: String = chars.iter().skip(i + 2).take(len).collect();
                        let code = u32::from_str_radix(&hex, 16)
                            .ok()
                            .and_then(char::from_u32)
                            .ok_or_else(|| format!("invalid unicode escape \\{escaped}{hex}"))?;
                        out.push(code);
                        i += len;
                    }
                    other => return Err(format!("invalid escape \\{other}")),
                }
                i += 2;
            }
            other => {
                out.push(other);
                i += 1;
            }
        }
    }
    Err("unterminated string literal".into())
}

// ─── Token stream ────────────────────────────────────────────────────────

/// Cursor over lexed tokens with the prefix table in scope.
pub(crate) struct TokenStream {
    tokens: Vec<(Token, usize)>,
    pos: usize,
    prefixes: HashMap<String, String>,
}

impl TokenStream {
    pub(crate) fn new(tokens: Vec<(Token, usize)>) -> Self {
        TokenStream {
            tokens,
            pos: 0,
            prefixes: HashMap::new(),
        }
    }

    /// Pre-declare the well-known prefixes.
    pub(crate) fn with_default_prefixes(mut self) -> Self {
        for (prefix, ns) in PREFIXES {
            self.prefixes.insert(prefix.to_string(), ns.to_string());
        }
        self
    }

    pub(crate) fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    pub(crate) fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|(t, _)| t.clone());
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    pub(crate) fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    pub(crate) fn eat_word(&mut self, word: &str) -> bool {
        match self.peek() {
            Some(Token::Word(w)) if w.eq_ignore_ascii_case(word) => {
                self.pos += 1;
                true
            }
            _ => false,
        }
    }

    pub(crate) fn expect(&mut self, expected: &Token) -> Result<(), GraphError> {
        if self.eat(expected) {
            Ok(())
        } else {
            Err(self.error(&format!("expected {expected:?}, found {:?}", self.peek())))
        }
    }

    pub(crate) fn is_done(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    pub(crate) fn error(&self, message: &str) -> GraphError {
        let line = self
            .tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map(|(_, l)| *l)
            .unwrap_or(1);
        GraphError::Parse {
            line,
            message: message.to_string(),
        }
    }

    /// `prefix: <iri>` after the PREFIX keyword.
    pub(crate) fn prefix_declaration(&mut self) -> Result<(), GraphError> {
        let prefix = match self.advance() {
            Some(Token::PrefixedName { prefix, local }) if local.is_empty() => prefix,
            _ => return Err(self.error("expected prefix name")),
        };
        let iri = self.iri()?;
        self.prefixes.insert(prefix, iri);
        Ok(())
    }

    pub(crate) fn iri(&mut self) -> Result<String, GraphError> {
        match self.advance() {
            Some(Token::Iri(iri)) => Ok(iri),
            Some(Token::PrefixedName { prefix, local }) => self.expand(&prefix, &local),
            _ => Err(self.error("expected IRI")),
        }
    }

    fn expand(&self, prefix: &str, local: &str) -> Result<String, GraphError> {
        self.prefixes
            .get(prefix)
            .map(|ns| format!("{ns}{local}"))
            .ok_or_else(|| self.error(&format!("undeclared prefix '{prefix}:'")))
    }

    /// Predicate position: an IRI or `a`.
    pub(crate) fn verb(&mut self) -> Result<Term, GraphError> {
        if self.eat_word("a") {
            return Ok(Term::iri(RDF_TYPE));
        }
        Ok(Term::iri(self.iri()?))
    }

    /// Subject or object position.
    pub(crate) fn term(&mut self) -> Result<Term, GraphError> {
        match self.advance() {
            Some(Token::Iri(iri)) => Ok(Term::Iri(iri)),
            Some(Token::PrefixedName { prefix, local }) => Ok(Term::Iri(self.expand(&prefix, &local)?)),
            Some(Token::Blank(label)) => Ok(Term::Blank(label)),
            Some(Token::Literal(lexical)) => {
                // `@base` after a literal is a language tag, not a directive.
                if let Some(Token::LangTag(lang) | Token::Directive(lang)) = self.peek().cloned() {
                    self.pos += 1;
                    return Ok(Term::Literal {
                        lexical,
                        datatype: None,
                        language: Some(lang),
                    });
                }
                if self.eat(&Token::DataType) {
                    let datatype = self.iri()?;
                    return Ok(Term::typed(lexical, datatype));
                }
                Ok(Term::literal(lexical))
            }
            Some(Token::Number(n)) => {
                let datatype = if n.contains(['e', 'E']) {
                    "double"
                } else if n.contains('.') {
                    "decimal"
                } else {
                    "integer"
                };
                Ok(Term::typed(n, format!("{XSD}{datatype}")))
            }
            Some(Token::Word(w)) if w == "true" || w == "false" => {
                Ok(Term::typed(w, format!("{XSD}boolean")))
            }
            other => {
                self.pos = self.pos.saturating_sub(usize::from(other.is_some()));
                Err(self.error(&format!("expected term, found {other:?}")))
            }
        }
    }
}
