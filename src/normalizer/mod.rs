//! Table-Reference Normalizer
//!
//! Rewrites every `FROM`/`JOIN` target into `[database].[schema].[table]`.
//! The walk runs over tokens, so keywords inside literals, comments and
//! bracketed names are never mistaken for clauses. Idempotent and total.

pub mod tokenizer;

use crate::schema::{bracket, DatabaseName, DEFAULT_SCHEMA};
use std::collections::HashSet;
use tokenizer::{tokenize, Token, TokenKind};
use tracing::debug;

/// Type names that show up in place of a schema when the model echoes a
/// column definition into a table reference.
const TYPE_TOKENS: &[&str] = &[
    "int", "bigint", "smallint", "tinyint", "bit", "float", "real", "decimal", "numeric", "money",
    "smallmoney", "char", "nchar", "varchar", "nvarchar", "text", "ntext", "datetime", "datetime2",
    "smalldatetime", "datetimeoffset", "date", "time", "uniqueidentifier", "binary", "varbinary",
    "image", "xml",
];

/// Words that end a `FROM` entry rather than alias it.
const CLAUSE_KEYWORDS: &[&str] = &[
    "where", "join", "inner", "left", "right", "full", "outer", "cross", "on", "group", "order",
    "having", "union", "except", "intersect", "with", "option", "for", "select", "into", "set",
    "values", "output", "when", "then", "else", "end", "pivot", "unpivot", "apply", "limit",
    "offset", "fetch", "and", "or", "not", "tablesample", "from", "go",
];

/// Hints accepted in the legacy `FROM t (NOLOCK)` form, without `WITH`.
const TABLE_HINTS: &[&str] = &[
    "nolock", "readuncommitted", "readcommitted", "readcommittedlock", "repeatableread",
    "serializable", "holdlock", "updlock", "xlock", "rowlock", "paglock", "tablock", "tablockx",
    "readpast", "nowait", "index", "forceseek", "forcescan", "noexpand", "snapshot",
];

/// One rewritten reference, for logging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rewrite {
    pub original: String,
    pub qualified: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Normalized {
    pub query: String,
    pub rewrites: Vec<Rewrite>,
}

pub fn normalize(query: &str, database: &DatabaseName) -> String {
    normalize_detailed(query, database).query
}

pub fn normalize_detailed(query: &str, database: &DatabaseName) -> Normalized {
    let tokens = tokenize(query);
    let mut walker = Walker {
        tokens: &tokens,
        database,
        ctes: cte_names(&tokens),
        out: String::with_capacity(query.len() + 32),
        rewrites: Vec::new(),
    };
    walker.run();

    for rewrite in &walker.rewrites {
        debug!("Qualified table reference {} -> {}", rewrite.original.trim(), rewrite.qualified);
    }

    Normalized {
        query: walker.out,
        rewrites: walker.rewrites,
    }
}

/// Whether `FROM`/`JOIN` inside the current parenthesis group introduce tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Group {
    Undecided,
    Query,
    Expression,
}

struct Walker<'t, 'a> {
    tokens: &'t [Token<'a>],
    database: &'t DatabaseName,
    ctes: HashSet<String>,
    out: String,
    rewrites: Vec<Rewrite>,
}

struct Reference {
    segments: Vec<String>,
    end: usize,
}

impl<'t, 'a> Walker<'t, 'a> {
    fn run(&mut self) {
        let mut groups = vec![Group::Query];
        // Set when FROM/JOIN is directly followed by `(`: a derived table or a
        // parenthesized join, both of which hold table references.
        let mut target_paren = false;
        let mut i = 0;

        while i < self.tokens.len() {
            let token = self.tokens[i];
            let mut opens_target = false;
            match token.kind {
                TokenKind::OpenParen => {
                    opens_target = std::mem::take(&mut target_paren);
                    groups.push(if opens_target { Group::Query } else { Group::Undecided });
                }
                TokenKind::CloseParen => {
                    if groups.len() > 1 {
                        groups.pop();
                    }
                }
                TokenKind::Word => {
                    if let Some(top) = groups.last_mut() {
                        if *top == Group::Undecided {
                            *top = if token.is_keyword("select") || token.is_keyword("with") {
                                Group::Query
                            } else {
                                Group::Expression
                            };
                        }
                    }
                }
                _ => {}
            }

            self.out.push_str(token.text);
            i += 1;

            let in_query = groups.last() == Some(&Group::Query);
            let is_from = in_query && token.is_keyword("from");
            if is_from || opens_target || (in_query && token.is_keyword("join")) {
                if self.kind_at(self.skip_trivia(i)) == Some(TokenKind::OpenParen) {
                    target_paren = true;
                } else {
                    i = self.qualify_targets(i, is_from);
                }
            }
        }
    }

    /// Rewrite the target(s) after a `FROM`/`JOIN` keyword. Returns the index of
    /// the first token not yet emitted.
    fn qualify_targets(&mut self, mut i: usize, comma_list: bool) -> usize {
        loop {
            i = self.copy_trivia(i);
            let Some(reference) = self.parse_reference(i) else {
                return i;
            };

            if self.should_skip(&reference) {
                self.copy_range(i, reference.end);
            } else {
                let original: String = self.tokens[i..reference.end].iter().map(|t| t.text).collect();
                let qualified = self.qualify(&reference.segments);
                self.out.push_str(&qualified);
                self.rewrites.push(Rewrite { original, qualified });
            }
            i = reference.end;
            if let Some(end) = self.table_hint_end(i) {
                self.copy_range(i, end);
                i = end;
            }

            if !comma_list {
                return i;
            }

            let after_alias = self.skip_alias(i);
            let next = self.skip_trivia(after_alias);
            match self.tokens.get(next) {
                Some(t) if t.kind == TokenKind::Comma => {
                    self.copy_range(i, next + 1);
                    i = next + 1;
                }
                _ => return i,
            }
        }
    }

    /// Dot-separated identifier chain starting at `i`. Whitespace may surround
    /// the dots. An empty segment (`db..table`) is recorded as "".
    fn parse_reference(&self, i: usize) -> Option<Reference> {
        let first = self.tokens.get(i)?;
        if !first.is_identifier() || is_clause_keyword(first) {
            return None;
        }

        let mut segments = vec![first.identifier()?];
        let mut end = i + 1;

        loop {
            let dot = self.skip_whitespace(end);
            if self.kind_at(dot) != Some(TokenKind::Dot) {
                break;
            }
            let mut next = self.skip_whitespace(dot + 1);
            let mut empty_segments = Vec::new();
            while self.kind_at(next) == Some(TokenKind::Dot) {
                empty_segments.push(String::new());
                next = self.skip_whitespace(next + 1);
            }
            match self.tokens.get(next) {
                Some(t) if t.is_identifier() => {
                    segments.extend(empty_segments);
                    segments.push(t.identifier()?);
                    end = next + 1;
                }
                _ => break,
            }
        }

        Some(Reference { segments, end })
    }

    fn should_skip(&self, reference: &Reference) -> bool {
        let first = reference.segments[0].as_str();
        if first.starts_with('@') || first.starts_with('#') {
            return true;
        }
        let call = self.kind_at(self.skip_trivia(reference.end)) == Some(TokenKind::OpenParen);
        if call && self.table_hint_end(reference.end).is_none() {
            return true;
        }
        reference.segments.len() == 1 && self.ctes.contains(&first.to_lowercase())
    }

    /// End of a legacy `(NOLOCK, ...)` hint list starting after trivia at `i`.
    fn table_hint_end(&self, i: usize) -> Option<usize> {
        let open = self.skip_trivia(i);
        if self.kind_at(open) != Some(TokenKind::OpenParen) {
            return None;
        }
        let first = self.tokens.get(self.skip_trivia(open + 1))?;
        if !TABLE_HINTS.iter().any(|h| first.is_keyword(h)) {
            return None;
        }

        let mut depth = 0usize;
        for (j, token) in self.tokens.iter().enumerate().skip(open) {
            match token.kind {
                TokenKind::OpenParen => depth += 1,
                TokenKind::CloseParen => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(j + 1);
                    }
                }
                _ => {}
            }
        }
        None
    }

    fn qualify(&self, segments: &[String]) -> String {
        // `Sales.Customers` against database Sales is db.table, not schema.table.
        let db_table;
        let segments = if segments.len() == 2 && segments[0].eq_ignore_ascii_case(self.database.as_str()) {
            db_table = [segments[0].clone(), String::new(), segments[1].clone()];
            &db_table[..]
        } else {
            segments
        };
        let n = segments.len();
        let table = &segments[n - 1];
        let schema = if n >= 2 { segments[n - 2].as_str() } else { "" };
        let outer = if n >= 3 { &segments[..n - 2] } else { &[][..] };

        let corrupted = is_type_token(schema)
            || outer
                .iter()
                .any(|q| !q.eq_ignore_ascii_case(self.database.as_str()) && is_type_token(q));

        let schema = if corrupted || schema.trim().is_empty() {
            DEFAULT_SCHEMA
        } else {
            schema
        };

        format!("{}.{}.{}", bracket(self.database.as_str()), bracket(schema), bracket(table))
    }

    fn skip_alias(&self, i: usize) -> usize {
        let j = self.skip_trivia(i);
        match self.tokens.get(j) {
            Some(t) if t.is_keyword("as") => {
                let k = self.skip_trivia(j + 1);
                match self.tokens.get(k) {
                    Some(t) if t.is_identifier() => k + 1,
                    _ => j + 1,
                }
            }
            Some(t) if t.is_identifier() && !is_clause_keyword(t) => j + 1,
            _ => i,
        }
    }

    fn copy_trivia(&mut self, i: usize) -> usize {
        let end = self.skip_trivia(i);
        self.copy_range(i, end);
        end
    }

    fn copy_range(&mut self, from: usize, to: usize) {
        for token in &self.tokens[from..to] {
            self.out.push_str(token.text);
        }
    }

    fn skip_trivia(&self, mut i: usize) -> usize {
        while self.tokens.get(i).map(|t| t.is_trivia()).unwrap_or(false) {
            i += 1;
        }
        i
    }

    fn skip_whitespace(&self, mut i: usize) -> usize {
        while self.kind_at(i) == Some(TokenKind::Whitespace) {
            i += 1;
        }
        i
    }

    fn kind_at(&self, i: usize) -> Option<TokenKind> {
        self.tokens.get(i).map(|t| t.kind)
    }
}

fn is_clause_keyword(token: &Token<'_>) -> bool {
    token.kind == TokenKind::Word && CLAUSE_KEYWORDS.iter().any(|k| token.text.eq_ignore_ascii_case(k))
}

/// A qualifier that is really a column type, or not a plain name at all.
fn is_type_token(qualifier: &str) -> bool {
    if qualifier
        .chars()
        .any(|c| c.is_whitespace() || c == ',' || c == '(' || c == ')')
    {
        return true;
    }
    TYPE_TOKENS.iter().any(|t| qualifier.eq_ignore_ascii_case(t))
}

/// Names declared by `WITH name [(cols)] AS (` and `, name [(cols)] AS (`.
fn cte_names(tokens: &[Token<'_>]) -> HashSet<String> {
    let sig: Vec<&Token<'_>> = tokens.iter().filter(|t| !t.is_trivia()).collect();
    let mut names = HashSet::new();

    for p in 1..sig.len() {
        let lead = sig[p - 1];
        if !(lead.is_keyword("with") || lead.kind == TokenKind::Comma) || !sig[p].is_identifier() {
            continue;
        }

        let mut q = p + 1;
        if sig.get(q).map(|t| t.kind) == Some(TokenKind::OpenParen) {
            let mut depth = 0usize;
            while q < sig.len() {
                match sig[q].kind {
                    TokenKind::OpenParen => depth += 1,
                    TokenKind::CloseParen => {
                        depth = depth.saturating_sub(1);
                        if depth == 0 {
                            q += 1;
                            break;
                        }
                    }
                    _ => {}
                }
                q += 1;
            }
        }

        let is_cte = sig.get(q).map(|t| t.is_keyword("as")).unwrap_or(false)
            && sig.get(q + 1).map(|t| t.kind) == Some(TokenKind::OpenParen);
        if is_cte {
            if let Some(name) = sig[p].identifier() {
                names.insert(name.to_lowercase());
            }
        }
    }

    names
}
