//! Tolerant static analysis of SQL text.
//!
//! Extraction never fails: the dialect parser is tried first and a lexical
//! `FROM`/`JOIN` scan is used for tables when it rejects the input.

use crate::catalog::fold_name;
use sqlparser::ast::{Expr, ObjectName, Query, Statement, Visit, Visitor};
use sqlparser::dialect::{dialect_from_str, Dialect, GenericDialect};
use sqlparser::parser::{Parser, ParserError};
use std::collections::BTreeSet;
use std::ops::ControlFlow;

#[derive(Debug, Clone)]
pub struct SqlStaticParser {
    dialect: String,
}

impl SqlStaticParser {
    pub fn new(dialect: &str) -> Self {
        Self {
            dialect: dialect.to_ascii_lowercase(),
        }
    }

    fn dialect(&self) -> Box<dyn Dialect> {
        dialect_from_str(&self.dialect).unwrap_or_else(|| Box::new(GenericDialect {}))
    }

    pub fn parse(&self, sql: &str) -> Result<Vec<Statement>, ParserError> {
        Parser::parse_sql(self.dialect().as_ref(), sql)
    }

    /// Folded names of the tables `sql` reads from, CTE names excluded.
    pub fn tables(&self, sql: &str) -> BTreeSet<String> {
        match self.parse(sql) {
            Ok(stmts) => {
                let c = collect(&stmts);
                c.relations.difference(&c.ctes).cloned().collect()
            }
            Err(e) => {
                tracing::debug!(
                    event = "sqlbench.parse.fallback",
                    error = %e,
                    "dialect parser rejected statement; scanning lexically"
                );
                lexical_tables(sql)
            }
        }
    }

    /// Folded names of the column references in `sql`. Empty when the
    /// statement does not parse.
    pub fn columns(&self, sql: &str) -> BTreeSet<String> {
        match self.parse(sql) {
            Ok(stmts) => collect(&stmts).columns,
            Err(_) => BTreeSet::new(),
        }
    }
}

#[derive(Default)]
struct Collector {
    relations: BTreeSet<String>,
    ctes: BTreeSet<String>,
    columns: BTreeSet<String>,
}

impl Visitor for Collector {
    type Break = ();

    fn pre_visit_query(&mut self, query: &Query) -> ControlFlow<Self::Break> {
        if let Some(with) = &query.with {
            for cte in &with.cte_tables {
                self.ctes.insert(fold_name(&cte.alias.name.value));
            }
        }
        ControlFlow::Continue(())
    }

    fn pre_visit_relation(&mut self, relation: &ObjectName) -> ControlFlow<Self::Break> {
        if let Some(last) = relation.0.last() {
            self.relations.insert(last.value.to_ascii_lowercase());
        }
        ControlFlow::Continue(())
    }

    fn pre_visit_expr(&mut self, expr: &Expr) -> ControlFlow<Self::Break> {
        match expr {
            Expr::Identifier(ident) => {
                self.columns.insert(ident.value.to_ascii_lowercase());
            }
            Expr::CompoundIdentifier(parts) => {
                if let Some(last) = parts.last() {
                    self.columns.insert(last.value.to_ascii_lowercase());
                }
            }
            _ => {}
        }
        ControlFlow::Continue(())
    }
}

fn collect(stmts: &[Statement]) -> Collector {
    let mut c = Collector::default();
    for s in stmts {
        let _ = s.visit(&mut c);
    }
    c
}

const STOP_WORDS: &[&str] = &[
    "on", "where", "join", "inner", "left", "right", "full", "outer", "cross", "natural",
    "group", "order", "limit", "having", "union", "except", "intersect", "using", "window",
];

/// Lexical fallback: names following `FROM` (including comma lists) and
/// `JOIN`, with string literals masked out.
pub fn lexical_tables(sql: &str) -> BTreeSet<String> {
    let masked = mask_string_literals(sql);
    let chars: Vec<char> = masked.chars().collect();
    let mut out = BTreeSet::new();
    let mut i = 0;

    while i < chars.len() {
        if !is_word_boundary(&chars, i) {
            i += 1;
            continue;
        }
        let Some((word, end)) = read_word(&chars, i) else {
            i += 1;
            continue;
        };
        let lower = word.to_ascii_lowercase();
        if lower != "from" && lower != "join" {
            i = end;
            continue;
        }
        let allow_list = lower == "from";
        let mut j = end;
        loop {
            j = skip_ws(&chars, j);
            let Some((name, after)) = read_name(&chars, j) else {
                break;
            };
            let folded = fold_name(&name);
            if folded.is_empty() || folded == "select" {
                break;
            }
            out.insert(folded);
            j = skip_ws(&chars, after);
            // optional alias
            if let Some((alias, after_alias)) = read_word(&chars, j) {
                let a = alias.to_ascii_lowercase();
                if a == "as" {
                    j = skip_ws(&chars, after_alias);
                    if let Some((_, after_real)) = read_word(&chars, j) {
                        j = skip_ws(&chars, after_real);
                    }
                } else if !STOP_WORDS.contains(&a.as_str()) {
                    j = skip_ws(&chars, after_alias);
                }
            }
            if allow_list && chars.get(j) == Some(&',') {
                j += 1;
                continue;
            }
            break;
        }
        i = j.max(end);
    }
    out
}

fn mask_string_literals(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut in_str = false;
    for c in sql.chars() {
        if c == '\'' {
            in_str = !in_str;
            out.push(' ');
        } else if in_str {
            out.push(' ');
        } else {
            out.push(c);
        }
    }
    out
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

fn is_word_boundary(chars: &[char], i: usize) -> bool {
    i == 0 || !is_ident_char(chars[i - 1])
}

fn skip_ws(chars: &[char], mut i: usize) -> usize {
    while i < chars.len() && chars[i].is_whitespace() {
        i += 1;
    }
    i
}

fn read_word(chars: &[char], i: usize) -> Option<(String, usize)> {
    let mut j = i;
    while j < chars.len() && is_ident_char(chars[j]) {
        j += 1;
    }
    (j > i).then(|| (chars[i..j].iter().collect(), j))
}

// A possibly quoted, possibly dotted name.
fn read_name(chars: &[char], i: usize) -> Option<(String, usize)> {
    let mut j = i;
    let mut name = String::new();
    loop {
        let part_start = j;
        match chars.get(j) {
            Some(&q @ ('"' | '`' | '[')) => {
                let close = if q == '[' { ']' } else { q };
                j += 1;
                while j < chars.len() && chars[j] != close {
                    j += 1;
                }
                if j >= chars.len() {
                    return None;
                }
                j += 1;
            }
            Some(c) if is_ident_char(*c) => {
                while j < chars.len() && is_ident_char(chars[j]) {
                    j += 1;
                }
            }
            _ => break,
        }
        name.extend(&chars[part_start..j]);
        if chars.get(j) == Some(&'.') {
            name.push('.');
            j += 1;
        } else {
            break;
        }
    }
    (!name.is_empty()).then_some((name, j))
}
