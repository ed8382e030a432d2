use crate::backend::{with_session, RelationalBackend};
use crate::errors::BenchError;
use crate::sql_parse::SqlStaticParser;
use serde::Serialize;
use sqlparser::ast::{Query, SetExpr, Statement};
use std::sync::Arc;

/// Result of one validity check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "verdict", content = "reason", rename_all = "snake_case")]
pub enum Validity {
    Valid,
    /// Refused by the read-only guard; nothing was executed.
    Rejected(String),
    /// Executed and reported an error.
    Failed(String),
}

impl Validity {
    pub fn is_valid(&self) -> bool {
        matches!(self, Validity::Valid)
    }
}

#[derive(Clone)]
pub struct ValidityChecker {
    backend: Arc<dyn RelationalBackend>,
    parser: SqlStaticParser,
}

impl ValidityChecker {
    pub fn new(backend: Arc<dyn RelationalBackend>, dialect: &str) -> Self {
        Self {
            backend,
            parser: SqlStaticParser::new(dialect),
        }
    }

    pub fn is_valid(&self, sql: &str, schema_id: &str) -> Result<bool, BenchError> {
        Ok(self.check(sql, schema_id)?.is_valid())
    }

    /// Only `BackendConnection` escapes as an error; statement failures are
    /// reported as [`Validity::Failed`].
    pub fn check(&self, sql: &str, schema_id: &str) -> Result<Validity, BenchError> {
        if let Err(reason) = self.guard(sql) {
            tracing::debug!(
                event = "sqlbench.validity.rejected",
                schema_id = %schema_id,
                reason = %reason
            );
            return Ok(Validity::Rejected(reason));
        }

        let executed = with_session(self.backend.as_ref(), schema_id, |s| s.execute(sql))?;
        match executed {
            Ok(_) => Ok(Validity::Valid),
            Err(e @ BenchError::BackendConnection { .. }) => Err(e),
            Err(e) => Ok(Validity::Failed(e.to_string())),
        }
    }

    /// Accepts only a single read-only query that begins with `SELECT`.
    pub fn guard(&self, sql: &str) -> Result<(), String> {
        if !starts_with_select(sql) {
            return Err("statement does not begin with SELECT".into());
        }
        match self.parser.parse(sql) {
            Ok(stmts) => match stmts.as_slice() {
                [Statement::Query(q)] if !selects_into(q) => Ok(()),
                [Statement::Query(_)] => Err("SELECT ... INTO is not read-only".into()),
                [_] => Err("not a query".into()),
                many => Err(format!("expected one statement, found {}", many.len())),
            },
            // The dialect parser is stricter than the engine; fall back to a
            // lexical check and let execution decide.
            Err(_) if has_trailing_statement(sql) => {
                Err("multiple statements are not allowed".into())
            }
            Err(_) => Ok(()),
        }
    }
}

fn starts_with_select(sql: &str) -> bool {
    let s = sql.trim_start();
    match s.get(..6) {
        Some(head) if head.eq_ignore_ascii_case("select") => !s[6..]
            .chars()
            .next()
            .is_some_and(|c| c.is_alphanumeric() || c == '_' || c == '$'),
        _ => false,
    }
}

fn selects_into(q: &Query) -> bool {
    fn walk(body: &SetExpr) -> bool {
        match body {
            SetExpr::Select(s) => s.into.is_some(),
            SetExpr::Query(q) => walk(&q.body),
            SetExpr::SetOperation { left, right, .. } => walk(left) || walk(right),
            _ => false,
        }
    }
    walk(&q.body)
}

// True when a `;` outside quotes is followed by anything but whitespace.
fn has_trailing_statement(sql: &str) -> bool {
    let mut quote: Option<char> = None;
    for (i, c) in sql.char_indices() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None => match c {
                '\'' | '"' | '`' => quote = Some(c),
                '[' => quote = Some(']'),
                ';' => {
                    if !sql[i + 1..].trim().trim_matches(';').trim().is_empty() {
                        return true;
                    }
                }
                _ => {}
            },
        }
    }
    false
}
