use crate::catalog::TableSchema;
use crate::errors::BenchError;
use crate::model::Row;

pub mod sqlite;

/// A relational store holding one database per schema id.
pub trait RelationalBackend: Send + Sync {
    /// Opens a session bound to `schema_id`. Failure here is a
    /// `BackendConnection` error and never means "invalid SQL".
    fn open_session(&self, schema_id: &str) -> Result<Box<dyn Session>, BenchError>;

    /// Reads tables and columns of `schema_id` in declaration order.
    fn introspect(&self, schema_id: &str) -> Result<Vec<TableSchema>, BenchError>;

    fn name(&self) -> &'static str;
}

/// A schema-scoped, read-only session.
///
/// Dropping a session releases it and discards any uncommitted state, so every
/// exit path (including panics and early returns) gives the connection back.
pub trait Session: Send {
    /// Runs one statement to completion and returns its rows in order.
    /// Failures are `StatementExecution` errors.
    fn execute(&mut self, sql: &str) -> Result<Vec<Row>, BenchError>;

    /// Explicit release for the success path; equivalent to dropping.
    fn close(self: Box<Self>) -> Result<(), BenchError>;
}

/// Opens a session, runs `f`, and always releases the session afterwards.
pub fn with_session<T>(
    backend: &dyn RelationalBackend,
    schema_id: &str,
    f: impl FnOnce(&mut dyn Session) -> T,
) -> Result<T, BenchError> {
    let mut session = backend.open_session(schema_id)?;
    let out = f(session.as_mut());
    if let Err(e) = session.close() {
        tracing::warn!(
            event = "sqlbench.backend.close_failed",
            schema_id = %schema_id,
            error = %e,
            "session close reported an error"
        );
    }
    Ok(out)
}
