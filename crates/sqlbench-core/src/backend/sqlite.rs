use super::{RelationalBackend, Session};
use crate::catalog::{ColumnDescriptor, TableSchema};
use crate::errors::BenchError;
use crate::model::{CellValue, Row};
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// One SQLite file per schema, looked up as `{root}/{id}/{id}.sqlite`
/// (the BIRD layout) or `{root}/{id}.sqlite`.
#[derive(Debug, Clone)]
pub struct SqliteBackend {
    root: PathBuf,
    statement_timeout: Duration,
}

// Progress callback granularity, in virtual machine instructions.
const PROGRESS_OPS: i32 = 10_000;

impl SqliteBackend {
    pub fn new(root: impl Into<PathBuf>, statement_timeout: Duration) -> Self {
        Self {
            root: root.into(),
            statement_timeout,
        }
    }

    pub fn database_path(&self, schema_id: &str) -> Option<PathBuf> {
        if schema_id.is_empty()
            || schema_id.contains(['/', '\\'])
            || schema_id.starts_with('.')
        {
            return None;
        }
        let nested = self
            .root
            .join(schema_id)
            .join(format!("{}.sqlite", schema_id));
        if nested.is_file() {
            return Some(nested);
        }
        let flat = self.root.join(format!("{}.sqlite", schema_id));
        flat.is_file().then_some(flat)
    }

    fn connect(&self, schema_id: &str) -> Result<Connection, BenchError> {
        let path = self.database_path(schema_id).ok_or_else(|| {
            BenchError::connection(
                schema_id,
                format!("no database file under {}", self.root.display()),
            )
        })?;
        open_read_only(&path).map_err(|e| BenchError::connection(schema_id, e.to_string()))
    }
}

fn open_read_only(path: &Path) -> rusqlite::Result<Connection> {
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;
    conn.execute_batch("PRAGMA query_only = ON")?;
    Ok(conn)
}

impl RelationalBackend for SqliteBackend {
    fn open_session(&self, schema_id: &str) -> Result<Box<dyn Session>, BenchError> {
        let conn = self.connect(schema_id)?;
        conn.execute_batch("BEGIN DEFERRED")
            .map_err(|e| BenchError::connection(schema_id, e.to_string()))?;
        Ok(Box::new(SqliteSession {
            schema_id: schema_id.to_string(),
            conn: Some(conn),
            statement_timeout: self.statement_timeout,
        }))
    }

    fn introspect(&self, schema_id: &str) -> Result<Vec<TableSchema>, BenchError> {
        let introspection = |message: String| BenchError::SchemaIntrospection {
            schema_id: schema_id.to_string(),
            message,
        };
        let conn = self.connect(schema_id).map_err(|e| introspection(e.to_string()))?;
        read_tables(&conn).map_err(|e| introspection(e.to_string()))
    }

    fn name(&self) -> &'static str {
        "sqlite"
    }
}

fn read_tables(conn: &Connection) -> rusqlite::Result<Vec<TableSchema>> {
    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master
         WHERE type = 'table' AND name NOT LIKE 'sqlite_%'
         ORDER BY rowid",
    )?;
    let names = stmt
        .query_map([], |r| r.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut cols = conn.prepare(
        "SELECT name, type, \"notnull\" FROM pragma_table_info(?1) ORDER BY cid",
    )?;
    let mut tables = Vec::with_capacity(names.len());
    for name in names {
        let columns = cols
            .query_map([&name], |r| {
                Ok(ColumnDescriptor {
                    name: r.get(0)?,
                    data_type: r.get::<_, String>(1)?,
                    nullable: r.get::<_, i64>(2)? == 0,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        tables.push(TableSchema { name, columns });
    }
    Ok(tables)
}

pub struct SqliteSession {
    schema_id: String,
    conn: Option<Connection>,
    statement_timeout: Duration,
}

impl SqliteSession {
    fn release(&mut self) -> Result<(), BenchError> {
        let Some(conn) = self.conn.take() else {
            return Ok(());
        };
        if !conn.is_autocommit() {
            conn.execute_batch("ROLLBACK")
                .map_err(|e| BenchError::connection(&self.schema_id, e.to_string()))?;
        }
        conn.close()
            .map_err(|(_, e)| BenchError::connection(&self.schema_id, e.to_string()))
    }
}

impl Session for SqliteSession {
    fn execute(&mut self, sql: &str) -> Result<Vec<Row>, BenchError> {
        let conn = self
            .conn
            .as_ref()
            .ok_or_else(|| BenchError::connection(&self.schema_id, "session already closed"))?;

        let deadline = Instant::now() + self.statement_timeout;
        conn.progress_handler(PROGRESS_OPS, Some(move || Instant::now() > deadline));
        let result = run_query(conn, sql);
        conn.progress_handler(0, None::<fn() -> bool>);

        result.map_err(|e| match e {
            rusqlite::Error::SqliteFailure(f, _) if f.code == rusqlite::ErrorCode::OperationInterrupted => {
                BenchError::execution(format!(
                    "statement timed out after {} ms",
                    self.statement_timeout.as_millis()
                ))
            }
            other => BenchError::execution(other.to_string()),
        })
    }

    fn close(mut self: Box<Self>) -> Result<(), BenchError> {
        self.release()
    }
}

impl Drop for SqliteSession {
    fn drop(&mut self) {
        let _ = self.release();
    }
}

fn run_query(conn: &Connection, sql: &str) -> rusqlite::Result<Vec<Row>> {
    let mut stmt = conn.prepare(sql)?;
    let width = stmt.column_count();
    let mut rows = stmt.query([])?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let mut cells = Vec::with_capacity(width);
        for i in 0..width {
            cells.push(match row.get_ref(i)? {
                ValueRef::Null => CellValue::Null,
                ValueRef::Integer(v) => CellValue::Integer(v),
                ValueRef::Real(v) => CellValue::real(v),
                ValueRef::Text(t) => CellValue::Text(String::from_utf8_lossy(t).into_owned()),
                ValueRef::Blob(b) => CellValue::Blob(b.to_vec()),
            });
        }
        out.push(Row(cells));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> (tempfile::TempDir, SqliteBackend) {
        let dir = tempfile::tempdir().unwrap();
        let db_dir = dir.path().join("shop");
        std::fs::create_dir_all(&db_dir).unwrap();
        let conn = Connection::open(db_dir.join("shop.sqlite")).unwrap();
        conn.execute_batch(
            "CREATE TABLE customers (id INTEGER PRIMARY KEY, name TEXT NOT NULL, score REAL);
             CREATE TABLE orders (id INTEGER, customer_id INTEGER);
             INSERT INTO customers VALUES (1, 'Alice', 2.0), (2, 'Bob', 1.5);",
        )
        .unwrap();
        drop(conn);
        let backend = SqliteBackend::new(dir.path(), Duration::from_secs(5));
        (dir, backend)
    }

    #[test]
    fn test_execute_returns_ordered_rows() {
        let (_dir, backend) = fixture();
        let mut s = backend.open_session("shop").unwrap();
        let rows = s.execute("SELECT name, score FROM customers ORDER BY id").unwrap();
        assert_eq!(
            rows,
            vec![
                Row(vec![CellValue::Text("Alice".into()), CellValue::Integer(2)]),
                Row(vec![CellValue::Text("Bob".into()), CellValue::Real(1.5)]),
            ]
        );
        s.close().unwrap();
    }

    #[test]
    fn test_missing_database_is_connection_error() {
        let (_dir, backend) = fixture();
        let err = backend.open_session("nowhere").err().unwrap();
        assert_eq!(err.kind(), "backend_connection");
        let err = backend.open_session("../shop").err().unwrap();
        assert_eq!(err.kind(), "backend_connection");
    }

    #[test]
    fn test_statement_error_is_execution_error() {
        let (_dir, backend) = fixture();
        let mut s = backend.open_session("shop").unwrap();
        let err = s.execute("SELECT nope FROM customers").unwrap_err();
        assert_eq!(err.kind(), "statement_execution");
        // session remains usable after a failed statement
        assert_eq!(s.execute("SELECT 1").unwrap().len(), 1);
    }

    #[test]
    fn test_writes_are_refused() {
        let (dir, backend) = fixture();
        let mut s = backend.open_session("shop").unwrap();
        assert!(s.execute("DELETE FROM customers").is_err());
        drop(s);
        let conn = Connection::open(dir.path().join("shop/shop.sqlite")).unwrap();
        let n: i64 = conn
            .query_row("SELECT count(*) FROM customers", [], |r| r.get(0))
            .unwrap();
        assert_eq!(n, 2);
    }

    #[test]
    fn test_runaway_statement_times_out() {
        let (dir, _) = fixture();
        let backend = SqliteBackend::new(dir.path(), Duration::from_millis(50));
        let mut s = backend.open_session("shop").unwrap();
        let err = s
            .execute(
                "WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c)
                 SELECT count(*) FROM c",
            )
            .unwrap_err();
        assert!(err.to_string().contains("timed out"), "{err}");
    }

    #[test]
    fn test_introspection_reads_columns_in_order() {
        let (_dir, backend) = fixture();
        let tables = backend.introspect("shop").unwrap();
        assert_eq!(tables.len(), 2);
        assert_eq!(tables[0].name, "customers");
        let names: Vec<_> = tables[0].columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["id", "name", "score"]);
        assert!(!tables[0].columns[1].nullable);
        assert_eq!(tables[0].columns[2].data_type, "REAL");
    }
}
