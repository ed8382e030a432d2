//! Table-level and row-level scoring of an accepted prediction.

use crate::backend::{with_session, RelationalBackend};
use crate::catalog::SchemaCatalog;
use crate::errors::BenchError;
use crate::model::{
    EvaluationResult, GenerationAttempt, MetricBlock, Question, Row, SetScore,
};
use crate::sql_parse::SqlStaticParser;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// How result rows are compared.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowSemantics {
    /// Duplicate rows collapse.
    #[default]
    Set,
    /// Multiset: overlap is the sum of per-row minimum counts.
    Bag,
}

#[derive(Clone)]
pub struct EvaluationEngine {
    backend: Arc<dyn RelationalBackend>,
    catalog: Arc<SchemaCatalog>,
    parser: SqlStaticParser,
    semantics: RowSemantics,
}

impl EvaluationEngine {
    pub fn new(
        backend: Arc<dyn RelationalBackend>,
        catalog: Arc<SchemaCatalog>,
        dialect: &str,
        semantics: RowSemantics,
    ) -> Self {
        Self {
            backend,
            catalog,
            parser: SqlStaticParser::new(dialect),
            semantics,
        }
    }

    pub fn evaluate(
        &self,
        question: &Question,
        accepted: &GenerationAttempt,
    ) -> Result<EvaluationResult, BenchError> {
        self.evaluate_sql(
            &question.id,
            &question.schema_id,
            &question.ground_truth_sql,
            &accepted.normalized_sql,
        )
    }

    /// Blocking. Statement failures are recorded on the result; only
    /// `BackendConnection` (and `UnknownSchema` for ids outside the catalog)
    /// escape.
    pub fn evaluate_sql(
        &self,
        question_id: &str,
        schema_id: &str,
        ground_truth_sql: &str,
        predicted_sql: &str,
    ) -> Result<EvaluationResult, BenchError> {
        self.catalog.tables(schema_id)?;

        let gt_tables = self
            .catalog
            .filter_tables(schema_id, &self.parser.tables(ground_truth_sql));
        let pred_tables = self
            .catalog
            .filter_tables(schema_id, &self.parser.tables(predicted_sql));
        let gt_columns = self
            .catalog
            .filter_columns(schema_id, &self.parser.columns(ground_truth_sql));
        let pred_columns = self
            .catalog
            .filter_columns(schema_id, &self.parser.columns(predicted_sql));

        let (gt_exec, pred_exec) = with_session(self.backend.as_ref(), schema_id, |s| {
            let gt = s.execute(ground_truth_sql);
            let pred = s.execute(predicted_sql);
            (gt, pred)
        })?;
        let (gt_rows, ground_truth_error) = split_execution(gt_exec)?;
        let (pred_rows, predicted_error) = split_execution(pred_exec)?;

        let valid = predicted_error.is_none() && !pred_rows.is_empty();
        let rows = match self.semantics {
            RowSemantics::Set => set_block(gt_rows, pred_rows),
            RowSemantics::Bag => bag_block(gt_rows, pred_rows),
        };
        let result = EvaluationResult {
            question_id: question_id.to_string(),
            schema_id: schema_id.to_string(),
            valid,
            tables: set_block(gt_tables, pred_tables),
            columns: set_block(gt_columns, pred_columns),
            rows,
            ground_truth_error,
            predicted_error,
        };

        if let Some(e) = &result.ground_truth_error {
            tracing::warn!(
                event = "sqlbench.evaluation.ground_truth_failed",
                question_id = %question_id,
                error = %e
            );
        }
        tracing::info!(
            event = "sqlbench.evaluation.scored",
            question_id = %question_id,
            schema_id = %schema_id,
            valid,
            table_f1 = result.tables.score.f1,
            row_f1 = result.rows.score.f1
        );
        Ok(result)
    }
}

fn split_execution(
    exec: Result<Vec<Row>, BenchError>,
) -> Result<(Vec<Row>, Option<String>), BenchError> {
    match exec {
        Ok(rows) => Ok((rows, None)),
        Err(e @ BenchError::BackendConnection { .. }) => Err(e),
        Err(e) => Ok((vec![], Some(e.to_string()))),
    }
}

pub fn set_block<T, I>(ground_truth: I, predicted: I) -> MetricBlock<T>
where
    T: Ord,
    I: IntoIterator<Item = T>,
{
    let gt: BTreeSet<T> = ground_truth.into_iter().collect();
    let pred: BTreeSet<T> = predicted.into_iter().collect();
    let overlap = gt.intersection(&pred).count();
    MetricBlock {
        score: SetScore::from_counts(overlap, pred.len(), gt.len()),
        ground_truth: gt.into_iter().collect(),
        predicted: pred.into_iter().collect(),
    }
}

fn counts<T: Ord>(items: &[T]) -> BTreeMap<&T, usize> {
    let mut m = BTreeMap::new();
    for it in items {
        *m.entry(it).or_default() += 1;
    }
    m
}

pub fn bag_block<T: Ord>(ground_truth: Vec<T>, predicted: Vec<T>) -> MetricBlock<T> {
    let gt_counts = counts(&ground_truth);
    let pred_counts = counts(&predicted);
    let overlap = gt_counts
        .iter()
        .map(|(k, n)| (*n).min(pred_counts.get(k).copied().unwrap_or(0)))
        .sum();
    let score = SetScore::from_counts(overlap, predicted.len(), ground_truth.len());

    let mut ground_truth = ground_truth;
    let mut predicted = predicted;
    ground_truth.sort();
    predicted.sort();
    MetricBlock {
        ground_truth,
        predicted,
        score,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::sqlite::SqliteBackend;
    use crate::model::CellValue;
    use std::time::Duration;

    fn engine(semantics: RowSemantics) -> (tempfile::TempDir, EvaluationEngine) {
        let dir = tempfile::tempdir().unwrap();
        let conn = rusqlite::Connection::open(dir.path().join("shop.sqlite")).unwrap();
        conn.execute_batch(
            "CREATE TABLE customers (id INTEGER PRIMARY KEY, name TEXT, city TEXT);
             CREATE TABLE orders (id INTEGER PRIMARY KEY, customer_id INTEGER, total REAL);
             INSERT INTO customers VALUES (1, 'Alice', 'Oslo');
             INSERT INTO orders VALUES (1, 1, 10.0), (2, 1, 10.0), (3, 1, 4.5);",
        )
        .unwrap();
        drop(conn);
        let backend: Arc<dyn RelationalBackend> =
            Arc::new(SqliteBackend::new(dir.path(), Duration::from_secs(5)));
        let tables = backend.introspect("shop").unwrap();
        let catalog = SchemaCatalog::from_tables(BTreeMap::from([("shop".to_string(), tables)]));
        let e = EvaluationEngine::new(backend, Arc::new(catalog), "SQLite", semantics);
        (dir, e)
    }

    fn assert_perfect(s: &SetScore) {
        assert_eq!((s.precision, s.recall, s.f1), (1.0, 1.0, 1.0));
    }

    #[test]
    fn test_customers_alice_scores_perfectly() {
        let (_dir, e) = engine(RowSemantics::Set);
        let r = e
            .evaluate_sql(
                "1",
                "shop",
                "SELECT name FROM customers",
                "SELECT name FROM customers WHERE 1=1",
            )
            .unwrap();
        assert_perfect(&r.tables.score);
        assert_perfect(&r.rows.score);
        assert_perfect(&r.columns.score);
        assert!(r.valid);
        assert_eq!(r.tables.ground_truth, vec!["customers".to_string()]);
        assert_eq!(r.rows.predicted, vec![Row(vec![CellValue::Text("Alice".into())])]);
    }

    #[test]
    fn test_failing_prediction_scores_zero_and_invalid() {
        let (_dir, e) = engine(RowSemantics::Set);
        let r = e
            .evaluate_sql("1", "shop", "SELECT name FROM customers", "SELECT nope FROM customers")
            .unwrap();
        assert_eq!(r.rows.score, SetScore::default());
        assert!(!r.valid);
        assert!(r.predicted_error.is_some());
        assert!(r.ground_truth_error.is_none());
        assert_eq!(r.rows.ground_truth.len(), 1);
        // the table is still referenced
        assert_perfect(&r.tables.score);

        // the engine keeps working for the next question
        let next = e
            .evaluate_sql("2", "shop", "SELECT id FROM orders", "SELECT id FROM orders")
            .unwrap();
        assert!(next.valid);
        assert_perfect(&next.rows.score);
    }

    #[test]
    fn test_empty_prediction_result_is_invalid() {
        let (_dir, e) = engine(RowSemantics::Set);
        let r = e
            .evaluate_sql(
                "1",
                "shop",
                "SELECT name FROM customers WHERE id = 2",
                "SELECT name FROM customers WHERE id = 2",
            )
            .unwrap();
        assert!(!r.valid);
        assert_eq!(r.rows.score.f1, 0.0);
    }

    #[test]
    fn test_unknown_tables_are_filtered_out() {
        let (_dir, e) = engine(RowSemantics::Set);
        let r = e
            .evaluate_sql(
                "1",
                "shop",
                "SELECT c.name FROM customers c JOIN orders o ON o.customer_id = c.id",
                "SELECT name FROM customers JOIN invoices ON 1=1",
            )
            .unwrap();
        assert_eq!(r.tables.predicted, vec!["customers".to_string()]);
        assert_eq!(r.tables.score.precision, 1.0);
        assert_eq!(r.tables.score.recall, 0.5);
        assert!(r.predicted_error.is_some());
    }

    #[test]
    fn test_bag_semantics_counts_duplicates() {
        let gt = "SELECT total FROM orders";
        let pred = "SELECT total FROM orders WHERE total > 5";

        let (_d1, set) = engine(RowSemantics::Set);
        let r = set.evaluate_sql("1", "shop", gt, pred).unwrap();
        // {10, 4.5} vs {10}
        assert_eq!(r.rows.score.precision, 1.0);
        assert_eq!(r.rows.score.recall, 0.5);

        let (_d2, bag) = engine(RowSemantics::Bag);
        let r = bag.evaluate_sql("1", "shop", gt, pred).unwrap();
        // [10, 10, 4.5] vs [10, 10]
        assert_eq!(r.rows.score.precision, 1.0);
        assert!((r.rows.score.recall - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(r.rows.predicted.len(), 2);
    }

    #[test]
    fn test_connection_failure_escapes() {
        let (dir, e) = engine(RowSemantics::Set);
        std::fs::remove_file(dir.path().join("shop.sqlite")).unwrap();
        let err = e
            .evaluate_sql("1", "shop", "SELECT 1", "SELECT 1")
            .unwrap_err();
        assert_eq!(err.kind(), "backend_connection");
        let err = e.evaluate_sql("1", "nowhere", "SELECT 1", "SELECT 1").unwrap_err();
        assert_eq!(err.kind(), "unknown_schema");
    }

    #[test]
    fn test_set_block_bounds_on_empty_inputs() {
        let b: MetricBlock<String> = set_block(vec![], vec![]);
        assert_eq!(b.score, SetScore::default());
        let b = bag_block(vec![1, 1], vec![]);
        assert_eq!(b.score.f1, 0.0);
    }
}
