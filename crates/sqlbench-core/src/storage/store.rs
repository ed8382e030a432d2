use crate::config::BenchConfig;
use crate::model::QuestionReport;
use anyhow::Context;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

/// Run history: one row per run, per question, per attempt and per scored
/// question.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunRow {
    pub id: i64,
    pub suite: String,
    pub model: String,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub status: String,
    pub questions: i64,
    pub evaluated: i64,
    pub mean_row_f1: Option<f64>,
}

impl Store {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let conn = Connection::open(path).context("failed to open sqlite db")?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory sqlite db")?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn conn(&self) -> anyhow::Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow::anyhow!("run store lock poisoned"))
    }

    pub fn init_schema(&self) -> anyhow::Result<()> {
        let conn = self.conn()?;
        conn.execute_batch(crate::storage::schema::DDL)?;
        Ok(())
    }

    pub fn create_run(&self, cfg: &BenchConfig, started_at: &str) -> anyhow::Result<i64> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO runs(suite, model, started_at, status, config_json)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                cfg.suite,
                cfg.model,
                started_at,
                "running",
                serde_json::to_string(cfg)?
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn finalize_run(&self, run_id: i64, finished_at: &str, status: &str) -> anyhow::Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE runs SET status=?1, finished_at=?2 WHERE id=?3",
            params![status, finished_at, run_id],
        )?;
        Ok(())
    }

    pub fn attach_summary(&self, run_id: i64, summary: &serde_json::Value) -> anyhow::Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE runs SET summary_json=?1 WHERE id=?2",
            params![serde_json::to_string(summary)?, run_id],
        )?;
        Ok(())
    }

    /// Writes the question, its attempts and its evaluation in one transaction.
    pub fn insert_report(
        &self,
        run_id: i64,
        report: &QuestionReport,
        fingerprint: Option<&str>,
    ) -> anyhow::Result<i64> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let q = &report.question;
        tx.execute(
            "INSERT INTO generations(run_id, question_id, schema_id, difficulty, status, state,
                                     fingerprint, failure_kind, failure_message, duration_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                run_id,
                q.id,
                q.schema_id,
                q.difficulty_label(),
                report.status.as_str(),
                report.generation_state.map(|s| s.as_str()),
                fingerprint,
                report.failure.as_ref().map(|f| f.kind.as_str()),
                report.failure.as_ref().map(|f| f.message.as_str()),
                report.duration_ms as i64,
            ],
        )?;
        let generation_id = tx.last_insert_rowid();

        for a in &report.attempts {
            tx.execute(
                "INSERT INTO attempts(generation_id, attempt, prompt_sha256, raw_output,
                                      normalized_sql, is_valid, duration_ms)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    generation_id,
                    a.attempt,
                    a.prompt_sha256,
                    a.raw_output,
                    a.normalized_sql,
                    a.is_valid,
                    a.duration_ms as i64,
                ],
            )?;
        }

        if let Some(e) = &report.evaluation {
            tx.execute(
                "INSERT INTO evaluations(generation_id, valid, table_precision, table_recall,
                                         table_f1, row_precision, row_recall, row_f1,
                                         column_f1, result_json)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    generation_id,
                    e.valid,
                    e.tables.score.precision,
                    e.tables.score.recall,
                    e.tables.score.f1,
                    e.rows.score.precision,
                    e.rows.score.recall,
                    e.rows.score.f1,
                    e.columns.score.f1,
                    serde_json::to_string(e)?,
                ],
            )?;
        }
        tx.commit()?;
        Ok(generation_id)
    }

    pub fn recent_runs(&self, suite: Option<&str>, limit: u32) -> anyhow::Result<Vec<RunRow>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT r.id, r.suite, r.model, r.started_at, r.finished_at, r.status,
                    (SELECT count(*) FROM generations g WHERE g.run_id = r.id),
                    (SELECT count(*) FROM generations g WHERE g.run_id = r.id AND g.status = 'evaluated'),
                    (SELECT avg(e.row_f1) FROM evaluations e
                       JOIN generations g ON g.id = e.generation_id WHERE g.run_id = r.id)
             FROM runs r
             WHERE ?1 IS NULL OR r.suite = ?1
             ORDER BY r.id DESC
             LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![suite, limit], |row| {
                Ok(RunRow {
                    id: row.get(0)?,
                    suite: row.get(1)?,
                    model: row.get(2)?,
                    started_at: row.get(3)?,
                    finished_at: row.get(4)?,
                    status: row.get(5)?,
                    questions: row.get(6)?,
                    evaluated: row.get(7)?,
                    mean_row_f1: row.get(8)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn run_summary(&self, run_id: i64) -> anyhow::Result<Option<serde_json::Value>> {
        let conn = self.conn()?;
        let raw: Option<Option<String>> = conn
            .query_row(
                "SELECT summary_json FROM runs WHERE id = ?1",
                params![run_id],
                |r| r.get(0),
            )
            .optional()?;
        match raw.flatten() {
            Some(s) => Ok(Some(serde_json::from_str(&s)?)),
            None => Ok(None),
        }
    }

    /// Most recent fingerprint-equal generation outside `run_id`, used to
    /// flag questions whose outcome changed between identical runs.
    pub fn previous_status(
        &self,
        fingerprint: &str,
        run_id: i64,
    ) -> anyhow::Result<Option<String>> {
        let conn = self.conn()?;
        let status = conn
            .query_row(
                "SELECT status FROM generations
                 WHERE fingerprint = ?1 AND run_id < ?2
                 ORDER BY id DESC LIMIT 1",
                params![fingerprint, run_id],
                |r| r.get(0),
            )
            .optional()?;
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;
    use crate::model::{
        EvaluationResult, GenerationAttempt, GenerationState, MetricBlock, Question,
        QuestionStatus, SetScore,
    };

    fn cfg() -> BenchConfig {
        parse_config(
            "version: 1\nsuite: smoke\nmodel: replay\ndataset: q.json\nbackend:\n  root: dbs\n",
            true,
        )
        .unwrap()
    }

    fn report(id: &str, evaluated: bool) -> QuestionReport {
        let block = |f1: f64| MetricBlock::<String> {
            ground_truth: vec!["customers".into()],
            predicted: vec!["customers".into()],
            score: SetScore {
                precision: f1,
                recall: f1,
                f1,
            },
        };
        QuestionReport {
            question: Question {
                id: id.into(),
                schema_id: "shop".into(),
                text: "q".into(),
                ground_truth_sql: "SELECT 1".into(),
                evidence: None,
                difficulty: None,
            },
            status: if evaluated {
                QuestionStatus::Evaluated
            } else {
                QuestionStatus::Exhausted
            },
            attempts: vec![GenerationAttempt {
                attempt: 1,
                prompt: "p".into(),
                prompt_sha256: "abc".into(),
                raw_output: "SELECT 1".into(),
                normalized_sql: "SELECT 1".into(),
                is_valid: evaluated,
                duration_ms: 3,
            }],
            generation_state: Some(if evaluated {
                GenerationState::Valid
            } else {
                GenerationState::Exhausted
            }),
            evaluation: evaluated.then(|| EvaluationResult {
                question_id: id.into(),
                schema_id: "shop".into(),
                valid: true,
                tables: block(1.0),
                columns: block(1.0),
                rows: MetricBlock {
                    ground_truth: vec![],
                    predicted: vec![],
                    score: SetScore {
                        precision: 0.5,
                        recall: 0.5,
                        f1: 0.5,
                    },
                },
                ground_truth_error: None,
                predicted_error: None,
            }),
            failure: None,
            duration_ms: 10,
        }
    }

    #[test]
    fn test_run_lifecycle() -> anyhow::Result<()> {
        let store = Store::memory()?;
        store.init_schema()?;
        let run_id = store.create_run(&cfg(), "2026-01-01T00:00:00Z")?;
        store.insert_report(run_id, &report("1", true), Some("fp-1"))?;
        store.insert_report(run_id, &report("2", false), Some("fp-2"))?;
        let summary = serde_json::json!({"questions": 2});
        store.finalize_run(run_id, "2026-01-01T00:01:00Z", "completed")?;
        assert_eq!(store.run_summary(run_id)?, None);
        store.attach_summary(run_id, &summary)?;

        let runs = store.recent_runs(None, 10)?;
        assert_eq!(runs.len(), 1);
        let r = &runs[0];
        assert_eq!((r.questions, r.evaluated), (2, 1));
        assert_eq!(r.mean_row_f1, Some(0.5));
        assert_eq!(r.status, "completed");
        assert_eq!(store.run_summary(run_id)?, Some(summary));

        let attempts: i64 = store
            .conn()?
            .query_row("SELECT count(*) FROM attempts", [], |r| r.get(0))?;
        assert_eq!(attempts, 2);
        Ok(())
    }

    #[test]
    fn test_previous_status_by_fingerprint() -> anyhow::Result<()> {
        let store = Store::memory()?;
        store.init_schema()?;
        let first = store.create_run(&cfg(), "t0")?;
        store.insert_report(first, &report("1", true), Some("fp"))?;
        let second = store.create_run(&cfg(), "t1")?;
        assert_eq!(store.previous_status("fp", second)?.as_deref(), Some("evaluated"));
        assert_eq!(store.previous_status("fp", first)?, None);
        assert!(store.recent_runs(Some("other"), 5)?.is_empty());
        Ok(())
    }
}
